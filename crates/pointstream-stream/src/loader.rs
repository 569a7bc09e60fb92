//! Bounded, prioritized node loader.
//!
//! Requests are fire-and-forget: the traverser never waits on a load, it
//! observes completion through the node's residency state on a later tick.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use pointstream_core::{Error, Result};
use pointstream_octree::{OctreeGeometryNode, PointSource};

use crate::counters::{LoadCounters, LoaderStats};

/// Sink for load requests issued by the traversal.
pub trait LoadQueue: Send + Sync {
    /// Queue a load for `node` at `priority` (higher loads first).
    ///
    /// Returns `true` if a new request was accepted. Nodes that are not
    /// `Unloaded`, or a loader that has shut down, reject the request.
    fn request(&self, node: &Arc<OctreeGeometryNode>, priority: f32) -> bool;

    /// Re-rank requests still waiting for a worker.
    ///
    /// `rank` receives each queued node with its current priority and returns
    /// the new priority, or `None` to cancel the request; cancelled nodes go
    /// back to `Unloaded`. Loads already in flight are unaffected. Returns the
    /// number of cancelled requests.
    fn reprioritize(&self, rank: &mut dyn FnMut(&OctreeGeometryNode, f32) -> Option<f32>) -> usize;
}

struct PendingLoad {
    priority: f32,
    seq: u64,
    node: Arc<OctreeGeometryNode>,
}

impl PartialEq for PendingLoad {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for PendingLoad {}

impl PartialOrd for PendingLoad {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingLoad {
    /// Highest priority first; earlier requests first among equals.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct LoaderShared {
    source: Arc<dyn PointSource>,
    queue: Mutex<BinaryHeap<PendingLoad>>,
    counters: Arc<LoadCounters>,
    shutdown: AtomicBool,
    next_seq: AtomicU64,
}

impl LoaderShared {
    /// Load the highest-priority queued node, if any.
    fn run_next(&self) {
        let Some(pending) = self.queue.lock().pop() else {
            return;
        };
        let node = pending.node;
        if self.shutdown.load(Ordering::Acquire) {
            node.abort_load(false);
            self.counters.load_abandoned();
            return;
        }

        let _span = tracing::trace_span!("load_node", node = %node.id()).entered();
        self.counters.source_read();
        let result = self.source.load_points(&node);

        if self.shutdown.load(Ordering::Acquire) {
            node.abort_load(false);
            self.counters.load_abandoned();
            return;
        }

        match result {
            Ok(payload) => {
                if node.finish_load(payload) {
                    self.counters.load_finished(true);
                } else {
                    self.counters.load_abandoned();
                }
            }
            Err(e) => {
                node.abort_load(true);
                self.counters.load_finished(false);
                tracing::warn!(
                    node = %node.id(),
                    name = node.name(),
                    attempts = node.failed_loads(),
                    "failed to load node: {e}"
                );
            }
        }
    }
}

/// Worker pool that turns `Unloaded` nodes into `Loaded` ones.
///
/// At most `threads` loads run at once; queued requests are served highest
/// priority first.
pub struct NodeLoader {
    shared: Arc<LoaderShared>,
    pool: rayon::ThreadPool,
    threads: usize,
}

impl NodeLoader {
    pub fn new(
        source: Arc<dyn PointSource>,
        threads: usize,
        counters: Arc<LoadCounters>,
    ) -> Result<Self> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("node-loader-{i}"))
            .build()
            .map_err(|e| Error::Worker(e.to_string()))?;

        tracing::debug!(threads, "node loader started");

        Ok(Self {
            shared: Arc::new(LoaderShared {
                source,
                queue: Mutex::new(BinaryHeap::new()),
                counters,
                shutdown: AtomicBool::new(false),
                next_seq: AtomicU64::new(0),
            }),
            pool,
            threads,
        })
    }

    /// Maximum number of concurrent loads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Requests queued but not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn counters(&self) -> &Arc<LoadCounters> {
        &self.shared.counters
    }

    pub fn stats(&self) -> LoaderStats {
        self.shared.counters.snapshot()
    }

    /// No load is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.stats().nodes_loading == 0
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting requests.
    ///
    /// Queued requests are abandoned and their nodes reset to `Unloaded`;
    /// results of loads already in flight are discarded when they complete.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let abandoned: Vec<PendingLoad> = self.shared.queue.lock().drain().collect();
        for pending in &abandoned {
            pending.node.abort_load(false);
            self.shared.counters.load_abandoned();
        }
        tracing::debug!(abandoned = abandoned.len(), "node loader shut down");
    }
}

impl LoadQueue for NodeLoader {
    fn request(&self, node: &Arc<OctreeGeometryNode>, priority: f32) -> bool {
        if self.is_shut_down() || !node.begin_load() {
            return false;
        }
        self.shared.counters.load_queued();
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        self.shared.queue.lock().push(PendingLoad {
            priority,
            seq,
            node: Arc::clone(node),
        });

        let shared = Arc::clone(&self.shared);
        self.pool.spawn(move || shared.run_next());
        true
    }

    fn reprioritize(&self, rank: &mut dyn FnMut(&OctreeGeometryNode, f32) -> Option<f32>) -> usize {
        let mut queue = self.shared.queue.lock();
        if queue.is_empty() {
            return 0;
        }
        let mut kept = Vec::with_capacity(queue.len());
        let mut cancelled = 0;
        for mut pending in queue.drain() {
            if let Some(priority) = rank(&pending.node, pending.priority) {
                pending.priority = priority;
                kept.push(pending);
            } else {
                pending.node.abort_load(false);
                self.shared.counters.load_abandoned();
                cancelled += 1;
            }
        }
        *queue = BinaryHeap::from(kept);
        if cancelled > 0 {
            tracing::trace!(cancelled, queued = queue.len(), "load queue re-ranked");
        }
        cancelled
    }
}

impl Drop for NodeLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for NodeLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeLoader")
            .field("threads", &self.threads)
            .field("queued", &self.queued())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
