//! Periodic traversal on a dedicated thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use pointstream_core::{Error, Result};
use pointstream_octree::NodeId;

use crate::config::{TraversalSettings, TraversalSettingsCell};
use crate::engine::{TickReport, TraversalEngine};
use crate::exchange::QueueExchange;
use crate::view::ViewState;

/// Counts from the most recent tick, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub generation: u64,
    pub rendered: usize,
    pub render_points: u64,
    pub deleted: usize,
    pub load_requests: usize,
    pub culled: usize,
}

impl From<&TickReport> for TickSummary {
    fn from(report: &TickReport) -> Self {
        Self {
            generation: report.generation,
            rendered: report.render.len(),
            render_points: report.render_points,
            deleted: report.delete.len(),
            load_requests: report.load_requests.len(),
            culled: report.culled,
        }
    }
}

/// State shared between the handle and the tick thread.
#[derive(Clone)]
struct TickShared {
    settings: Arc<TraversalSettingsCell>,
    view: Arc<RwLock<Option<ViewState>>>,
    ticks: Arc<AtomicU64>,
    last: Arc<Mutex<TickSummary>>,
}

impl TickShared {
    /// Run one tick if a camera has been set.
    fn tick(&self, engine: &mut TraversalEngine) -> Option<TickReport> {
        let view = (*self.view.read())?;
        let settings = self.settings.snapshot();
        let _span = tracing::trace_span!("traverser_tick").entered();
        let report = engine.tick(&view, &settings);
        self.ticks.fetch_add(1, Ordering::Relaxed);
        *self.last.lock() = TickSummary::from(&report);
        Some(report)
    }
}

struct TickThread {
    stop_tx: Sender<()>,
    handle: JoinHandle<TraversalEngine>,
}

/// Owns a [`TraversalEngine`] and ticks it every `interval` once started.
///
/// Setters only touch shared atomics or the camera slot, so they may be
/// called from the render thread at any time; they take effect on the next tick.
pub struct Traverser {
    shared: TickShared,
    exchange: Arc<QueueExchange<NodeId>>,
    interval: Duration,
    engine: Option<TraversalEngine>,
    thread: Option<TickThread>,
}

impl Traverser {
    pub fn new(engine: TraversalEngine, settings: TraversalSettings, interval: Duration) -> Self {
        Self {
            shared: TickShared {
                settings: Arc::new(TraversalSettingsCell::new(settings)),
                view: Arc::new(RwLock::new(None)),
                ticks: Arc::new(AtomicU64::new(0)),
                last: Arc::new(Mutex::new(TickSummary::default())),
            },
            exchange: Arc::clone(engine.exchange()),
            interval: interval.max(Duration::from_millis(1)),
            engine: Some(engine),
            thread: None,
        }
    }

    /// Start periodic ticking. Returns `Ok(false)` if already running.
    pub fn start(&mut self) -> Result<bool> {
        let Some(mut engine) = self.engine.take() else {
            return Ok(false);
        };
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let shared = self.shared.clone();
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("octree-traverser".to_string())
            .spawn(move || {
                Self::tick_loop(&mut engine, &shared, &stop_rx, interval);
                engine
            })
            .map_err(|e| Error::Worker(format!("failed to spawn traverser thread: {e}")))?;

        tracing::info!(?interval, "traverser started");
        self.thread = Some(TickThread { stop_tx, handle });
        Ok(true)
    }

    fn tick_loop(
        engine: &mut TraversalEngine,
        shared: &TickShared,
        stop_rx: &Receiver<()>,
        interval: Duration,
    ) {
        let ticker = channel::tick(interval);
        loop {
            crossbeam::select! {
                recv(stop_rx) -> _ => return,
                recv(ticker) -> _ => {
                    shared.tick(engine);
                }
            }
        }
    }

    /// Stop ticking and wait for the tick thread to exit.
    ///
    /// The engine is kept, so the traverser can be started again.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // Ignore errors - the thread may already be gone.
        let _ = thread.stop_tx.send(());
        match thread.handle.join() {
            Ok(engine) => self.engine = Some(engine),
            Err(_) => tracing::error!("traverser thread panicked"),
        }
        tracing::info!(ticks = self.tick_count(), "traverser stopped");
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Run a single tick on the calling thread. Only possible while stopped.
    pub fn step(&mut self) -> Option<TickReport> {
        let engine = self.engine.as_mut()?;
        self.shared.tick(engine)
    }

    /// Update the view used from the next tick on.
    pub fn set_camera(&self, view: ViewState) {
        *self.shared.view.write() = Some(view);
    }

    /// Forget the camera; ticks are skipped until a new one is set.
    pub fn clear_camera(&self) {
        *self.shared.view.write() = None;
    }

    pub fn set_point_budget(&self, budget: u64) {
        self.shared.settings.set_point_budget(budget);
    }

    pub fn set_per_frame_node_counts(&self, load_cap: usize, render_cap: usize) {
        self.shared
            .settings
            .set_per_frame_node_counts(load_cap, render_cap);
    }

    pub fn set_min_node_size(&self, size: f32) {
        self.shared.settings.set_min_node_size(size);
    }

    pub fn settings(&self) -> TraversalSettings {
        self.shared.settings.snapshot()
    }

    /// Ticks run so far (ticks skipped for lack of a camera are not counted).
    pub fn tick_count(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }

    pub fn last_tick(&self) -> TickSummary {
        *self.shared.last.lock()
    }

    /// Exchange the render thread swaps queue pairs from.
    pub fn exchange(&self) -> &Arc<QueueExchange<NodeId>> {
        &self.exchange
    }
}

impl Drop for Traverser {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Traverser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Traverser")
            .field("running", &self.is_running())
            .field("ticks", &self.tick_count())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LruCache;
    use crate::exchange::QueuePair;
    use crate::loader::LoadQueue;
    use crate::testing::{full_octree, RecordingQueue};
    use glam::Vec3;
    use std::f32::consts::FRAC_PI_2;
    use std::time::Instant;

    fn traverser() -> (Traverser, Arc<RecordingQueue>) {
        let geometry = full_octree(1, 16.0, 10);
        let queue = Arc::new(RecordingQueue::default());
        let engine = TraversalEngine::new(
            geometry,
            Arc::clone(&queue) as Arc<dyn LoadQueue>,
            Arc::new(LruCache::new(1_000)),
            Arc::new(QueueExchange::new()),
        );
        let settings = TraversalSettings {
            point_budget: 1_000,
            ..TraversalSettings::default()
        };
        (
            Traverser::new(engine, settings, Duration::from_millis(2)),
            queue,
        )
    }

    fn view() -> ViewState {
        ViewState::unbounded(Vec3::new(8.0, 8.0, 40.0), FRAC_PI_2, 600.0)
    }

    #[test]
    fn no_camera_no_tick() {
        let (mut traverser, queue) = traverser();
        assert!(traverser.step().is_none());
        assert_eq!(traverser.tick_count(), 0);
        assert!(queue.take_requests().is_empty());
    }

    #[test]
    fn settings_apply_on_next_tick() {
        let (mut traverser, queue) = traverser();
        traverser.set_camera(view());
        traverser.set_per_frame_node_counts(2, 5);
        traverser.set_min_node_size(0.5);
        assert_eq!(traverser.settings().max_nodes_to_render, 5);

        let report = traverser.step().unwrap();
        assert_eq!(report.load_requests.len(), 2);
        assert_eq!(queue.take_requests().len(), 2);
        assert_eq!(traverser.last_tick().load_requests, 2);

        queue.complete_all();
        traverser.set_point_budget(0);
        let report = traverser.step().unwrap();
        assert!(report.render.is_empty());
        assert_eq!(traverser.tick_count(), 2);
    }

    #[test]
    fn thread_ticks_until_stopped() {
        let (mut traverser, queue) = traverser();
        traverser.set_camera(view());
        assert!(traverser.start().unwrap());
        assert!(!traverser.start().unwrap());
        assert!(traverser.is_running());
        assert!(traverser.step().is_none());

        let start = Instant::now();
        while traverser.tick_count() < 3 {
            assert!(start.elapsed() < Duration::from_secs(5), "traverser never ticked");
            std::thread::sleep(Duration::from_millis(1));
        }
        traverser.stop();
        assert!(!traverser.is_running());

        let ticks = traverser.tick_count();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(traverser.tick_count(), ticks);

        // Everything was requested exactly once across the ticks.
        assert_eq!(queue.take_requests().len(), 9);

        let mut current = QueuePair::default();
        assert!(traverser.exchange().swap(&mut current));
        assert_eq!(current.generation, ticks);

        // The engine came back and can be driven inline or restarted.
        assert!(traverser.step().is_some());
        assert!(traverser.start().unwrap());
    }
}
