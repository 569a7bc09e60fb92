//! Live load counters shared by the loader and the eviction cache.

use parking_lot::Mutex;

/// Snapshot of loader activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Nodes whose payload is in host memory (owned by a node or the cache).
    pub nodes_loaded: u32,
    /// Nodes queued or in flight.
    pub nodes_loading: u32,
    /// Loads that failed with an error.
    pub failed_loads: u64,
    /// Reads issued against the point source.
    pub source_reads: u64,
}

/// Counters guarded by a single lock so readers always see a consistent pair.
#[derive(Debug, Default)]
pub struct LoadCounters {
    inner: Mutex<LoaderStats>,
}

impl LoadCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> LoaderStats {
        *self.inner.lock()
    }

    pub(crate) fn load_queued(&self) {
        self.inner.lock().nodes_loading += 1;
    }

    pub(crate) fn source_read(&self) {
        self.inner.lock().source_reads += 1;
    }

    pub(crate) fn load_finished(&self, succeeded: bool) {
        let mut stats = self.inner.lock();
        stats.nodes_loading = stats.nodes_loading.saturating_sub(1);
        if succeeded {
            stats.nodes_loaded += 1;
        } else {
            stats.failed_loads += 1;
        }
    }

    /// A queued or in-flight load was dropped without a result.
    pub(crate) fn load_abandoned(&self) {
        let mut stats = self.inner.lock();
        stats.nodes_loading = stats.nodes_loading.saturating_sub(1);
    }

    /// A payload left host memory.
    pub(crate) fn payload_released(&self) {
        let mut stats = self.inner.lock();
        stats.nodes_loaded = stats.nodes_loaded.saturating_sub(1);
    }
}
