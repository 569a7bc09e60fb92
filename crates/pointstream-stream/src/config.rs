//! Streaming configuration and the hot-swappable traversal knobs.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use pointstream_core::constants::{
    DEFAULT_CACHE_POINT_BUDGET, DEFAULT_MAX_NODES_TO_LOAD, DEFAULT_MAX_NODES_TO_RENDER,
    DEFAULT_MIN_NODE_SIZE, DEFAULT_POINT_BUDGET,
};
use serde::{Deserialize, Serialize};

/// Configuration for point-cloud streaming behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Maximum total points in the render set per tick.
    pub point_budget: u64,
    /// Maximum points parked in the eviction cache.
    pub cache_point_budget: u64,
    /// Maximum load requests issued per tick.
    pub max_nodes_to_load: usize,
    /// Maximum nodes newly created (GPU buffers) per tick.
    pub max_nodes_to_render: usize,
    /// Nodes whose largest extent is below this (world units) are not subdivided.
    pub min_node_size: f32,
    /// Number of concurrent load operations.
    pub loader_threads: usize,
    /// Delay between traversal ticks in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            point_budget: DEFAULT_POINT_BUDGET,
            cache_point_budget: DEFAULT_CACHE_POINT_BUDGET,
            max_nodes_to_load: DEFAULT_MAX_NODES_TO_LOAD,
            max_nodes_to_render: DEFAULT_MAX_NODES_TO_RENDER,
            min_node_size: DEFAULT_MIN_NODE_SIZE,
            loader_threads: 4,
            tick_interval_ms: 16,
        }
    }
}

impl StreamingConfig {
    /// Traversal knobs derived from this config.
    pub fn traversal(&self) -> TraversalSettings {
        TraversalSettings {
            point_budget: self.point_budget,
            max_nodes_to_load: self.max_nodes_to_load,
            max_nodes_to_render: self.max_nodes_to_render,
            min_node_size: self.min_node_size,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// Snapshot of the knobs a single traversal tick runs with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraversalSettings {
    pub point_budget: u64,
    pub max_nodes_to_load: usize,
    pub max_nodes_to_render: usize,
    pub min_node_size: f32,
}

impl Default for TraversalSettings {
    fn default() -> Self {
        StreamingConfig::default().traversal()
    }
}

/// Lock-free home of the traversal knobs.
///
/// Setters may run on any thread; the traverser snapshots the values at the
/// start of each tick, so a change lands on the next tick at the latest.
#[derive(Debug)]
pub struct TraversalSettingsCell {
    point_budget: AtomicU64,
    max_nodes_to_load: AtomicUsize,
    max_nodes_to_render: AtomicUsize,
    min_node_size_bits: AtomicU32,
}

impl TraversalSettingsCell {
    pub fn new(settings: TraversalSettings) -> Self {
        Self {
            point_budget: AtomicU64::new(settings.point_budget),
            max_nodes_to_load: AtomicUsize::new(settings.max_nodes_to_load),
            max_nodes_to_render: AtomicUsize::new(settings.max_nodes_to_render),
            min_node_size_bits: AtomicU32::new(settings.min_node_size.to_bits()),
        }
    }

    pub fn snapshot(&self) -> TraversalSettings {
        TraversalSettings {
            point_budget: self.point_budget.load(Ordering::Relaxed),
            max_nodes_to_load: self.max_nodes_to_load.load(Ordering::Relaxed),
            max_nodes_to_render: self.max_nodes_to_render.load(Ordering::Relaxed),
            min_node_size: f32::from_bits(self.min_node_size_bits.load(Ordering::Relaxed)),
        }
    }

    pub fn set_point_budget(&self, budget: u64) {
        self.point_budget.store(budget, Ordering::Relaxed);
    }

    pub fn set_per_frame_node_counts(&self, load_cap: usize, render_cap: usize) {
        self.max_nodes_to_load.store(load_cap, Ordering::Relaxed);
        self.max_nodes_to_render.store(render_cap, Ordering::Relaxed);
    }

    pub fn set_min_node_size(&self, size: f32) {
        self.min_node_size_bits.store(size.to_bits(), Ordering::Relaxed);
    }
}

impl Default for TraversalSettingsCell {
    fn default() -> Self {
        Self::new(TraversalSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_renderer_defaults() {
        let config = StreamingConfig::default();
        assert_eq!(config.point_budget, 1_000_000);
        assert_eq!(config.cache_point_budget, 5_000_000);
        assert_eq!(config.max_nodes_to_load, 10);
        assert_eq!(config.max_nodes_to_render, 30);
        assert_eq!(config.tick_interval(), Duration::from_millis(16));
    }

    #[test]
    fn cell_applies_setters() {
        let cell = TraversalSettingsCell::default();
        cell.set_point_budget(42);
        cell.set_per_frame_node_counts(1, 2);
        cell.set_min_node_size(0.25);

        let settings = cell.snapshot();
        assert_eq!(settings.point_budget, 42);
        assert_eq!(settings.max_nodes_to_load, 1);
        assert_eq!(settings.max_nodes_to_render, 2);
        assert!((settings.min_node_size - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: StreamingConfig = serde_json::from_str(r#"{ "point_budget": 500 }"#).unwrap();
        assert_eq!(config.point_budget, 500);
        assert_eq!(config.max_nodes_to_render, 30);
    }
}
