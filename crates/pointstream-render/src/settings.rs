//! Hot-reloadable renderer settings and their dirty tracking.

use pointstream_stream::StreamingConfig;
use serde::{Deserialize, Serialize};

/// Everything a host may change while the renderer runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    #[serde(flatten)]
    pub streaming: StreamingConfig,
    /// Point sprite size in pixels.
    pub point_size: f32,
    /// Draw the decimated preview instead of the streamed octree.
    pub show_decimated_cloud: bool,
    /// Point count requested for the decimated preview.
    pub decimated_cloud_size: usize,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            streaming: StreamingConfig::default(),
            point_size: 1.5,
            show_decimated_cloud: false,
            decimated_cloud_size: 1_000_000,
        }
    }
}

/// Values whose change must be forwarded to the streaming core.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SettingsChanges {
    pub point_budget: Option<u64>,
    pub cache_point_budget: Option<u64>,
    /// `(max_nodes_to_load, max_nodes_to_render)`.
    pub node_counts: Option<(usize, usize)>,
    pub min_node_size: Option<f32>,
}

impl SettingsChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Last values pushed to the streaming core.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsTracker {
    point_budget: u64,
    cache_point_budget: u64,
    max_nodes_to_load: usize,
    max_nodes_to_render: usize,
    min_node_size: f32,
}

impl SettingsTracker {
    /// Start tracking from values already applied.
    pub fn new(applied: &StreamingConfig) -> Self {
        Self {
            point_budget: applied.point_budget,
            cache_point_budget: applied.cache_point_budget,
            max_nodes_to_load: applied.max_nodes_to_load,
            max_nodes_to_render: applied.max_nodes_to_render,
            min_node_size: applied.min_node_size,
        }
    }

    /// Report what differs from the last applied values and remember `current`
    /// as applied. A non-positive minimum node size is never applied.
    pub fn diff(&mut self, current: &StreamingConfig) -> SettingsChanges {
        let mut changes = SettingsChanges::default();

        if current.point_budget != self.point_budget {
            self.point_budget = current.point_budget;
            changes.point_budget = Some(current.point_budget);
        }
        if current.cache_point_budget != self.cache_point_budget {
            self.cache_point_budget = current.cache_point_budget;
            changes.cache_point_budget = Some(current.cache_point_budget);
        }
        if current.max_nodes_to_load != self.max_nodes_to_load
            || current.max_nodes_to_render != self.max_nodes_to_render
        {
            self.max_nodes_to_load = current.max_nodes_to_load;
            self.max_nodes_to_render = current.max_nodes_to_render;
            changes.node_counts = Some((current.max_nodes_to_load, current.max_nodes_to_render));
        }
        if current.min_node_size.to_bits() != self.min_node_size.to_bits()
            && current.min_node_size > 0.0
        {
            self.min_node_size = current.min_node_size;
            changes.min_node_size = Some(current.min_node_size);
        }

        changes
    }
}
