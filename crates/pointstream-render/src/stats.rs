//! Per-frame statistics and renderer diagnostics.

use serde::Serialize;

use crate::converter::ConversionStatus;

/// What one [`render_frame`](crate::PointCloudRenderer::render_frame) did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    /// Points drawn this frame.
    pub visible_points: u64,
    /// Nodes (or the decimated preview) drawn this frame.
    pub visible_nodes: usize,
    /// Node buffers created this frame.
    pub created: usize,
    /// Node buffers released by the delete pass.
    pub disposed: usize,
    /// Render entries skipped because their payload had already been parked.
    pub skipped: usize,
    /// Render entries whose buffer creation failed.
    pub failed: usize,
}

/// Snapshot of renderer, loader and cache state for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Diagnostics {
    pub streaming: bool,
    pub visible_points: u64,
    pub visible_nodes: usize,
    pub nodes_loaded: u32,
    pub nodes_loading: u32,
    pub queued_loads: usize,
    pub failed_loads: u64,
    pub cache_size: usize,
    pub cache_points: u64,
    pub converter_status: ConversionStatus,
    pub converter_progress: f32,
    pub traverser_ticks: u64,
    pub frames: u64,
    pub created_last_frame: usize,
    pub disposed_last_frame: usize,
}
