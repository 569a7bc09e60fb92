//! Core types, math, and errors for the pointstream point-cloud streamer.
//!
//! This crate provides the foundational pieces shared by every other crate:
//! - Bounding boxes and view frustums
//! - The engine-wide error type
//! - Default streaming budgets

pub mod error;
pub mod math;

pub use error::{Error, Result};
pub use math::{Aabb, Frustum};

/// Streaming-wide constants
pub mod constants {
    /// Maximum number of children of an octree node
    pub const MAX_CHILDREN: usize = 8;
    /// Default cap on points rendered per frame
    pub const DEFAULT_POINT_BUDGET: u64 = 1_000_000;
    /// Default cap on points kept in the eviction cache
    pub const DEFAULT_CACHE_POINT_BUDGET: u64 = 5_000_000;
    /// Default cap on load requests issued per traversal tick
    pub const DEFAULT_MAX_NODES_TO_LOAD: usize = 10;
    /// Default cap on GPU resources created per traversal tick
    pub const DEFAULT_MAX_NODES_TO_RENDER: usize = 30;
    /// Default minimum node size (world units) below which nodes are not subdivided
    pub const DEFAULT_MIN_NODE_SIZE: f32 = 1.0;
}
