//! Node priority scoring.
//!
//! The score decides traversal order, load order and, through the point
//! budget, which nodes make it into the render set.

use std::cmp::Ordering;

use pointstream_octree::NodeId;

/// Per-node measurements a scoring function sees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityInput {
    /// Camera to box center distance, local units.
    pub distance: f32,
    /// On-screen radius in pixels; infinite when the camera is inside the box.
    pub projected_size: f32,
    /// Largest box extent in world units.
    pub world_size: f32,
    /// Tree depth; the root is 0.
    pub level: u32,
    pub num_points: u32,
}

/// Tunable scoring function.
pub trait NodePriority: Send + Sync {
    /// Higher scores are visited, loaded and rendered first.
    fn score(&self, input: &PriorityInput) -> f32;

    /// Whether the traversal descends into the node's children.
    fn should_expand(&self, input: &PriorityInput, min_node_size: f32) -> bool {
        input.world_size >= min_node_size
    }
}

/// `size_weight * projected_size - distance_weight * distance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefaultPriority {
    pub size_weight: f32,
    pub distance_weight: f32,
    /// Nodes projecting smaller than this many pixels are not expanded.
    pub min_projected_size: f32,
}

impl Default for DefaultPriority {
    fn default() -> Self {
        Self {
            size_weight: 1.0,
            distance_weight: 0.0,
            min_projected_size: 0.0,
        }
    }
}

impl NodePriority for DefaultPriority {
    fn score(&self, input: &PriorityInput) -> f32 {
        self.size_weight * input.projected_size - self.distance_weight * input.distance
    }

    fn should_expand(&self, input: &PriorityInput, min_node_size: f32) -> bool {
        input.world_size >= min_node_size && input.projected_size >= self.min_projected_size
    }
}

/// A node waiting in the traversal heap.
///
/// Ordered so that a max-heap pops the higher score first, then the closer
/// node, then the shallower node, then the lower id.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub id: NodeId,
    pub score: f32,
    pub distance: f32,
    pub level: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.distance.total_cmp(&self.distance))
            .then_with(|| other.level.cmp(&self.level))
            .then_with(|| other.id.cmp(&self.id))
    }
}
