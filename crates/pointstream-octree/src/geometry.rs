//! Octree geometry: global transform plus the node table.

use std::sync::Arc;

use glam::Vec3;
use hashbrown::HashSet;
use pointstream_core::constants::MAX_CHILDREN;
use pointstream_core::{Aabb, Error, Result};

use crate::node::{ByteRange, GeometryId, NodeId, OctreeGeometryNode};

/// Description of a node handed to [`OctreeGeometryBuilder`].
#[derive(Debug, Clone)]
pub struct NodeDesc {
    pub name: String,
    pub bounds: Aabb,
    pub num_points: u32,
    pub location: Option<ByteRange>,
}

impl NodeDesc {
    pub fn new(name: impl Into<String>, bounds: Aabb, num_points: u32) -> Self {
        Self {
            name: name.into(),
            bounds,
            num_points,
            location: None,
        }
    }

    pub fn with_location(mut self, location: ByteRange) -> Self {
        self.location = Some(location);
        self
    }
}

/// Shared, read-only octree geometry.
///
/// Nodes are stored in a flat table indexed by [`NodeId`]; the root is always
/// [`NodeId::ROOT`]. Node residency is the only mutable part.
pub struct OctreeGeometry {
    id: GeometryId,
    scale: Vec3,
    offset: Vec3,
    spacing: f32,
    nodes: Vec<Arc<OctreeGeometryNode>>,
}

impl OctreeGeometry {
    /// Start building a geometry with the given per-axis scale and offset.
    pub fn builder(scale: Vec3, offset: Vec3) -> OctreeGeometryBuilder {
        OctreeGeometryBuilder {
            id: GeometryId::next(),
            scale,
            offset,
            spacing: 0.0,
            nodes: Vec::new(),
            names: HashSet::new(),
        }
    }

    /// Process-unique identity; no two built geometries share one.
    pub fn id(&self) -> GeometryId {
        self.id
    }

    /// Per-axis position scale.
    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    /// Global offset added to node positions.
    pub fn offset(&self) -> Vec3 {
        self.offset
    }

    /// Point spacing at the root level.
    pub fn spacing(&self) -> f32 {
        self.spacing
    }

    pub fn root(&self) -> &Arc<OctreeGeometryNode> {
        &self.nodes[NodeId::ROOT.index()]
    }

    /// Look up a node by id.
    pub fn node(&self, id: NodeId) -> Option<&Arc<OctreeGeometryNode>> {
        self.nodes.get(id.index())
    }

    /// Bounds of the whole tree.
    pub fn bounds(&self) -> &Aabb {
        self.root().bounds()
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A geometry always has a root, so this only reports `false`.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sum of point counts over all nodes.
    pub fn total_points(&self) -> u64 {
        self.nodes.iter().map(|n| u64::from(n.num_points())).sum()
    }

    /// Deepest level in the tree.
    pub fn depth(&self) -> u32 {
        self.nodes.iter().map(|n| n.level()).max().unwrap_or(0)
    }

    /// Iterate over all nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<OctreeGeometryNode>> {
        self.nodes.iter()
    }
}

impl std::fmt::Debug for OctreeGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctreeGeometry")
            .field("scale", &self.scale)
            .field("offset", &self.offset)
            .field("nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

/// Incremental builder for [`OctreeGeometry`].
pub struct OctreeGeometryBuilder {
    id: GeometryId,
    scale: Vec3,
    offset: Vec3,
    spacing: f32,
    nodes: Vec<OctreeGeometryNode>,
    names: HashSet<String>,
}

impl OctreeGeometryBuilder {
    /// Set the root point spacing.
    pub fn spacing(mut self, spacing: f32) -> Self {
        self.spacing = spacing;
        self
    }

    /// Add the root node. Must be called exactly once, before any child.
    pub fn add_root(&mut self, desc: NodeDesc) -> Result<NodeId> {
        if !self.nodes.is_empty() {
            return Err(Error::Metadata("root node added twice".to_string()));
        }
        self.push(desc, None, 0)
    }

    /// Add a child under `parent`.
    pub fn add_child(&mut self, parent: NodeId, desc: NodeDesc) -> Result<NodeId> {
        let parent_node = self
            .nodes
            .get(parent.index())
            .ok_or_else(|| Error::Metadata(format!("unknown parent node {parent}")))?;
        if parent_node.children().len() >= MAX_CHILDREN {
            return Err(Error::Metadata(format!(
                "node '{}' has more than {MAX_CHILDREN} children",
                parent_node.name()
            )));
        }
        let level = parent_node.level() + 1;
        let id = self.push(desc, Some(parent), level)?;
        self.nodes[parent.index()].push_child(id);
        Ok(id)
    }

    fn push(&mut self, desc: NodeDesc, parent: Option<NodeId>, level: u32) -> Result<NodeId> {
        if !desc.bounds.is_valid() {
            return Err(Error::Metadata(format!(
                "node '{}' has inverted bounds",
                desc.name
            )));
        }
        if !self.names.insert(desc.name.clone()) {
            return Err(Error::Metadata(format!(
                "duplicate node name '{}'",
                desc.name
            )));
        }
        let id = u32::try_from(self.nodes.len())
            .map(NodeId)
            .map_err(|_| Error::Metadata("too many nodes".to_string()))?;
        self.nodes.push(OctreeGeometryNode::new(
            self.id,
            id,
            desc.name,
            level,
            parent,
            desc.bounds,
            desc.num_points,
            desc.location,
        ));
        Ok(id)
    }

    /// Finish the geometry. Fails if no root was added.
    pub fn build(self) -> Result<OctreeGeometry> {
        if self.nodes.is_empty() {
            return Err(Error::Metadata("octree has no root node".to_string()));
        }
        Ok(OctreeGeometry {
            id: self.id,
            scale: self.scale,
            offset: self.offset,
            spacing: self.spacing,
            nodes: self.nodes.into_iter().map(Arc::new).collect(),
        })
    }
}
