//! Octree descriptor (`metadata.json`) parsing.

use std::path::Path;

use glam::Vec3;
use pointstream_core::{Aabb, Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::geometry::{NodeDesc, OctreeGeometry, OctreeGeometryBuilder};
use crate::node::{ByteRange, NodeId};

/// File name of the descriptor inside a converted cloud directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Current descriptor version.
pub const METADATA_VERSION: &str = "1.0";

/// Serialized bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundsDesc {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl From<Aabb> for BoundsDesc {
    fn from(aabb: Aabb) -> Self {
        Self {
            min: aabb.min.to_array(),
            max: aabb.max.to_array(),
        }
    }
}

impl From<BoundsDesc> for Aabb {
    fn from(desc: BoundsDesc) -> Self {
        Self::new(Vec3::from(desc.min), Vec3::from(desc.max))
    }
}

/// One node of the serialized hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyNode {
    pub name: String,
    pub bounds: BoundsDesc,
    pub num_points: u32,
    #[serde(default)]
    pub byte_offset: u64,
    #[serde(default)]
    pub byte_size: u64,
    #[serde(default)]
    pub children: Vec<HierarchyNode>,
}

/// Top-level octree descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OctreeMetadata {
    pub version: String,
    pub scale: [f32; 3],
    pub offset: [f32; 3],
    #[serde(default)]
    pub spacing: f32,
    pub hierarchy: HierarchyNode,
}

impl OctreeMetadata {
    /// Parse a descriptor from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Metadata(e.to_string()))
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Validate and convert into a geometry.
    pub fn into_geometry(self) -> Result<OctreeGeometry> {
        let scale = Vec3::from(self.scale);
        if scale.cmple(Vec3::ZERO).any() || !scale.is_finite() {
            return Err(Error::Metadata(format!("invalid scale {scale}")));
        }

        let mut builder =
            OctreeGeometry::builder(scale, Vec3::from(self.offset)).spacing(self.spacing);

        check_byte_range(&self.hierarchy)?;
        let root = builder.add_root(node_desc(&self.hierarchy))?;
        // Depth-first over the hierarchy, parents always added before children.
        let mut stack: Vec<(NodeId, &HierarchyNode)> = vec![(root, &self.hierarchy)];
        while let Some((id, node)) = stack.pop() {
            for child in &node.children {
                let child_id = add_child(&mut builder, id, child)?;
                stack.push((child_id, child));
            }
        }

        builder.build()
    }
}

fn node_desc(node: &HierarchyNode) -> NodeDesc {
    let desc = NodeDesc::new(node.name.clone(), node.bounds.into(), node.num_points);
    if node.byte_size > 0 {
        desc.with_location(ByteRange {
            offset: node.byte_offset,
            size: node.byte_size,
        })
    } else {
        desc
    }
}

fn check_byte_range(node: &HierarchyNode) -> Result<()> {
    if node.num_points > 0 && node.byte_size == 0 {
        return Err(Error::Metadata(format!(
            "node '{}' has {} points but no byte range",
            node.name, node.num_points
        )));
    }
    Ok(())
}

fn add_child(
    builder: &mut OctreeGeometryBuilder,
    parent: NodeId,
    node: &HierarchyNode,
) -> Result<NodeId> {
    check_byte_range(node)?;
    builder.add_child(parent, node_desc(node))
}

/// Read and parse an octree descriptor from disk.
pub fn load(path: impl AsRef<Path>) -> Result<OctreeGeometry> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
        _ => Error::Io(e),
    })?;
    let metadata = OctreeMetadata::from_json(&text)?;
    debug!(version = %metadata.version, "parsed octree descriptor");
    let geometry = metadata.into_geometry()?;
    info!(
        "Loaded octree {}: {} nodes, {} points, depth {}",
        path.display(),
        geometry.len(),
        geometry.total_points(),
        geometry.depth()
    );
    Ok(geometry)
}
