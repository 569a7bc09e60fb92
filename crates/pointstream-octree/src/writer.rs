//! Writes a converted cloud directory (`metadata.json` + `octree.bin`).
//!
//! Used to produce fixtures and demo clouds; the full conversion pipeline
//! lives outside this workspace.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use glam::Vec3;
use pointstream_core::{Aabb, Error, Result};

use crate::metadata::{HierarchyNode, OctreeMetadata, METADATA_FILE, METADATA_VERSION};
use crate::node::PointPayload;
use crate::source::POINTS_FILE;

/// In-memory node handed to [`OctreeWriter`].
#[derive(Debug, Clone)]
pub struct WriterNode {
    pub name: String,
    pub bounds: Aabb,
    pub payload: PointPayload,
    pub children: Vec<WriterNode>,
}

impl WriterNode {
    pub fn new(name: impl Into<String>, bounds: Aabb, payload: PointPayload) -> Self {
        Self {
            name: name.into(),
            bounds,
            payload,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }
}

/// Serializes a node tree into the on-disk layout read by
/// [`metadata::load`](crate::metadata::load) and [`FilePointSource`](crate::FilePointSource).
#[derive(Debug, Clone)]
pub struct OctreeWriter {
    scale: Vec3,
    offset: Vec3,
    spacing: f32,
}

impl OctreeWriter {
    pub fn new(scale: Vec3, offset: Vec3) -> Self {
        Self {
            scale,
            offset,
            spacing: 0.0,
        }
    }

    pub fn with_spacing(mut self, spacing: f32) -> Self {
        self.spacing = spacing;
        self
    }

    /// Write `root` into `dir`, creating it if needed. Returns the descriptor path.
    pub fn write(&self, dir: impl AsRef<Path>, root: &WriterNode) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let mut points = BufWriter::new(fs::File::create(dir.join(POINTS_FILE))?);
        let mut cursor = 0u64;
        let hierarchy = Self::write_node(root, &mut points, &mut cursor)?;
        points.flush()?;

        let metadata = OctreeMetadata {
            version: METADATA_VERSION.to_string(),
            scale: self.scale.to_array(),
            offset: self.offset.to_array(),
            spacing: self.spacing,
            hierarchy,
        };
        let metadata_path = dir.join(METADATA_FILE);
        fs::write(&metadata_path, metadata.to_json()?)?;
        Ok(metadata_path)
    }

    fn write_node(
        node: &WriterNode,
        out: &mut impl Write,
        cursor: &mut u64,
    ) -> Result<HierarchyNode> {
        let num_points = u32::try_from(node.payload.len())
            .map_err(|_| Error::InvalidData(format!("node {} has too many points", node.name)))?;

        let (byte_offset, byte_size) = if node.payload.is_empty() {
            (0, 0)
        } else {
            let bytes = bincode::serialize(&node.payload)
                .map_err(|e| Error::Serialization(e.to_string()))?;
            out.write_all(&bytes)?;
            let offset = *cursor;
            *cursor += bytes.len() as u64;
            (offset, bytes.len() as u64)
        };

        let children = node
            .children
            .iter()
            .map(|child| Self::write_node(child, out, cursor))
            .collect::<Result<Vec<_>>>()?;

        Ok(HierarchyNode {
            name: node.name.clone(),
            bounds: node.bounds.into(),
            num_points,
            byte_offset,
            byte_size,
            children,
        })
    }
}
