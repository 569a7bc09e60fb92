//! Point payload sources.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use pointstream_core::{Error, Result};

use crate::node::{OctreeGeometryNode, PointPayload};

/// File name of the point store inside a converted cloud directory.
pub const POINTS_FILE: &str = "octree.bin";

/// Storage that can produce a node's host-memory point payload.
///
/// Implementations are called concurrently from loader threads.
pub trait PointSource: Send + Sync {
    /// Read the payload of `node`.
    fn load_points(&self, node: &OctreeGeometryNode) -> Result<PointPayload>;
}

/// Reads bincode-encoded payloads from a single `octree.bin` at each node's byte range.
#[derive(Debug, Clone)]
pub struct FilePointSource {
    path: PathBuf,
}

impl FilePointSource {
    /// Open the point store of a converted cloud directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(POINTS_FILE);
        if !path.is_file() {
            return Err(Error::NotFound(path.display().to_string()));
        }
        Ok(Self { path })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PointSource for FilePointSource {
    fn load_points(&self, node: &OctreeGeometryNode) -> Result<PointPayload> {
        let Some(range) = node.location() else {
            return Ok(PointPayload::default());
        };
        let mut file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let end = range.offset.checked_add(range.size);
        if !matches!(end, Some(end) if end <= file_len) {
            return Err(Error::InvalidData(format!(
                "node {} byte range {}+{} exceeds point store of {file_len} bytes",
                node.name(),
                range.offset,
                range.size
            )));
        }
        let size = usize::try_from(range.size)
            .map_err(|_| Error::InvalidData(format!("node {} byte range too large", node.name())))?;

        file.seek(SeekFrom::Start(range.offset))?;
        let mut bytes = vec![0u8; size];
        file.read_exact(&mut bytes)?;

        let payload: PointPayload =
            bincode::deserialize(&bytes).map_err(|e| Error::Serialization(e.to_string()))?;
        if payload.len() != node.num_points() as usize || payload.colors.len() != payload.len() {
            return Err(Error::InvalidData(format!(
                "node {} holds {} points, descriptor says {}",
                node.name(),
                payload.len(),
                node.num_points()
            )));
        }
        Ok(payload)
    }
}
