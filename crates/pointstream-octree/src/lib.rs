//! Octree geometry and point storage for pointstream.
//!
//! An [`OctreeGeometry`] is parsed once from a converted cloud's
//! `metadata.json` and shared read-only by every thread; each
//! [`OctreeGeometryNode`] carries its own residency state, which the loader,
//! the eviction cache and the render front-end move it through.

pub mod geometry;
pub mod metadata;
pub mod node;
pub mod source;
pub mod writer;

pub use geometry::{NodeDesc, OctreeGeometry, OctreeGeometryBuilder};
pub use metadata::{load, OctreeMetadata, METADATA_FILE};
pub use node::{ByteRange, GeometryId, NodeId, NodeKey, NodeState, OctreeGeometryNode, PointPayload};
pub use source::{FilePointSource, PointSource, POINTS_FILE};
pub use writer::{OctreeWriter, WriterNode};
