//! Octree node data structure and its residency state machine.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;
use pointstream_core::Aabb;
use serde::{Deserialize, Serialize};

/// Stable index of a node inside its [`OctreeGeometry`](crate::OctreeGeometry).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The root node always takes index 0.
    pub const ROOT: Self = Self(0);

    /// Index into the geometry's node table.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Process-unique identity of one built [`OctreeGeometry`](crate::OctreeGeometry).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GeometryId(u64);

impl GeometryId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity of a node across every geometry in the process.
///
/// [`NodeId`] is only unique within one geometry; anything shared between
/// geometries (the eviction cache) keys by this instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    pub geometry: GeometryId,
    pub id: NodeId,
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.geometry.0, self.id)
    }
}

/// Byte range of a node's payload inside the point store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub size: u64,
}

/// Residency of a node's host-memory point payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeState {
    /// No payload in host memory.
    #[default]
    Unloaded,
    /// A load request is queued or in flight.
    Loading,
    /// Payload is owned by the node.
    Loaded,
    /// Payload is parked in the eviction cache.
    Cached,
}

/// Host-memory point data of one node.
///
/// Positions are relative to the node's bounding box minimum and scaled by
/// the geometry's per-axis scale when drawn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub positions: Vec<[f32; 3]>,
    pub colors: Vec<[u8; 4]>,
}

impl PointPayload {
    /// Create a payload, padding missing colors with opaque white.
    pub fn new(positions: Vec<[f32; 3]>, mut colors: Vec<[u8; 4]>) -> Self {
        colors.resize(positions.len(), [255; 4]);
        Self { positions, colors }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Check if the payload holds no points.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Raw position bytes for buffer upload.
    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    /// Raw color bytes for buffer upload.
    pub fn color_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.colors)
    }

    /// Get memory usage in bytes.
    pub fn memory_usage(&self) -> usize {
        self.positions.len() * std::mem::size_of::<[f32; 3]>()
            + self.colors.len() * std::mem::size_of::<[u8; 4]>()
    }
}

#[derive(Default)]
struct Residency {
    state: NodeState,
    payload: Option<PointPayload>,
}

/// A single node of the octree.
///
/// Topology and bounds are fixed once the geometry is built. Residency is
/// guarded by the node's own lock; `created` mirrors whether the render
/// front-end currently holds GPU buffers for this node.
pub struct OctreeGeometryNode {
    geometry: GeometryId,
    id: NodeId,
    name: String,
    level: u32,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    bounds: Aabb,
    num_points: u32,
    location: Option<ByteRange>,
    residency: Mutex<Residency>,
    created: AtomicBool,
    failed_loads: AtomicU32,
}

impl OctreeGeometryNode {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        geometry: GeometryId,
        id: NodeId,
        name: String,
        level: u32,
        parent: Option<NodeId>,
        bounds: Aabb,
        num_points: u32,
        location: Option<ByteRange>,
    ) -> Self {
        Self {
            geometry,
            id,
            name,
            level,
            parent,
            children: Vec::new(),
            bounds,
            num_points,
            location,
            residency: Mutex::new(Residency::default()),
            created: AtomicBool::new(false),
            failed_loads: AtomicU32::new(0),
        }
    }

    pub(crate) fn push_child(&mut self, child: NodeId) {
        self.children.push(child);
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Geometry this node belongs to.
    pub fn geometry(&self) -> GeometryId {
        self.geometry
    }

    pub fn key(&self) -> NodeKey {
        NodeKey {
            geometry: self.geometry,
            id: self.id,
        }
    }

    /// Hierarchy name (e.g. `r`, `r0`, `r05`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Depth in the tree; the root is level 0.
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Bounding box in octree-local coordinates.
    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    pub fn num_points(&self) -> u32 {
        self.num_points
    }

    /// Where the payload lives in the point store, if anywhere.
    pub fn location(&self) -> Option<ByteRange> {
        self.location
    }

    /// Current residency state.
    pub fn state(&self) -> NodeState {
        self.residency.lock().state
    }

    /// Whether the node owns its host-memory payload.
    pub fn is_loaded(&self) -> bool {
        self.state() == NodeState::Loaded
    }

    /// Whether the render front-end holds GPU buffers for this node.
    pub fn is_created(&self) -> bool {
        self.created.load(Ordering::Acquire)
    }

    /// Record GPU buffer creation or release. Only the render front-end calls this.
    pub fn set_created(&self, created: bool) {
        self.created.store(created, Ordering::Release);
    }

    /// Number of failed load attempts so far.
    pub fn failed_loads(&self) -> u32 {
        self.failed_loads.load(Ordering::Relaxed)
    }

    /// `Unloaded -> Loading`. Returns `false` if the node is in any other state.
    pub fn begin_load(&self) -> bool {
        let mut residency = self.residency.lock();
        if residency.state != NodeState::Unloaded {
            return false;
        }
        residency.state = NodeState::Loading;
        true
    }

    /// `Loading -> Loaded`, taking ownership of the payload.
    ///
    /// Returns `false` (dropping the payload) if the load was abandoned meanwhile.
    pub fn finish_load(&self, payload: PointPayload) -> bool {
        let mut residency = self.residency.lock();
        if residency.state != NodeState::Loading {
            return false;
        }
        residency.state = NodeState::Loaded;
        residency.payload = Some(payload);
        true
    }

    /// `Loading -> Unloaded` after a failed or abandoned load.
    pub fn abort_load(&self, failed: bool) {
        let mut residency = self.residency.lock();
        if residency.state == NodeState::Loading {
            residency.state = NodeState::Unloaded;
        }
        if failed {
            self.failed_loads.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `Loaded -> Cached`: hand the payload to the eviction cache.
    pub fn park(&self) -> Option<PointPayload> {
        let mut residency = self.residency.lock();
        if residency.state != NodeState::Loaded {
            return None;
        }
        residency.state = NodeState::Cached;
        residency.payload.take()
    }

    /// `Cached -> Loaded`: take the payload back from the eviction cache.
    ///
    /// Returns the payload untouched if the node is not parked.
    pub fn restore(&self, payload: PointPayload) -> Result<(), PointPayload> {
        let mut residency = self.residency.lock();
        if residency.state != NodeState::Cached {
            return Err(payload);
        }
        residency.state = NodeState::Loaded;
        residency.payload = Some(payload);
        Ok(())
    }

    /// `Cached -> Unloaded`: the cache dropped the payload.
    pub fn evict(&self) {
        let mut residency = self.residency.lock();
        if residency.state == NodeState::Cached {
            residency.state = NodeState::Unloaded;
        }
    }

    /// Run `f` against the payload while holding the node lock.
    ///
    /// Returns `None` when the node is not loaded.
    pub fn with_payload<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&PointPayload) -> R,
    {
        let residency = self.residency.lock();
        residency.payload.as_ref().map(f)
    }
}

impl fmt::Debug for OctreeGeometryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OctreeGeometryNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("level", &self.level)
            .field("num_points", &self.num_points)
            .field("state", &self.state())
            .field("created", &self.is_created())
            .finish_non_exhaustive()
    }
}
