//! Fixtures shared by the unit tests of this crate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use glam::Vec3;
use parking_lot::Mutex;
use pointstream_core::{Aabb, Error, Result};
use pointstream_octree::{
    NodeDesc, NodeId, OctreeGeometry, OctreeGeometryNode, PointPayload, PointSource,
};

use crate::cache::LruCache;
use crate::exchange::{QueueExchange, QueuePair};
use crate::loader::LoadQueue;

pub fn payload_for(node: &OctreeGeometryNode) -> PointPayload {
    let n = node.num_points() as usize;
    PointPayload::new(vec![[0.0; 3]; n], Vec::new())
}

/// Full octree of `depth` levels below the root over `[0, size]^3`,
/// every node holding `points` points.
pub fn full_octree(depth: u32, size: f32, points: u32) -> Arc<OctreeGeometry> {
    fn add(
        builder: &mut pointstream_octree::OctreeGeometryBuilder,
        parent: NodeId,
        name: &str,
        bounds: Aabb,
        depth: u32,
        points: u32,
    ) {
        if depth == 0 {
            return;
        }
        for i in 0..8 {
            let child_name = format!("{name}{i}");
            let child_bounds = bounds.octant(i);
            let id = builder
                .add_child(parent, NodeDesc::new(child_name.clone(), child_bounds, points))
                .unwrap();
            add(builder, id, &child_name, child_bounds, depth - 1, points);
        }
    }

    let bounds = Aabb::new(Vec3::ZERO, Vec3::splat(size));
    let mut builder = OctreeGeometry::builder(Vec3::ONE, Vec3::ZERO);
    let root = builder.add_root(NodeDesc::new("r", bounds, points)).unwrap();
    add(&mut builder, root, "r", bounds, depth, points);
    Arc::new(builder.build().unwrap())
}

/// In-memory point source counting reads; nodes named in `failing` error out.
#[derive(Default)]
pub struct MemorySource {
    pub reads: AtomicU64,
    pub failing: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl PointSource for MemorySource {
    fn load_points(&self, node: &OctreeGeometryNode) -> Result<PointPayload> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().iter().any(|name| name == node.name()) {
            return Err(Error::Io(std::io::Error::other("injected failure")));
        }
        Ok(payload_for(node))
    }
}

/// Source that blocks every read until the test releases it, recording the
/// order nodes were read in. The node named `fail` errors out.
pub struct GatedSource {
    gate: Mutex<mpsc::Receiver<()>>,
    pub order: Mutex<Vec<String>>,
    fail: &'static str,
}

impl PointSource for GatedSource {
    fn load_points(&self, node: &OctreeGeometryNode) -> Result<PointPayload> {
        self.gate
            .lock()
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| Error::Worker("gate closed".into()))?;
        self.order.lock().push(node.name().to_string());
        if node.name() == self.fail {
            return Err(Error::Io(std::io::Error::other("disk on fire")));
        }
        Ok(payload_for(node))
    }
}

/// A gated source and the sender that lets one read through per message.
pub fn gated(fail: &'static str) -> (Arc<GatedSource>, mpsc::Sender<()>) {
    let (tx, rx) = mpsc::channel();
    let source = Arc::new(GatedSource {
        gate: Mutex::new(rx),
        order: Mutex::new(Vec::new()),
        fail,
    });
    (source, tx)
}

/// Poll `done` until it holds, failing after five seconds.
pub fn wait_until(mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < Duration::from_secs(5), "timed out");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Load queue that records requests and completes them only when told to.
#[derive(Default)]
pub struct RecordingQueue {
    requests: Mutex<Vec<(NodeId, f32)>>,
    in_flight: Mutex<Vec<Arc<OctreeGeometryNode>>>,
}

impl RecordingQueue {
    /// Ids requested since the last call, in request order.
    pub fn take_requests(&self) -> Vec<NodeId> {
        self.requests.lock().drain(..).map(|(id, _)| id).collect()
    }

    /// Finish every in-flight load.
    pub fn complete_all(&self) {
        for node in self.in_flight.lock().drain(..) {
            node.finish_load(payload_for(&node));
        }
    }
}

impl LoadQueue for RecordingQueue {
    fn request(&self, node: &Arc<OctreeGeometryNode>, priority: f32) -> bool {
        if !node.begin_load() {
            return false;
        }
        self.requests.lock().push((node.id(), priority));
        self.in_flight.lock().push(Arc::clone(node));
        true
    }

    /// Every recorded request counts as in flight, so there is nothing to re-rank.
    fn reprioritize(&self, _rank: &mut dyn FnMut(&OctreeGeometryNode, f32) -> Option<f32>) -> usize {
        0
    }
}

/// Minimal render-thread consumption: swap, dispose deletes into the cache,
/// mark rendered nodes as created. Returns `false` if nothing was published.
pub fn consume(
    exchange: &QueueExchange<NodeId>,
    current: &mut QueuePair<NodeId>,
    geometry: &OctreeGeometry,
    cache: &LruCache,
) -> bool {
    if !exchange.swap(current) {
        return false;
    }
    for id in &current.delete {
        let node = geometry.node(*id).unwrap();
        if node.is_loaded() {
            node.set_created(false);
            cache.insert(node);
        }
    }
    for id in &current.render {
        let node = geometry.node(*id).unwrap();
        if node.is_loaded() {
            node.set_created(true);
        }
    }
    true
}
