//! One traversal tick: rank nodes, request loads, publish render/delete lists.

use std::collections::{BTreeSet, BinaryHeap};
use std::sync::Arc;

use hashbrown::HashMap;
use pointstream_octree::{NodeId, NodeState, OctreeGeometry, OctreeGeometryNode};

use crate::cache::LruCache;
use crate::config::TraversalSettings;
use crate::exchange::QueueExchange;
use crate::loader::LoadQueue;
use crate::priority::{Candidate, DefaultPriority, NodePriority, PriorityInput};
use crate::view::ViewState;

/// Outcome of a single tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Generation the published queue pair received.
    pub generation: u64,
    pub render: Vec<NodeId>,
    pub delete: Vec<NodeId>,
    pub load_requests: Vec<NodeId>,
    /// Points of the nodes in `render`.
    pub render_points: u64,
    /// Points reserved for every selected node, rendered or not.
    pub reserved_points: u64,
    /// Render entries without GPU buffers yet, reclaimed ones included.
    pub newly_created: usize,
    /// Render entries whose payload came back from the cache.
    pub reclaimed: usize,
    /// Queued loads dropped because their node is no longer selected.
    pub cancelled: usize,
    pub visited: usize,
    pub culled: usize,
}

/// Single-threaded traversal state, driven by [`Traverser`](crate::Traverser)
/// or directly by tests.
pub struct TraversalEngine {
    geometry: Arc<OctreeGeometry>,
    loader: Arc<dyn LoadQueue>,
    cache: Arc<LruCache>,
    exchange: Arc<QueueExchange<NodeId>>,
    priority: Arc<dyn NodePriority>,
    /// Nodes this engine made resident and has not yet handed to the delete queue.
    owned: BTreeSet<NodeId>,
    /// Delete lists of published pairs the render thread never picked up.
    pending_delete: Vec<NodeId>,
}

impl TraversalEngine {
    pub fn new(
        geometry: Arc<OctreeGeometry>,
        loader: Arc<dyn LoadQueue>,
        cache: Arc<LruCache>,
        exchange: Arc<QueueExchange<NodeId>>,
    ) -> Self {
        Self {
            geometry,
            loader,
            cache,
            exchange,
            priority: Arc::new(DefaultPriority::default()),
            owned: BTreeSet::new(),
            pending_delete: Vec::new(),
        }
    }

    /// Replace the scoring function.
    pub fn with_priority(mut self, priority: Arc<dyn NodePriority>) -> Self {
        self.priority = priority;
        self
    }

    pub fn geometry(&self) -> &Arc<OctreeGeometry> {
        &self.geometry
    }

    pub fn exchange(&self) -> &Arc<QueueExchange<NodeId>> {
        &self.exchange
    }

    /// Number of nodes currently tracked as resident by this engine.
    pub fn owned_count(&self) -> usize {
        self.owned.len()
    }

    /// Run one tick against `view` and publish the resulting queue pair.
    pub fn tick(&mut self, view: &ViewState, settings: &TraversalSettings) -> TickReport {
        let mut report = TickReport::default();
        // Selected node -> score this tick.
        let mut selected = HashMap::new();
        self.owned.extend(self.pending_delete.drain(..));

        let geometry = Arc::clone(&self.geometry);
        let mut heap = BinaryHeap::new();
        let root = geometry.root();
        if view.is_visible(root.bounds()) {
            heap.push(self.candidate(root, view));
        } else {
            report.culled += 1;
        }

        while let Some(candidate) = heap.pop() {
            let Some(node) = geometry.node(candidate.id) else {
                continue;
            };
            report.visited += 1;

            let points = u64::from(node.num_points());
            if points > 0 {
                if report.reserved_points + points > settings.point_budget {
                    break;
                }
                report.reserved_points += points;
                selected.insert(node.id(), candidate.score);
                self.select(node, candidate.score, settings, &mut report);
            }

            let input = measure(node, view);
            if !self.priority.should_expand(&input, settings.min_node_size) {
                continue;
            }
            for &child_id in node.children() {
                let Some(child) = geometry.node(child_id) else {
                    continue;
                };
                if view.is_visible(child.bounds()) {
                    heap.push(self.candidate(child, view));
                } else {
                    report.culled += 1;
                }
            }
        }

        let geometry_id = geometry.id();
        report.cancelled = self.loader.reprioritize(&mut |node, current| {
            if node.geometry() != geometry_id {
                return Some(current);
            }
            selected.get(&node.id()).copied()
        });

        let delete = &mut report.delete;
        self.owned.retain(|id| {
            if selected.contains_key(id) {
                return true;
            }
            let Some(node) = geometry.node(*id) else {
                return false;
            };
            match node.state() {
                NodeState::Loaded => {
                    delete.push(*id);
                    false
                }
                NodeState::Loading => true,
                NodeState::Unloaded | NodeState::Cached => false,
            }
        });

        let mut pair = self.exchange.take_spare().unwrap_or_default();
        pair.render.extend_from_slice(&report.render);
        pair.delete.extend_from_slice(&report.delete);
        let (generation, superseded) = self.exchange.publish(pair);
        report.generation = generation;
        if let Some(stale) = superseded {
            self.pending_delete.extend(stale.delete);
        }

        tracing::trace!(
            generation,
            render = report.render.len(),
            delete = report.delete.len(),
            loads = report.load_requests.len(),
            cancelled = report.cancelled,
            points = report.render_points,
            visited = report.visited,
            "traversal tick"
        );
        report
    }

    fn select(
        &mut self,
        node: &Arc<OctreeGeometryNode>,
        score: f32,
        settings: &TraversalSettings,
        report: &mut TickReport,
    ) {
        let id = node.id();
        match node.state() {
            NodeState::Loaded => {
                if !node.is_created() {
                    if report.newly_created >= settings.max_nodes_to_render {
                        return;
                    }
                    report.newly_created += 1;
                }
                self.owned.insert(id);
                report.render.push(id);
                report.render_points += u64::from(node.num_points());
            }
            NodeState::Cached => {
                if report.newly_created >= settings.max_nodes_to_render {
                    return;
                }
                if self.cache.reclaim(node) {
                    report.newly_created += 1;
                    report.reclaimed += 1;
                    self.owned.insert(id);
                    report.render.push(id);
                    report.render_points += u64::from(node.num_points());
                    return;
                }
                // Parked outside this cache, or the entry is gone: read it again.
                tracing::debug!(node = %id, "cached node has no cache entry, reloading");
                node.evict();
                self.request_load(node, score, settings, report);
            }
            NodeState::Unloaded => self.request_load(node, score, settings, report),
            NodeState::Loading => {}
        }
    }

    fn request_load(
        &mut self,
        node: &Arc<OctreeGeometryNode>,
        score: f32,
        settings: &TraversalSettings,
        report: &mut TickReport,
    ) {
        if report.load_requests.len() < settings.max_nodes_to_load && self.loader.request(node, score) {
            self.owned.insert(node.id());
            report.load_requests.push(node.id());
        }
    }

    fn candidate(&self, node: &OctreeGeometryNode, view: &ViewState) -> Candidate {
        let input = measure(node, view);
        Candidate {
            id: node.id(),
            score: self.priority.score(&input),
            distance: input.distance,
            level: input.level,
        }
    }
}

fn measure(node: &OctreeGeometryNode, view: &ViewState) -> PriorityInput {
    let bounds = node.bounds();
    PriorityInput {
        distance: view.distance_to(bounds),
        projected_size: view.projected_size(bounds),
        world_size: view.world_size(bounds),
        level: node.level(),
        num_points: node.num_points(),
    }
}

impl std::fmt::Debug for TraversalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraversalEngine")
            .field("geometry", &self.geometry)
            .field("owned", &self.owned.len())
            .field("pending_delete", &self.pending_delete.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::LoadCounters;
    use crate::exchange::QueuePair;
    use crate::loader::NodeLoader;
    use crate::testing::{consume, full_octree, gated, wait_until, MemorySource, RecordingQueue};
    use glam::{Mat4, Vec3};
    use pointstream_core::Aabb;
    use pointstream_octree::NodeDesc;
    use std::f32::consts::FRAC_PI_2;
    use std::time::{Duration, Instant};

    struct Harness {
        geometry: Arc<OctreeGeometry>,
        queue: Arc<RecordingQueue>,
        cache: Arc<LruCache>,
        exchange: Arc<QueueExchange<NodeId>>,
        engine: TraversalEngine,
        current: QueuePair<NodeId>,
    }

    impl Harness {
        fn new(geometry: Arc<OctreeGeometry>) -> Self {
            let queue = Arc::new(RecordingQueue::default());
            let cache = Arc::new(LruCache::new(1_000_000));
            let exchange = Arc::new(QueueExchange::new());
            let engine = TraversalEngine::new(
                Arc::clone(&geometry),
                Arc::clone(&queue) as Arc<dyn LoadQueue>,
                Arc::clone(&cache),
                Arc::clone(&exchange),
            );
            Self {
                geometry,
                queue,
                cache,
                exchange,
                engine,
                current: QueuePair::default(),
            }
        }

        /// Tick, finish all loads, let the render side consume.
        fn frame(&mut self, view: &ViewState, settings: &TraversalSettings) -> TickReport {
            let report = self.engine.tick(view, settings);
            self.queue.complete_all();
            consume(&self.exchange, &mut self.current, &self.geometry, &self.cache);
            report
        }

        fn node(&self, name: &str) -> &Arc<OctreeGeometryNode> {
            self.geometry.nodes().find(|n| n.name() == name).unwrap()
        }
    }

    fn settings(budget: u64) -> TraversalSettings {
        TraversalSettings {
            point_budget: budget,
            max_nodes_to_load: 100,
            max_nodes_to_render: 100,
            min_node_size: 0.0,
        }
    }

    fn view_at(position: Vec3) -> ViewState {
        ViewState::unbounded(position, FRAC_PI_2, 600.0)
    }

    /// Scores every node the same so only the tie-breaks decide.
    struct Flat;

    impl NodePriority for Flat {
        fn score(&self, _input: &PriorityInput) -> f32 {
            1.0
        }
    }

    #[test]
    fn root_only_empty_octree_never_renders_or_loads() {
        let mut builder = OctreeGeometry::builder(Vec3::ONE, Vec3::ZERO);
        builder
            .add_root(NodeDesc::new("r", Aabb::new(Vec3::ZERO, Vec3::ONE), 0))
            .unwrap();
        let mut h = Harness::new(Arc::new(builder.build().unwrap()));

        for i in 0..5 {
            let report = h.frame(&view_at(Vec3::splat(i as f32)), &settings(1_000));
            assert!(report.render.is_empty());
            assert!(report.load_requests.is_empty());
            assert_eq!(report.visited, 1);
        }
        assert!(h.queue.take_requests().is_empty());
    }

    #[test]
    fn loads_then_renders_within_budget() {
        let mut h = Harness::new(full_octree(1, 16.0, 10));
        let view = view_at(Vec3::new(8.0, 8.0, 40.0));

        let first = h.frame(&view, &settings(1_000));
        assert_eq!(first.load_requests.len(), 9);
        assert!(first.render.is_empty());

        let second = h.frame(&view, &settings(1_000));
        assert_eq!(second.render.len(), 9);
        assert_eq!(second.render_points, 90);
        assert_eq!(second.newly_created, 9);
        assert_eq!(second.render[0], NodeId::ROOT);

        // Already created nodes do not count as new creations.
        let third = h.frame(&view, &settings(1_000));
        assert_eq!(third.render.len(), 9);
        assert_eq!(third.newly_created, 0);
        assert!(third.delete.is_empty());
    }

    #[test]
    fn render_points_never_exceed_budget() {
        let mut h = Harness::new(full_octree(2, 16.0, 7));
        let budget = 150;
        for step in 0..40 {
            let angle = step as f32 * 0.4;
            let position = Vec3::new(8.0 + 30.0 * angle.cos(), 8.0, 8.0 + 30.0 * angle.sin());
            let report = h.frame(&view_at(position), &settings(budget));

            let points: u64 = report
                .render
                .iter()
                .map(|id| u64::from(h.geometry.node(*id).unwrap().num_points()))
                .sum();
            assert_eq!(points, report.render_points);
            assert!(points <= budget);
            assert!(report.reserved_points <= budget);
        }
    }

    #[test]
    fn zero_budget_renders_nothing_and_retires_everything() {
        let mut h = Harness::new(full_octree(1, 16.0, 10));
        let view = view_at(Vec3::new(8.0, 8.0, 40.0));
        h.frame(&view, &settings(1_000));
        let rendered = h.frame(&view, &settings(1_000)).render;
        assert_eq!(rendered.len(), 9);

        let report = h.frame(&view, &settings(0));
        assert!(report.render.is_empty());
        assert!(report.load_requests.is_empty());
        let mut deleted = report.delete.clone();
        deleted.sort();
        let mut expected = rendered;
        expected.sort();
        assert_eq!(deleted, expected);
        assert_eq!(h.cache.size(), 9);

        let again = h.frame(&view, &settings(0));
        assert!(again.render.is_empty() && again.delete.is_empty());
    }

    #[test]
    fn closer_node_loads_first_under_load_cap() {
        let mut h = Harness::new(full_octree(1, 16.0, 10));
        let mut capped = settings(1_000);
        capped.max_nodes_to_load = 1;

        // Camera beside octant 0 (the min corner).
        let view = view_at(Vec3::new(-20.0, 4.0, 4.0));
        // Camera is outside the root, which is the largest node on screen.
        assert_eq!(h.frame(&view, &capped).load_requests, vec![NodeId::ROOT]);

        let report = h.frame(&view, &capped);
        assert_eq!(report.load_requests.len(), 1);
        assert_eq!(h.geometry.node(report.load_requests[0]).unwrap().name(), "r0");
    }

    #[test]
    fn tied_candidates_load_one_per_tick_shallowest_first() {
        // Five nested boxes around the same center: equal distance everywhere.
        let mut builder = OctreeGeometry::builder(Vec3::ONE, Vec3::ZERO);
        let cube = |h: f32| Aabb::from_center(Vec3::ZERO, Vec3::splat(h));
        let r = builder.add_root(NodeDesc::new("r", cube(16.0), 5)).unwrap();
        let r0 = builder.add_child(r, NodeDesc::new("r0", cube(8.0), 5)).unwrap();
        builder.add_child(r, NodeDesc::new("r1", cube(8.0), 5)).unwrap();
        let r00 = builder.add_child(r0, NodeDesc::new("r00", cube(4.0), 5)).unwrap();
        builder.add_child(r00, NodeDesc::new("r000", cube(2.0), 5)).unwrap();

        let geometry = Arc::new(builder.build().unwrap());
        let queue = Arc::new(RecordingQueue::default());
        let mut engine = TraversalEngine::new(
            Arc::clone(&geometry),
            Arc::clone(&queue) as Arc<dyn LoadQueue>,
            Arc::new(LruCache::new(1_000)),
            Arc::new(QueueExchange::new()),
        )
        .with_priority(Arc::new(Flat));

        let mut capped = settings(1_000);
        capped.max_nodes_to_load = 1;
        let view = view_at(Vec3::new(0.0, 0.0, 100.0));

        let mut order = Vec::new();
        for _ in 0..5 {
            let requests = engine.tick(&view, &capped).load_requests;
            assert_eq!(requests.len(), 1);
            order.push(geometry.node(requests[0]).unwrap().name().to_string());
        }
        assert_eq!(order, vec!["r", "r0", "r1", "r00", "r000"]);
        assert!(engine.tick(&view, &capped).load_requests.is_empty());
    }

    #[test]
    fn render_cap_limits_new_creations() {
        let mut h = Harness::new(full_octree(1, 16.0, 10));
        let view = view_at(Vec3::new(8.0, 8.0, 40.0));
        h.frame(&view, &settings(1_000));

        let mut capped = settings(1_000);
        capped.max_nodes_to_render = 4;
        let report = h.frame(&view, &capped);
        assert_eq!(report.render.len(), 4);
        // Loaded but uncreated nodes stay selected instead of being retired.
        assert!(report.delete.is_empty());

        let report = h.frame(&view, &capped);
        assert_eq!(report.render.len(), 8);
        assert_eq!(report.newly_created, 4);
        let report = h.frame(&view, &capped);
        assert_eq!(report.render.len(), 9);
    }

    #[test]
    fn unconsumed_deletes_carry_over() {
        let mut h = Harness::new(full_octree(1, 16.0, 10));
        let view = view_at(Vec3::new(8.0, 8.0, 40.0));
        h.frame(&view, &settings(1_000));
        h.frame(&view, &settings(1_000));

        // Render thread stalls while three ticks are published.
        let first = h.engine.tick(&view, &settings(0));
        assert_eq!(first.delete.len(), 9);
        let second = h.engine.tick(&view, &settings(0));
        assert!(second.delete.is_empty());
        let third = h.engine.tick(&view, &settings(0));
        assert_eq!(third.delete.len(), 9);

        assert!(consume(&h.exchange, &mut h.current, &h.geometry, &h.cache));
        assert_eq!(h.current.generation, third.generation);
        assert_eq!(h.cache.size(), 9);
        assert_eq!(h.engine.owned_count(), 0);
    }

    #[test]
    fn frustum_culls_nodes_outside_the_view() {
        let mut h = Harness::new(full_octree(1, 16.0, 10));
        // Narrow view down the x = y = 4 column only sees the two octants around it.
        let eye = Vec3::new(4.0, 4.0, 40.0);
        let proj = Mat4::perspective_rh(10f32.to_radians(), 1.0, 0.1, 100.0);
        let look = Mat4::look_at_rh(eye, Vec3::new(4.0, 4.0, 0.0), Vec3::Y);
        let view = ViewState::from_camera(proj * look, eye, FRAC_PI_2, 600.0, Mat4::IDENTITY);

        let report = h.frame(&view, &settings(1_000));
        assert_eq!(report.culled, 6);
        assert_eq!(report.load_requests.len(), 3);
        assert!(report.load_requests.contains(&NodeId::ROOT));
    }

    #[test]
    fn min_node_size_stops_descent() {
        let mut h = Harness::new(full_octree(2, 16.0, 10));
        let mut coarse = settings(10_000);
        coarse.min_node_size = 10.0;
        let report = h.frame(&view_at(Vec3::new(8.0, 8.0, 40.0)), &coarse);
        // Root (16) expands, its children (8) do not.
        assert_eq!(report.load_requests.len(), 9);
        assert_eq!(h.node("r00").state(), NodeState::Unloaded);
    }

    #[test]
    fn reselected_cached_node_renders_without_reading_again() {
        let geometry = full_octree(1, 16.0, 10);
        let source = Arc::new(MemorySource::default());
        let counters = Arc::new(LoadCounters::new());
        let loader = Arc::new(
            NodeLoader::new(
                Arc::clone(&source) as Arc<dyn pointstream_octree::PointSource>,
                2,
                Arc::clone(&counters),
            )
            .unwrap(),
        );
        let cache = Arc::new(LruCache::new(1_000).with_counters(Arc::clone(&counters)));
        let exchange = Arc::new(QueueExchange::new());
        let mut engine = TraversalEngine::new(
            Arc::clone(&geometry),
            Arc::clone(&loader) as Arc<dyn LoadQueue>,
            Arc::clone(&cache),
            Arc::clone(&exchange),
        );
        let mut current = QueuePair::default();
        let view = view_at(Vec3::new(8.0, 8.0, 40.0));

        let wait_idle = || {
            let start = Instant::now();
            while !loader.is_idle() {
                assert!(start.elapsed() < Duration::from_secs(5));
                std::thread::sleep(Duration::from_millis(1));
            }
        };

        engine.tick(&view, &settings(1_000));
        wait_idle();
        let report = engine.tick(&view, &settings(1_000));
        assert_eq!(report.render.len(), 9);
        consume(&exchange, &mut current, &geometry, &cache);
        let reads = source.reads();
        assert_eq!(reads, 9);

        engine.tick(&view, &settings(0));
        consume(&exchange, &mut current, &geometry, &cache);
        assert_eq!(cache.size(), 9);
        assert!(geometry.nodes().all(|n| n.state() == NodeState::Cached));

        let report = engine.tick(&view, &settings(1_000));
        assert_eq!(report.render.len(), 9);
        assert_eq!(report.reclaimed, 9);
        assert!(report.load_requests.is_empty());
        assert_eq!(source.reads(), reads);
        assert_eq!(cache.size(), 0);
        assert!(geometry.nodes().all(|n| n.is_loaded()));
    }

    #[test]
    fn failed_load_is_retried_on_a_later_tick() {
        let geometry = full_octree(0, 16.0, 10);
        let source = Arc::new(MemorySource::default());
        source.failing.lock().push("r".to_string());
        let loader = Arc::new(
            NodeLoader::new(
                Arc::clone(&source) as Arc<dyn pointstream_octree::PointSource>,
                1,
                Arc::new(LoadCounters::new()),
            )
            .unwrap(),
        );
        let mut engine = TraversalEngine::new(
            Arc::clone(&geometry),
            Arc::clone(&loader) as Arc<dyn LoadQueue>,
            Arc::new(LruCache::new(1_000)),
            Arc::new(QueueExchange::new()),
        );
        let view = view_at(Vec3::new(8.0, 8.0, 40.0));

        assert_eq!(engine.tick(&view, &settings(1_000)).load_requests.len(), 1);
        let start = Instant::now();
        while geometry.root().failed_loads() == 0 {
            assert!(start.elapsed() < Duration::from_secs(5));
            std::thread::sleep(Duration::from_millis(1));
        }
        while !loader.is_idle() {
            std::thread::sleep(Duration::from_millis(1));
        }

        source.failing.lock().clear();
        assert_eq!(engine.tick(&view, &settings(1_000)).load_requests, vec![NodeId::ROOT]);
    }

    #[test]
    fn cached_node_without_cache_entry_is_reloaded() {
        let mut h = Harness::new(full_octree(0, 16.0, 10));
        let root = Arc::clone(h.geometry.root());
        root.begin_load();
        root.finish_load(crate::testing::payload_for(&root));
        // Parked by hand, so no cache holds its payload.
        assert!(root.park().is_some());
        assert_eq!(root.state(), NodeState::Cached);

        let view = view_at(Vec3::new(8.0, 8.0, 40.0));
        let report = h.frame(&view, &settings(1_000));
        assert_eq!(report.load_requests, vec![NodeId::ROOT]);
        assert_eq!(report.reclaimed, 0);
        assert!(root.is_loaded());

        let report = h.frame(&view, &settings(1_000));
        assert_eq!(report.render, vec![NodeId::ROOT]);
    }

    /// Engine over a one-worker loader whose worker is held by the root.
    fn gated_engine() -> (
        Arc<OctreeGeometry>,
        Arc<NodeLoader>,
        Arc<crate::testing::GatedSource>,
        std::sync::mpsc::Sender<()>,
        TraversalEngine,
    ) {
        let geometry = full_octree(1, 16.0, 10);
        let (source, gate) = gated("");
        let loader = Arc::new(
            NodeLoader::new(
                Arc::clone(&source) as Arc<dyn pointstream_octree::PointSource>,
                1,
                Arc::new(LoadCounters::new()),
            )
            .unwrap(),
        );
        assert!(loader.request(geometry.root(), f32::MAX));
        wait_until(|| loader.queued() == 0);
        let engine = TraversalEngine::new(
            Arc::clone(&geometry),
            Arc::clone(&loader) as Arc<dyn LoadQueue>,
            Arc::new(LruCache::new(1_000)),
            Arc::new(QueueExchange::new()),
        );
        (geometry, loader, source, gate, engine)
    }

    #[test]
    fn queued_loads_follow_the_latest_view() {
        let (geometry, loader, source, gate, mut engine) = gated_engine();

        // Beside octant 0 first, then beside octant 7 before any child is read.
        let first = engine.tick(&view_at(Vec3::new(-20.0, 4.0, 4.0)), &settings(1_000));
        assert_eq!(first.load_requests.len(), 8);
        let second = engine.tick(&view_at(Vec3::new(36.0, 12.0, 12.0)), &settings(1_000));
        assert!(second.load_requests.is_empty());
        assert_eq!(second.cancelled, 0);
        assert_eq!(loader.queued(), 8);

        for _ in 0..9 {
            gate.send(()).unwrap();
        }
        wait_until(|| loader.is_idle());
        let order = source.order.lock().clone();
        assert_eq!(order.len(), 9);
        assert_eq!(order[0], "r");
        assert_eq!(order[1], "r7");
        assert_eq!(order[8], "r0");
        assert!(geometry.nodes().all(|n| n.is_loaded()));
    }

    #[test]
    fn queued_loads_of_deselected_nodes_are_cancelled() {
        let (geometry, loader, source, gate, mut engine) = gated_engine();
        let view = view_at(Vec3::new(36.0, 12.0, 12.0));

        assert_eq!(engine.tick(&view, &settings(1_000)).load_requests.len(), 8);
        assert_eq!(engine.owned_count(), 8);

        // Room for the root and its closest child only.
        let report = engine.tick(&view, &settings(20));
        assert_eq!(report.cancelled, 7);
        assert_eq!(loader.queued(), 1);
        assert_eq!(engine.owned_count(), 1);
        let loading: Vec<&str> = geometry
            .nodes()
            .filter(|n| n.state() == NodeState::Loading)
            .map(|n| n.name())
            .collect();
        assert_eq!(loading, vec!["r", "r7"]);

        gate.send(()).unwrap();
        gate.send(()).unwrap();
        wait_until(|| loader.is_idle());
        assert_eq!(*source.order.lock(), vec!["r", "r7"]);
        assert_eq!(loader.stats().nodes_loaded, 2);
    }
}
