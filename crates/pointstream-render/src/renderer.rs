//! Render front-end: drives conversion, owns streaming, consumes queue pairs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use glam::{Mat4, Vec3};
use hashbrown::HashMap;
use pointstream_octree::{FilePointSource, NodeId, OctreeGeometry, PointSource};
use pointstream_stream::{
    LoadCounters, LoadQueue, LruCache, NodeLoader, QueuePair, TraversalEngine, Traverser,
};

use crate::backend::{DrawCall, GpuBackend, NodeBuffers, NodeUniforms};
use crate::camera::Camera;
use crate::converter::{ConversionRequest, ConversionStatus, PointCloudConverter, PointCloudHandle};
use crate::error::{RenderError, Result};
use crate::settings::{RendererSettings, SettingsTracker};
use crate::stats::{Diagnostics, FrameStats};

/// Streaming state that exists once rendering has been initialized.
struct Streaming<Buf> {
    geometry: Arc<OctreeGeometry>,
    loader: Arc<NodeLoader>,
    traverser: Traverser,
    current: QueuePair<NodeId>,
    buffers: HashMap<NodeId, NodeBuffers<Buf>>,
}

/// Camera placement last handed to [`PointCloudRenderer::set_camera`].
#[derive(Debug, Clone)]
struct CameraSlot {
    camera: Camera,
    world: Mat4,
    screen_height: f32,
}

/// Renders one point cloud through a [`GpuBackend`].
///
/// Call [`update`](Self::update) once per frame before
/// [`render_frame`](Self::render_frame). Rendering is a no-op until the cloud's
/// octree has been loaded; a malformed descriptor keeps it that way.
pub struct PointCloudRenderer<B: GpuBackend> {
    backend: B,
    converter: Box<dyn PointCloudConverter>,
    cache: Arc<LruCache>,
    counters: Arc<LoadCounters>,
    converted_root: PathBuf,
    settings: RendererSettings,
    tracker: SettingsTracker,
    handle: Option<PointCloudHandle>,
    handle_changed: bool,
    camera: Option<CameraSlot>,
    streaming: Option<Streaming<B::Buffer>>,
    decimated: Option<NodeBuffers<B::Buffer>>,
    last_frame: FrameStats,
    frames: u64,
}

impl<B: GpuBackend> PointCloudRenderer<B> {
    /// Create a renderer sharing `cache` with any other renderer of the process.
    ///
    /// Converted clouds are looked up under `converted_root`.
    pub fn new(
        backend: B,
        converter: Box<dyn PointCloudConverter>,
        cache: Arc<LruCache>,
        converted_root: impl Into<PathBuf>,
        settings: RendererSettings,
    ) -> Self {
        let counters = cache
            .counters()
            .cloned()
            .unwrap_or_else(|| Arc::new(LoadCounters::new()));
        let tracker = SettingsTracker::new(&settings.streaming);
        cache.set_point_load_limit(settings.streaming.cache_point_budget);
        Self {
            backend,
            converter,
            cache,
            counters,
            converted_root: converted_root.into(),
            settings,
            tracker,
            handle: None,
            handle_changed: false,
            camera: None,
            streaming: None,
            decimated: None,
            last_frame: FrameStats::default(),
            frames: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    /// Settings edits are picked up by the next [`update`](Self::update).
    pub fn settings_mut(&mut self) -> &mut RendererSettings {
        &mut self.settings
    }

    pub fn handle(&self) -> Option<&PointCloudHandle> {
        self.handle.as_ref()
    }

    /// Show a different cloud. Streaming of the previous one is torn down.
    pub fn set_handle(&mut self, handle: Option<PointCloudHandle>) {
        if handle == self.handle {
            return;
        }
        self.shutdown_streaming();
        self.release_decimated();
        self.handle = handle;
        self.handle_changed = self.handle.is_some();
    }

    pub fn set_camera(&mut self, camera: Camera, world: Mat4, screen_height: f32) {
        self.camera = Some(CameraSlot {
            camera,
            world,
            screen_height,
        });
    }

    /// Whether the octree is loaded and the traverser runs.
    pub fn is_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    pub fn geometry(&self) -> Option<&Arc<OctreeGeometry>> {
        self.streaming.as_ref().map(|s| &s.geometry)
    }

    /// Advance conversion, initialize streaming when ready, forward the camera
    /// and any changed settings.
    pub fn update(&mut self) -> Result<()> {
        if let Some(converted) = self.handle.as_ref().map(|h| h.converted) {
            self.advance_handle(converted)?;
        }
        self.apply_settings();
        Ok(())
    }

    fn advance_handle(&mut self, converted: bool) -> Result<()> {
        if self.handle_changed {
            self.handle_changed = false;
            if converted {
                self.initialize_rendering()
            } else {
                self.start_conversion()
            }
        } else if !converted && self.converter.status() == ConversionStatus::Done {
            if let Some(handle) = self.handle.as_mut() {
                handle.converted = true;
                tracing::info!(path = %handle.path.display(), "conversion finished");
            }
            self.initialize_rendering()
        } else {
            if converted {
                self.push_camera();
            }
            Ok(())
        }
    }

    fn start_conversion(&mut self) -> Result<()> {
        let Some(handle) = &self.handle else {
            return Ok(());
        };
        let request = ConversionRequest {
            source: handle.path.clone(),
            output_dir: handle.output_dir(&self.converted_root),
            decimated_cloud_size: self.settings.decimated_cloud_size,
        };
        tracing::info!(source = %request.source.display(), "starting conversion");
        self.converter.start(&request)
    }

    /// Load the converted octree and start streaming it.
    ///
    /// On error (missing or malformed descriptor, missing point store) the
    /// renderer stays in the not-started state.
    pub fn initialize_rendering(&mut self) -> Result<()> {
        let Some(handle) = &self.handle else {
            return Err(RenderError::Converter("no point cloud handle set".to_string()));
        };
        let dir = handle.output_dir(&self.converted_root);
        let geometry = Arc::new(pointstream_octree::load(dir.join(pointstream_octree::METADATA_FILE))?);
        let source = FilePointSource::open(&dir)?;
        self.start_streaming(geometry, Arc::new(source))
    }

    /// Start streaming an already loaded octree from `source`.
    pub fn start_streaming(
        &mut self,
        geometry: Arc<OctreeGeometry>,
        source: Arc<dyn PointSource>,
    ) -> Result<()> {
        self.shutdown_streaming();

        let config = &self.settings.streaming;
        let loader = Arc::new(NodeLoader::new(
            source,
            config.loader_threads,
            Arc::clone(&self.counters),
        )?);
        let engine = TraversalEngine::new(
            Arc::clone(&geometry),
            Arc::clone(&loader) as Arc<dyn LoadQueue>,
            Arc::clone(&self.cache),
            Arc::new(pointstream_stream::QueueExchange::new()),
        );
        let mut traverser = Traverser::new(engine, config.traversal(), config.tick_interval());
        self.tracker = SettingsTracker::new(config);
        self.cache.set_point_load_limit(config.cache_point_budget);

        if let Some(slot) = &self.camera {
            traverser.set_camera(slot.camera.view_state(slot.world, slot.screen_height));
        }
        traverser.start()?;

        tracing::info!(
            nodes = geometry.len(),
            points = geometry.total_points(),
            depth = geometry.depth(),
            "point cloud streaming started"
        );
        self.streaming = Some(Streaming {
            geometry,
            loader,
            traverser,
            current: QueuePair::default(),
            buffers: HashMap::new(),
        });
        Ok(())
    }

    fn push_camera(&self) {
        if let (Some(streaming), Some(slot)) = (&self.streaming, &self.camera) {
            streaming
                .traverser
                .set_camera(slot.camera.view_state(slot.world, slot.screen_height));
        }
    }

    fn apply_settings(&mut self) {
        let changes = self.tracker.diff(&self.settings.streaming);
        if changes.is_empty() {
            return;
        }
        tracing::debug!(?changes, "applying renderer settings");
        if let Some(limit) = changes.cache_point_budget {
            self.cache.set_point_load_limit(limit);
        }
        let Some(streaming) = &self.streaming else {
            return;
        };
        let traverser = &streaming.traverser;
        if let Some(budget) = changes.point_budget {
            traverser.set_point_budget(budget);
        }
        if let Some((load_cap, render_cap)) = changes.node_counts {
            traverser.set_per_frame_node_counts(load_cap, render_cap);
        }
        if let Some(size) = changes.min_node_size {
            traverser.set_min_node_size(size);
        }
    }

    /// Consume the latest queue pair and draw.
    pub fn render_frame(&mut self) -> FrameStats {
        let _span = tracing::trace_span!("render_frame").entered();
        self.frames += 1;
        let mut stats = FrameStats::default();

        let Some(converted) = self.handle.as_ref().map(|h| h.converted) else {
            self.last_frame = stats;
            return stats;
        };
        if let Some(slot) = &self.camera {
            self.backend.begin_frame(&slot.camera.uniforms());
        }

        let show_decimated = if converted {
            self.settings.show_decimated_cloud
        } else {
            self.converter.decimation_finished()
        };
        if show_decimated {
            self.draw_decimated(&mut stats);
        } else if converted {
            self.draw_streamed(&mut stats);
        }

        self.last_frame = stats;
        stats
    }

    fn draw_decimated(&mut self, stats: &mut FrameStats) {
        if self.decimated.is_none() {
            let Some(payload) = self.converter.take_decimated() else {
                return;
            };
            match self.backend.create_buffers(&payload) {
                Ok(buffers) => self.decimated = Some(buffers),
                Err(e) => {
                    tracing::error!("failed to upload decimated cloud: {e}");
                    return;
                }
            }
        }
        let Some(buffers) = &self.decimated else {
            return;
        };
        let model = self.camera_world();
        let call = DrawCall {
            node: None,
            num_points: buffers.num_points,
            uniforms: NodeUniforms::new(model, Vec3::ONE, Vec3::ZERO, self.settings.point_size),
        };
        self.backend.draw(buffers, &call);
        stats.visible_points += u64::from(buffers.num_points);
        stats.visible_nodes += 1;
    }

    fn draw_streamed(&mut self, stats: &mut FrameStats) {
        let model = self.camera_world();
        let point_size = self.settings.point_size;
        let Self {
            backend,
            cache,
            streaming,
            ..
        } = self;
        let Some(streaming) = streaming else {
            return;
        };

        if streaming.traverser.exchange().swap(&mut streaming.current) {
            for &id in &streaming.current.delete {
                let Some(node) = streaming.geometry.node(id) else {
                    continue;
                };
                if !node.is_loaded() {
                    continue;
                }
                if let Some(buffers) = streaming.buffers.remove(&id) {
                    backend.release(buffers);
                    stats.disposed += 1;
                }
                node.set_created(false);
                cache.insert(node);
            }
            // Deletes are processed once; the render list is redrawn every frame.
            streaming.current.delete.clear();
        }

        let geometry = &streaming.geometry;
        let scale = geometry.scale().recip();
        for &id in &streaming.current.render {
            let Some(node) = geometry.node(id) else {
                continue;
            };
            if !node.is_loaded() {
                stats.skipped += 1;
                continue;
            }

            if !streaming.buffers.contains_key(&id) {
                let created = node
                    .with_payload(|payload| backend.create_buffers(payload))
                    .unwrap_or_else(|| Err(RenderError::StalePayload(id)));
                match created {
                    Ok(buffers) => {
                        streaming.buffers.insert(id, buffers);
                        node.set_created(true);
                        stats.created += 1;
                    }
                    Err(e) => {
                        tracing::error!(node = %id, name = node.name(), "issue in node creation: {e}");
                        stats.failed += 1;
                        continue;
                    }
                }
            }
            let Some(buffers) = streaming.buffers.get(&id) else {
                continue;
            };

            let offset = node.bounds().min + geometry.offset();
            let call = DrawCall {
                node: Some(id),
                num_points: buffers.num_points,
                uniforms: NodeUniforms::new(model, scale, offset, point_size),
            };
            backend.draw(buffers, &call);
            stats.visible_points += u64::from(buffers.num_points);
            stats.visible_nodes += 1;
        }
    }

    fn camera_world(&self) -> Mat4 {
        self.camera.as_ref().map_or(Mat4::IDENTITY, |slot| slot.world)
    }

    /// Live counters for status displays.
    pub fn diagnostics(&self) -> Diagnostics {
        let loader = self.counters.snapshot();
        let (queued_loads, traverser_ticks) = self.streaming.as_ref().map_or((0, 0), |s| {
            (s.loader.queued(), s.traverser.tick_count())
        });
        Diagnostics {
            streaming: self.streaming.is_some(),
            visible_points: self.last_frame.visible_points,
            visible_nodes: self.last_frame.visible_nodes,
            nodes_loaded: loader.nodes_loaded,
            nodes_loading: loader.nodes_loading,
            queued_loads,
            failed_loads: loader.failed_loads,
            cache_size: self.cache.size(),
            cache_points: self.cache.num_points(),
            converter_status: self.converter.status(),
            converter_progress: self.converter.progress(),
            traverser_ticks,
            frames: self.frames,
            created_last_frame: self.last_frame.created,
            disposed_last_frame: self.last_frame.disposed,
        }
    }

    /// Directory converted clouds are read from.
    pub fn converted_root(&self) -> &Path {
        &self.converted_root
    }

    /// Stop the traverser, abandon pending loads and free every node buffer.
    fn shutdown_streaming(&mut self) {
        let Some(mut streaming) = self.streaming.take() else {
            return;
        };
        streaming.traverser.stop();
        streaming.loader.shutdown();
        let purged = self.cache.remove_geometry(streaming.geometry.id());
        let released = streaming.buffers.len();
        for (id, buffers) in streaming.buffers.drain() {
            self.backend.release(buffers);
            if let Some(node) = streaming.geometry.node(id) {
                node.set_created(false);
            }
        }
        tracing::info!(released, purged, "point cloud streaming stopped");
    }

    fn release_decimated(&mut self) {
        if let Some(buffers) = self.decimated.take() {
            self.backend.release(buffers);
        }
    }
}

impl<B: GpuBackend> Drop for PointCloudRenderer<B> {
    fn drop(&mut self) {
        self.shutdown_streaming();
        self.release_decimated();
        let unfinished = self
            .handle
            .as_ref()
            .is_some_and(|h| !h.converted && self.converter.status() != ConversionStatus::Done);
        if unfinished {
            self.converter.abort();
        }
    }
}
