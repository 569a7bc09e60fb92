//! Viewer run loop: orbits the camera around a streamed cloud and logs diagnostics.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use glam::{Mat4, Vec3};
use pointstream_octree::METADATA_FILE;
use pointstream_render::{
    Camera, HeadlessBackend, PointCloudHandle, PointCloudRenderer, RendererSettings,
};
use pointstream_stream::{LoadCounters, LruCache};
use tracing::{debug, error, info};

use crate::synthetic::{SyntheticCloud, SyntheticConverter};

const SCREEN_WIDTH: f32 = 1280.0;
const SCREEN_HEIGHT: f32 = 720.0;

/// Orbit speed in radians per frame.
const ORBIT_SPEED: f32 = 0.01;

/// Frames between two diagnostics log lines.
const DIAGNOSTICS_INTERVAL: u64 = 60;

/// Viewer parameters (from CLI or defaults).
#[derive(Debug, Clone)]
pub struct ViewerParams {
    pub converted_root: PathBuf,
    pub cloud: PathBuf,
    pub frames: u64,
    pub target_fps: u32,
    pub settings: RendererSettings,
    pub synthetic: SyntheticCloud,
}

impl Default for ViewerParams {
    fn default() -> Self {
        Self {
            converted_root: PathBuf::from("ConvertedClouds"),
            cloud: PathBuf::from("synthetic.xyz"),
            frames: 600,
            target_fps: 60,
            settings: RendererSettings::default(),
            synthetic: SyntheticCloud::default(),
        }
    }
}

impl ViewerParams {
    /// Parse viewer parameters from command line arguments.
    pub fn from_args() -> anyhow::Result<Self> {
        Self::parse(std::env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut params = Self::default();
        let mut args = args.into_iter();

        // A settings file replaces the defaults; later flags override it.
        while let Some(flag) = args.next() {
            let mut value = || {
                args.next()
                    .with_context(|| format!("missing value for {flag}"))
            };
            match flag.as_str() {
                "--converted-root" => params.converted_root = PathBuf::from(value()?),
                "--cloud" => params.cloud = PathBuf::from(value()?),
                "--frames" => params.frames = parse_value(&flag, &value()?)?,
                "--fps" => params.target_fps = parse_value(&flag, &value()?)?,
                "--settings" => params.settings = load_settings(Path::new(&value()?))?,
                "--point-budget" => {
                    params.settings.streaming.point_budget = parse_value(&flag, &value()?)?;
                }
                "--cache-point-budget" => {
                    params.settings.streaming.cache_point_budget = parse_value(&flag, &value()?)?;
                }
                "--max-nodes-to-load" => {
                    params.settings.streaming.max_nodes_to_load = parse_value(&flag, &value()?)?;
                }
                "--max-nodes-to-render" => {
                    params.settings.streaming.max_nodes_to_render = parse_value(&flag, &value()?)?;
                }
                "--min-node-size" => {
                    params.settings.streaming.min_node_size = parse_value(&flag, &value()?)?;
                }
                "--loader-threads" => {
                    params.settings.streaming.loader_threads = parse_value(&flag, &value()?)?;
                }
                "--point-size" => params.settings.point_size = parse_value(&flag, &value()?)?,
                "--show-decimated" => params.settings.show_decimated_cloud = true,
                "--depth" => params.synthetic.depth = parse_value(&flag, &value()?)?,
                "--points-per-node" => {
                    params.synthetic.points_per_node = parse_value(&flag, &value()?)?;
                }
                "--seed" => params.synthetic.seed = parse_value(&flag, &value()?)?,
                other => anyhow::bail!("unknown option '{other}' (see --help)"),
            }
        }

        Ok(params)
    }

    /// Handle for the configured cloud; converted if its output already exists.
    pub fn handle(&self) -> PointCloudHandle {
        let handle = PointCloudHandle::new(&self.cloud);
        if handle.output_dir(&self.converted_root).join(METADATA_FILE).is_file() {
            PointCloudHandle::converted(&self.cloud)
        } else {
            handle
        }
    }
}

fn parse_value<T>(flag: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid value '{value}' for {flag}"))
}

fn load_settings(path: &Path) -> anyhow::Result<RendererSettings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid settings {}", path.display()))
}

/// Headless viewer state.
pub struct Viewer {
    renderer: PointCloudRenderer<HeadlessBackend>,
    camera: Camera,
    orbit_angle: f32,
    params: ViewerParams,
}

impl Viewer {
    pub fn new(params: ViewerParams) -> Self {
        let counters = Arc::new(LoadCounters::new());
        let cache = Arc::new(
            LruCache::new(params.settings.streaming.cache_point_budget).with_counters(counters),
        );
        let mut renderer = PointCloudRenderer::new(
            HeadlessBackend::new(),
            Box::new(SyntheticConverter::new(params.synthetic)),
            cache,
            &params.converted_root,
            params.settings.clone(),
        );

        let handle = params.handle();
        info!(
            cloud = %handle.path.display(),
            converted = handle.converted,
            "opening point cloud"
        );
        renderer.set_handle(Some(handle));

        let mut camera = Camera::default();
        camera.set_aspect(SCREEN_WIDTH / SCREEN_HEIGHT);
        camera.far = 10_000.0;

        Self {
            renderer,
            camera,
            orbit_angle: 0.0,
            params,
        }
    }

    /// Bounds to orbit: the loaded octree, or the synthetic cloud until it is loaded.
    fn orbit_bounds(&self) -> pointstream_core::Aabb {
        self.renderer
            .geometry()
            .map_or_else(|| self.params.synthetic.bounds(), |g| *g.bounds())
    }

    fn update_camera(&mut self) {
        let bounds = self.orbit_bounds();
        let target = bounds.center();
        let distance = bounds.radius() * 2.5;
        self.camera.orbit(target + Vec3::Y * bounds.radius() * 0.3, distance, self.orbit_angle);
        self.camera.look_at(target);
        self.orbit_angle += ORBIT_SPEED;
        self.renderer
            .set_camera(self.camera.clone(), Mat4::IDENTITY, SCREEN_HEIGHT);
    }

    pub fn run(&mut self) {
        let frame_time = Duration::from_secs_f64(1.0 / f64::from(self.params.target_fps.max(1)));
        let mut update_failed = false;

        for frame in 0..self.params.frames {
            let started = Instant::now();
            self.update_camera();

            if let Err(e) = self.renderer.update() {
                if !update_failed {
                    error!("point cloud update failed: {e:#}");
                }
                update_failed = true;
            }
            let stats = self.renderer.render_frame();
            debug!(frame, ?stats, "frame rendered");

            if frame % DIAGNOSTICS_INTERVAL == 0 {
                self.log_diagnostics();
            }
            if let Some(rest) = frame_time.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }

        self.log_diagnostics();
        match serde_json::to_string_pretty(&self.renderer.diagnostics()) {
            Ok(json) => info!("final diagnostics:\n{json}"),
            Err(e) => error!("failed to encode diagnostics: {e}"),
        }
    }

    fn log_diagnostics(&self) {
        let d = self.renderer.diagnostics();
        info!(
            converter = %d.converter_status,
            progress = d.converter_progress,
            streaming = d.streaming,
            visible_points = d.visible_points,
            visible_nodes = d.visible_nodes,
            loaded = d.nodes_loaded,
            loading = d.nodes_loading,
            queued = d.queued_loads,
            failed = d.failed_loads,
            cached = d.cache_size,
            cached_points = d.cache_points,
            ticks = d.traverser_ticks,
            "diagnostics"
        );
    }
}
