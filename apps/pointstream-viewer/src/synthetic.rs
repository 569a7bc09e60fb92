//! Deterministic synthetic clouds and a converter that produces them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use glam::Vec3;
use parking_lot::Mutex;
use pointstream_core::Aabb;
use pointstream_octree::{OctreeWriter, PointPayload, WriterNode};
use pointstream_render::{ConversionRequest, ConversionStatus, PointCloudConverter, RenderError};
use tracing::{error, info};

/// Upper bound on the decimated preview, whatever the request asks for.
const MAX_DECIMATED_POINTS: usize = 200_000;

/// Parameters of a generated cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticCloud {
    /// Edge length of the root cube.
    pub extent: f32,
    /// Deepest octree level.
    pub depth: u32,
    pub points_per_node: usize,
    pub seed: u64,
}

impl Default for SyntheticCloud {
    fn default() -> Self {
        Self {
            extent: 256.0,
            depth: 3,
            points_per_node: 2_000,
            seed: 42,
        }
    }
}

impl SyntheticCloud {
    pub fn bounds(&self) -> Aabb {
        Aabb::new(Vec3::ZERO, Vec3::splat(self.extent))
    }

    /// Node tree with positions relative to each node's minimum corner.
    pub fn build(&self) -> WriterNode {
        self.build_node("r".to_string(), self.bounds(), 0, self.seed)
    }

    fn build_node(&self, name: String, bounds: Aabb, level: u32, seed: u64) -> WriterNode {
        let mut node = WriterNode::new(
            name.clone(),
            bounds,
            self.sample(&bounds, self.points_per_node, seed, false),
        );
        if level < self.depth {
            for octant in 0..8 {
                let child_seed = mix(seed ^ (octant as u64 + 1));
                // Roughly a quarter of the octants stay empty.
                if level > 0 && child_seed % 4 == 0 {
                    continue;
                }
                node = node.with_child(self.build_node(
                    format!("{name}{octant}"),
                    bounds.octant(octant),
                    level + 1,
                    child_seed,
                ));
            }
        }
        node
    }

    /// Low density preview over the whole cloud, in cloud coordinates.
    pub fn decimated(&self, count: usize) -> PointPayload {
        self.sample(&self.bounds(), count, mix(self.seed), true)
    }

    /// Write the converted directory. Returns the descriptor path.
    pub fn write(&self, dir: &Path) -> pointstream_core::Result<PathBuf> {
        OctreeWriter::new(Vec3::ONE, Vec3::ZERO)
            .with_spacing(self.extent / self.points_per_node.max(1) as f32)
            .write(dir, &self.build())
    }

    fn sample(&self, bounds: &Aabb, count: usize, seed: u64, absolute: bool) -> PointPayload {
        let size = bounds.size();
        let mut state = seed;
        let mut positions = Vec::with_capacity(count);
        let mut colors = Vec::with_capacity(count);
        for _ in 0..count {
            let local = Vec3::new(unit(&mut state), unit(&mut state), unit(&mut state)) * size;
            let height = (bounds.min.y + local.y) / self.extent;
            let point = if absolute { bounds.min + local } else { local };
            positions.push(point.to_array());
            colors.push(height_color(height));
        }
        PointPayload::new(positions, colors)
    }
}

fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

fn unit(state: &mut u64) -> f32 {
    *state = mix(*state);
    (*state >> 40) as f32 / (1u64 << 24) as f32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn height_color(height: f32) -> [u8; 4] {
    let t = height.clamp(0.0, 1.0);
    [(t * 255.0) as u8, 96, ((1.0 - t) * 255.0) as u8, 255]
}

#[derive(Debug, Default)]
struct JobState {
    status: ConversionStatus,
    progress: f32,
    decimated: Option<PointPayload>,
    decimation_finished: bool,
}

impl JobState {
    fn advance(&mut self, status: ConversionStatus, progress: f32) {
        info!(%status, progress, "conversion progress");
        self.status = status;
        self.progress = progress;
    }
}

/// Converter that "converts" any input by generating a [`SyntheticCloud`].
pub struct SyntheticConverter {
    cloud: SyntheticCloud,
    state: Arc<Mutex<JobState>>,
    abort: Arc<AtomicBool>,
    output_dir: Option<PathBuf>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticConverter {
    pub fn new(cloud: SyntheticCloud) -> Self {
        Self {
            cloud,
            state: Arc::new(Mutex::new(JobState::default())),
            abort: Arc::new(AtomicBool::new(false)),
            output_dir: None,
            worker: None,
        }
    }

    fn run_job(
        cloud: SyntheticCloud,
        request: &ConversionRequest,
        state: &Mutex<JobState>,
        abort: &AtomicBool,
    ) -> pointstream_core::Result<()> {
        state.lock().advance(ConversionStatus::Decimating, 0.0);
        let preview = cloud.decimated(request.decimated_cloud_size.min(MAX_DECIMATED_POINTS));
        {
            let mut state = state.lock();
            state.decimated = Some(preview);
            state.decimation_finished = true;
            state.advance(ConversionStatus::Waiting, 0.1);
        }
        if abort.load(Ordering::Acquire) {
            return Ok(());
        }

        state.lock().advance(ConversionStatus::Converting, 0.2);
        cloud.write(&request.output_dir)?;
        if abort.load(Ordering::Acquire) {
            return Ok(());
        }
        state.lock().advance(ConversionStatus::Done, 1.0);
        Ok(())
    }
}

impl PointCloudConverter for SyntheticConverter {
    fn start(&mut self, request: &ConversionRequest) -> pointstream_render::Result<()> {
        if self.worker.is_some() {
            return Err(RenderError::Converter("conversion already started".to_string()));
        }
        self.state.lock().advance(ConversionStatus::Starting, 0.0);

        let cloud = self.cloud;
        let request = request.clone();
        let state = Arc::clone(&self.state);
        let abort = Arc::clone(&self.abort);
        self.output_dir = Some(request.output_dir.clone());
        let worker = std::thread::Builder::new()
            .name("synthetic-converter".to_string())
            .spawn(move || {
                if let Err(e) = Self::run_job(cloud, &request, &state, &abort) {
                    error!("conversion of {} failed: {e}", request.source.display());
                    state.lock().advance(ConversionStatus::Aborted, 0.0);
                }
            })
            .map_err(|e| RenderError::Converter(format!("failed to spawn converter: {e}")))?;
        self.worker = Some(worker);
        Ok(())
    }

    fn status(&self) -> ConversionStatus {
        self.state.lock().status
    }

    fn progress(&self) -> f32 {
        self.state.lock().progress
    }

    fn decimation_finished(&self) -> bool {
        self.state.lock().decimation_finished
    }

    fn take_decimated(&mut self) -> Option<PointPayload> {
        self.state.lock().decimated.take()
    }

    fn abort(&mut self) {
        self.abort.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("converter thread panicked");
            }
        }
        if let Some(dir) = self.output_dir.take() {
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    error!("failed to remove partial output {}: {e}", dir.display());
                }
            }
        }
        self.state.lock().advance(ConversionStatus::Aborted, 0.0);
    }
}
