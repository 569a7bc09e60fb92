//! GPU abstraction used by the renderer, plus a headless implementation.

use glam::{Mat4, Vec3};
use hashbrown::HashMap;
use pointstream_octree::{NodeId, PointPayload};

use crate::camera::CameraUniforms;
use crate::error::{RenderError, Result};

/// Position and color buffers of one uploaded payload.
///
/// Owned by the renderer; handing it back to [`GpuBackend::release`] is the
/// only way to free it.
#[derive(Debug)]
pub struct NodeBuffers<B> {
    pub positions: B,
    pub colors: B,
    pub num_points: u32,
}

/// Per-draw uniform data.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct NodeUniforms {
    /// Cloud-to-world transform.
    pub model: [[f32; 4]; 4],
    /// xyz: per-axis position scale, w: point size.
    pub scale: [f32; 4],
    /// xyz: position offset.
    pub offset: [f32; 4],
}

impl NodeUniforms {
    pub fn new(model: Mat4, scale: Vec3, offset: Vec3, point_size: f32) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            scale: [scale.x, scale.y, scale.z, point_size],
            offset: [offset.x, offset.y, offset.z, 0.0],
        }
    }
}

/// One point draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCall {
    /// Node being drawn; `None` for the decimated preview cloud.
    pub node: Option<NodeId>,
    pub num_points: u32,
    pub uniforms: NodeUniforms,
}

/// GPU operations the renderer needs.
pub trait GpuBackend {
    /// Backend buffer handle.
    type Buffer;

    /// Called once per rendered frame before any draw.
    fn begin_frame(&mut self, camera: &CameraUniforms);

    /// Upload a payload into new position and color buffers.
    fn create_buffers(&mut self, payload: &PointPayload) -> Result<NodeBuffers<Self::Buffer>>;

    /// Free buffers created by [`create_buffers`](Self::create_buffers).
    fn release(&mut self, buffers: NodeBuffers<Self::Buffer>);

    /// Draw `call.num_points` points from `buffers`.
    fn draw(&mut self, buffers: &NodeBuffers<Self::Buffer>, call: &DrawCall);
}

/// Buffer handle of the [`HeadlessBackend`].
#[derive(Debug, PartialEq, Eq)]
pub struct HeadlessBuffer {
    id: u64,
    bytes: usize,
}

impl HeadlessBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

/// Backend that tracks allocations and draws without a GPU.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u64,
    live: HashMap<u64, usize>,
    frames: u64,
    draws: u64,
    points_drawn: u64,
    last_draw: Option<DrawCall>,
    last_camera: Option<CameraUniforms>,
    failures_pending: usize,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` buffer creations fail.
    pub fn fail_next_creations(&mut self, count: usize) {
        self.failures_pending = count;
    }

    /// Buffers currently allocated.
    pub fn live_buffers(&self) -> usize {
        self.live.len()
    }

    /// Bytes currently allocated.
    pub fn live_bytes(&self) -> usize {
        self.live.values().sum()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }

    pub fn points_drawn(&self) -> u64 {
        self.points_drawn
    }

    pub fn last_draw(&self) -> Option<&DrawCall> {
        self.last_draw.as_ref()
    }

    pub fn last_camera(&self) -> Option<&CameraUniforms> {
        self.last_camera.as_ref()
    }

    fn allocate(&mut self, bytes: usize) -> HeadlessBuffer {
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id, bytes);
        HeadlessBuffer { id, bytes }
    }
}

impl GpuBackend for HeadlessBackend {
    type Buffer = HeadlessBuffer;

    fn begin_frame(&mut self, camera: &CameraUniforms) {
        self.frames += 1;
        self.last_camera = Some(*camera);
    }

    fn create_buffers(&mut self, payload: &PointPayload) -> Result<NodeBuffers<HeadlessBuffer>> {
        if self.failures_pending > 0 {
            self.failures_pending -= 1;
            return Err(RenderError::BufferCreation("injected failure".to_string()));
        }
        if payload.is_empty() {
            return Err(RenderError::BufferCreation("empty payload".to_string()));
        }
        let num_points = u32::try_from(payload.len())
            .map_err(|_| RenderError::BufferCreation("payload too large".to_string()))?;
        Ok(NodeBuffers {
            positions: self.allocate(payload.position_bytes().len()),
            colors: self.allocate(payload.color_bytes().len()),
            num_points,
        })
    }

    fn release(&mut self, buffers: NodeBuffers<HeadlessBuffer>) {
        for buffer in [buffers.positions, buffers.colors] {
            if self.live.remove(&buffer.id).is_none() {
                tracing::error!(buffer = buffer.id, "released a buffer that is not live");
            }
        }
    }

    fn draw(&mut self, buffers: &NodeBuffers<HeadlessBuffer>, call: &DrawCall) {
        if !self.live.contains_key(&buffers.positions.id) {
            tracing::error!(node = ?call.node, "draw from released buffers");
            return;
        }
        self.draws += 1;
        self.points_drawn += u64::from(call.num_points);
        self.last_draw = Some(*call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_allocations() {
        let mut backend = HeadlessBackend::new();
        let payload = PointPayload::new(vec![[0.0; 3]; 4], Vec::new());
        let buffers = backend.create_buffers(&payload).unwrap();
        assert_eq!(buffers.num_points, 4);
        assert_eq!(backend.live_buffers(), 2);
        assert_eq!(backend.live_bytes(), 4 * 12 + 4 * 4);

        let call = DrawCall {
            node: Some(NodeId(1)),
            num_points: 4,
            uniforms: NodeUniforms::new(Mat4::IDENTITY, Vec3::ONE, Vec3::ZERO, 1.5),
        };
        backend.draw(&buffers, &call);
        assert_eq!(backend.draws(), 1);
        assert_eq!(backend.points_drawn(), 4);
        assert!((backend.last_draw().unwrap().uniforms.scale[3] - 1.5).abs() < f32::EPSILON);

        backend.release(buffers);
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn injected_and_empty_failures() {
        let mut backend = HeadlessBackend::new();
        let payload = PointPayload::new(vec![[0.0; 3]], Vec::new());
        backend.fail_next_creations(1);
        assert!(matches!(
            backend.create_buffers(&payload),
            Err(RenderError::BufferCreation(_))
        ));
        assert!(backend.create_buffers(&payload).is_ok());
        assert!(backend.create_buffers(&PointPayload::default()).is_err());
    }
}
