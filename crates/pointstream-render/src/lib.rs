//! Render front-end of pointstream.
//!
//! [`PointCloudRenderer`] drives an optional conversion job, loads the
//! converted octree, runs the streaming [`Traverser`](pointstream_stream::Traverser)
//! and turns each published render/delete pair into buffer uploads, releases
//! and draws on a [`GpuBackend`].

pub mod backend;
pub mod camera;
pub mod converter;
pub mod error;
pub mod renderer;
pub mod settings;
pub mod stats;

pub use backend::{DrawCall, GpuBackend, HeadlessBackend, HeadlessBuffer, NodeBuffers, NodeUniforms};
pub use camera::{Camera, CameraUniforms};
pub use converter::{
    ConversionRequest, ConversionStatus, NoConverter, PointCloudConverter, PointCloudHandle,
};
pub use error::{RenderError, Result};
pub use renderer::PointCloudRenderer;
pub use settings::{RendererSettings, SettingsChanges, SettingsTracker};
pub use stats::{Diagnostics, FrameStats};
