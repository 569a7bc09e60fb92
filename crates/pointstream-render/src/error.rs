//! Render front-end error types.

use pointstream_octree::NodeId;
use thiserror::Error;

/// Errors raised by the render front-end.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Loading or starting the streaming core failed.
    #[error(transparent)]
    Stream(#[from] pointstream_core::Error),

    /// GPU buffer allocation failed.
    #[error("Buffer creation failed: {0}")]
    BufferCreation(String),

    /// The node's payload left host memory before its buffers were created.
    #[error("Point payload of node {0} is no longer resident")]
    StalePayload(NodeId),

    /// The conversion pipeline reported an error.
    #[error("Converter error: {0}")]
    Converter(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RenderError>;
