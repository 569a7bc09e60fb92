//! Error types for the streamer.

use thiserror::Error;

/// Streamer-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed octree descriptor
    #[error("Invalid octree metadata: {0}")]
    Metadata(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Worker pool or thread could not be started
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
