//! Interface to the offline conversion pipeline.
//!
//! Conversion itself happens outside this workspace; the renderer only starts
//! it, polls its status and reads the finished output.

use std::fmt;
use std::path::{Path, PathBuf};

use pointstream_octree::{PointPayload, METADATA_FILE};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Lifecycle of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConversionStatus {
    #[default]
    Created,
    Starting,
    Decimating,
    Waiting,
    Converting,
    Done,
    Aborted,
}

impl ConversionStatus {
    /// Human readable name for status displays.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Starting => "Starting",
            Self::Decimating => "Decimating",
            Self::Waiting => "Waiting",
            Self::Converting => "Converting",
            Self::Done => "Done",
            Self::Aborted => "Aborted",
        }
    }

    /// The job will not make further progress.
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters of a conversion job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    /// Raw input cloud.
    pub source: PathBuf,
    /// Directory the converted octree is written to.
    pub output_dir: PathBuf,
    /// Point count of the decimated preview cloud.
    pub decimated_cloud_size: usize,
}

/// A conversion pipeline the renderer can drive.
pub trait PointCloudConverter: Send {
    /// Begin converting. Called once per new unconverted handle.
    fn start(&mut self, request: &ConversionRequest) -> Result<()>;

    fn status(&self) -> ConversionStatus;

    /// Completion fraction in `[0, 1]`.
    fn progress(&self) -> f32;

    /// Whether the decimated preview cloud is available.
    fn decimation_finished(&self) -> bool;

    /// Take the decimated preview cloud. Returns `None` once taken or before
    /// decimation finished.
    fn take_decimated(&mut self) -> Option<PointPayload>;

    /// Stop the job and remove partial output.
    fn abort(&mut self);
}

/// Converter for handles that are always already converted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConverter;

impl PointCloudConverter for NoConverter {
    fn start(&mut self, request: &ConversionRequest) -> Result<()> {
        Err(crate::error::RenderError::Converter(format!(
            "no converter available for {}",
            request.source.display()
        )))
    }

    fn status(&self) -> ConversionStatus {
        ConversionStatus::Created
    }

    fn progress(&self) -> f32 {
        0.0
    }

    fn decimation_finished(&self) -> bool {
        false
    }

    fn take_decimated(&mut self) -> Option<PointPayload> {
        None
    }

    fn abort(&mut self) {}
}

/// A point cloud the renderer is asked to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointCloudHandle {
    /// Path of the raw input cloud; its file stem names the output directory.
    pub path: PathBuf,
    /// Whether converted output already exists.
    pub converted: bool,
}

impl PointCloudHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            converted: false,
        }
    }

    /// Handle for a cloud whose converted output is already on disk.
    pub fn converted(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            converted: true,
        }
    }

    /// `<converted_root>/<file stem>`.
    pub fn output_dir(&self, converted_root: &Path) -> PathBuf {
        let stem = self.path.file_stem().unwrap_or(self.path.as_os_str());
        converted_root.join(stem)
    }

    /// `<converted_root>/<file stem>/metadata.json`.
    pub fn metadata_path(&self, converted_root: &Path) -> PathBuf {
        self.output_dir(converted_root).join(METADATA_FILE)
    }
}
