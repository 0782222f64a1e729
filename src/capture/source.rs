//! Capture source abstractions.
//!
//! A [`CaptureSource`] is a camera or the screen. Acquiring it yields an
//! exclusive [`CaptureDevice`] that must be released once the batch is over,
//! whether the shots succeeded, failed or were cancelled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Identity of a capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Front,
    Back,
    Screen,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Front => "front",
            SourceId::Back => "back",
            SourceId::Screen => "screen",
        }
    }

    pub fn is_camera(&self) -> bool {
        !matches!(self, SourceId::Screen)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single shot to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotSpec {
    Still { index: u32 },
    Clip { index: u32, duration: Duration },
}

impl ShotSpec {
    pub fn index(&self) -> u32 {
        match self {
            ShotSpec::Still { index } | ShotSpec::Clip { index, .. } => *index,
        }
    }
}

/// Kind of batch being taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    Photo,
    Video,
}

/// What a single source is asked to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub source: SourceId,
    pub mode: CaptureMode,
    pub target_count: u32,
    /// Pause between consecutive shots
    pub interval: Duration,
    /// Clip length in video mode
    pub clip_duration: Duration,
}

impl CaptureRequest {
    pub fn shot(&self, index: u32) -> ShotSpec {
        match self.mode {
            CaptureMode::Photo => ShotSpec::Still { index },
            CaptureMode::Video => ShotSpec::Clip {
                index,
                duration: self.clip_duration,
            },
        }
    }
}

/// Errors raised by sources and devices.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("configuration failed: {0}")]
    Configure(String),
    #[error("capture failed: {0}")]
    Capture(String),
}

/// Something that can hand out an exclusive capture device.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    fn id(&self) -> SourceId;

    async fn acquire(&self) -> Result<Box<dyn CaptureDevice>, SourceError>;
}

/// An acquired device. `release` consumes it so it cannot be used afterwards.
#[async_trait]
pub trait CaptureDevice: Send {
    async fn configure(&mut self, request: &CaptureRequest) -> Result<(), SourceError>;

    /// Take one shot and return the path of the written artifact.
    async fn capture_one(&mut self, shot: ShotSpec) -> Result<PathBuf, SourceError>;

    async fn release(self: Box<Self>);
}

/// Outcome for one source in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureResult {
    pub source: SourceId,
    pub artifact_paths: Vec<PathBuf>,
    pub succeeded: bool,
    pub error_reason: Option<String>,
}

impl CaptureResult {
    pub fn success(source: SourceId, artifact_paths: Vec<PathBuf>) -> Self {
        Self {
            source,
            artifact_paths,
            succeeded: true,
            error_reason: None,
        }
    }

    pub fn failure(source: SourceId, artifact_paths: Vec<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            source,
            artifact_paths,
            succeeded: false,
            error_reason: Some(reason.into()),
        }
    }
}

/// All results of one batch.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureBatch {
    pub mode: CaptureMode,
    pub results: Vec<CaptureResult>,
    /// The batch deadline passed before every source finished
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CaptureBatch {
    /// Every artifact, in source order.
    pub fn artifact_paths(&self) -> Vec<PathBuf> {
        self.results
            .iter()
            .flat_map(|r| r.artifact_paths.iter().cloned())
            .collect()
    }

    pub fn artifact_count(&self) -> usize {
        self.results.iter().map(|r| r.artifact_paths.len()).sum()
    }

    pub fn result_for(&self, source: SourceId) -> Option<&CaptureResult> {
        self.results.iter().find(|r| r.source == source)
    }
}
