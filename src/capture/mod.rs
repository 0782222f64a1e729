//! Evidence capture across cameras and the screen.
//!
//! This module contains:
//! - Source and device traits implemented by hardware bindings
//! - The completion barrier that tracks per-source progress
//! - The coordinator that runs sources concurrently under a deadline
//! - A placeholder source that writes empty artifact files

pub mod barrier;
pub mod coordinator;
pub mod placeholder;
pub mod source;

pub use barrier::{CaptureProgress, CompletionBarrier};
pub use coordinator::{CaptureCoordinator, CaptureError};
pub use placeholder::PlaceholderSource;
pub use source::{
    CaptureBatch, CaptureDevice, CaptureMode, CaptureRequest, CaptureResult, CaptureSource,
    ShotSpec, SourceError, SourceId,
};
