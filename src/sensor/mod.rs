//! Sensor and lock-screen input for the agent.
//!
//! The platform layer pushes motion samples and screen transitions into a
//! [`SensorFeed`]; the agent drains them and hands them to the detectors.

pub mod feed;
pub mod types;

pub use feed::{SensorError, SensorFeed, SensorSender};
pub use types::{MotionSample, ScreenEvent, ScreenEventKind, SensorInput, SensorKind};
