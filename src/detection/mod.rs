//! Intrusion detection state machines.
//!
//! This module contains:
//! - The sensitivity-to-threshold model
//! - The debounced motion detector
//! - The lock/unlock tracker that classifies break-ins

pub mod lock;
pub mod motion;
pub mod threshold;

pub use lock::{LockEvent, LockPhase, LockState, LockStateTracker, LockStats, UnlockAttemptRecord};
pub use motion::{
    AlarmAction, MotionDetector, MotionState, MotionSummary, PendingAlarm, TriggerEvent,
};
pub use threshold::ThresholdModel;
