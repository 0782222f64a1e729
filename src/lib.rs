//! Anti-Theft Agent - intrusion detection to evidence pipeline.
//!
//! This library decides when something suspicious happened to a device,
//! captures evidence from its cameras and screen, and holds the resulting
//! alert until the rightful owner can see it.
//!
//! # Guarantees
//!
//! - **Bounded capture**: a capture batch always finishes within its timeout
//!   and releases every device it acquired
//! - **One batch at a time**: overlapping triggers are rejected, never
//!   interleaved
//! - **At-most-once alerts**: a queued alert is delivered once the device is
//!   unlocked and never again
//! - **Atomic deletion**: an evidence session and its files go together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Anti-Theft Agent                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Sensor    │──▶│  Detection  │──▶│   Capture   │       │
//! │  │    Feed     │   │ motion/lock │   │ coordinator │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                           │                 │               │
//! │                           ▼                 ▼               │
//! │                    ┌─────────────┐   ┌─────────────┐       │
//! │                    │  Activity   │   │  Evidence   │       │
//! │                    │     Log     │   │   Session   │       │
//! │                    └─────────────┘   └─────────────┘       │
//! │                                             │               │
//! │                                             ▼               │
//! │                                      ┌─────────────┐       │
//! │                                      │   Notify    │       │
//! │                                      └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use antitheft_agent::{detection::MotionDetector, sensor::MotionSample, DetectorConfig};
//!
//! let mut detector = MotionDetector::new(DetectorConfig::default());
//! if let Some(trigger) = detector.submit_sample(&MotionSample::accelerometer(0.0, 9.8, 0.0)) {
//!     println!("alarm due at {}", trigger.alarm_due);
//! }
//! ```

pub mod agent;
pub mod audit;
pub mod capture;
pub mod config;
pub mod detection;
pub mod evidence;
pub mod notify;
pub mod sensor;
pub mod store;

// Re-export key types at crate root for convenience
pub use agent::{Agent, AgentError, AgentStats, ArmState};
pub use audit::{ActivityLog, ActivityStats, SharedActivityLog, TriggerKind};
pub use capture::{CaptureCoordinator, CaptureError, CaptureSource, SourceId};
pub use config::{
    CaptureConfig, Config, DetectorConfig, LockConfig, NotificationConfig, RetentionConfig,
};
pub use detection::{LockEvent, LockStateTracker, MotionDetector, ThresholdModel};
pub use evidence::{EvidenceSession, EvidenceStore};
pub use notify::{DispatchSink, Notification, NotificationDispatcher};
pub use sensor::{MotionSample, ScreenEvent, ScreenEventKind, SensorFeed, SensorInput};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, SharedStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Notice on how break-ins are classified, displayed to users.
pub const BREAK_IN_HEURISTIC_NOTICE: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║          ANTI-THEFT AGENT - BREAK-IN DETECTION NOTICE            ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  Break-in detection is a HEURISTIC, not a guarantee.             ║
║                                                                  ║
║  ✓ WHAT COUNTS AS A BREAK-IN:                                    ║
║    • The screen woke while locked several times in a row         ║
║    • The device was then unlocked                                ║
║                                                                  ║
║  ✗ WHAT IT CANNOT TELL:                                          ║
║    • Whether the PIN or pattern entered was wrong                ║
║    • Who is holding the device                                   ║
║    • Whether the owner simply glanced at the lock screen         ║
║                                                                  ║
║  Evidence stays on this device and is removed after the          ║
║  retention window.                                               ║
║                                                                  ║
║  You can view detection statistics anytime with:                 ║
║    antitheft-agent status                                        ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_break_in_notice_contents() {
        assert!(BREAK_IN_HEURISTIC_NOTICE.contains("HEURISTIC"));
        assert!(BREAK_IN_HEURISTIC_NOTICE.contains("CANNOT TELL"));
        assert!(BREAK_IN_HEURISTIC_NOTICE.contains("antitheft-agent status"));
    }
}
