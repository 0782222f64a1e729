//! Audit counters for the anti-theft agent.
//!
//! Tracks what the agent has detected and delivered so the owner can see
//! its activity with `antitheft-agent status`.

pub mod log;

pub use log::{ActivityLog, ActivityStats, SharedActivityLog, TriggerKind};
