//! Arm/disarm lifecycle state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tracing::info;

/// Point-in-time view of the arm state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArmSnapshot {
    pub armed: bool,
    pub armed_at: Option<DateTime<Utc>>,
    /// Number of arm sessions started by this process
    pub session: u64,
}

/// Whether protection is active. Created once per process and shared by
/// handle with everything that needs to know.
#[derive(Debug, Default)]
pub struct ArmState {
    inner: Mutex<ArmSnapshot>,
}

impl ArmState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an arm session. Returns the new session number, or `None` if
    /// already armed.
    pub fn begin(&self) -> Option<u64> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if state.armed {
            return None;
        }
        state.armed = true;
        state.armed_at = Some(Utc::now());
        state.session += 1;
        info!(session = state.session, "Arm session started");
        Some(state.session)
    }

    /// End the current arm session. Returns false if it was not armed.
    pub fn end(&self) -> bool {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !state.armed {
            return false;
        }
        state.armed = false;
        state.armed_at = None;
        info!(session = state.session, "Arm session ended");
        true
    }

    pub fn is_armed(&self) -> bool {
        self.snapshot().armed
    }

    pub fn snapshot(&self) -> ArmSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
