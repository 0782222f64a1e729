//! Lock-screen tracker.
//!
//! Screen events are classified into unlock attempts and break-ins. The
//! platform never reports failed credential entries, so an attempt is
//! approximated as "screen came on while the device was locked". A device
//! that is finally unlocked after `break_in_threshold` such attempts is
//! treated as a successful break-in. This is a heuristic: an owner who wakes
//! the screen three times before unlocking will be classified the same way.

use crate::config::LockConfig;
use crate::sensor::types::{ScreenEvent, ScreenEventKind};
use crate::store::SharedStore;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const KEY_TOTAL_ATTEMPTS: &str = "lock.total_unlock_attempts";
const KEY_TOTAL_BREAK_INS: &str = "lock.total_break_ins";
const KEY_LAST_ATTEMPT: &str = "lock.last_unlock_attempt_ms";
const KEY_LAST_BREAK_IN: &str = "lock.last_break_in_ms";
const KEY_BREAK_IN_ATTEMPTS: &str = "lock.break_in_failed_attempts";
const KEY_ATTEMPT_LOG: &str = "lock.attempt_log";

/// Where the device is in its lock cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPhase {
    Unlocked,
    LockedIdle,
    LockedUnlockAttempted,
}

impl LockPhase {
    pub fn is_locked(&self) -> bool {
        !matches!(self, LockPhase::Unlocked)
    }
}

/// Current phase plus the attempts counted since the last lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockState {
    pub phase: LockPhase,
    pub failed_attempts: u32,
}

/// One entry in the persisted attempt log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockAttemptRecord {
    pub timestamp_ms: i64,
    pub attempt: u32,
}

impl UnlockAttemptRecord {
    pub fn at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_ms).single()
    }
}

/// Events emitted by the tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LockEvent {
    DeviceLocked {
        at: DateTime<Utc>,
    },
    UnlockAttempt {
        attempt: u32,
        at: DateTime<Utc>,
    },
    SuspiciousActivity {
        failed_attempts: u32,
        description: String,
    },
    SuccessfulBreakIn {
        at: DateTime<Utc>,
        failed_attempts: u32,
    },
    DeviceUnlocked {
        at: DateTime<Utc>,
        was_break_in: bool,
    },
}

/// Lifetime counters read back from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockStats {
    pub total_unlock_attempts: i32,
    pub total_break_ins: i32,
    pub last_unlock_attempt: Option<DateTime<Utc>>,
    pub last_break_in: Option<DateTime<Utc>>,
    pub last_break_in_failed_attempts: i32,
}

impl LockStats {
    /// Read the persisted counters without a tracker.
    pub fn from_store(store: &SharedStore) -> Self {
        let millis = |key: &str| {
            let ms = store.get_long(key, 0);
            if ms > 0 {
                Utc.timestamp_millis_opt(ms).single()
            } else {
                None
            }
        };

        Self {
            total_unlock_attempts: store.get_int(KEY_TOTAL_ATTEMPTS, 0),
            total_break_ins: store.get_int(KEY_TOTAL_BREAK_INS, 0),
            last_unlock_attempt: millis(KEY_LAST_ATTEMPT),
            last_break_in: millis(KEY_LAST_BREAK_IN),
            last_break_in_failed_attempts: store.get_int(KEY_BREAK_IN_ATTEMPTS, 0),
        }
    }
}

pub struct LockStateTracker {
    config: LockConfig,
    store: SharedStore,
    state: LockState,
}

impl LockStateTracker {
    /// Create a tracker. `initially_locked` reflects the keyguard state at
    /// arming time.
    pub fn new(config: LockConfig, store: SharedStore, initially_locked: bool) -> Self {
        let phase = if initially_locked {
            LockPhase::LockedIdle
        } else {
            LockPhase::Unlocked
        };
        Self {
            config,
            store,
            state: LockState {
                phase,
                failed_attempts: 0,
            },
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state.phase.is_locked()
    }

    /// Feed one screen transition through the state machine.
    pub fn submit_screen_event(&mut self, event: &ScreenEvent) -> Vec<LockEvent> {
        let at = event.timestamp;
        let mut events = Vec::new();

        match (event.kind, self.state.phase) {
            (ScreenEventKind::ScreenOff, LockPhase::Unlocked) => {
                self.state = LockState {
                    phase: LockPhase::LockedIdle,
                    failed_attempts: 0,
                };
                debug!("Device locked");
                events.push(LockEvent::DeviceLocked { at });
            }
            (ScreenEventKind::ScreenOff, _) => {
                // Screen went dark again while locked; the streak is over.
                if self.state.failed_attempts > 0 {
                    debug!(
                        failed_attempts = self.state.failed_attempts,
                        "Screen off while locked, attempt streak cleared"
                    );
                }
                self.state = LockState {
                    phase: LockPhase::LockedIdle,
                    failed_attempts: 0,
                };
            }
            (ScreenEventKind::ScreenOn, LockPhase::Unlocked) => {}
            (ScreenEventKind::ScreenOn, _) => {
                self.state.phase = LockPhase::LockedUnlockAttempted;
                self.state.failed_attempts = self.state.failed_attempts.saturating_add(1);
                let attempt = self.state.failed_attempts;

                self.record_attempt(at, attempt);
                info!(attempt, "Unlock attempt");
                events.push(LockEvent::UnlockAttempt { attempt, at });

                if attempt >= self.config.suspicious_after {
                    warn!(attempt, "Suspicious unlock activity");
                    events.push(LockEvent::SuspiciousActivity {
                        failed_attempts: attempt,
                        description: format!("Multiple unlock attempts detected: {attempt}"),
                    });
                }
            }
            (ScreenEventKind::UserPresent, LockPhase::Unlocked) => {}
            (ScreenEventKind::UserPresent, _) => {
                let failed_attempts = self.state.failed_attempts;
                let was_break_in = failed_attempts >= self.config.break_in_threshold;

                if was_break_in {
                    self.record_break_in(at, failed_attempts);
                    warn!(failed_attempts, "Successful break-in detected");
                    events.push(LockEvent::SuccessfulBreakIn {
                        at,
                        failed_attempts,
                    });
                } else {
                    info!(failed_attempts, "Legitimate unlock");
                }

                self.state = LockState {
                    phase: LockPhase::Unlocked,
                    failed_attempts: 0,
                };
                events.push(LockEvent::DeviceUnlocked { at, was_break_in });
            }
        }

        events
    }

    /// Most recent attempts, newest first.
    pub fn recent_attempts(&self, limit: usize) -> Vec<UnlockAttemptRecord> {
        let mut log = self.attempt_log();
        log.reverse();
        log.truncate(limit);
        log
    }

    pub fn stats(&self) -> LockStats {
        LockStats::from_store(&self.store)
    }

    /// Forget all persisted counters and the attempt log.
    pub fn clear_history(&self) {
        for key in [
            KEY_TOTAL_ATTEMPTS,
            KEY_TOTAL_BREAK_INS,
            KEY_LAST_ATTEMPT,
            KEY_LAST_BREAK_IN,
            KEY_BREAK_IN_ATTEMPTS,
            KEY_ATTEMPT_LOG,
        ] {
            if let Err(e) = self.store.remove(key) {
                warn!(key, error = %e, "Failed to clear lock history");
            }
        }
        info!("Lock history cleared");
    }

    fn attempt_log(&self) -> Vec<UnlockAttemptRecord> {
        self.store
            .get(KEY_ATTEMPT_LOG)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    fn record_attempt(&self, at: DateTime<Utc>, attempt: u32) {
        let total = self.store.get_int(KEY_TOTAL_ATTEMPTS, 0).saturating_add(1);

        let mut log = self.attempt_log();
        log.push(UnlockAttemptRecord {
            timestamp_ms: at.timestamp_millis(),
            attempt,
        });
        let capacity = self.config.attempt_log_capacity;
        if log.len() > capacity {
            log.drain(..log.len() - capacity);
        }

        let result = self
            .store
            .put_int(KEY_TOTAL_ATTEMPTS, total)
            .and_then(|_| self.store.put_long(KEY_LAST_ATTEMPT, at.timestamp_millis()))
            .and_then(|_| {
                let value = serde_json::to_value(&log)?;
                self.store.put(KEY_ATTEMPT_LOG, value)
            });
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist unlock attempt");
        }
    }

    fn record_break_in(&self, at: DateTime<Utc>, failed_attempts: u32) {
        let total = self.store.get_int(KEY_TOTAL_BREAK_INS, 0).saturating_add(1);
        let attempts = i32::try_from(failed_attempts).unwrap_or(i32::MAX);

        let result = self
            .store
            .put_int(KEY_TOTAL_BREAK_INS, total)
            .and_then(|_| self.store.put_long(KEY_LAST_BREAK_IN, at.timestamp_millis()))
            .and_then(|_| self.store.put_int(KEY_BREAK_IN_ATTEMPTS, attempts));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist break-in");
        }
    }
}
