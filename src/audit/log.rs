//! Activity log.
//!
//! Counts what the agent has done: triggers, arm sessions, capture batches
//! and deliveries. Counters are lock-free and persisted as a single JSON
//! value in the key-value store, so the log is the sole writer of its key.
//! A store-backed log writes through on every recorded event, so counts
//! survive the process being killed while armed.

use crate::store::{SharedStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

const KEY_ACTIVITY: &str = "audit.activity";

/// Why an incident was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Motion,
    BreakIn,
}

impl TriggerKind {
    /// Reason recorded on evidence sessions.
    pub fn reason(&self) -> &'static str {
        match self {
            TriggerKind::Motion => "Motion Detection",
            TriggerKind::BreakIn => "Break-in detected",
        }
    }
}

#[derive(Debug)]
pub struct ActivityLog {
    motion_triggers: AtomicU64,
    break_in_triggers: AtomicU64,
    unlock_attempts: AtomicU64,
    arm_sessions: AtomicU64,
    batches_completed: AtomicU64,
    batches_failed: AtomicU64,
    artifacts_captured: AtomicU64,
    notifications_delivered: AtomicU64,
    disguises_shown: AtomicU64,
    emails_sent: AtomicU64,
    delivery_failures: AtomicU64,
    session_start: DateTime<Utc>,
    store: Option<SharedStore>,
    // Keeps snapshots from reaching the store out of order
    save_lock: Mutex<()>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self {
            motion_triggers: AtomicU64::new(0),
            break_in_triggers: AtomicU64::new(0),
            unlock_attempts: AtomicU64::new(0),
            arm_sessions: AtomicU64::new(0),
            batches_completed: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            artifacts_captured: AtomicU64::new(0),
            notifications_delivered: AtomicU64::new(0),
            disguises_shown: AtomicU64::new(0),
            emails_sent: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            session_start: Utc::now(),
            store: None,
            save_lock: Mutex::new(()),
        }
    }

    /// Create a log backed by `store`, picking up previously saved counts.
    pub fn with_store(store: SharedStore) -> Self {
        let mut log = Self::new();
        log.store = Some(store);
        log.load();
        log
    }

    pub fn record_trigger(&self, kind: TriggerKind) {
        match kind {
            TriggerKind::Motion => self.motion_triggers.fetch_add(1, Ordering::Relaxed),
            TriggerKind::BreakIn => self.break_in_triggers.fetch_add(1, Ordering::Relaxed),
        };
        self.write_through();
    }

    pub fn record_unlock_attempt(&self) {
        self.unlock_attempts.fetch_add(1, Ordering::Relaxed);
        self.write_through();
    }

    pub fn record_armed(&self) {
        self.arm_sessions.fetch_add(1, Ordering::Relaxed);
        self.write_through();
    }

    /// Record a finished capture batch and how many artifacts it produced.
    pub fn record_batch(&self, artifacts: usize) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
        self.artifacts_captured
            .fetch_add(artifacts as u64, Ordering::Relaxed);
        self.write_through();
    }

    pub fn record_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.write_through();
    }

    pub fn record_delivered(&self, count: u64) {
        self.notifications_delivered
            .fetch_add(count, Ordering::Relaxed);
        self.write_through();
    }

    pub fn record_disguise(&self) {
        self.disguises_shown.fetch_add(1, Ordering::Relaxed);
        self.write_through();
    }

    pub fn record_email_sent(&self) {
        self.emails_sent.fetch_add(1, Ordering::Relaxed);
        self.write_through();
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
        self.write_through();
    }

    pub fn stats(&self) -> ActivityStats {
        ActivityStats {
            motion_triggers: self.motion_triggers.load(Ordering::Relaxed),
            break_in_triggers: self.break_in_triggers.load(Ordering::Relaxed),
            unlock_attempts: self.unlock_attempts.load(Ordering::Relaxed),
            arm_sessions: self.arm_sessions.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            artifacts_captured: self.artifacts_captured.load(Ordering::Relaxed),
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
            disguises_shown: self.disguises_shown.load(Ordering::Relaxed),
            emails_sent: self.emails_sent.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Activity:\n\
             - Motion triggers: {}\n\
             - Break-in triggers: {}\n\
             - Unlock attempts: {}\n\
             - Arm sessions: {}\n\
             - Capture batches: {} completed, {} without evidence\n\
             - Artifacts captured: {}\n\
             - Alerts delivered: {}\n\
             - Disguise notifications: {}\n\
             - Emails sent: {}\n\
             - Delivery failures: {}",
            stats.motion_triggers,
            stats.break_in_triggers,
            stats.unlock_attempts,
            stats.arm_sessions,
            stats.batches_completed,
            stats.batches_failed,
            stats.artifacts_captured,
            stats.notifications_delivered,
            stats.disguises_shown,
            stats.emails_sent,
            stats.delivery_failures,
        )
    }

    /// Save counters to the backing store, if any.
    pub fn save(&self) -> Result<(), StoreError> {
        if let Some(store) = &self.store {
            let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
            let stats = self.stats();
            let persisted = PersistedActivity {
                motion_triggers: stats.motion_triggers,
                break_in_triggers: stats.break_in_triggers,
                unlock_attempts: stats.unlock_attempts,
                arm_sessions: stats.arm_sessions,
                batches_completed: stats.batches_completed,
                batches_failed: stats.batches_failed,
                artifacts_captured: stats.artifacts_captured,
                notifications_delivered: stats.notifications_delivered,
                disguises_shown: stats.disguises_shown,
                emails_sent: stats.emails_sent,
                delivery_failures: stats.delivery_failures,
                last_updated: Utc::now(),
            };
            store.put(KEY_ACTIVITY, serde_json::to_value(persisted)?)?;
        }
        Ok(())
    }

    fn write_through(&self) {
        if self.store.is_none() {
            return;
        }
        if let Err(e) = self.save() {
            warn!(error = %e, "Failed to persist activity counts");
        }
    }

    fn load(&mut self) {
        let Some(value) = self.store.as_ref().and_then(|s| s.get(KEY_ACTIVITY)) else {
            return;
        };
        let persisted: PersistedActivity = match serde_json::from_value(value) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Could not load previous activity counts");
                return;
            }
        };

        self.motion_triggers
            .store(persisted.motion_triggers, Ordering::Relaxed);
        self.break_in_triggers
            .store(persisted.break_in_triggers, Ordering::Relaxed);
        self.unlock_attempts
            .store(persisted.unlock_attempts, Ordering::Relaxed);
        self.arm_sessions
            .store(persisted.arm_sessions, Ordering::Relaxed);
        self.batches_completed
            .store(persisted.batches_completed, Ordering::Relaxed);
        self.batches_failed
            .store(persisted.batches_failed, Ordering::Relaxed);
        self.artifacts_captured
            .store(persisted.artifacts_captured, Ordering::Relaxed);
        self.notifications_delivered
            .store(persisted.notifications_delivered, Ordering::Relaxed);
        self.disguises_shown
            .store(persisted.disguises_shown, Ordering::Relaxed);
        self.emails_sent
            .store(persisted.emails_sent, Ordering::Relaxed);
        self.delivery_failures
            .store(persisted.delivery_failures, Ordering::Relaxed);
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of activity counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStats {
    pub motion_triggers: u64,
    pub break_in_triggers: u64,
    pub unlock_attempts: u64,
    pub arm_sessions: u64,
    pub batches_completed: u64,
    pub batches_failed: u64,
    pub artifacts_captured: u64,
    pub notifications_delivered: u64,
    pub disguises_shown: u64,
    pub emails_sent: u64,
    pub delivery_failures: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedActivity {
    #[serde(default)]
    motion_triggers: u64,
    #[serde(default)]
    break_in_triggers: u64,
    #[serde(default)]
    unlock_attempts: u64,
    #[serde(default)]
    arm_sessions: u64,
    #[serde(default)]
    batches_completed: u64,
    #[serde(default)]
    batches_failed: u64,
    #[serde(default)]
    artifacts_captured: u64,
    #[serde(default)]
    notifications_delivered: u64,
    #[serde(default)]
    disguises_shown: u64,
    #[serde(default)]
    emails_sent: u64,
    #[serde(default)]
    delivery_failures: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared activity log.
pub type SharedActivityLog = Arc<ActivityLog>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_activity_counting() {
        let log = ActivityLog::new();

        log.record_trigger(TriggerKind::Motion);
        log.record_trigger(TriggerKind::Motion);
        log.record_trigger(TriggerKind::BreakIn);
        log.record_batch(5);
        log.record_batch(3);

        let stats = log.stats();
        assert_eq!(stats.motion_triggers, 2);
        assert_eq!(stats.break_in_triggers, 1);
        assert_eq!(stats.batches_completed, 2);
        assert_eq!(stats.artifacts_captured, 8);
    }

    #[test]
    fn test_counts_survive_reload() {
        let store = MemoryStore::shared();
        {
            let log = ActivityLog::with_store(store.clone());
            log.record_armed();
            log.record_email_sent();
            log.save().unwrap();
        }

        let log = ActivityLog::with_store(store);
        let stats = log.stats();
        assert_eq!(stats.arm_sessions, 1);
        assert_eq!(stats.emails_sent, 1);
    }

    #[test]
    fn test_events_persist_without_explicit_save() {
        let store = MemoryStore::shared();
        {
            let log = ActivityLog::with_store(store.clone());
            log.record_trigger(TriggerKind::BreakIn);
            log.record_batch(5);
            log.record_delivered(1);
            // Dropped without save(), as when the process is killed
        }

        let stats = ActivityLog::with_store(store).stats();
        assert_eq!(stats.break_in_triggers, 1);
        assert_eq!(stats.batches_completed, 1);
        assert_eq!(stats.artifacts_captured, 5);
        assert_eq!(stats.notifications_delivered, 1);
    }

    #[test]
    fn test_debug_with_store() {
        let log = ActivityLog::with_store(MemoryStore::shared());
        log.record_unlock_attempt();
        assert!(format!("{log:?}").contains("MemoryStore"));
    }

    #[test]
    fn test_summary_format() {
        let log = ActivityLog::new();
        let summary = log.summary();

        assert!(summary.contains("Motion triggers"));
        assert!(summary.contains("Break-in triggers"));
        assert!(summary.contains("Emails sent"));
    }

    #[test]
    fn test_trigger_reasons() {
        assert_eq!(TriggerKind::Motion.reason(), "Motion Detection");
        assert_eq!(TriggerKind::BreakIn.reason(), "Break-in detected");
    }
}
