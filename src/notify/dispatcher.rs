//! Unlock-gated alert queue with delayed email.
//!
//! Alerts raised while the device is locked are held back so an intruder
//! holding the phone never sees them; a cover notification is shown instead.
//! The queue is flushed as soon as an unlock is observed, either directly on
//! enqueue or by the periodic poll. Email goes out on its own timer,
//! independent of the lock state.

use crate::audit::SharedActivityLog;
use crate::config::NotificationConfig;
use crate::notify::disguise;
use crate::notify::email;
use crate::notify::sink::{Alert, DispatchSink, Priority};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read-only view of the device lock state.
pub trait LockStatus: Send + Sync {
    fn is_locked(&self) -> bool;
}

/// Lock state kept up to date by whoever observes screen events.
#[derive(Debug, Default)]
pub struct SharedLockFlag {
    locked: AtomicBool,
}

impl SharedLockFlag {
    pub fn new(locked: bool) -> Self {
        Self {
            locked: AtomicBool::new(locked),
        }
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Release);
    }
}

impl LockStatus for SharedLockFlag {
    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

/// What a caller asks to send.
#[derive(Debug, Clone)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub evidence_paths: Vec<PathBuf>,
    pub priority: Priority,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            evidence_paths: Vec::new(),
            priority: Priority::Normal,
        }
    }

    pub fn with_evidence(mut self, paths: Vec<PathBuf>) -> Self {
        self.evidence_paths = paths;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// A queued notification waiting for the device to be unlocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingNotification {
    pub id: u64,
    pub title: String,
    pub message: String,
    pub evidence_paths: Vec<PathBuf>,
    pub enqueued_at: DateTime<Utc>,
    pub priority: Priority,
}

impl PendingNotification {
    fn to_alert(&self) -> Alert {
        let time = self.enqueued_at.with_timezone(&Local).format("%b %d, %H:%M");
        Alert {
            title: self.title.clone(),
            body: format!(
                "{}\n\nTime: {}\nEvidence collected: {} files",
                self.message,
                time,
                self.evidence_paths.len()
            ),
            priority: self.priority,
            evidence_paths: self.evidence_paths.clone(),
            disguised: false,
        }
    }
}

pub struct NotificationDispatcher {
    config: NotificationConfig,
    sink: Arc<dyn DispatchSink>,
    lock: Arc<dyn LockStatus>,
    activity: SharedActivityLog,
    device_info: String,
    queue: Mutex<VecDeque<PendingNotification>>,
    next_id: AtomicU64,
    email_scope: Mutex<CancellationToken>,
}

impl NotificationDispatcher {
    pub fn new(
        config: NotificationConfig,
        sink: Arc<dyn DispatchSink>,
        lock: Arc<dyn LockStatus>,
        activity: SharedActivityLog,
        device_info: String,
    ) -> Self {
        Self {
            config,
            sink,
            lock,
            activity,
            device_info,
            queue: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            email_scope: Mutex::new(CancellationToken::new()),
        }
    }

    /// Queue a notification. Delivered at once if the device is unlocked;
    /// otherwise held and covered by a disguise notification. Email, when
    /// enabled, is scheduled either way. Returns the queued id.
    pub fn enqueue(&self, notification: Notification) -> u64 {
        let pending = PendingNotification {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            title: notification.title,
            message: notification.message,
            evidence_paths: notification.evidence_paths,
            enqueued_at: Utc::now(),
            priority: notification.priority,
        };
        let id = pending.id;

        self.schedule_email(&pending);
        self.queue_lock().push_back(pending);

        if self.lock.is_locked() {
            debug!(id, "Device locked, notification held");
            if self.config.disguise_enabled {
                self.send_disguise();
            }
        } else {
            self.flush();
        }
        id
    }

    /// Flush the queue if the device is unlocked. Returns how many were
    /// delivered.
    pub fn poll_once(&self) -> usize {
        if self.lock.is_locked() {
            return 0;
        }
        self.flush()
    }

    /// Deliver and remove everything queued. Each item leaves the queue
    /// before it is handed to the sink, so nothing is delivered twice.
    pub fn flush(&self) -> usize {
        let pending: Vec<PendingNotification> = self.queue_lock().drain(..).collect();
        if pending.is_empty() {
            return 0;
        }

        info!(count = pending.len(), "Device unlocked, delivering held notifications");
        let mut delivered = 0;
        for notification in &pending {
            match self.sink.deliver_alert(&notification.to_alert()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(id = notification.id, error = %e, "Failed to deliver notification");
                    self.activity.record_delivery_failure();
                }
            }
        }
        self.activity.record_delivered(delivered as u64);
        delivered
    }

    /// Poll the lock state every `poll_interval` until `token` is cancelled.
    pub async fn run_poll_loop(self: Arc<Self>, token: CancellationToken) {
        let period = self.config.poll_interval.max(Duration::from_millis(100));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once();
                }
            }
        }
        debug!("Notification poll loop stopped");
    }

    /// Cancel every email that has not gone out yet.
    pub fn cancel_scheduled(&self) {
        let mut scope = self
            .email_scope
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        scope.cancel();
        *scope = CancellationToken::new();
        info!("Scheduled emails cancelled");
    }

    pub fn pending_count(&self) -> usize {
        self.queue_lock().len()
    }

    pub fn pending(&self) -> Vec<PendingNotification> {
        self.queue_lock().iter().cloned().collect()
    }

    fn queue_lock(&self) -> std::sync::MutexGuard<'_, VecDeque<PendingNotification>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send_disguise(&self) {
        let (title, message) = disguise::pick(&mut rand::thread_rng());
        let alert = Alert {
            title: title.to_string(),
            body: message.to_string(),
            priority: Priority::Low,
            evidence_paths: Vec::new(),
            disguised: true,
        };
        match self.sink.deliver_alert(&alert) {
            Ok(()) => {
                self.activity.record_disguise();
                debug!("Disguise notification sent");
            }
            Err(e) => warn!(error = %e, "Failed to send disguise notification"),
        }
    }

    fn schedule_email(&self, notification: &PendingNotification) {
        let emails = email::compose(notification, &self.config, &self.device_info);
        if emails.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, email not scheduled");
            return;
        };

        let token = self
            .email_scope
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .child_token();
        let sink = Arc::clone(&self.sink);
        let activity = Arc::clone(&self.activity);
        let delay = self.config.email_delay;
        let id = notification.id;

        debug!(id, delay_secs = delay.as_secs(), recipients = emails.len(), "Email scheduled");
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!(id, "Scheduled email cancelled"),
                _ = tokio::time::sleep(delay) => {
                    for email in &emails {
                        match sink.send_email(email) {
                            Ok(()) => activity.record_email_sent(),
                            Err(e) => {
                                warn!(id, to = %email.to, error = %e, "Failed to send email");
                                activity.record_delivery_failure();
                            }
                        }
                    }
                    info!(id, recipients = emails.len(), "Alert email sent");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::ActivityLog;
    use crate::notify::sink::{DispatchError, OutboundEmail};

    #[derive(Default)]
    struct RecordingSink {
        alerts: Mutex<Vec<Alert>>,
        emails: Mutex<Vec<OutboundEmail>>,
        fail_alerts: bool,
    }

    impl RecordingSink {
        fn real_alerts(&self) -> Vec<Alert> {
            self.alerts
                .lock()
                .unwrap()
                .iter()
                .filter(|a| !a.disguised)
                .cloned()
                .collect()
        }

        fn disguises(&self) -> usize {
            self.alerts.lock().unwrap().iter().filter(|a| a.disguised).count()
        }
    }

    impl DispatchSink for RecordingSink {
        fn deliver_alert(&self, alert: &Alert) -> Result<(), DispatchError> {
            if self.fail_alerts && !alert.disguised {
                return Err(DispatchError::Alert("offline".to_string()));
            }
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }

        fn send_email(&self, email: &OutboundEmail) -> Result<(), DispatchError> {
            self.emails.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: Arc<NotificationDispatcher>,
        sink: Arc<RecordingSink>,
        lock: Arc<SharedLockFlag>,
        activity: SharedActivityLog,
    }

    fn fixture(config: NotificationConfig, sink: RecordingSink, locked: bool) -> Fixture {
        let sink = Arc::new(sink);
        let lock = Arc::new(SharedLockFlag::new(locked));
        let activity = Arc::new(ActivityLog::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            config,
            sink.clone(),
            lock.clone(),
            activity.clone(),
            "test-host".to_string(),
        ));
        Fixture {
            dispatcher,
            sink,
            lock,
            activity,
        }
    }

    fn evidence_alert() -> Notification {
        Notification::new("Security Evidence Collected", "Motion Detection")
            .with_evidence(vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")])
            .with_priority(Priority::High)
    }

    #[tokio::test]
    async fn test_locked_enqueue_waits_for_unlock_and_delivers_once() {
        let f = fixture(NotificationConfig::default(), RecordingSink::default(), true);

        f.dispatcher.enqueue(evidence_alert());
        assert_eq!(f.dispatcher.pending_count(), 1);
        assert!(f.sink.real_alerts().is_empty());
        assert_eq!(f.sink.disguises(), 1);

        assert_eq!(f.dispatcher.poll_once(), 0);
        assert!(f.sink.real_alerts().is_empty());

        f.lock.set_locked(false);
        assert_eq!(f.dispatcher.poll_once(), 1);
        assert_eq!(f.dispatcher.poll_once(), 0);
        assert_eq!(f.dispatcher.poll_once(), 0);

        let alerts = f.sink.real_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].priority, Priority::High);
        assert!(alerts[0].body.contains("Evidence collected: 2 files"));
        assert_eq!(f.dispatcher.pending_count(), 0);
        assert_eq!(f.activity.stats().notifications_delivered, 1);
        assert_eq!(f.activity.stats().disguises_shown, 1);
    }

    #[tokio::test]
    async fn test_unlocked_enqueue_delivers_immediately() {
        let f = fixture(NotificationConfig::default(), RecordingSink::default(), false);

        f.dispatcher.enqueue(evidence_alert());

        assert_eq!(f.sink.real_alerts().len(), 1);
        assert_eq!(f.sink.disguises(), 0);
        assert_eq!(f.dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_disguise_can_be_disabled() {
        let config = NotificationConfig {
            disguise_enabled: false,
            ..NotificationConfig::default()
        };
        let f = fixture(config, RecordingSink::default(), true);

        f.dispatcher.enqueue(evidence_alert());
        assert!(f.sink.alerts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_is_not_retried() {
        let sink = RecordingSink {
            fail_alerts: true,
            ..RecordingSink::default()
        };
        let f = fixture(NotificationConfig::default(), sink, true);

        f.dispatcher.enqueue(evidence_alert());
        f.lock.set_locked(false);
        assert_eq!(f.dispatcher.poll_once(), 0);
        assert_eq!(f.dispatcher.pending_count(), 0);
        assert_eq!(f.activity.stats().delivery_failures, 1);
    }

    fn email_config() -> NotificationConfig {
        NotificationConfig {
            email_enabled: true,
            email_recipients: vec!["a@x.org".to_string(), "b@x.org".to_string()],
            ..NotificationConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_email_sent_after_delay_regardless_of_lock() {
        let f = fixture(email_config(), RecordingSink::default(), true);

        f.dispatcher.enqueue(evidence_alert());

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(f.sink.emails.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let emails = f.sink.emails.lock().unwrap().clone();
        assert_eq!(emails.len(), 2);
        assert_eq!(emails[0].attachments.len(), 2);
        assert!(emails[0].body.contains("test-host"));
        assert_eq!(f.activity.stats().emails_sent, 2);

        // The in-app alert is still held.
        assert_eq!(f.dispatcher.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_scheduled_emails() {
        let f = fixture(email_config(), RecordingSink::default(), true);

        f.dispatcher.enqueue(evidence_alert());
        tokio::time::sleep(Duration::from_secs(60)).await;
        f.dispatcher.cancel_scheduled();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(f.sink.emails.lock().unwrap().is_empty());

        // New emails after cancellation are scheduled normally.
        f.dispatcher.enqueue(evidence_alert());
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(f.sink.emails.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_flushes_after_unlock() {
        let f = fixture(NotificationConfig::default(), RecordingSink::default(), true);
        let token = CancellationToken::new();
        let handle = tokio::spawn(f.dispatcher.clone().run_poll_loop(token.clone()));

        f.dispatcher.enqueue(evidence_alert());
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(f.sink.real_alerts().is_empty());

        f.lock.set_locked(false);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(f.sink.real_alerts().len(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.sink.real_alerts().len(), 1);

        token.cancel();
        handle.await.unwrap();
    }
}
