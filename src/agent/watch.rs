//! Detection loop for one arm session.
//!
//! Owns the motion detector and lock tracker, so neither needs locking.
//! Inputs arrive over a channel; the loop also wakes when a pending motion
//! alarm falls due.

use crate::agent::incident::IncidentPipeline;
use crate::audit::{SharedActivityLog, TriggerKind};
use crate::detection::{LockEvent, LockStateTracker, MotionDetector, MotionSummary};
use crate::notify::SharedLockFlag;
use crate::sensor::SensorInput;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) struct DetectionLoop {
    pub detector: MotionDetector,
    pub motion: Arc<Mutex<MotionSummary>>,
    pub tracker: LockStateTracker,
    pub input: mpsc::Receiver<SensorInput>,
    pub lock_flag: Arc<SharedLockFlag>,
    pub activity: SharedActivityLog,
    pub pipeline: IncidentPipeline,
    pub scope: CancellationToken,
}

impl DetectionLoop {
    pub(crate) async fn run(mut self) {
        let mut incidents: JoinSet<()> = JoinSet::new();
        info!("Detection loop started");

        loop {
            let deadline = self.detector.alarm_deadline();
            tokio::select! {
                _ = self.scope.cancelled() => break,
                input = self.input.recv() => match input {
                    Some(input) => self.handle_input(input, &mut incidents),
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    if let Some(due) = deadline {
                        self.fire_due_alarm(Utc::now().max(due), &mut incidents);
                    }
                }
                Some(result) = incidents.join_next(), if !incidents.is_empty() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Incident task failed");
                    }
                }
            }
        }

        self.detector.reset();
        self.publish_motion(Utc::now());
        while let Some(result) = incidents.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Incident task failed");
            }
        }
        info!("Detection loop stopped");
    }

    fn handle_input(&mut self, input: SensorInput, incidents: &mut JoinSet<()>) {
        match input {
            SensorInput::Motion(sample) => {
                // An alarm that fell due before this sample goes off first.
                self.fire_due_alarm(sample.timestamp, incidents);
                if let Some(trigger) = self.detector.submit_sample(&sample) {
                    debug!(
                        sensor = ?trigger.sensor,
                        alarm_due = %trigger.alarm_due,
                        "Motion trigger"
                    );
                }
                self.publish_motion(sample.timestamp);
            }
            SensorInput::Screen(event) => {
                for lock_event in self.tracker.submit_screen_event(&event) {
                    self.handle_lock_event(lock_event, incidents);
                }
            }
        }
    }

    fn handle_lock_event(&mut self, event: LockEvent, incidents: &mut JoinSet<()>) {
        match event {
            LockEvent::DeviceLocked { .. } => self.lock_flag.set_locked(true),
            LockEvent::UnlockAttempt { .. } => {
                self.lock_flag.set_locked(true);
                self.activity.record_unlock_attempt();
            }
            LockEvent::SuspiciousActivity { .. } => {}
            LockEvent::SuccessfulBreakIn { .. } => self.spawn_incident(TriggerKind::BreakIn, incidents),
            LockEvent::DeviceUnlocked { .. } => self.lock_flag.set_locked(false),
        }
    }

    fn fire_due_alarm(&mut self, now: DateTime<Utc>, incidents: &mut JoinSet<()>) {
        if let Some(action) = self.detector.poll_alarm(now) {
            info!(details = %action.details(), "Motion alarm");
            self.spawn_incident(TriggerKind::Motion, incidents);
        }
    }

    fn publish_motion(&self, now: DateTime<Utc>) {
        *self.motion.lock().unwrap_or_else(|e| e.into_inner()) = self.detector.summary(now);
    }

    fn spawn_incident(&self, kind: TriggerKind, incidents: &mut JoinSet<()>) {
        let pipeline = self.pipeline.clone();
        let scope = self.scope.clone();
        incidents.spawn(async move {
            if let Err(e) = pipeline.run(kind, &scope).await {
                debug!(?kind, error = %e, "Incident produced no session");
            }
        });
    }
}

async fn sleep_until(deadline: Option<DateTime<Utc>>) {
    match deadline {
        Some(due) => {
            let wait = (due - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
        }
        None => std::future::pending().await,
    }
}
