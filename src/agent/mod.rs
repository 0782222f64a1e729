//! Agent wiring and arm/disarm lifecycle.
//!
//! An [`Agent`] owns the long-lived collaborators (capture coordinator,
//! evidence store, notification dispatcher, activity log). Arming starts an
//! arm session: the detection loop, the notification poll loop and the
//! retention sweep, all tied to one cancellation token. Disarming cancels
//! that token, any capture in flight and any email not yet sent.

pub mod incident;
pub mod state;
mod watch;

use crate::audit::{ActivityLog, ActivityStats, SharedActivityLog, TriggerKind};
use crate::capture::{CaptureCoordinator, CaptureError, CaptureSource};
use crate::config::Config;
use crate::detection::{LockStateTracker, LockStats, MotionDetector, MotionSummary};
use crate::evidence::{device_info, EvidenceError, EvidenceSession, EvidenceStats, EvidenceStore};
use crate::notify::{DispatchSink, NotificationDispatcher, SharedLockFlag};
use crate::sensor::{MotionSample, ScreenEvent, SensorInput};
use crate::store::SharedStore;
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use incident::IncidentPipeline;
pub use state::{ArmSnapshot, ArmState};

use watch::DetectionLoop;

/// Capacity of the per-session input channel.
pub const INPUT_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Protection is already armed")]
    AlreadyArmed,
    #[error("Protection is not armed")]
    NotArmed,
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
}

/// Read-only statistics for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStats {
    pub armed: ArmSnapshot,
    pub activity: ActivityStats,
    pub lock: LockStats,
    pub motion: MotionSummary,
    pub evidence: Option<EvidenceStats>,
    pub pending_notifications: usize,
}

struct ArmSession {
    scope: CancellationToken,
    input: mpsc::Sender<SensorInput>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Agent {
    config: Config,
    state: Arc<ArmState>,
    kv: SharedStore,
    activity: SharedActivityLog,
    coordinator: Arc<CaptureCoordinator>,
    evidence: Arc<EvidenceStore>,
    dispatcher: Arc<NotificationDispatcher>,
    lock_flag: Arc<SharedLockFlag>,
    pipeline: IncidentPipeline,
    motion: Arc<Mutex<MotionSummary>>,
    session: Mutex<Option<ArmSession>>,
}

impl Agent {
    /// Wire up an agent. Opening the evidence store also recovers any
    /// deletion interrupted by a crash.
    pub fn new(
        config: Config,
        state: Arc<ArmState>,
        kv: SharedStore,
        sources: Vec<Arc<dyn CaptureSource>>,
        sink: Arc<dyn DispatchSink>,
    ) -> Result<Self, AgentError> {
        let activity = Arc::new(ActivityLog::with_store(kv.clone()));
        let evidence = Arc::new(EvidenceStore::open(
            &config.evidence_path,
            kv.clone(),
            config.retention.clone(),
        )?);
        let coordinator = Arc::new(CaptureCoordinator::new(config.capture.clone(), sources));
        let lock_flag = Arc::new(SharedLockFlag::new(false));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            config.notifications.clone(),
            sink,
            lock_flag.clone(),
            activity.clone(),
            device_info(),
        ));
        let pipeline = IncidentPipeline::new(
            coordinator.clone(),
            evidence.clone(),
            dispatcher.clone(),
            activity.clone(),
            config.capture.video_enabled,
        );
        let motion = Arc::new(Mutex::new(
            MotionDetector::new(config.detector.clone()).summary(Utc::now()),
        ));

        Ok(Self {
            config,
            state,
            kv,
            activity,
            coordinator,
            evidence,
            dispatcher,
            lock_flag,
            pipeline,
            motion,
            session: Mutex::new(None),
        })
    }

    /// Start protection. Must be called from within a Tokio runtime.
    /// Returns the arm session number.
    pub fn arm(&self, initially_locked: bool) -> Result<u64, AgentError> {
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if session.is_some() {
            return Err(AgentError::AlreadyArmed);
        }
        let number = self.state.begin().ok_or(AgentError::AlreadyArmed)?;

        self.activity.record_armed();
        self.lock_flag.set_locked(initially_locked);

        let scope = CancellationToken::new();
        let (tx, rx) = mpsc::channel(INPUT_CAPACITY);

        let detection = DetectionLoop {
            detector: MotionDetector::new(self.config.detector.clone()),
            motion: self.motion.clone(),
            tracker: LockStateTracker::new(
                self.config.lock.clone(),
                self.kv.clone(),
                initially_locked,
            ),
            input: rx,
            lock_flag: self.lock_flag.clone(),
            activity: self.activity.clone(),
            pipeline: self.pipeline.clone(),
            scope: scope.clone(),
        };

        let tasks = vec![
            tokio::spawn(detection.run()),
            tokio::spawn(self.dispatcher.clone().run_poll_loop(scope.clone())),
            tokio::spawn(run_sweep_loop(
                self.evidence.clone(),
                self.config.retention.sweep_interval,
                scope.clone(),
            )),
        ];

        *session = Some(ArmSession {
            scope,
            input: tx,
            tasks,
        });

        info!(
            session = number,
            sensitivity = self.config.detector.sensitivity,
            initially_locked,
            "Protection armed"
        );
        Ok(number)
    }

    /// Stop protection. Waits for the session's tasks, including any capture
    /// in flight, to wind down. Notifications already delivered stay
    /// delivered.
    pub async fn disarm(&self) -> Result<(), AgentError> {
        let session = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(AgentError::NotArmed)?;

        session.scope.cancel();
        self.coordinator.cancel();
        self.dispatcher.cancel_scheduled();

        for task in session.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Agent task failed");
            }
        }

        self.state.end();
        if let Err(e) = self.activity.save() {
            warn!(error = %e, "Failed to save activity log");
        }
        info!("Protection disarmed");
        Ok(())
    }

    pub fn is_armed(&self) -> bool {
        self.state.is_armed()
    }

    /// Hand one input to the detection loop. Returns false when not armed
    /// or when the loop is falling behind.
    pub fn submit(&self, input: SensorInput) -> bool {
        let sender = match self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            Some(session) => session.input.clone(),
            None => return false,
        };
        match sender.try_send(input) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Detection loop falling behind, input dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn submit_sample(&self, sample: MotionSample) -> bool {
        self.submit(SensorInput::Motion(sample))
    }

    pub fn submit_screen_event(&self, event: ScreenEvent) -> bool {
        self.submit(SensorInput::Screen(event))
    }

    /// Run the incident pipeline now, as a remote "capture" command would.
    pub async fn trigger(&self, kind: TriggerKind) -> Result<EvidenceSession, CaptureError> {
        let scope = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.scope.clone())
            .unwrap_or_default();
        self.pipeline.run(kind, &scope).await
    }

    pub fn evidence(&self) -> &EvidenceStore {
        &self.evidence
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    pub fn activity(&self) -> &SharedActivityLog {
        &self.activity
    }

    /// Detector state as of the last motion sample.
    pub fn motion_summary(&self) -> MotionSummary {
        self.motion.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn stats(&self) -> AgentStats {
        let evidence = match self.evidence.stats() {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "Could not read evidence statistics");
                None
            }
        };
        AgentStats {
            armed: self.state.snapshot(),
            activity: self.activity.stats(),
            lock: LockStats::from_store(&self.kv),
            motion: self.motion_summary(),
            evidence,
            pending_notifications: self.dispatcher.pending_count(),
        }
    }
}

async fn run_sweep_loop(
    evidence: Arc<EvidenceStore>,
    interval: Duration,
    scope: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = scope.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = evidence.sweep(Utc::now()) {
                    warn!(error = %e, "Retention sweep failed");
                }
            }
        }
    }
}
