//! Incident pipeline: trigger → capture → session → notification.

use crate::audit::{SharedActivityLog, TriggerKind};
use crate::capture::{CaptureBatch, CaptureCoordinator, CaptureError, CaptureMode};
use crate::evidence::{EvidenceSession, EvidenceStore, PendingSession};
use crate::notify::{Notification, NotificationDispatcher, Priority};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const EVIDENCE_TITLE: &str = "Security Evidence Collected";
pub const NO_EVIDENCE_TITLE: &str = "Security Alert";

#[derive(Clone)]
pub struct IncidentPipeline {
    coordinator: Arc<CaptureCoordinator>,
    evidence: Arc<EvidenceStore>,
    dispatcher: Arc<NotificationDispatcher>,
    activity: SharedActivityLog,
    video_enabled: bool,
}

impl IncidentPipeline {
    pub fn new(
        coordinator: Arc<CaptureCoordinator>,
        evidence: Arc<EvidenceStore>,
        dispatcher: Arc<NotificationDispatcher>,
        activity: SharedActivityLog,
        video_enabled: bool,
    ) -> Self {
        Self {
            coordinator,
            evidence,
            dispatcher,
            activity,
            video_enabled,
        }
    }

    /// Capture evidence for one trigger, persist it and notify the owner.
    ///
    /// A trigger arriving while another capture runs is dropped with
    /// [`CaptureError::Busy`]; the running batch already covers it.
    pub async fn run(
        &self,
        kind: TriggerKind,
        scope: &CancellationToken,
    ) -> Result<EvidenceSession, CaptureError> {
        if scope.is_cancelled() {
            debug!(reason = kind.reason(), "Protection disarmed, trigger ignored");
            return Err(CaptureError::Cancelled {
                results: Vec::new(),
            });
        }
        self.activity.record_trigger(kind);
        let pending = PendingSession::new(kind.reason());
        let session_id = pending.session_id().to_string();
        info!(%session_id, reason = kind.reason(), "Incident triggered, capturing evidence");

        let mut modes = vec![CaptureMode::Photo];
        if self.video_enabled {
            modes.push(CaptureMode::Video);
        }

        let mut batches: Vec<CaptureBatch> = Vec::new();
        let mut last_error = None;
        for mode in modes {
            if scope.is_cancelled() {
                break;
            }
            match self.coordinator.start_capture_within(mode, scope).await {
                Ok(batch) => {
                    self.activity.record_batch(batch.artifact_count());
                    batches.push(batch);
                }
                Err(e @ (CaptureError::Busy | CaptureError::Cancelled { .. })) => {
                    info!(%session_id, ?mode, error = %e, "Incident capture abandoned");
                    if batches.is_empty() {
                        return Err(e);
                    }
                    break;
                }
                Err(e) => {
                    warn!(%session_id, ?mode, error = %e, "Capture batch failed");
                    self.activity.record_batch_failed();
                    last_error = Some(e);
                }
            }
        }

        if batches.is_empty() {
            if scope.is_cancelled() {
                info!(%session_id, "Incident abandoned, protection disarmed");
                return Err(CaptureError::Cancelled {
                    results: Vec::new(),
                });
            }
            let err = last_error.unwrap_or(CaptureError::NoSources);
            self.dispatcher.enqueue(Notification::new(
                NO_EVIDENCE_TITLE,
                format!("{}: {err}", kind.reason()),
            ));
            return Err(err);
        }

        let session = pending.complete(&batches);
        if let Err(e) = self.evidence.persist(&session) {
            error!(%session_id, error = %e, "Failed to save evidence session");
        }

        let paths = session.artifact_paths().to_vec();
        self.dispatcher.enqueue(
            Notification::new(
                EVIDENCE_TITLE,
                format!("{} - {} evidence files captured", kind.reason(), paths.len()),
            )
            .with_evidence(paths)
            .with_priority(Priority::High),
        );

        info!(
            %session_id,
            artifacts = session.artifact_paths().len(),
            "Incident handled"
        );
        Ok(session)
    }
}
