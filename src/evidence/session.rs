//! Evidence sessions: everything captured in response to one trigger.

use crate::capture::CaptureBatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Generate a session identifier: creation time in millis plus 32 random bits.
pub fn generate_session_id(at: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("EVD_{}_{}", at.timestamp_millis(), &random[..8])
}

/// Describe the host for session records and emails.
pub fn device_info() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!(
        "{} ({} {}, antitheft-agent {})",
        hostname,
        std::env::consts::OS,
        std::env::consts::ARCH,
        crate::VERSION
    )
}

/// A session opened at trigger time, before capture has finished.
#[derive(Debug, Clone)]
pub struct PendingSession {
    session_id: String,
    timestamp: DateTime<Utc>,
    trigger_reason: String,
    device_info: String,
}

impl PendingSession {
    pub fn new(trigger_reason: impl Into<String>) -> Self {
        Self::at(trigger_reason, Utc::now())
    }

    pub fn at(trigger_reason: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            session_id: generate_session_id(timestamp),
            timestamp,
            trigger_reason: trigger_reason.into(),
            device_info: device_info(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn trigger_reason(&self) -> &str {
        &self.trigger_reason
    }

    /// Merge the finished batches and freeze the session.
    pub fn complete(self, batches: &[CaptureBatch]) -> EvidenceSession {
        let mut artifact_paths: Vec<PathBuf> = Vec::new();
        for path in batches.iter().flat_map(CaptureBatch::artifact_paths) {
            if !artifact_paths.contains(&path) {
                artifact_paths.push(path);
            }
        }

        let failed_sources = batches
            .iter()
            .flat_map(|b| b.results.iter())
            .filter(|r| !r.succeeded)
            .map(|r| match &r.error_reason {
                Some(reason) => format!("{}: {}", r.source, reason),
                None => r.source.to_string(),
            })
            .collect();

        EvidenceSession {
            session_id: self.session_id,
            timestamp: self.timestamp,
            trigger_reason: self.trigger_reason,
            artifact_paths,
            device_info: self.device_info,
            failed_sources,
            completed_at: Utc::now(),
        }
    }
}

/// Artifact counts by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileTypeSummary {
    pub photos: usize,
    pub videos: usize,
    pub screenshots: usize,
    pub other: usize,
}

/// A completed, immutable evidence session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSession {
    session_id: String,
    timestamp: DateTime<Utc>,
    trigger_reason: String,
    artifact_paths: Vec<PathBuf>,
    device_info: String,
    #[serde(default)]
    failed_sources: Vec<String>,
    completed_at: DateTime<Utc>,
}

impl EvidenceSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn trigger_reason(&self) -> &str {
        &self.trigger_reason
    }

    pub fn artifact_paths(&self) -> &[PathBuf] {
        &self.artifact_paths
    }

    pub fn device_info(&self) -> &str {
        &self.device_info
    }

    /// Sources that failed, with their reasons.
    pub fn failed_sources(&self) -> &[String] {
        &self.failed_sources
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    pub fn file_types(&self) -> FileTypeSummary {
        let mut summary = FileTypeSummary::default();
        for path in &self.artifact_paths {
            match classify(path) {
                ArtifactKind::Photo => summary.photos += 1,
                ArtifactKind::Video => summary.videos += 1,
                ArtifactKind::Screenshot => summary.screenshots += 1,
                ArtifactKind::Other => summary.other += 1,
            }
        }
        summary
    }
}

enum ArtifactKind {
    Photo,
    Video,
    Screenshot,
    Other,
}

fn classify(path: &Path) -> ArtifactKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => ArtifactKind::Photo,
        Some("mp4") | Some("3gp") => ArtifactKind::Video,
        Some("png") => ArtifactKind::Screenshot,
        _ => ArtifactKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureMode, CaptureResult, SourceId};
    use std::time::Duration;

    fn batch(results: Vec<CaptureResult>) -> CaptureBatch {
        CaptureBatch {
            mode: CaptureMode::Photo,
            results,
            timed_out: false,
            elapsed: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_session_id_format() {
        let at = Utc::now();
        let id = generate_session_id(at);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "EVD");
        assert_eq!(parts[1], at.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));

        assert_ne!(generate_session_id(at), generate_session_id(at));
    }

    #[test]
    fn test_complete_merges_all_sources() {
        let pending = PendingSession::new("Motion Detection");
        let id = pending.session_id().to_string();

        let photos = batch(vec![
            CaptureResult::success(
                SourceId::Front,
                vec![PathBuf::from("f1.jpg"), PathBuf::from("f2.jpg")],
            ),
            CaptureResult::failure(SourceId::Back, vec![], "camera busy"),
            CaptureResult::success(SourceId::Screen, vec![PathBuf::from("s1.png")]),
        ]);
        let video = CaptureBatch {
            mode: CaptureMode::Video,
            ..batch(vec![CaptureResult::success(
                SourceId::Front,
                vec![PathBuf::from("f1.mp4")],
            )])
        };

        let session = pending.complete(&[photos, video]);

        assert_eq!(session.session_id(), id);
        assert_eq!(session.trigger_reason(), "Motion Detection");
        assert_eq!(session.artifact_paths().len(), 4);
        assert_eq!(session.failed_sources(), ["back: camera busy".to_string()]);
        assert_eq!(
            session.file_types(),
            FileTypeSummary {
                photos: 2,
                videos: 1,
                screenshots: 1,
                other: 0,
            }
        );
        assert!(session.device_info().contains(std::env::consts::OS));
    }
}
