//! On-disk evidence store.
//!
//! Layout under the evidence directory:
//!
//! ```text
//! sessions/<id>.json        one record per session
//! .trash/<id>/manifest.json staging area of an in-progress deletion
//! .trash/<id>/<n>           staged artifact files
//! .trash/<id>/record.json   staged record (deletion committed)
//! ```
//!
//! Deleting a session moves its artifacts into the staging directory first
//! and the record last. Moving the record is the commit point: an
//! interrupted deletion without a staged record is rolled back on the next
//! [`EvidenceStore::open`], one with a staged record is finished.

use crate::config::RetentionConfig;
use crate::evidence::session::EvidenceSession;
use crate::store::SharedStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

const KEY_TOTAL_SESSIONS: &str = "evidence.total_sessions";
const SESSIONS_DIR: &str = "sessions";
const TRASH_DIR: &str = ".trash";
const MANIFEST: &str = "manifest.json";
const STAGED_RECORD: &str = "record.json";

/// Errors from the evidence store.
#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Session already recorded: {0}")]
    AlreadyExists(String),
    #[error("Invalid session id: {0}")]
    InvalidId(String),
}

/// Outcome of a retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Evidence statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvidenceStats {
    pub stored_sessions: usize,
    pub total_recorded: i32,
    pub total_artifacts: usize,
    pub total_artifact_bytes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StagedFile {
    original: PathBuf,
    staged: PathBuf,
}

pub struct EvidenceStore {
    root: PathBuf,
    kv: SharedStore,
    retention: RetentionConfig,
    // Serializes writers within this process
    write_lock: Mutex<()>,
}

impl EvidenceStore {
    /// Open the store, creating directories and finishing or rolling back
    /// any deletion that was interrupted.
    pub fn open(
        root: impl Into<PathBuf>,
        kv: SharedStore,
        retention: RetentionConfig,
    ) -> Result<Self, EvidenceError> {
        let store = Self {
            root: root.into(),
            kv,
            retention,
            write_lock: Mutex::new(()),
        };
        fs::create_dir_all(store.sessions_dir())?;
        store.recover()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join(SESSIONS_DIR)
    }

    fn trash_dir(&self) -> PathBuf {
        self.root.join(TRASH_DIR)
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, EvidenceError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(EvidenceError::InvalidId(id.to_string()));
        }
        Ok(self.sessions_dir().join(format!("{id}.json")))
    }

    /// Persist a completed session. Each session is written exactly once.
    pub fn persist(&self, session: &EvidenceSession) -> Result<(), EvidenceError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.record_path(session.session_id())?;
        if path.exists() {
            return Err(EvidenceError::AlreadyExists(session.session_id().to_string()));
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(session)?)?;
        fs::rename(&tmp, &path)?;

        let total = self.kv.get_int(KEY_TOTAL_SESSIONS, 0).saturating_add(1);
        if let Err(e) = self.kv.put_int(KEY_TOTAL_SESSIONS, total) {
            warn!(error = %e, "Failed to update session counter");
        }

        info!(
            session_id = session.session_id(),
            artifacts = session.artifact_paths().len(),
            "Evidence session saved"
        );
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<EvidenceSession, EvidenceError> {
        let path = self.record_path(id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(EvidenceError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All readable sessions, newest first. Corrupt records are skipped.
    pub fn list(&self) -> Result<Vec<EvidenceSession>, EvidenceError> {
        let mut sessions = Vec::new();
        for entry in fs::read_dir(self.sessions_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path)
                .map_err(EvidenceError::from)
                .and_then(|bytes| Ok(serde_json::from_slice::<EvidenceSession>(&bytes)?))
            {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable session record"),
            }
        }
        sessions.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        Ok(sessions)
    }

    /// Delete a session and all of its artifacts, or nothing at all.
    pub fn delete(&self, id: &str) -> Result<(), EvidenceError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let record = self.record_path(id)?;
        if !record.exists() {
            return Err(EvidenceError::NotFound(id.to_string()));
        }

        // An unreadable record still gets removed; it has no artifacts we
        // can name.
        let artifacts: Vec<PathBuf> = match fs::read(&record)
            .ok()
            .and_then(|b| serde_json::from_slice::<EvidenceSession>(&b).ok())
        {
            Some(session) => session.artifact_paths().to_vec(),
            None => {
                warn!(session_id = id, "Deleting unreadable session record");
                Vec::new()
            }
        };

        let stage = self.trash_dir().join(id);
        if stage.exists() {
            fs::remove_dir_all(&stage)?;
        }
        fs::create_dir_all(&stage)?;

        let plan: Vec<StagedFile> = artifacts
            .into_iter()
            .filter(|path| path.exists())
            .enumerate()
            .map(|(n, original)| StagedFile {
                original,
                staged: stage.join(n.to_string()),
            })
            .collect();
        if let Err(e) = write_manifest(&stage, &plan) {
            let _ = fs::remove_dir_all(&stage);
            return Err(e);
        }

        let mut moved: Vec<&StagedFile> = Vec::new();
        for file in &plan {
            if let Err(e) = fs::rename(&file.original, &file.staged) {
                warn!(
                    session_id = id,
                    path = %file.original.display(),
                    error = %e,
                    "Failed to stage artifact, rolling back"
                );
                roll_back(moved);
                let _ = fs::remove_dir_all(&stage);
                return Err(e.into());
            }
            moved.push(file);
        }

        if let Err(e) = fs::rename(&record, stage.join(STAGED_RECORD)) {
            warn!(session_id = id, error = %e, "Failed to stage record, rolling back");
            roll_back(moved);
            let _ = fs::remove_dir_all(&stage);
            return Err(e.into());
        }

        // Committed. A failed purge is finished by the next recovery.
        if let Err(e) = fs::remove_dir_all(&stage) {
            warn!(session_id = id, error = %e, "Failed to purge deleted session");
        }
        info!(session_id = id, artifacts = plan.len(), "Evidence session deleted");
        Ok(())
    }

    /// Delete every session older than the retention window.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, EvidenceError> {
        let cutoff = now - self.retention.window();
        let mut report = SweepReport::default();

        for session in self.list()? {
            if session.timestamp() >= cutoff {
                continue;
            }
            let id = session.session_id().to_string();
            match self.delete(&id) {
                Ok(()) => report.deleted.push(id),
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Retention sweep could not delete session");
                    report.failed.push(id);
                }
            }
        }

        if !report.deleted.is_empty() || !report.failed.is_empty() {
            info!(
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                "Retention sweep finished"
            );
        }
        Ok(report)
    }

    pub fn stats(&self) -> Result<EvidenceStats, EvidenceError> {
        let sessions = self.list()?;
        let mut stats = EvidenceStats {
            stored_sessions: sessions.len(),
            total_recorded: self.kv.get_int(KEY_TOTAL_SESSIONS, 0),
            ..EvidenceStats::default()
        };
        for path in sessions.iter().flat_map(|s| s.artifact_paths()) {
            if let Ok(meta) = fs::metadata(path) {
                stats.total_artifacts += 1;
                stats.total_artifact_bytes += meta.len();
            }
        }
        Ok(stats)
    }

    fn recover(&self) -> Result<(), EvidenceError> {
        let trash = self.trash_dir();
        if !trash.exists() {
            return Ok(());
        }

        for entry in fs::read_dir(&trash)? {
            let stage = entry?.path();
            if !stage.is_dir() {
                continue;
            }

            if stage.join(STAGED_RECORD).exists() {
                debug!(stage = %stage.display(), "Finishing interrupted deletion");
            } else {
                warn!(stage = %stage.display(), "Rolling back interrupted deletion");
                let plan = read_manifest(&stage).unwrap_or_default();
                roll_back(plan.iter().filter(|f| f.staged.exists()).collect());
            }
            fs::remove_dir_all(&stage)?;
        }
        Ok(())
    }
}

fn write_manifest(stage: &Path, plan: &[StagedFile]) -> Result<(), EvidenceError> {
    fs::write(stage.join(MANIFEST), serde_json::to_vec(plan)?)?;
    Ok(())
}

fn read_manifest(stage: &Path) -> Option<Vec<StagedFile>> {
    let bytes = fs::read(stage.join(MANIFEST)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn roll_back(moved: Vec<&StagedFile>) {
    for file in moved.into_iter().rev() {
        if let Err(e) = fs::rename(&file.staged, &file.original) {
            warn!(
                path = %file.original.display(),
                error = %e,
                "Failed to restore staged artifact"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureBatch, CaptureMode, CaptureResult, SourceId};
    use crate::evidence::session::PendingSession;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> EvidenceStore {
        EvidenceStore::open(dir.path(), MemoryStore::shared(), RetentionConfig::default()).unwrap()
    }

    fn session_with_files(
        dir: &TempDir,
        at: DateTime<Utc>,
        names: &[&str],
    ) -> EvidenceSession {
        let paths: Vec<PathBuf> = names
            .iter()
            .map(|n| {
                let path = dir.path().join(n);
                fs::write(&path, b"jpeg").unwrap();
                path
            })
            .collect();
        let batch = CaptureBatch {
            mode: CaptureMode::Photo,
            results: vec![CaptureResult::success(SourceId::Front, paths)],
            timed_out: false,
            elapsed: std::time::Duration::from_secs(6),
        };
        PendingSession::at("Motion Detection", at).complete(&[batch])
    }

    #[test]
    fn test_persist_and_list_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let now = Utc::now();

        let older = session_with_files(&dir, now - Duration::hours(2), &["a.jpg"]);
        let newer = session_with_files(&dir, now, &["b.jpg", "c.jpg"]);
        store.persist(&older).unwrap();
        store.persist(&newer).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], newer);
        assert_eq!(listed[1], older);

        assert_eq!(store.get(older.session_id()).unwrap(), older);

        let stats = store.stats().unwrap();
        assert_eq!(stats.stored_sessions, 2);
        assert_eq!(stats.total_recorded, 2);
        assert_eq!(stats.total_artifacts, 3);
        assert_eq!(stats.total_artifact_bytes, 12);
    }

    #[test]
    fn test_session_persisted_only_once() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let session = session_with_files(&dir, Utc::now(), &["a.jpg"]);

        store.persist(&session).unwrap();
        assert!(matches!(
            store.persist(&session),
            Err(EvidenceError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let session = session_with_files(&dir, Utc::now(), &["a.jpg"]);
        store.persist(&session).unwrap();

        fs::write(dir.path().join("sessions/EVD_1_deadbeef.json"), b"{ not json").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_id(), session.session_id());

        // Corrupt records can still be deleted.
        store.delete("EVD_1_deadbeef").unwrap();
        assert!(!dir.path().join("sessions/EVD_1_deadbeef.json").exists());
    }

    #[test]
    fn test_delete_removes_record_and_files() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let session = session_with_files(&dir, Utc::now(), &["a.jpg", "b.jpg"]);
        store.persist(&session).unwrap();

        store.delete(session.session_id()).unwrap();

        assert!(matches!(
            store.get(session.session_id()),
            Err(EvidenceError::NotFound(_))
        ));
        for path in session.artifact_paths() {
            assert!(!path.exists());
        }
        assert!(!dir.path().join(".trash").join(session.session_id()).exists());

        assert!(matches!(
            store.delete(session.session_id()),
            Err(EvidenceError::NotFound(_))
        ));
    }

    #[test]
    fn test_invalid_ids_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        assert!(matches!(
            store.delete("../config"),
            Err(EvidenceError::InvalidId(_))
        ));
        assert!(matches!(store.get(""), Err(EvidenceError::InvalidId(_))));
    }

    #[test]
    fn test_sweep_deletes_only_expired_sessions() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let now = Utc::now();

        let expired = session_with_files(&dir, now - Duration::days(31), &["old.jpg"]);
        let fresh = session_with_files(&dir, now - Duration::days(29), &["new.jpg"]);
        store.persist(&expired).unwrap();
        store.persist(&fresh).unwrap();

        let report = store.sweep(now).unwrap();
        assert_eq!(report.deleted, vec![expired.session_id().to_string()]);
        assert!(report.failed.is_empty());
        assert!(!dir.path().join("old.jpg").exists());
        assert!(dir.path().join("new.jpg").exists());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_interrupted_deletion_is_rolled_back() {
        let dir = TempDir::new().unwrap();
        let session = session_with_files(&dir, Utc::now(), &["a.jpg", "b.jpg"]);
        {
            let store = open(&dir);
            store.persist(&session).unwrap();
        }

        // Simulate a crash after the first artifact was staged.
        let stage = dir.path().join(".trash").join(session.session_id());
        fs::create_dir_all(&stage).unwrap();
        let plan: Vec<StagedFile> = session
            .artifact_paths()
            .iter()
            .enumerate()
            .map(|(n, p)| StagedFile {
                original: p.clone(),
                staged: stage.join(n.to_string()),
            })
            .collect();
        write_manifest(&stage, &plan).unwrap();
        fs::rename(&plan[0].original, &plan[0].staged).unwrap();

        let store = open(&dir);
        assert!(!stage.exists());
        assert_eq!(store.get(session.session_id()).unwrap(), session);
        for path in session.artifact_paths() {
            assert!(path.exists());
        }
    }

    #[test]
    fn test_committed_deletion_is_finished() {
        let dir = TempDir::new().unwrap();
        let session = session_with_files(&dir, Utc::now(), &["a.jpg"]);
        {
            let store = open(&dir);
            store.persist(&session).unwrap();
        }

        // Simulate a crash after the commit point, before the purge.
        let stage = dir.path().join(".trash").join(session.session_id());
        fs::create_dir_all(&stage).unwrap();
        let staged_artifact = stage.join("0");
        fs::rename(&session.artifact_paths()[0], &staged_artifact).unwrap();
        fs::rename(
            dir.path()
                .join("sessions")
                .join(format!("{}.json", session.session_id())),
            stage.join(STAGED_RECORD),
        )
        .unwrap();

        let store = open(&dir);
        assert!(!stage.exists());
        assert!(matches!(
            store.get(session.session_id()),
            Err(EvidenceError::NotFound(_))
        ));
        assert!(!session.artifact_paths()[0].exists());
    }
}
