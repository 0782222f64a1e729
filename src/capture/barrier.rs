//! Completion barrier for a capture batch.

use crate::capture::source::{CaptureResult, SourceId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Progress snapshot for logging and status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureProgress {
    pub captured_per_source: BTreeMap<SourceId, u32>,
    pub total_remaining: u32,
}

#[derive(Debug, Default)]
struct SourceSlot {
    remaining: u32,
    artifacts: Vec<PathBuf>,
    error: Option<String>,
    finished: bool,
}

/// Tracks what each source still owes. Completion is reported exactly once,
/// after every source has reached a terminal state.
#[derive(Debug)]
pub struct CompletionBarrier {
    slots: BTreeMap<SourceId, SourceSlot>,
    fired: bool,
}

impl CompletionBarrier {
    pub fn new(targets: impl IntoIterator<Item = (SourceId, u32)>) -> Self {
        let slots = targets
            .into_iter()
            .map(|(source, remaining)| {
                (
                    source,
                    SourceSlot {
                        remaining,
                        ..SourceSlot::default()
                    },
                )
            })
            .collect();
        Self {
            slots,
            fired: false,
        }
    }

    /// Count one artifact. Artifacts beyond the target are still kept.
    pub fn record_artifact(&mut self, source: SourceId, path: PathBuf) {
        if let Some(slot) = self.slots.get_mut(&source) {
            slot.remaining = slot.remaining.saturating_sub(1);
            slot.artifacts.push(path);
        }
    }

    /// Mark a source as failed; it owes nothing further.
    pub fn record_failure(&mut self, source: SourceId, reason: impl Into<String>) {
        if let Some(slot) = self.slots.get_mut(&source) {
            slot.remaining = 0;
            if slot.error.is_none() {
                slot.error = Some(reason.into());
            }
        }
    }

    /// The source has released its device and will send nothing more.
    pub fn record_finished(&mut self, source: SourceId) {
        if let Some(slot) = self.slots.get_mut(&source) {
            if slot.remaining > 0 && slot.error.is_none() {
                slot.error = Some(format!("stopped with {} shots outstanding", slot.remaining));
            }
            slot.remaining = 0;
            slot.finished = true;
        }
    }

    /// Mark every source that has not finished as failed with `reason`.
    pub fn fail_unfinished(&mut self, reason: &str) {
        for slot in self.slots.values_mut().filter(|s| !s.finished) {
            slot.remaining = 0;
            if slot.error.is_none() {
                slot.error = Some(reason.to_string());
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.slots.values().all(|s| s.finished)
    }

    /// True the first time it is called on a complete barrier, false after.
    pub fn try_fire(&mut self) -> bool {
        if self.fired || !self.is_complete() {
            return false;
        }
        self.fired = true;
        true
    }

    pub fn progress(&self) -> CaptureProgress {
        CaptureProgress {
            captured_per_source: self
                .slots
                .iter()
                .map(|(id, slot)| (*id, slot.artifacts.len() as u32))
                .collect(),
            total_remaining: self.slots.values().map(|s| s.remaining).sum(),
        }
    }

    /// Turn the barrier into per-source results. Sources that never
    /// finished are reported as failed with `unfinished_reason`.
    pub fn into_results(self, unfinished_reason: &str) -> Vec<CaptureResult> {
        self.slots
            .into_iter()
            .map(|(source, slot)| match (slot.finished, slot.error) {
                (true, None) => CaptureResult::success(source, slot.artifacts),
                (_, Some(reason)) => CaptureResult::failure(source, slot.artifacts, reason),
                (false, None) => CaptureResult::failure(source, slot.artifacts, unfinished_reason),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_regardless_of_order() {
        let mut barrier = CompletionBarrier::new([(SourceId::Front, 2), (SourceId::Back, 2)]);

        barrier.record_failure(SourceId::Back, "camera busy");
        barrier.record_finished(SourceId::Back);
        assert!(!barrier.try_fire());

        barrier.record_artifact(SourceId::Front, PathBuf::from("a.jpg"));
        barrier.record_artifact(SourceId::Front, PathBuf::from("b.jpg"));
        assert_eq!(barrier.progress().total_remaining, 0);
        assert!(!barrier.try_fire());

        barrier.record_finished(SourceId::Front);
        assert!(barrier.try_fire());
        assert!(!barrier.try_fire());

        let results = barrier.into_results("timed out");
        let front = results.iter().find(|r| r.source == SourceId::Front).unwrap();
        let back = results.iter().find(|r| r.source == SourceId::Back).unwrap();
        assert!(front.succeeded);
        assert_eq!(front.artifact_paths.len(), 2);
        assert!(!back.succeeded);
        assert_eq!(back.error_reason.as_deref(), Some("camera busy"));
    }

    #[test]
    fn test_unfinished_sources_keep_partial_artifacts() {
        let mut barrier = CompletionBarrier::new([(SourceId::Front, 4), (SourceId::Screen, 1)]);
        barrier.record_artifact(SourceId::Front, PathBuf::from("a.jpg"));
        barrier.record_artifact(SourceId::Screen, PathBuf::from("s.png"));
        barrier.record_finished(SourceId::Screen);

        let progress = barrier.progress();
        assert_eq!(progress.captured_per_source[&SourceId::Front], 1);
        assert_eq!(progress.total_remaining, 3);

        let results = barrier.into_results("timed out");
        let front = results.iter().find(|r| r.source == SourceId::Front).unwrap();
        assert!(!front.succeeded);
        assert_eq!(front.artifact_paths, vec![PathBuf::from("a.jpg")]);
        assert_eq!(front.error_reason.as_deref(), Some("timed out"));
    }

    #[test]
    fn test_finishing_early_is_a_failure() {
        let mut barrier = CompletionBarrier::new([(SourceId::Back, 3)]);
        barrier.record_artifact(SourceId::Back, PathBuf::from("a.jpg"));
        barrier.record_finished(SourceId::Back);

        let results = barrier.into_results("timed out");
        assert!(!results[0].succeeded);
        assert!(results[0]
            .error_reason
            .as_deref()
            .unwrap()
            .contains("2 shots outstanding"));
    }
}
