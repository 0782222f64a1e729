//! File-backed stand-in source for hosts without capture hardware.
//!
//! Each shot writes an empty artifact file with the same naming scheme a real
//! camera binding would use, so the rest of the pipeline (sessions,
//! retention, notifications) behaves identically.

use crate::capture::source::{
    CaptureDevice, CaptureRequest, CaptureSource, ShotSpec, SourceError, SourceId,
};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct PlaceholderSource {
    id: SourceId,
    dir: PathBuf,
}

impl PlaceholderSource {
    pub fn new(id: SourceId, dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            dir: dir.into(),
        }
    }
}

/// Artifact file name for a shot, e.g. `security_front_20240501_100000_01.jpg`.
pub fn artifact_file_name(source: SourceId, shot: ShotSpec) -> String {
    let ext = match (shot, source) {
        (ShotSpec::Clip { .. }, _) => "mp4",
        (ShotSpec::Still { .. }, SourceId::Screen) => "png",
        (ShotSpec::Still { .. }, _) => "jpg",
    };
    format!(
        "security_{}_{}_{:02}.{}",
        source,
        Utc::now().format("%Y%m%d_%H%M%S"),
        shot.index() + 1,
        ext
    )
}

#[async_trait]
impl CaptureSource for PlaceholderSource {
    fn id(&self) -> SourceId {
        self.id
    }

    async fn acquire(&self) -> Result<Box<dyn CaptureDevice>, SourceError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", self.dir.display())))?;
        Ok(Box::new(PlaceholderDevice {
            id: self.id,
            dir: self.dir.clone(),
        }))
    }
}

struct PlaceholderDevice {
    id: SourceId,
    dir: PathBuf,
}

impl PlaceholderDevice {
    async fn write(&self, path: &Path) -> Result<(), SourceError> {
        tokio::fs::write(path, b"")
            .await
            .map_err(|e| SourceError::Capture(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl CaptureDevice for PlaceholderDevice {
    async fn configure(&mut self, request: &CaptureRequest) -> Result<(), SourceError> {
        debug!(source = %self.id, mode = ?request.mode, count = request.target_count, "Placeholder configured");
        Ok(())
    }

    async fn capture_one(&mut self, shot: ShotSpec) -> Result<PathBuf, SourceError> {
        if let ShotSpec::Clip { duration, .. } = shot {
            tokio::time::sleep(duration).await;
        }
        let path = self.dir.join(artifact_file_name(self.id, shot));
        self.write(&path).await?;
        Ok(path)
    }

    async fn release(self: Box<Self>) {
        debug!(source = %self.id, "Placeholder released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::source::CaptureMode;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_artifact_names() {
        let name = artifact_file_name(SourceId::Back, ShotSpec::Still { index: 2 });
        assert!(name.starts_with("security_back_"));
        assert!(name.ends_with("_03.jpg"));

        let name = artifact_file_name(SourceId::Screen, ShotSpec::Still { index: 0 });
        assert!(name.ends_with("_01.png"));

        let clip = ShotSpec::Clip {
            index: 0,
            duration: Duration::from_secs(1),
        };
        assert!(artifact_file_name(SourceId::Front, clip).ends_with(".mp4"));
    }

    #[tokio::test]
    async fn test_placeholder_writes_files() {
        let dir = TempDir::new().unwrap();
        let source = PlaceholderSource::new(SourceId::Front, dir.path().join("photos"));

        let mut device = source.acquire().await.unwrap();
        let request = CaptureRequest {
            source: SourceId::Front,
            mode: CaptureMode::Photo,
            target_count: 1,
            interval: Duration::ZERO,
            clip_duration: Duration::ZERO,
        };
        device.configure(&request).await.unwrap();
        let path = device.capture_one(request.shot(0)).await.unwrap();
        device.release().await;

        assert!(path.exists());
        assert!(path.starts_with(dir.path().join("photos")));
    }
}
