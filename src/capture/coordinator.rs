//! Multi-source capture coordinator.
//!
//! Each enabled source runs its acquire → configure → capture → release
//! sequence on its own task. Results flow back over a channel into a
//! [`CompletionBarrier`]; the batch ends when the barrier fires or the batch
//! deadline passes, whichever comes first.

use crate::capture::barrier::CompletionBarrier;
use crate::capture::source::{
    CaptureBatch, CaptureDevice, CaptureMode, CaptureRequest, CaptureResult, CaptureSource,
    SourceId,
};
use crate::config::CaptureConfig;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors returned by a capture batch.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture already in progress")]
    Busy,
    #[error("no capture sources enabled")]
    NoSources,
    #[error("no {} captured", .mode.noun())]
    NoEvidence {
        mode: CaptureMode,
        results: Vec<CaptureResult>,
    },
    #[error("capture cancelled")]
    Cancelled { results: Vec<CaptureResult> },
}

impl CaptureMode {
    fn noun(&self) -> &'static str {
        match self {
            CaptureMode::Photo => "photos",
            CaptureMode::Video => "videos",
        }
    }
}

#[derive(Debug)]
enum SourceEvent {
    Artifact(SourceId, PathBuf),
    Failed(SourceId, String),
    /// Device released; nothing more will be sent for this source
    Finished(SourceId),
}

/// Clears the busy flag when dropped. Owned by the batch task, so the flag
/// stays set until every source task has released its device.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

type CurrentBatch = Arc<Mutex<Option<CancellationToken>>>;

pub struct CaptureCoordinator {
    config: CaptureConfig,
    sources: Vec<Arc<dyn CaptureSource>>,
    busy: Arc<AtomicBool>,
    current: CurrentBatch,
}

impl CaptureCoordinator {
    pub fn new(config: CaptureConfig, sources: Vec<Arc<dyn CaptureSource>>) -> Self {
        Self {
            config,
            sources,
            busy: Arc::new(AtomicBool::new(false)),
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Cancel the batch in flight, if any. Devices are still released.
    pub fn cancel(&self) {
        if let Ok(current) = self.current.lock() {
            if let Some(token) = current.as_ref() {
                info!("Cancelling capture batch");
                token.cancel();
            }
        }
    }

    pub async fn capture_photos(&self) -> Result<CaptureBatch, CaptureError> {
        self.start_capture(CaptureMode::Photo).await
    }

    pub async fn capture_video(&self) -> Result<CaptureBatch, CaptureError> {
        self.start_capture(CaptureMode::Video).await
    }

    /// Run one batch across every enabled source.
    ///
    /// Rejected with [`CaptureError::Busy`] while another batch runs. A batch
    /// with at least one artifact is a success even if some sources failed.
    pub async fn start_capture(&self, mode: CaptureMode) -> Result<CaptureBatch, CaptureError> {
        self.start_capture_within(mode, &CancellationToken::new())
            .await
    }

    /// Like [`start_capture`](Self::start_capture), but the batch is also
    /// cancelled when `parent` is.
    ///
    /// The batch runs on its own task. Dropping the returned future cancels
    /// it, and the coordinator stays busy until every device is released.
    pub async fn start_capture_within(
        &self,
        mode: CaptureMode,
        parent: &CancellationToken,
    ) -> Result<CaptureBatch, CaptureError> {
        let busy = BusyGuard::acquire(&self.busy).ok_or(CaptureError::Busy)?;

        let requests = self.requests(mode);
        if requests.is_empty() {
            return Err(CaptureError::NoSources);
        }

        let token = parent.child_token();
        set_current(&self.current, Some(token.clone()));

        let run = BatchRun {
            mode,
            requests,
            timeout: self.batch_timeout(mode),
            release_grace: self.config.release_grace,
            token: token.clone(),
            current: Arc::clone(&self.current),
            _busy: busy,
        };
        let _cancel_on_drop = token.drop_guard();

        match tokio::spawn(run.execute()).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(CaptureError::Cancelled {
                results: Vec::new(),
            }),
        }
    }

    fn batch_timeout(&self, mode: CaptureMode) -> Duration {
        match mode {
            CaptureMode::Photo => self.config.photo_batch_timeout,
            CaptureMode::Video => self.config.video_batch_timeout,
        }
    }

    fn requests(&self, mode: CaptureMode) -> Vec<(Arc<dyn CaptureSource>, CaptureRequest)> {
        self.sources
            .iter()
            .filter_map(|source| {
                let id = source.id();
                let target_count = match (mode, id.is_camera()) {
                    (CaptureMode::Photo, true) => self.config.photos_per_source,
                    (CaptureMode::Photo, false) if self.config.screen_enabled => 1,
                    (CaptureMode::Video, true) => 1,
                    _ => return None,
                };
                if target_count == 0 {
                    return None;
                }
                let request = CaptureRequest {
                    source: id,
                    mode,
                    target_count,
                    interval: self.config.photo_interval,
                    clip_duration: self.config.video_duration,
                };
                Some((Arc::clone(source), request))
            })
            .collect()
    }
}

fn set_current(current: &CurrentBatch, token: Option<CancellationToken>) {
    if let Ok(mut current) = current.lock() {
        *current = token;
    }
}

/// One batch, owned by its own task.
struct BatchRun {
    mode: CaptureMode,
    requests: Vec<(Arc<dyn CaptureSource>, CaptureRequest)>,
    timeout: Duration,
    release_grace: Duration,
    token: CancellationToken,
    current: CurrentBatch,
    _busy: BusyGuard,
}

impl BatchRun {
    async fn execute(self) -> Result<CaptureBatch, CaptureError> {
        let mode = self.mode;
        let token = self.token.clone();
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut barrier = CompletionBarrier::new(
            self.requests
                .iter()
                .map(|(_, r)| (r.source, r.target_count)),
        );

        info!(?mode, sources = self.requests.len(), "Starting capture batch");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handles: Vec<JoinHandle<()>> = self
            .requests
            .iter()
            .map(|(source, request)| {
                tokio::spawn(run_source(
                    Arc::clone(source),
                    request.clone(),
                    token.child_token(),
                    tx.clone(),
                ))
            })
            .collect();
        drop(tx);

        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(event)) => {
                    apply(&mut barrier, event);
                    if barrier.try_fire() {
                        break;
                    }
                }
                // Every task has gone away
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    let progress = barrier.progress();
                    warn!(
                        ?mode,
                        remaining = progress.total_remaining,
                        "Capture batch timed out, finalizing with partial results"
                    );
                    barrier.fail_unfinished("timed out");
                    break;
                }
            }
        }

        let cancelled = token.is_cancelled();
        token.cancel();
        join_sources(handles, self.release_grace).await;
        while let Ok(event) = rx.try_recv() {
            apply(&mut barrier, event);
        }
        set_current(&self.current, None);

        let results = barrier.into_results("did not finish");
        if cancelled {
            return Err(CaptureError::Cancelled { results });
        }

        let batch = CaptureBatch {
            mode,
            results,
            timed_out,
            elapsed: started.elapsed(),
        };
        let artifacts = batch.artifact_count();
        if artifacts == 0 {
            warn!(?mode, "Capture batch produced no artifacts");
            return Err(CaptureError::NoEvidence {
                mode,
                results: batch.results,
            });
        }

        info!(
            ?mode,
            artifacts,
            timed_out,
            elapsed_ms = batch.elapsed.as_millis() as u64,
            "Capture batch complete"
        );
        Ok(batch)
    }
}

async fn join_sources(handles: Vec<JoinHandle<()>>, release_grace: Duration) {
    let grace = Instant::now() + release_grace;
    for mut handle in handles {
        match tokio::time::timeout_at(grace, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Capture task failed"),
            Err(_) => {
                warn!("Capture source did not release in time, aborting");
                handle.abort();
            }
        }
    }
}

fn apply(barrier: &mut CompletionBarrier, event: SourceEvent) {
    match event {
        SourceEvent::Artifact(source, path) => barrier.record_artifact(source, path),
        SourceEvent::Failed(source, reason) => barrier.record_failure(source, reason),
        SourceEvent::Finished(source) => barrier.record_finished(source),
    }
    let progress = barrier.progress();
    debug!(
        remaining = progress.total_remaining,
        captured = ?progress.captured_per_source,
        "Capture progress"
    );
}

async fn run_source(
    source: Arc<dyn CaptureSource>,
    request: CaptureRequest,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<SourceEvent>,
) {
    let id = request.source;

    let acquired = tokio::select! {
        biased;
        _ = token.cancelled() => Err("cancelled".to_string()),
        result = source.acquire() => result.map_err(|e| e.to_string()),
    };
    let mut device = match acquired {
        Ok(device) => device,
        Err(reason) => {
            warn!(source = %id, %reason, "Capture source unavailable");
            let _ = tx.send(SourceEvent::Failed(id, reason));
            let _ = tx.send(SourceEvent::Finished(id));
            return;
        }
    };

    if let Err(reason) = capture_sequence(device.as_mut(), &request, &token, &tx).await {
        warn!(source = %id, %reason, "Capture sequence failed");
        let _ = tx.send(SourceEvent::Failed(id, reason));
    }

    device.release().await;
    debug!(source = %id, "Capture device released");
    let _ = tx.send(SourceEvent::Finished(id));
}

async fn capture_sequence(
    device: &mut dyn CaptureDevice,
    request: &CaptureRequest,
    token: &CancellationToken,
    tx: &mpsc::UnboundedSender<SourceEvent>,
) -> Result<(), String> {
    tokio::select! {
        biased;
        _ = token.cancelled() => return Err("cancelled".to_string()),
        result = device.configure(request) => result.map_err(|e| e.to_string())?,
    }

    for index in 0..request.target_count {
        if index > 0 && !request.interval.is_zero() {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err("cancelled".to_string()),
                _ = tokio::time::sleep(request.interval) => {}
            }
        }

        let path = tokio::select! {
            biased;
            _ = token.cancelled() => return Err("cancelled".to_string()),
            result = device.capture_one(request.shot(index)) => result.map_err(|e| e.to_string())?,
        };
        debug!(source = %request.source, index, path = %path.display(), "Artifact captured");
        let _ = tx.send(SourceEvent::Artifact(request.source, path));
    }

    Ok(())
}
