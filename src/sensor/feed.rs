//! Push channel between the platform sensor callbacks and the agent.

use crate::sensor::types::{MotionSample, ScreenEvent, SensorInput};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Capacity of the feed; producers never block on a full feed.
const FEED_CAPACITY: usize = 10_000;

/// Errors that can occur while operating the feed.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Sensor feed is already running")]
    AlreadyRunning,
}

/// Cloneable producer side of the feed, handed to platform callbacks.
#[derive(Debug, Clone)]
pub struct SensorSender {
    sender: Sender<SensorInput>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl SensorSender {
    /// Push an input. Returns false if it was dropped because the feed is
    /// stopped or full.
    pub fn push(&self, input: SensorInput) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.sender.try_send(input) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn push_sample(&self, sample: MotionSample) -> bool {
        self.push(SensorInput::Motion(sample))
    }

    pub fn push_screen_event(&self, event: ScreenEvent) -> bool {
        self.push(SensorInput::Screen(event))
    }
}

/// Bounded feed of sensor and screen inputs.
pub struct SensorFeed {
    sender: Sender<SensorInput>,
    receiver: Receiver<SensorInput>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl SensorFeed {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(FEED_CAPACITY);
        Self {
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start accepting inputs.
    pub fn start(&mut self) -> Result<(), SensorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(SensorError::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop accepting inputs and discard anything still queued.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        while self.receiver.try_recv().is_ok() {}
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Producer handle for platform callbacks.
    pub fn sender(&self) -> SensorSender {
        SensorSender {
            sender: self.sender.clone(),
            running: self.running.clone(),
            dropped: self.dropped.clone(),
        }
    }

    /// Get the receiver for queued inputs.
    pub fn receiver(&self) -> &Receiver<SensorInput> {
        &self.receiver
    }

    /// Try to receive an input without blocking.
    pub fn try_recv(&self) -> Option<SensorInput> {
        self.receiver.try_recv().ok()
    }

    /// Inputs rejected because the feed was stopped or full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for SensorFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::types::ScreenEventKind;

    #[test]
    fn test_inputs_flow_only_while_running() {
        let mut feed = SensorFeed::new();
        let sender = feed.sender();

        assert!(!sender.push_sample(MotionSample::accelerometer(0.0, 0.0, 9.8)));
        assert_eq!(feed.dropped_count(), 1);

        feed.start().unwrap();
        assert!(sender.push_screen_event(ScreenEvent::now(ScreenEventKind::ScreenOff)));
        assert!(matches!(feed.try_recv(), Some(SensorInput::Screen(_))));
        assert!(feed.try_recv().is_none());
    }

    #[test]
    fn test_double_start_rejected() {
        let mut feed = SensorFeed::new();
        feed.start().unwrap();
        assert!(matches!(feed.start(), Err(SensorError::AlreadyRunning)));

        feed.stop();
        assert!(!feed.is_running());
        feed.start().unwrap();
    }

    #[test]
    fn test_stop_discards_queued_inputs() {
        let mut feed = SensorFeed::new();
        feed.start().unwrap();
        let sender = feed.sender();
        for _ in 0..5 {
            sender.push_sample(MotionSample::gyroscope(0.1, 0.0, 0.0));
        }
        feed.stop();
        assert!(feed.try_recv().is_none());
    }
}
