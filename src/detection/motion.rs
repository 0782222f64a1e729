//! Debounced motion detector.
//!
//! Samples are pushed one at a time. A run of `debounce_count` samples above
//! the sensitivity threshold produces a [`TriggerEvent`] and schedules the
//! alarm `alarm_delay` later. Further motion before the deadline pushes the
//! alarm back; once it has fired it stays quiet until the run ends or the
//! detector is reset.

use crate::config::DetectorConfig;
use crate::detection::threshold::ThresholdModel;
use crate::sensor::types::{MotionSample, SensorKind};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Emitted once per motion run, when the debounce count is reached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerEvent {
    pub sensor: SensorKind,
    pub magnitude: f64,
    pub threshold: f64,
    pub consecutive_events: u32,
    pub motion_start: DateTime<Utc>,
    pub at: DateTime<Utc>,
    /// When the alarm action will run unless pushed back by more motion
    pub alarm_due: DateTime<Utc>,
}

/// The delayed alarm action, returned by [`MotionDetector::poll_alarm`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmAction {
    pub sensor: SensorKind,
    pub magnitude: f64,
    pub sensitivity: u8,
    pub fired_at: DateTime<Utc>,
}

impl AlarmAction {
    /// Human-readable trigger details for the audit trail.
    pub fn details(&self) -> String {
        format!(
            "Motion detected - {:?}: {:.2} (Sensitivity: {}%)",
            self.sensor, self.magnitude, self.sensitivity
        )
    }
}

/// Pending alarm timer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PendingAlarm {
    #[default]
    Idle,
    Scheduled {
        due: DateTime<Utc>,
        sensor: SensorKind,
        magnitude: f64,
    },
    /// Fired during the current run; not re-armed until the run ends
    Fired,
}

/// Mutable detector state. Only the owning detector mutates it.
#[derive(Debug, Clone, Default)]
pub struct MotionState {
    pub last_accelerometer: Option<MotionSample>,
    pub consecutive_events: u32,
    pub motion_start: Option<DateTime<Utc>>,
    pub last_motion: Option<DateTime<Utc>>,
    pub alarm: PendingAlarm,
}

impl MotionState {
    pub fn alarm_due(&self) -> Option<DateTime<Utc>> {
        match self.alarm {
            PendingAlarm::Scheduled { due, .. } => Some(due),
            _ => None,
        }
    }

    pub fn alarm_fired(&self) -> bool {
        self.alarm == PendingAlarm::Fired
    }
}

/// Snapshot of the detector for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct MotionSummary {
    pub active: bool,
    pub sensitivity: u8,
    pub threshold: f64,
    pub consecutive_events: u32,
    pub motion_duration_secs: Option<i64>,
}

pub struct MotionDetector {
    config: DetectorConfig,
    threshold: f64,
    state: MotionState,
}

impl MotionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self::with_model(config, ThresholdModel::default())
    }

    pub fn with_model(config: DetectorConfig, model: ThresholdModel) -> Self {
        let threshold = model.threshold(config.sensitivity);
        if !config.any_sensor() {
            info!("No motion sensor available; motion detection is inert");
        }
        Self {
            config,
            threshold,
            state: MotionState::default(),
        }
    }

    /// Accelerometer threshold in effect.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn state(&self) -> &MotionState {
        &self.state
    }

    /// Whether any sample can ever trigger this detector.
    pub fn is_active(&self) -> bool {
        self.config.any_sensor()
    }

    /// Deadline of the scheduled alarm, if one is pending.
    pub fn alarm_deadline(&self) -> Option<DateTime<Utc>> {
        self.state.alarm_due()
    }

    /// Process one sample. Returns a trigger when this sample completes the
    /// debounce run.
    pub fn submit_sample(&mut self, sample: &MotionSample) -> Option<TriggerEvent> {
        let (magnitude, threshold) = match sample.kind {
            SensorKind::Accelerometer => {
                if !self.config.accelerometer_available {
                    return None;
                }
                // The first reading only establishes the baseline.
                let previous = self.state.last_accelerometer.replace(*sample)?;
                (sample.delta(&previous), self.threshold)
            }
            SensorKind::Gyroscope => {
                if !self.config.gyroscope_available {
                    return None;
                }
                (
                    sample.magnitude().to_degrees(),
                    self.threshold * self.config.gyro_threshold_scale,
                )
            }
        };

        if magnitude > threshold {
            self.on_motion(sample, magnitude, threshold)
        } else {
            self.on_quiet(sample.timestamp);
            None
        }
    }

    /// Fire the pending alarm if its deadline has passed.
    pub fn poll_alarm(&mut self, now: DateTime<Utc>) -> Option<AlarmAction> {
        match self.state.alarm {
            PendingAlarm::Scheduled {
                due,
                sensor,
                magnitude,
            } if now >= due => {
                self.state.alarm = PendingAlarm::Fired;
                warn!(?sensor, magnitude, "Motion alarm fired");
                Some(AlarmAction {
                    sensor,
                    magnitude,
                    sensitivity: self.config.sensitivity,
                    fired_at: now,
                })
            }
            _ => None,
        }
    }

    /// Clear all state and cancel any pending alarm (disarm).
    pub fn reset(&mut self) {
        if matches!(self.state.alarm, PendingAlarm::Scheduled { .. }) {
            debug!("Pending motion alarm cancelled");
        }
        self.state = MotionState::default();
    }

    pub fn summary(&self, now: DateTime<Utc>) -> MotionSummary {
        MotionSummary {
            active: self.is_active(),
            sensitivity: self.config.sensitivity,
            threshold: self.threshold,
            consecutive_events: self.state.consecutive_events,
            motion_duration_secs: self
                .state
                .motion_start
                .map(|start| (now - start).num_seconds()),
        }
    }

    fn motion_timeout(&self) -> Duration {
        Duration::from_std(self.config.motion_timeout).unwrap_or_else(|_| Duration::seconds(30))
    }

    fn alarm_delay(&self) -> Duration {
        Duration::from_std(self.config.alarm_delay).unwrap_or_else(|_| Duration::seconds(2))
    }

    fn on_motion(
        &mut self,
        sample: &MotionSample,
        magnitude: f64,
        threshold: f64,
    ) -> Option<TriggerEvent> {
        let now = sample.timestamp;

        // A qualifying sample after a long quiet gap starts a new run.
        if let Some(last) = self.state.last_motion {
            if now - last > self.motion_timeout() {
                self.end_run();
            }
        }

        if self.state.consecutive_events == 0 {
            self.state.motion_start = Some(now);
            debug!(sensor = ?sample.kind, magnitude, "Initial motion detected");
        }
        self.state.consecutive_events = self.state.consecutive_events.saturating_add(1);
        self.state.last_motion = Some(now);

        if self.state.consecutive_events < self.config.debounce_count {
            return None;
        }

        let due = now + self.alarm_delay();
        match self.state.alarm {
            PendingAlarm::Idle | PendingAlarm::Scheduled { .. } => {
                self.state.alarm = PendingAlarm::Scheduled {
                    due,
                    sensor: sample.kind,
                    magnitude,
                };
            }
            PendingAlarm::Fired => {}
        }

        if self.state.consecutive_events != self.config.debounce_count {
            return None;
        }

        warn!(
            sensor = ?sample.kind,
            magnitude,
            threshold,
            "Motion trigger, alarm scheduled"
        );
        Some(TriggerEvent {
            sensor: sample.kind,
            magnitude,
            threshold,
            consecutive_events: self.state.consecutive_events,
            motion_start: self.state.motion_start.unwrap_or(now),
            at: now,
            alarm_due: self.alarm_deadline().unwrap_or(due),
        })
    }

    fn on_quiet(&mut self, now: DateTime<Utc>) {
        if let Some(last) = self.state.last_motion {
            if now - last > self.motion_timeout() {
                info!("Motion timeout, resetting run");
                self.end_run();
            }
        }
    }

    /// Forget the current run. A scheduled alarm survives; only `reset`
    /// cancels it.
    fn end_run(&mut self) {
        self.state.consecutive_events = 0;
        self.state.motion_start = None;
        self.state.last_motion = None;
        if self.state.alarm_fired() {
            self.state.alarm = PendingAlarm::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn accel(ms: i64, x: f64) -> MotionSample {
        MotionSample::new(
            SensorKind::Accelerometer,
            x,
            0.0,
            9.8,
            t0() + Duration::milliseconds(ms),
        )
    }

    /// Alternating readings 10 m/s² apart, all above the default threshold.
    fn shake(detector: &mut MotionDetector, start_ms: i64, count: usize) -> Vec<TriggerEvent> {
        let mut triggers = Vec::new();
        for i in 0..count {
            let x = if i % 2 == 0 { 10.0 } else { 0.0 };
            if let Some(t) = detector.submit_sample(&accel(start_ms + i as i64 * 100, x)) {
                triggers.push(t);
            }
        }
        triggers
    }

    #[test]
    fn test_three_consecutive_samples_trigger_once() {
        let mut detector = MotionDetector::new(DetectorConfig::default());
        detector.submit_sample(&accel(0, 0.0));

        let triggers = shake(&mut detector, 100, 10);
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].consecutive_events, 3);
        assert_eq!(triggers[0].at, t0() + Duration::milliseconds(300));
    }

    #[test]
    fn test_two_samples_do_not_trigger() {
        let mut detector = MotionDetector::new(DetectorConfig::default());
        detector.submit_sample(&accel(0, 0.0));
        assert!(shake(&mut detector, 100, 2).is_empty());
        assert_eq!(detector.state().consecutive_events, 2);
        assert!(detector.alarm_deadline().is_none());
    }

    #[test]
    fn test_first_sample_only_primes_baseline() {
        let mut detector = MotionDetector::new(DetectorConfig::default());
        assert!(detector.submit_sample(&accel(0, 50.0)).is_none());
        assert_eq!(detector.state().consecutive_events, 0);
    }

    #[test]
    fn test_quiet_gap_resets_counter() {
        let mut detector = MotionDetector::new(DetectorConfig::default());
        detector.submit_sample(&accel(0, 0.0));
        shake(&mut detector, 100, 2);
        assert_eq!(detector.state().consecutive_events, 2);

        // Still reading (x stays 0.0 after the last shake sample) 31s later.
        detector.submit_sample(&accel(31_300, 0.0));
        assert_eq!(detector.state().consecutive_events, 0);

        // A new run needs the full debounce count again.
        let triggers = shake(&mut detector, 31_400, 2);
        assert!(triggers.is_empty());
        assert_eq!(detector.state().consecutive_events, 2);
        let triggers = shake(&mut detector, 31_600, 1);
        assert_eq!(triggers.len(), 1);
    }

    #[test]
    fn test_quiet_sample_within_timeout_keeps_count() {
        let mut detector = MotionDetector::new(DetectorConfig::default());
        detector.submit_sample(&accel(0, 0.0));
        shake(&mut detector, 100, 2);
        detector.submit_sample(&accel(5_000, 0.0));
        assert_eq!(detector.state().consecutive_events, 2);
    }

    #[test]
    fn test_alarm_fires_after_delay_and_is_rescheduled_by_motion() {
        let mut detector = MotionDetector::new(DetectorConfig::default());
        detector.submit_sample(&accel(0, 0.0));
        let trigger = shake(&mut detector, 100, 3).remove(0);
        assert_eq!(trigger.alarm_due, t0() + Duration::milliseconds(2_300));

        assert!(detector.poll_alarm(t0() + Duration::milliseconds(2_000)).is_none());

        // More motion pushes the deadline back.
        detector.submit_sample(&accel(400, 0.0));
        assert_eq!(
            detector.alarm_deadline(),
            Some(t0() + Duration::milliseconds(2_400))
        );
        assert!(detector.poll_alarm(t0() + Duration::milliseconds(2_350)).is_none());

        let action = detector
            .poll_alarm(t0() + Duration::milliseconds(2_400))
            .expect("alarm should fire");
        assert_eq!(action.sensor, SensorKind::Accelerometer);
        assert!(action.details().contains("Sensitivity: 50%"));

        // Not re-armed after firing within the same run.
        shake(&mut detector, 2_500, 5);
        assert!(detector.state().alarm_fired());
        assert!(detector.alarm_deadline().is_none());
        assert!(detector.poll_alarm(t0() + Duration::seconds(10)).is_none());
    }

    #[test]
    fn test_reset_cancels_pending_alarm() {
        let mut detector = MotionDetector::new(DetectorConfig::default());
        detector.submit_sample(&accel(0, 0.0));
        shake(&mut detector, 100, 3);
        assert!(detector.alarm_deadline().is_some());

        detector.reset();
        assert!(detector.alarm_deadline().is_none());
        assert!(detector.poll_alarm(t0() + Duration::seconds(60)).is_none());
        assert_eq!(detector.state().consecutive_events, 0);
    }

    #[test]
    fn test_gyroscope_uses_scaled_threshold() {
        let mut detector = MotionDetector::new(DetectorConfig::default());
        // Threshold 5.0 * 10 = 50 deg/s; 1 rad/s ≈ 57.3 deg/s, 0.5 rad/s ≈ 28.6.
        let gyro = |ms: i64, rate: f64| {
            MotionSample::new(
                SensorKind::Gyroscope,
                rate,
                0.0,
                0.0,
                t0() + Duration::milliseconds(ms),
            )
        };

        for i in 0..5 {
            assert!(detector.submit_sample(&gyro(i * 100, 0.5)).is_none());
        }
        assert_eq!(detector.state().consecutive_events, 0);

        let triggers: Vec<_> = (0..3)
            .filter_map(|i| detector.submit_sample(&gyro(1_000 + i * 100, 1.0)))
            .collect();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].sensor, SensorKind::Gyroscope);
        assert_eq!(triggers[0].threshold, 50.0);
    }

    #[test]
    fn test_no_sensor_is_inert() {
        let config = DetectorConfig {
            accelerometer_available: false,
            gyroscope_available: false,
            ..DetectorConfig::default()
        };
        let mut detector = MotionDetector::new(config);
        assert!(!detector.is_active());
        detector.submit_sample(&accel(0, 0.0));
        assert!(shake(&mut detector, 100, 20).is_empty());
        assert_eq!(detector.state().consecutive_events, 0);
    }

    #[test]
    fn test_higher_sensitivity_triggers_on_smaller_motion() {
        let small_shake = |sensitivity: u8| {
            let config = DetectorConfig {
                sensitivity,
                ..DetectorConfig::default()
            };
            let mut detector = MotionDetector::new(config);
            let mut fired = false;
            for i in 0..8 {
                let x = if i % 2 == 0 { 0.0 } else { 3.0 };
                fired |= detector.submit_sample(&accel(i * 100, x)).is_some();
            }
            fired
        };

        assert!(small_shake(90));
        assert!(!small_shake(10));
    }
}
