//! Input event types pushed by the sensor and lock-screen collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which physical sensor produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Linear acceleration in m/s²
    Accelerometer,
    /// Angular velocity in rad/s
    Gyroscope,
}

/// A single three-axis motion reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub kind: SensorKind,
    pub timestamp: DateTime<Utc>,
}

impl MotionSample {
    pub fn new(kind: SensorKind, x: f64, y: f64, z: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            x,
            y,
            z,
            kind,
            timestamp,
        }
    }

    /// Accelerometer reading taken now.
    pub fn accelerometer(x: f64, y: f64, z: f64) -> Self {
        Self::new(SensorKind::Accelerometer, x, y, z, Utc::now())
    }

    /// Gyroscope reading taken now.
    pub fn gyroscope(x: f64, y: f64, z: f64) -> Self {
        Self::new(SensorKind::Gyroscope, x, y, z, Utc::now())
    }

    /// Euclidean norm of the reading.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Euclidean distance between two readings.
    pub fn delta(&self, previous: &MotionSample) -> f64 {
        let dx = self.x - previous.x;
        let dy = self.y - previous.y;
        let dz = self.z - previous.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Screen and keyguard transitions reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenEventKind {
    ScreenOn,
    ScreenOff,
    /// The keyguard was dismissed and the user is interacting with the device
    UserPresent,
}

/// A screen transition with the time it was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenEvent {
    pub kind: ScreenEventKind,
    pub timestamp: DateTime<Utc>,
}

impl ScreenEvent {
    pub fn new(kind: ScreenEventKind, timestamp: DateTime<Utc>) -> Self {
        Self { kind, timestamp }
    }

    pub fn now(kind: ScreenEventKind) -> Self {
        Self::new(kind, Utc::now())
    }
}

/// Unified input type carried by the sensor feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorInput {
    Motion(MotionSample),
    Screen(ScreenEvent),
}

impl SensorInput {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SensorInput::Motion(s) => s.timestamp,
            SensorInput::Screen(e) => e.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_magnitude() {
        let now = Utc::now();
        let a = MotionSample::new(SensorKind::Accelerometer, 0.0, 0.0, 9.8, now);
        let b = MotionSample::new(SensorKind::Accelerometer, 3.0, 4.0, 9.8, now);
        assert!((b.delta(&a) - 5.0).abs() < 1e-9);
        assert!((a.magnitude() - 9.8).abs() < 1e-9);
    }

    #[test]
    fn test_input_json_shape() {
        let line = r#"{"type":"screen","kind":"user_present","timestamp":"2024-05-01T10:00:00Z"}"#;
        let input: SensorInput = serde_json::from_str(line).unwrap();
        match input {
            SensorInput::Screen(event) => assert_eq!(event.kind, ScreenEventKind::UserPresent),
            other => panic!("unexpected input {other:?}"),
        }

        let line = r#"{"type":"motion","x":1.0,"y":0.5,"z":9.7,"kind":"accelerometer","timestamp":"2024-05-01T10:00:01Z"}"#;
        let input: SensorInput = serde_json::from_str(line).unwrap();
        assert!(matches!(input, SensorInput::Motion(s) if s.kind == SensorKind::Accelerometer));
    }
}
