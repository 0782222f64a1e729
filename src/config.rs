//! Configuration for the anti-theft agent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Motion detection tuning
    pub detector: DetectorConfig,

    /// Lock/unlock classification tuning
    pub lock: LockConfig,

    /// Evidence capture settings
    pub capture: CaptureConfig,

    /// Alert and email delivery settings
    pub notifications: NotificationConfig,

    /// Evidence retention
    pub retention: RetentionConfig,

    /// Directory where captured artifacts and session records live
    pub evidence_path: PathBuf,

    /// Directory for counters and other agent state
    pub data_path: PathBuf,

    /// Whether protection is armed. A running agent polls this flag so
    /// `antitheft-agent disarm` can stop it from another process.
    pub armed: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("antitheft-agent");

        Self {
            detector: DetectorConfig::default(),
            lock: LockConfig::default(),
            capture: CaptureConfig::default(),
            notifications: NotificationConfig::default(),
            retention: RetentionConfig::default(),
            evidence_path: data_dir.join("evidence"),
            data_path: data_dir,
            armed: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::Parse(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("antitheft-agent")
            .join("config.json")
    }

    /// Path of the key-value state file inside `data_path`.
    pub fn state_file(&self) -> PathBuf {
        self.data_path.join("state.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.evidence_path)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }
}

/// Motion detection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// User sensitivity, 0 (hard to trigger) to 100 (easy to trigger)
    pub sensitivity: u8,
    /// Consecutive above-threshold samples required before a trigger
    pub debounce_count: u32,
    /// Quiet period after which a partial run is forgotten
    #[serde(with = "duration_millis")]
    pub motion_timeout: Duration,
    /// Delay between a trigger and the alarm action
    #[serde(with = "duration_millis")]
    pub alarm_delay: Duration,
    /// Multiplier applied to the threshold for gyroscope samples (deg/s)
    pub gyro_threshold_scale: f64,
    pub accelerometer_available: bool,
    pub gyroscope_available: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: 50,
            debounce_count: 3,
            motion_timeout: Duration::from_secs(30),
            alarm_delay: Duration::from_secs(2),
            gyro_threshold_scale: 10.0,
            accelerometer_available: true,
            gyroscope_available: true,
        }
    }
}

impl DetectorConfig {
    /// Whether any motion sensor is present at all.
    pub fn any_sensor(&self) -> bool {
        self.accelerometer_available || self.gyroscope_available
    }
}

/// Lock/unlock classification tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Failed attempts before an unlock counts as a break-in
    pub break_in_threshold: u32,
    /// Attempt number from which suspicious activity is reported
    pub suspicious_after: u32,
    /// Number of attempts kept in the audit log
    pub attempt_log_capacity: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            break_in_threshold: 3,
            suspicious_after: 2,
            attempt_log_capacity: 50,
        }
    }
}

/// Evidence capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub photos_per_source: u32,
    #[serde(with = "duration_millis")]
    pub photo_interval: Duration,
    pub video_enabled: bool,
    #[serde(with = "duration_millis")]
    pub video_duration: Duration,
    pub screen_enabled: bool,
    #[serde(with = "duration_millis")]
    pub photo_batch_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub video_batch_timeout: Duration,
    /// How long cancelled sources get to release their devices
    #[serde(with = "duration_millis")]
    pub release_grace: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            photos_per_source: 4,
            photo_interval: Duration::from_millis(1500),
            video_enabled: false,
            video_duration: Duration::from_secs(10),
            screen_enabled: true,
            photo_batch_timeout: Duration::from_secs(30),
            video_batch_timeout: Duration::from_secs(15),
            release_grace: Duration::from_secs(2),
        }
    }
}

/// Alert and email delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Show an innocuous notification while the device is locked
    pub disguise_enabled: bool,
    pub email_enabled: bool,
    #[serde(with = "duration_millis")]
    pub email_delay: Duration,
    pub email_subject: String,
    pub email_recipients: Vec<String>,
    /// How often the unlock state is checked for queued alerts
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            disguise_enabled: true,
            email_enabled: false,
            email_delay: Duration::from_secs(5 * 60),
            email_subject: "System Status Update".to_string(),
            email_recipients: Vec::new(),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl NotificationConfig {
    /// Parse a comma-separated recipient list, dropping blanks and duplicates.
    pub fn parse_recipients(s: &str) -> Vec<String> {
        let mut recipients: Vec<String> = Vec::new();
        for email in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if !recipients.iter().any(|r| r == email) {
                recipients.push(email.to_string());
            }
        }
        recipients
    }
}

/// Evidence retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub retention_days: u32,
    #[serde(with = "duration_millis")]
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl RetentionConfig {
    /// Retention window, never shorter than one day.
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days.max(1)))
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
}

/// Serde support for Duration as whole milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.detector.debounce_count, 3);
        assert_eq!(config.detector.motion_timeout, Duration::from_secs(30));
        assert_eq!(config.lock.break_in_threshold, 3);
        assert_eq!(config.capture.photos_per_source, 4);
        assert_eq!(config.capture.photo_interval, Duration::from_millis(1500));
        assert_eq!(config.notifications.email_delay, Duration::from_secs(300));
        assert_eq!(config.retention.retention_days, 30);
        assert!(!config.armed);
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let config = Config::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["capture"]["photo_interval"], 1500);
        assert_eq!(json["detector"]["alarm_delay"], 2000);

        let parsed: Config = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.capture.photo_interval, Duration::from_millis(1500));
    }

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let parsed: Config =
            serde_json::from_str(r#"{"armed": true, "lock": {"break_in_threshold": 5}}"#).unwrap();
        assert!(parsed.armed);
        assert_eq!(parsed.lock.break_in_threshold, 5);
        assert_eq!(parsed.lock.attempt_log_capacity, 50);
        assert_eq!(parsed.detector.sensitivity, 50);
    }

    #[test]
    fn test_recipient_parsing() {
        let recipients = NotificationConfig::parse_recipients(" a@x.org, ,b@x.org,a@x.org ");
        assert_eq!(recipients, vec!["a@x.org".to_string(), "b@x.org".to_string()]);
    }

    #[test]
    fn test_retention_window_minimum() {
        let retention = RetentionConfig {
            retention_days: 0,
            ..RetentionConfig::default()
        };
        assert_eq!(retention.window(), chrono::Duration::days(1));
    }
}
