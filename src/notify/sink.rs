//! Outbound delivery port.
//!
//! The dispatcher decides what to send and when; a [`DispatchSink`] does the
//! actual delivery (platform notification, SMTP, ...).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Alert delivery failed: {0}")]
    Alert(String),
    #[error("Email delivery failed: {0}")]
    Email(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// An in-app alert as handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub evidence_paths: Vec<PathBuf>,
    /// Innocuous cover notification rather than a real alert
    pub disguised: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
}

pub trait DispatchSink: Send + Sync {
    fn deliver_alert(&self, alert: &Alert) -> Result<(), DispatchError>;

    fn send_email(&self, email: &OutboundEmail) -> Result<(), DispatchError>;
}

/// Sink that writes everything to the log. Used by the CLI.
#[derive(Debug, Default)]
pub struct LogSink;

impl DispatchSink for LogSink {
    fn deliver_alert(&self, alert: &Alert) -> Result<(), DispatchError> {
        info!(
            title = %alert.title,
            priority = ?alert.priority,
            evidence = alert.evidence_paths.len(),
            disguised = alert.disguised,
            "ALERT: {}",
            alert.body
        );
        Ok(())
    }

    fn send_email(&self, email: &OutboundEmail) -> Result<(), DispatchError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "EMAIL:\n{}",
            email.body
        );
        Ok(())
    }
}
