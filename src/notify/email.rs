//! Email composition for delayed alert delivery.

use crate::config::NotificationConfig;
use crate::notify::dispatcher::PendingNotification;
use crate::notify::sink::OutboundEmail;
use chrono::Local;
use std::fmt::Write;

/// Plain-text body for an alert email.
pub fn compose_body(notification: &PendingNotification, device_info: &str) -> String {
    let time = notification
        .enqueued_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S");

    let mut body = String::new();
    let _ = writeln!(body, "Security Alert - {}\n", notification.title);
    let _ = writeln!(body, "Time: {time}");
    let _ = writeln!(body, "Message: {}\n", notification.message);

    if !notification.evidence_paths.is_empty() {
        body.push_str("Evidence Collected:\n");
        for path in &notification.evidence_paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            let _ = writeln!(body, "- {name}");
        }
        body.push_str("\nEvidence files are attached to this email.\n\n");
    }

    body.push_str("Device Information:\n");
    let _ = writeln!(body, "{device_info}");
    body
}

/// One email per configured recipient. Empty when email is disabled.
pub fn compose(
    notification: &PendingNotification,
    config: &NotificationConfig,
    device_info: &str,
) -> Vec<OutboundEmail> {
    if !config.email_enabled {
        return Vec::new();
    }

    let body = compose_body(notification, device_info);
    config
        .email_recipients
        .iter()
        .map(|to| OutboundEmail {
            to: to.clone(),
            subject: config.email_subject.clone(),
            body: body.clone(),
            attachments: notification.evidence_paths.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::sink::Priority;
    use chrono::Utc;
    use std::path::PathBuf;

    fn notification(paths: Vec<PathBuf>) -> PendingNotification {
        PendingNotification {
            id: 1,
            title: "Security Evidence Collected".to_string(),
            message: "Motion Detection".to_string(),
            evidence_paths: paths,
            enqueued_at: Utc::now(),
            priority: Priority::High,
        }
    }

    #[test]
    fn test_body_lists_evidence_file_names() {
        let n = notification(vec![
            PathBuf::from("/data/evidence/security_front_20240501_100000_01.jpg"),
            PathBuf::from("/data/evidence/security_screen_20240501_100000_01.png"),
        ]);
        let body = compose_body(&n, "host (linux x86_64)");

        assert!(body.starts_with("Security Alert - Security Evidence Collected"));
        assert!(body.contains("Message: Motion Detection"));
        assert!(body.contains("- security_front_20240501_100000_01.jpg"));
        assert!(!body.contains("/data/evidence"));
        assert!(body.contains("host (linux x86_64)"));
    }

    #[test]
    fn test_one_email_per_recipient() {
        let config = NotificationConfig {
            email_enabled: true,
            email_recipients: vec!["a@x.org".to_string(), "b@x.org".to_string()],
            ..NotificationConfig::default()
        };
        let emails = compose(&notification(vec![PathBuf::from("a.jpg")]), &config, "host");

        assert_eq!(emails.len(), 2);
        assert_eq!(emails[0].to, "a@x.org");
        assert_eq!(emails[1].subject, "System Status Update");
        assert_eq!(emails[1].attachments, vec![PathBuf::from("a.jpg")]);
    }

    #[test]
    fn test_disabled_email_composes_nothing() {
        let config = NotificationConfig {
            email_enabled: false,
            email_recipients: vec!["a@x.org".to_string()],
            ..NotificationConfig::default()
        };
        assert!(compose(&notification(vec![]), &config, "host").is_empty());
    }
}
