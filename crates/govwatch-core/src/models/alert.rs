//! Alert data models

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::limit::LimitRecord;

/// Alert severity level
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    #[default]
    Info,
    /// Warning
    Warning,
    /// Critical
    Critical,
}

impl Severity {
    /// Lowercase name used in payloads
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Hex color used by chat and email notifications
    pub fn color(self) -> &'static str {
        match self {
            Self::Critical => "#dc3545",
            Self::Warning => "#ffc107",
            Self::Info => "#17a2b8",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified alert, ready for delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Unique identifier
    pub id: Uuid,

    /// Highest severity across `limits`, or the explicit severity for message-only alerts
    pub severity: Severity,

    /// When the alert was raised
    pub timestamp: DateTime<Utc>,

    /// Limits that caused the alert
    pub limits: Vec<LimitRecord>,

    /// Free-form message
    pub message: Option<String>,

    /// What the alert is about (org, deployment id, ...); used for cooldown
    pub subject_id: Option<String>,

    /// Org label shown in notifications
    pub org: Option<String>,
}

impl AlertEvent {
    /// Build an alert from classified limits; severity is the max across them
    pub fn from_limits(limits: Vec<LimitRecord>) -> Self {
        let severity = limits
            .iter()
            .map(|l| l.status.severity())
            .max()
            .unwrap_or_default();

        Self {
            id: Uuid::new_v4(),
            severity,
            timestamp: Utc::now(),
            limits,
            message: None,
            subject_id: None,
            org: None,
        }
    }

    /// Build a message-only alert
    pub fn message(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            timestamp: Utc::now(),
            limits: Vec::new(),
            message: Some(message.into()),
            subject_id: None,
            org: None,
        }
    }

    /// Set the message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the subject
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject_id = Some(subject.into());
        self
    }

    /// Set the org label
    pub fn with_org(mut self, org: Option<String>) -> Self {
        self.org = org;
        self
    }

    /// Set the timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Message text, falling back to the generic threshold message
    pub fn message_or_default(&self) -> &str {
        self.message
            .as_deref()
            .unwrap_or("Governor limits threshold exceeded")
    }
}

/// SMTP settings for email notifications
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SmtpSettings {
    /// Relay host
    pub host: String,
    /// Relay port, 587 by default
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Login user; no authentication when absent
    #[serde(default)]
    pub username: Option<String>,
    /// Login password
    #[serde(default)]
    pub password: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_method() -> String {
    "POST".to_string()
}

/// Notification channel configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Colored terminal output
    Console,
    /// Email notification
    Email {
        /// Relay settings
        smtp: SmtpSettings,
        /// Sender address
        from: String,
        /// Recipient addresses
        to: Vec<String>,
    },
    /// Slack incoming webhook
    Slack {
        /// Incoming webhook URL
        webhook_url: String,
        /// Channel override
        #[serde(default)]
        channel: Option<String>,
    },
    /// Generic webhook
    Webhook {
        /// Target URL
        url: String,
        /// HTTP method, `POST` by default
        #[serde(default = "default_method")]
        method: String,
        /// Extra request headers
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl ChannelConfig {
    /// Channel kind as used in configuration
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Email { .. } => "email",
            Self::Slack { .. } => "slack",
            Self::Webhook { .. } => "webhook",
        }
    }
}

/// Record of a delivery attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Channel name
    pub channel: String,

    /// When the attempt finished
    pub sent_at: DateTime<Utc>,

    /// Outcome of the attempt
    pub outcome: DeliveryOutcome,
}

/// Outcome of one channel for one alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Delivered
    Delivered,
    /// Skipped by cooldown
    Suppressed,
    /// Channel failed; other channels are unaffected
    Failed(String),
}

impl NotificationRecord {
    /// Whether the channel delivered the alert
    pub fn is_delivered(&self) -> bool {
        self.outcome == DeliveryOutcome::Delivered
    }
}
