use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::models::{Event, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Email,
    Slack,
    Teams,
    Webhook,
    Push,
}

impl NotificationChannel {
    pub fn all() -> [NotificationChannel; 5] {
        [
            NotificationChannel::Email,
            NotificationChannel::Slack,
            NotificationChannel::Teams,
            NotificationChannel::Webhook,
            NotificationChannel::Push,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Slack => "slack",
            NotificationChannel::Teams => "teams",
            NotificationChannel::Webhook => "webhook",
            NotificationChannel::Push => "push",
        }
    }

    /// Registry action that delivers this channel.
    pub fn action_name(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "send_email",
            NotificationChannel::Slack => "send_slack",
            NotificationChannel::Teams => "send_teams",
            NotificationChannel::Webhook => "send_webhook",
            NotificationChannel::Push => "send_push",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One logical notification, rendered per channel by the fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub organization_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Extra key/value details shown by channels that support them.
    #[serde(default)]
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        organization_id: Uuid,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            organization_id,
            event_type: None,
            entity_id: None,
            link: None,
            fields: Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Summarise a domain event. Missing severity counts as medium.
    pub fn from_event(event: &Event) -> Self {
        let title = event
            .title()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} {}", event.event_type, event.entity_id));
        let message = ["description", "message", "summary"]
            .iter()
            .find_map(|key| event.get(key).and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "{} raised for {} {}",
                    event.event_type, event.entity_type, event.entity_id
                )
            });

        let mut notification = Self::new(
            title,
            message,
            event.severity().unwrap_or_default(),
            event.organization_id,
        );
        notification.event_type = Some(event.event_type.to_string());
        notification.entity_id = Some(event.entity_id.clone());
        notification.link = event.get("url").and_then(|v| v.as_str()).map(str::to_string);
        for key in ["source", "host", "hostname", "ip", "user", "rule"] {
            if let Some(value) = event.get(key) {
                notification.fields.insert(key.to_string(), value.clone());
            }
        }
        notification
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOutcome {
    pub channel: NotificationChannel,
    pub action: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub duration_ms: u64,
}

/// Audit record of one fan-out.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSummary {
    pub success: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub successful: usize,
    pub failed: usize,
    pub channels: Vec<ChannelOutcome>,
}

impl NotificationSummary {
    pub fn skipped(success: bool, reason: impl Into<String>) -> Self {
        Self {
            success,
            skipped: true,
            reason: Some(reason.into()),
            successful: 0,
            failed: 0,
            channels: Vec::new(),
        }
    }

    pub fn from_outcomes(channels: Vec<ChannelOutcome>) -> Self {
        let successful = channels.iter().filter(|c| c.success).count();
        let failed = channels.len() - successful;
        Self {
            success: failed == 0,
            skipped: false,
            reason: None,
            successful,
            failed,
            channels,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.skipped
            && self
                .reason
                .as_deref()
                .map(|r| r.starts_with("rate limit"))
                .unwrap_or(false)
    }
}
