use serde_json::{json, Map, Value};

use crate::config::NotificationConfig;
use crate::models::Severity;

use super::types::{Notification, NotificationChannel};

const PUSH_BODY_LIMIT: usize = 180;

/// Channels that should receive `notification`, each with the parameters for
/// its delivery action. Channels that are disabled, lack a destination, or
/// sit above the notification's severity are left out.
pub fn build_channel_payloads(
    config: &NotificationConfig,
    notification: &Notification,
) -> Vec<(NotificationChannel, Value)> {
    NotificationChannel::all()
        .into_iter()
        .filter_map(|channel| channel_payload(config, channel, notification).map(|p| (channel, p)))
        .collect()
}

/// Channels that are enabled and have somewhere to deliver to, regardless of
/// severity.
pub fn configured_channels(config: &NotificationConfig) -> Vec<NotificationChannel> {
    NotificationChannel::all()
        .into_iter()
        .filter(|channel| is_configured(config, *channel))
        .collect()
}

fn is_configured(config: &NotificationConfig, channel: NotificationChannel) -> bool {
    match channel {
        NotificationChannel::Email => config.email.enabled && !config.email.recipients.is_empty(),
        NotificationChannel::Slack => config.slack.enabled && !config.slack.webhook_url.is_empty(),
        NotificationChannel::Teams => config.teams.enabled && !config.teams.webhook_url.is_empty(),
        NotificationChannel::Webhook => config.webhook.enabled && !config.webhook.url.is_empty(),
        NotificationChannel::Push => config.push.enabled && !config.push.device_tokens.is_empty(),
    }
}

/// The channel's own threshold, falling back to the global one.
fn threshold(config: &NotificationConfig, channel: NotificationChannel) -> Severity {
    let own = match channel {
        NotificationChannel::Email => config.email.min_severity,
        NotificationChannel::Slack => config.slack.min_severity,
        NotificationChannel::Teams => config.teams.min_severity,
        NotificationChannel::Webhook => config.webhook.min_severity,
        NotificationChannel::Push => config.push.min_severity,
    };
    own.unwrap_or(config.min_severity)
}

pub fn channel_payload(
    config: &NotificationConfig,
    channel: NotificationChannel,
    n: &Notification,
) -> Option<Value> {
    if !is_configured(config, channel) || n.severity < threshold(config, channel) {
        return None;
    }
    match channel {
        NotificationChannel::Email => {
            let email = &config.email;
            Some(json!({
                "to": email.recipients,
                "subject": format!("[{}] {}", n.severity.as_str().to_uppercase(), n.title),
                "body": email_body(n),
            }))
        }
        NotificationChannel::Slack => {
            let slack = &config.slack;
            let mut params = json!({
                "webhook_url": slack.webhook_url,
                "title": n.title,
                "message": with_link(n),
                "severity": n.severity.as_str(),
                "fields": detail_fields(n),
            });
            if let Some(channel) = slack.channel.as_deref().filter(|c| !c.is_empty()) {
                params["channel"] = json!(channel);
            }
            Some(params)
        }
        NotificationChannel::Teams => {
            let teams = &config.teams;
            Some(json!({
                "webhook_url": teams.webhook_url,
                "title": n.title,
                "message": with_link(n),
                "severity": n.severity.as_str(),
                "facts": detail_fields(n),
            }))
        }
        NotificationChannel::Webhook => {
            let webhook = &config.webhook;
            Some(json!({
                "url": webhook.url,
                "headers": webhook.headers,
                "payload": {
                    "type": "notification",
                    "title": n.title,
                    "message": n.message,
                    "severity": n.severity,
                    "organizationId": n.organization_id.to_string(),
                    "eventType": n.event_type,
                    "entityId": n.entity_id,
                    "link": n.link,
                    "fields": n.fields,
                    "timestamp": n.created_at.to_rfc3339(),
                },
            }))
        }
        NotificationChannel::Push => {
            let push = &config.push;
            Some(json!({
                "device_tokens": push.device_tokens,
                "title": n.title,
                "body": truncate(&n.message, PUSH_BODY_LIMIT),
                "data": {
                    "severity": n.severity.as_str(),
                    "eventType": n.event_type,
                    "entityId": n.entity_id,
                },
            }))
        }
    }
}

fn detail_fields(n: &Notification) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(event_type) = &n.event_type {
        fields.insert("Event".to_string(), json!(event_type));
    }
    if let Some(entity_id) = &n.entity_id {
        fields.insert("Entity".to_string(), json!(entity_id));
    }
    fields.extend(n.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    fields
}

fn with_link(n: &Notification) -> String {
    match &n.link {
        Some(link) => format!("{}\n{}", n.message, link),
        None => n.message.clone(),
    }
}

fn email_body(n: &Notification) -> String {
    let mut body = format!("{}\n\nSeverity: {}\n", n.message, n.severity);
    if let Some(event_type) = &n.event_type {
        body.push_str(&format!("Event: {}\n", event_type));
    }
    if let Some(entity_id) = &n.entity_id {
        body.push_str(&format!("Entity: {}\n", entity_id));
    }
    for (key, value) in &n.fields {
        let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
        body.push_str(&format!("{}: {}\n", key, value));
    }
    if let Some(link) = &n.link {
        body.push_str(&format!("\n{}\n", link));
    }
    body
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
