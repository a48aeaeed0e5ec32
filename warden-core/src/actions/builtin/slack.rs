//! Slack incoming-webhook notifications.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::actions::http::HttpClient;
use crate::actions::{Action, ActionCategory, ActionContext, ActionResult};
use crate::error::WardenResult;
use crate::models::Severity;

use super::{optional_str, required_str, severity_param};

#[derive(Debug, Serialize)]
struct SlackMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    username: String,
    icon_emoji: String,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    color: String,
    title: String,
    text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<SlackField>,
    footer: String,
    ts: i64,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}

pub struct SendSlackAction {
    http: HttpClient,
}

impl SendSlackAction {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    fn severity_color(severity: Severity) -> &'static str {
        match severity {
            Severity::Low => "#36a64f",
            Severity::Medium => "#daa520",
            Severity::High => "#dc3545",
            Severity::Critical => "#8b0000",
        }
    }

    fn severity_emoji(severity: Severity) -> &'static str {
        match severity {
            Severity::Low => ":information_source:",
            Severity::Medium => ":warning:",
            Severity::High => ":x:",
            Severity::Critical => ":rotating_light:",
        }
    }

    fn build_message(params: &Value) -> WardenResult<SlackMessage> {
        let severity = severity_param(params);
        let mut text = required_str(params, "message")?.to_string();
        if severity == Severity::Critical {
            text = format!("<!here> {}", text);
        }

        let fields = params
            .get("fields")
            .and_then(|f| f.as_object())
            .map(|obj| {
                obj.iter()
                    .take(10)
                    .map(|(key, value)| SlackField {
                        title: key.clone(),
                        value: match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        },
                        short: true,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(SlackMessage {
            channel: optional_str(params, "channel").map(str::to_string),
            username: "Warden".to_string(),
            icon_emoji: ":shield:".to_string(),
            attachments: vec![SlackAttachment {
                color: Self::severity_color(severity).to_string(),
                title: format!(
                    "{} {}",
                    Self::severity_emoji(severity),
                    required_str(params, "title")?
                ),
                text,
                fields,
                footer: "Warden security automation".to_string(),
                ts: chrono::Utc::now().timestamp(),
            }],
        })
    }
}

#[async_trait]
impl Action for SendSlackAction {
    fn name(&self) -> &str {
        "send_slack"
    }

    fn description(&self) -> &str {
        "Post a message to a Slack channel through an incoming webhook"
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Notification
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["webhook_url", "title", "message"],
            "properties": {
                "webhook_url": { "type": "string", "minLength": 1, "description": "Slack incoming webhook URL" },
                "channel": { "type": "string", "description": "Override the webhook's default channel" },
                "title": { "type": "string", "minLength": 1 },
                "message": { "type": "string" },
                "severity": { "type": "string", "enum": ["low", "medium", "high", "critical"] },
                "fields": { "type": "object", "description": "Extra key/value pairs shown under the message" }
            }
        })
    }

    async fn execute(&self, params: Value, _ctx: &ActionContext) -> WardenResult<ActionResult> {
        let message = Self::build_message(&params)?;
        let url = required_str(&params, "webhook_url")?;
        self.http
            .post_json(self.name(), url, &serde_json::to_value(&message)?)
            .await?;

        Ok(ActionResult::ok("Slack message posted"))
    }
}
