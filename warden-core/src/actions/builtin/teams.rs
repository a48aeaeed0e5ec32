//! Microsoft Teams notifications via connector webhooks (MessageCard format).

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::actions::http::HttpClient;
use crate::actions::{Action, ActionCategory, ActionContext, ActionResult};
use crate::error::WardenResult;
use crate::models::Severity;

use super::{required_str, severity_param};

pub struct SendTeamsAction {
    http: HttpClient,
}

impl SendTeamsAction {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    fn theme_color(severity: Severity) -> &'static str {
        match severity {
            Severity::Low => "2EB886",
            Severity::Medium => "DAA520",
            Severity::High => "DC3545",
            Severity::Critical => "8B0000",
        }
    }

    fn build_card(params: &Value) -> WardenResult<Value> {
        let severity = severity_param(params);
        let title = required_str(params, "title")?;
        let message = required_str(params, "message")?;

        let mut facts = vec![json!({"name": "Severity", "value": severity.as_str()})];
        if let Some(extra) = params.get("facts").and_then(|f| f.as_object()) {
            facts.extend(extra.iter().map(|(name, value)| {
                json!({
                    "name": name,
                    "value": value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string()),
                })
            }));
        }

        Ok(json!({
            "@type": "MessageCard",
            "@context": "https://schema.org/extensions",
            "summary": title,
            "themeColor": Self::theme_color(severity),
            "title": title,
            "sections": [{
                "text": message,
                "facts": facts,
            }]
        }))
    }
}

#[async_trait]
impl Action for SendTeamsAction {
    fn name(&self) -> &str {
        "send_teams"
    }

    fn description(&self) -> &str {
        "Post a MessageCard to a Microsoft Teams channel webhook"
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Notification
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["webhook_url", "title", "message"],
            "properties": {
                "webhook_url": { "type": "string", "minLength": 1 },
                "title": { "type": "string", "minLength": 1 },
                "message": { "type": "string" },
                "severity": { "type": "string", "enum": ["low", "medium", "high", "critical"] },
                "facts": { "type": "object" }
            }
        })
    }

    async fn execute(&self, params: Value, _ctx: &ActionContext) -> WardenResult<ActionResult> {
        let card = Self::build_card(&params)?;
        let url = required_str(&params, "webhook_url")?;
        self.http.post_json(self.name(), url, &card).await?;

        Ok(ActionResult::ok("Teams card posted"))
    }
}
