//! Generic JSON webhook delivery.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::actions::http::HttpClient;
use crate::actions::{Action, ActionCategory, ActionContext, ActionResult};
use crate::error::WardenResult;

use super::{optional_str, required_str};

pub struct SendWebhookAction {
    http: HttpClient,
}

impl SendWebhookAction {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    fn headers(params: &Value) -> HashMap<String, String> {
        params
            .get("headers")
            .and_then(|h| h.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Action for SendWebhookAction {
    fn name(&self) -> &str {
        "send_webhook"
    }

    fn description(&self) -> &str {
        "Deliver a JSON payload to an arbitrary HTTP endpoint"
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Notification
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["url", "payload"],
            "properties": {
                "url": { "type": "string", "minLength": 1 },
                "payload": { "description": "JSON body to send" },
                "method": { "type": "string", "enum": ["POST", "PUT"], "default": "POST" },
                "headers": {
                    "type": "object",
                    "additionalProperties": { "type": "string" }
                },
                "bearer_token": { "type": "string" }
            }
        })
    }

    fn validate_parameters(&self, params: &Value) -> Result<(), Vec<String>> {
        let url = params["url"].as_str().unwrap_or_default();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(vec![format!("url '{}' must use http or https", url)]);
        }
        Ok(())
    }

    async fn execute(&self, params: Value, _ctx: &ActionContext) -> WardenResult<ActionResult> {
        let url = required_str(&params, "url")?;
        let method = match optional_str(&params, "method") {
            Some("PUT") => Method::PUT,
            _ => Method::POST,
        };
        let response = self
            .http
            .send(
                self.name(),
                method,
                url,
                optional_str(&params, "bearer_token"),
                &Self::headers(&params),
                Some(&params["payload"]),
            )
            .await?;

        let mut result = ActionResult::ok(format!("Webhook delivered to {}", url));
        if !response.is_null() {
            result = result.with_field("response", response);
        }
        Ok(result)
    }
}
