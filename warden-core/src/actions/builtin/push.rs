//! Mobile push notifications through the configured push gateway.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::actions::http::IntegrationClient;
use crate::actions::{Action, ActionCategory, ActionContext, ActionResult};
use crate::error::WardenResult;

use super::required_str;

pub struct SendPushAction {
    gateway: IntegrationClient,
}

impl SendPushAction {
    pub fn new(gateway: IntegrationClient) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Action for SendPushAction {
    fn name(&self) -> &str {
        "send_push"
    }

    fn description(&self) -> &str {
        "Send a push notification to registered mobile devices"
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Notification
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["device_tokens", "title", "body"],
            "properties": {
                "device_tokens": {
                    "type": "array",
                    "items": { "type": "string", "minLength": 1 },
                    "minItems": 1
                },
                "title": { "type": "string", "minLength": 1 },
                "body": { "type": "string" },
                "data": { "type": "object" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ActionContext) -> WardenResult<ActionResult> {
        let request = json!({
            "tokens": params["device_tokens"],
            "notification": {
                "title": required_str(&params, "title")?,
                "body": required_str(&params, "body")?,
            },
            "data": params.get("data").cloned().unwrap_or_else(|| json!({})),
            "organizationId": ctx.organization_id.to_string(),
        });

        let response = self.gateway.post(self.name(), "send", &request).await?;
        let delivered = response
            .get("delivered")
            .and_then(|d| d.as_u64())
            .unwrap_or_else(|| params["device_tokens"].as_array().map_or(0, |t| t.len() as u64));

        Ok(ActionResult::ok(format!("Push sent to {} device(s)", delivered))
            .with_field("delivered", json!(delivered)))
    }
}
