//! Case tickets in the external ticketing system.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::actions::http::IntegrationClient;
use crate::actions::{Action, ActionCategory, ActionContext, ActionResult};
use crate::error::WardenResult;

use super::{optional_str, required_str};

pub struct CreateTicketAction {
    ticketing: IntegrationClient,
}

impl CreateTicketAction {
    pub fn new(ticketing: IntegrationClient) -> Self {
        Self { ticketing }
    }
}

#[async_trait]
impl Action for CreateTicketAction {
    fn name(&self) -> &str {
        "create_ticket"
    }

    fn description(&self) -> &str {
        "Open a ticket for analyst follow-up"
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Investigation
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["title"],
            "properties": {
                "title": { "type": "string", "minLength": 1, "maxLength": 255 },
                "description": { "type": "string" },
                "priority": { "type": "string", "enum": ["low", "medium", "high", "critical"], "default": "medium" },
                "assignee": { "type": "string" },
                "labels": { "type": "array", "items": { "type": "string" } }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ActionContext) -> WardenResult<ActionResult> {
        let request = json!({
            "title": required_str(&params, "title")?,
            "description": optional_str(&params, "description").unwrap_or_default(),
            "priority": optional_str(&params, "priority").unwrap_or("medium"),
            "assignee": optional_str(&params, "assignee"),
            "labels": params.get("labels").cloned().unwrap_or_else(|| json!([])),
            "organizationId": ctx.organization_id.to_string(),
            "source": {
                "playbookId": ctx.playbook_id.map(|id| id.to_string()),
                "executionId": ctx.execution_id.map(|id| id.to_string()),
            }
        });

        let response = self.ticketing.post(self.name(), "tickets", &request).await?;
        let ticket_id = response
            .get("id")
            .or_else(|| response.get("key"))
            .cloned()
            .unwrap_or(Value::Null);

        let mut result = ActionResult::ok(match ticket_id.as_str() {
            Some(id) => format!("Ticket {} created", id),
            None => "Ticket created".to_string(),
        })
        .with_field("ticketId", ticket_id);
        if let Some(url) = response.get("url") {
            result = result.with_field("url", url.clone());
        }
        Ok(result)
    }
}
