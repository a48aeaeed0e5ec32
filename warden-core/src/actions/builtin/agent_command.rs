//! Commands dispatched to endpoint agents.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::actions::http::IntegrationClient;
use crate::actions::{Action, ActionCategory, ActionContext, ActionResult};
use crate::error::WardenResult;

use super::{path_segment, required_str};

pub struct RunAgentCommandAction {
    control: IntegrationClient,
    allowed_commands: Vec<String>,
}

impl RunAgentCommandAction {
    pub fn new(control: IntegrationClient, allowed_commands: Vec<String>) -> Self {
        Self {
            control,
            allowed_commands,
        }
    }
}

#[async_trait]
impl Action for RunAgentCommandAction {
    fn name(&self) -> &str {
        "run_agent_command"
    }

    fn description(&self) -> &str {
        "Queue an allowlisted command on an endpoint agent"
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Agent
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["agent_id", "command"],
            "properties": {
                "agent_id": { "type": "string", "minLength": 1 },
                "command": { "type": "string", "enum": self.allowed_commands },
                "arguments": { "type": "object" },
                "wait_for_result": { "type": "boolean", "default": false }
            }
        })
    }

    async fn check_permissions(&self, ctx: &ActionContext) -> bool {
        ctx.actor.can_remediate()
    }

    async fn execute(&self, params: Value, ctx: &ActionContext) -> WardenResult<ActionResult> {
        let agent_id = required_str(&params, "agent_id")?;
        let command = required_str(&params, "command")?;

        let request = json!({
            "command": command,
            "arguments": params.get("arguments").cloned().unwrap_or_else(|| json!({})),
            "waitForResult": params["wait_for_result"].as_bool().unwrap_or(false),
            "organizationId": ctx.organization_id.to_string(),
            "executionId": ctx.execution_id.map(|id| id.to_string()),
        });

        let path = format!("agents/{}/commands", path_segment(self.name(), agent_id)?);
        let response = self.control.post(self.name(), &path, &request).await?;

        let mut result = ActionResult::ok(format!("Command '{}' queued on agent {}", command, agent_id))
            .with_field("agentId", json!(agent_id))
            .with_field("commandId", response.get("id").cloned().unwrap_or(Value::Null));
        if let Some(output) = response.get("output") {
            result = result.with_field("output", output.clone());
        }
        Ok(result)
    }
}
