//! Suspension of compromised accounts at the cloud identity provider.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::actions::http::IntegrationClient;
use crate::actions::{Action, ActionCategory, ActionContext, ActionResult};
use crate::error::WardenResult;

use super::{optional_str, path_segment, required_str};

pub struct DisableCloudUserAction {
    identity: IntegrationClient,
}

impl DisableCloudUserAction {
    pub fn new(identity: IntegrationClient) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl Action for DisableCloudUserAction {
    fn name(&self) -> &str {
        "disable_cloud_user"
    }

    fn description(&self) -> &str {
        "Disable a user at the cloud identity provider and revoke their sessions"
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Cloud
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["user"],
            "properties": {
                "user": { "type": "string", "minLength": 1, "description": "User principal name or id" },
                "provider": { "type": "string", "enum": ["azure_ad", "okta", "google", "aws_iam"] },
                "revoke_sessions": { "type": "boolean", "default": true },
                "reason": { "type": "string" }
            }
        })
    }

    async fn check_permissions(&self, ctx: &ActionContext) -> bool {
        ctx.actor.can_remediate()
    }

    async fn execute(&self, params: Value, ctx: &ActionContext) -> WardenResult<ActionResult> {
        let user = required_str(&params, "user")?;
        let revoke = params["revoke_sessions"].as_bool().unwrap_or(true);

        let request = json!({
            "provider": optional_str(&params, "provider"),
            "revokeSessions": revoke,
            "reason": optional_str(&params, "reason").unwrap_or("Disabled by Warden playbook"),
            "organizationId": ctx.organization_id.to_string(),
        });

        let path = format!("users/{}/disable", path_segment(self.name(), user)?);
        self.identity.post(self.name(), &path, &request).await?;

        info!(action = "disable_cloud_user", user = %user, revoke_sessions = revoke, "Cloud user disabled");
        Ok(ActionResult::ok(format!("User {} disabled", user))
            .with_field("user", json!(user))
            .with_field("sessionsRevoked", json!(revoke)))
    }
}
