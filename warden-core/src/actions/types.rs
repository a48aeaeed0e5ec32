use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::WardenError;
use crate::models::TriggerSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionCategory {
    Notification,
    Remediation,
    Investigation,
    Cloud,
    Agent,
}

impl ActionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCategory::Notification => "notification",
            ActionCategory::Remediation => "remediation",
            ActionCategory::Investigation => "investigation",
            ActionCategory::Cloud => "cloud",
            ActionCategory::Agent => "agent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "notification" => Some(ActionCategory::Notification),
            "remediation" => Some(ActionCategory::Remediation),
            "investigation" => Some(ActionCategory::Investigation),
            "cloud" => Some(ActionCategory::Cloud),
            "agent" => Some(ActionCategory::Agent),
            _ => None,
        }
    }

    pub fn all() -> [ActionCategory; 5] {
        [
            ActionCategory::Notification,
            ActionCategory::Remediation,
            ActionCategory::Investigation,
            ActionCategory::Cloud,
            ActionCategory::Agent,
        ]
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ActionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionCategory::parse(s).ok_or_else(|| format!("unknown action category '{}'", s))
    }
}

/// Read-only metadata for one registered action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    pub name: String,
    pub description: String,
    pub category: ActionCategory,
    pub parameter_schema: Value,
}

/// Outcome of one action invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable failure class, see [`WardenError::kind`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    /// Set by remediation actions whose failure should stop the playbook.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub abort_playbook: bool,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            error_kind: None,
            data: None,
            abort_playbook: false,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            error_kind: None,
            data: None,
            abort_playbook: false,
        }
    }

    pub fn from_error(err: &WardenError) -> Self {
        let mut result = Self::failure(err.to_string());
        result.error_kind = Some(err.kind().to_string());
        result
    }

    pub fn with_data(mut self, data: Value) -> Self {
        if let Value::Object(map) = data {
            self.data = Some(map);
        }
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.error_kind = Some(kind.into());
        self
    }

    /// Only meaningful on failures; successful results never abort.
    pub fn abort_playbook(mut self, abort: bool) -> Self {
        self.abort_playbook = abort && !self.success;
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.error_kind.as_deref() == Some("timeout")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Viewer,
    Analyst,
    Admin,
}

/// Who an action runs on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Actor {
    /// Automated runs started by the trigger engine.
    System,
    User { id: Uuid, role: UserRole },
}

impl Actor {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Actor::System => None,
            Actor::User { id, .. } => Some(*id),
        }
    }

    /// Remediation needs the system itself or at least an analyst.
    pub fn can_remediate(&self) -> bool {
        match self {
            Actor::System => true,
            Actor::User { role, .. } => *role >= UserRole::Analyst,
        }
    }
}

/// Ambient information handed to every action call.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionContext {
    pub organization_id: Uuid,
    pub actor: Actor,
    pub execution_id: Option<Uuid>,
    pub playbook_id: Option<Uuid>,
    pub trigger_source: Option<TriggerSource>,
}

impl ActionContext {
    pub fn system(organization_id: Uuid) -> Self {
        Self {
            organization_id,
            actor: Actor::System,
            execution_id: None,
            playbook_id: None,
            trigger_source: None,
        }
    }

    pub fn user(organization_id: Uuid, user_id: Uuid, role: UserRole) -> Self {
        Self {
            actor: Actor::User { id: user_id, role },
            ..Self::system(organization_id)
        }
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    pub fn for_execution(mut self, execution_id: Uuid, playbook_id: Uuid) -> Self {
        self.execution_id = Some(execution_id);
        self.playbook_id = Some(playbook_id);
        self
    }

    pub fn with_trigger_source(mut self, source: TriggerSource) -> Self {
        self.trigger_source = Some(source);
        self
    }

    /// JSON view exposed to parameter templates as `context.*`.
    pub fn to_value(&self) -> Value {
        json!({
            "organizationId": self.organization_id.to_string(),
            "userId": self.actor.user_id().map(|id| id.to_string()),
            "executionId": self.execution_id.map(|id| id.to_string()),
            "playbookId": self.playbook_id.map(|id| id.to_string()),
            "triggerSource": self.trigger_source.map(|s| s.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_and_display() {
        for category in ActionCategory::all() {
            assert_eq!(ActionCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(ActionCategory::parse("Remediation"), Some(ActionCategory::Remediation));
        assert!("storage".parse::<ActionCategory>().is_err());
    }

    #[test]
    fn test_result_serialization_skips_empty_fields() {
        let json = serde_json::to_value(ActionResult::ok("sent")).unwrap();
        assert_eq!(json, json!({"success": true, "message": "sent"}));

        let err = WardenError::ActionTimeout {
            action: "isolate_host".to_string(),
            timeout_secs: 30,
        };
        let json = serde_json::to_value(ActionResult::from_error(&err).abort_playbook(true)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errorKind"], "timeout");
        assert_eq!(json["abortPlaybook"], true);
    }

    #[test]
    fn test_success_never_aborts() {
        let result = ActionResult::ok("done").abort_playbook(true);
        assert!(!result.abort_playbook);
    }

    #[test]
    fn test_with_field_builds_data() {
        let result = ActionResult::ok("created")
            .with_field("ticketId", json!("SEC-1"))
            .with_field("url", json!("https://tickets/SEC-1"));
        let data = result.data.unwrap();
        assert_eq!(data["ticketId"], "SEC-1");
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn test_actor_permissions() {
        assert!(Actor::System.can_remediate());
        let viewer = Actor::User {
            id: Uuid::new_v4(),
            role: UserRole::Viewer,
        };
        let analyst = Actor::User {
            id: Uuid::new_v4(),
            role: UserRole::Analyst,
        };
        assert!(!viewer.can_remediate());
        assert!(analyst.can_remediate());
    }

    #[test]
    fn test_context_value() {
        let org = Uuid::new_v4();
        let user = Uuid::new_v4();
        let ctx = ActionContext::user(org, user, UserRole::Admin)
            .with_trigger_source(TriggerSource::Manual);
        let value = ctx.to_value();

        assert_eq!(value["organizationId"], org.to_string());
        assert_eq!(value["userId"], user.to_string());
        assert_eq!(value["triggerSource"], "manual");
        assert!(value["executionId"].is_null());
    }
}
