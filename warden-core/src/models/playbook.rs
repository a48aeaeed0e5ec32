use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{WardenError, WardenResult};
use crate::triggers::TriggerCondition;

use super::event::EventType;

/// Weight given to the newest sample in the execution-time moving average.
pub const EXECUTION_TIME_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybookStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub action_name: String,
    /// Parameter template; string leaves may contain `{{path}}` placeholders.
    #[serde(default = "empty_object", alias = "parameters")]
    pub parameter_template: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl PlaybookStep {
    pub fn new(action_name: impl Into<String>, parameter_template: Value) -> Self {
        Self {
            name: None,
            action_name: action_name.into(),
            parameter_template,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.action_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playbook {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Owning tenant. `None` applies the playbook to every organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub trigger_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_conditions: Option<TriggerCondition>,
    #[serde(default)]
    pub steps: Vec<PlaybookStep>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default)]
    pub avg_execution_time_ms: f64,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Playbook {
    pub fn new(name: impl Into<String>, trigger_type: impl Into<EventType>) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id: None,
            name: name.into(),
            description: None,
            trigger_type: trigger_type.into(),
            trigger_conditions: None,
            steps: Vec::new(),
            is_active: true,
            execution_count: 0,
            avg_execution_time_ms: 0.0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_condition(mut self, condition: TriggerCondition) -> Self {
        self.trigger_conditions = Some(condition);
        self
    }

    pub fn with_step(mut self, step: PlaybookStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn applies_to(&self, organization_id: Uuid) -> bool {
        self.organization_id
            .map(|org| org == organization_id)
            .unwrap_or(true)
    }

    /// Active playbooks must carry at least one step.
    pub fn validate(&self) -> WardenResult<()> {
        if self.name.trim().is_empty() {
            return Err(WardenError::InvalidPlaybook {
                playbook: self.id.to_string(),
                message: "name must not be empty".to_string(),
            });
        }

        if self.is_active && self.steps.is_empty() {
            return Err(WardenError::InvalidPlaybook {
                playbook: self.name.clone(),
                message: "active playbook has no steps".to_string(),
            });
        }

        if let Some(step) = self.steps.iter().find(|s| s.action_name.trim().is_empty()) {
            return Err(WardenError::InvalidPlaybook {
                playbook: self.name.clone(),
                message: format!("step '{}' has no action name", step.label()),
            });
        }

        Ok(())
    }

    /// Fold one run into the aggregate statistics.
    ///
    /// The first run seeds the average; later runs use an exponentially
    /// weighted moving average so recent behaviour dominates.
    pub fn record_execution(&mut self, duration_ms: u64) {
        let sample = duration_ms as f64;
        self.avg_execution_time_ms = if self.execution_count == 0 {
            sample
        } else {
            self.avg_execution_time_ms * (1.0 - EXECUTION_TIME_WEIGHT)
                + sample * EXECUTION_TIME_WEIGHT
        };
        self.execution_count += 1;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_moving_average_weights_recent_runs() {
        let mut playbook = Playbook::new("Contain", EventType::AlertCreated);

        playbook.record_execution(1000);
        assert_eq!(playbook.execution_count, 1);
        assert!((playbook.avg_execution_time_ms - 1000.0).abs() < 1e-9);

        playbook.record_execution(3000);
        assert_eq!(playbook.execution_count, 2);
        assert!((playbook.avg_execution_time_ms - 1600.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_active_without_steps() {
        let playbook = Playbook::new("Empty", EventType::AlertCreated);
        assert!(playbook.validate().is_err());

        let inactive = Playbook::new("Empty", EventType::AlertCreated).inactive();
        assert!(inactive.validate().is_ok());
    }

    #[test]
    fn test_applies_to_organization() {
        let org = Uuid::new_v4();
        let global = Playbook::new("Global", EventType::AlertCreated);
        let scoped = Playbook::new("Scoped", EventType::AlertCreated).with_organization(org);

        assert!(global.applies_to(Uuid::new_v4()));
        assert!(scoped.applies_to(org));
        assert!(!scoped.applies_to(Uuid::new_v4()));
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let yaml = r#"
name: Block brute force sources
triggerType: alert.created
triggerConditions:
  field: severity
  op: eq
  value: critical
steps:
  - actionName: block_ip
    parameters:
      ip: "{{data.source_ip}}"
"#;
        let playbook: Playbook = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(playbook.trigger_type, EventType::AlertCreated);
        assert!(playbook.is_active);
        assert_eq!(playbook.steps.len(), 1);
        assert_eq!(
            playbook.steps[0].parameter_template,
            json!({"ip": "{{data.source_ip}}"})
        );
        assert!(playbook.trigger_conditions.is_some());
    }
}
