use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actions::ActionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Manual,
    Alert,
    Incident,
    Schedule,
}

impl TriggerSource {
    /// Maps an event's entity type onto the source recorded on the execution.
    /// Entity types with no dedicated source (agents, IoCs) count as alerts.
    pub fn from_entity_type(entity_type: &str) -> Self {
        match entity_type.to_ascii_lowercase().as_str() {
            "incident" => TriggerSource::Incident,
            "schedule" => TriggerSource::Schedule,
            "manual" => TriggerSource::Manual,
            _ => TriggerSource::Alert,
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerSource::Manual => write!(f, "manual"),
            TriggerSource::Alert => write!(f, "alert"),
            TriggerSource::Incident => write!(f, "incident"),
            TriggerSource::Schedule => write!(f, "schedule"),
        }
    }
}

/// Outcome of one playbook step, in declared order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_index: usize,
    pub action_name: String,
    #[serde(flatten)]
    pub result: ActionResult,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        self.result.success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybookExecution {
    pub id: Uuid,
    pub playbook_id: Uuid,
    pub organization_id: Uuid,
    pub status: ExecutionStatus,
    pub trigger_source: TriggerSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_entity_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlaybookExecution {
    pub fn start(playbook_id: Uuid, organization_id: Uuid, trigger_source: TriggerSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            playbook_id,
            organization_id,
            status: ExecutionStatus::Running,
            trigger_source,
            triggered_by: None,
            trigger_entity_id: None,
            started_at: Utc::now(),
            completed_at: None,
            step_results: Vec::new(),
            error: None,
        }
    }

    pub fn triggered_by(mut self, user_id: Option<Uuid>) -> Self {
        self.triggered_by = user_id;
        self
    }

    pub fn for_entity(mut self, entity_id: Option<String>) -> Self {
        self.trigger_entity_id = entity_id;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status != ExecutionStatus::Running
    }

    pub fn record_step(&mut self, step: StepResult) {
        if !self.is_terminal() {
            self.step_results.push(step);
        }
    }

    pub fn failed_steps(&self) -> usize {
        self.step_results.iter().filter(|s| !s.succeeded()).count()
    }

    /// Leave `running`: failed if any step failed, completed otherwise.
    pub fn finish(&mut self) {
        if self.is_terminal() {
            return;
        }

        let failed = self.failed_steps();
        if failed > 0 {
            self.status = ExecutionStatus::Failed;
            if self.error.is_none() {
                self.error = Some(format!(
                    "{} of {} steps failed",
                    failed,
                    self.step_results.len()
                ));
            }
        } else {
            self.status = ExecutionStatus::Completed;
        }
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}
