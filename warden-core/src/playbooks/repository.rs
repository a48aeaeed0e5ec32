use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{WardenError, WardenResult};
use crate::models::{Playbook, PlaybookExecution};

/// Storage seen by the trigger engine and executor. The relational layer
/// behind it lives outside this crate.
#[async_trait]
pub trait PlaybookRepository: Send + Sync {
    async fn get_playbook(&self, id: Uuid) -> WardenResult<Option<Playbook>>;

    async fn list_active_playbooks(&self) -> WardenResult<Vec<Playbook>>;

    async fn create_execution(&self, execution: &PlaybookExecution) -> WardenResult<()>;

    async fn update_execution(&self, execution: &PlaybookExecution) -> WardenResult<()>;

    async fn increment_execution_stats(&self, playbook_id: Uuid, duration_ms: u64) -> WardenResult<()>;
}

/// Process-local repository used by the CLI and tests.
#[derive(Default)]
pub struct InMemoryPlaybookRepository {
    playbooks: RwLock<HashMap<Uuid, Playbook>>,
    executions: RwLock<HashMap<Uuid, PlaybookExecution>>,
}

impl InMemoryPlaybookRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_playbooks(playbooks: impl IntoIterator<Item = Playbook>) -> Self {
        let map = playbooks.into_iter().map(|p| (p.id, p)).collect();
        Self {
            playbooks: RwLock::new(map),
            executions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn upsert_playbook(&self, playbook: Playbook) {
        self.playbooks.write().await.insert(playbook.id, playbook);
    }

    pub async fn remove_playbook(&self, id: Uuid) -> bool {
        self.playbooks.write().await.remove(&id).is_some()
    }

    pub async fn set_active(&self, id: Uuid, active: bool) -> WardenResult<()> {
        let mut playbooks = self.playbooks.write().await;
        let playbook = playbooks
            .get_mut(&id)
            .ok_or_else(|| WardenError::PlaybookNotFound(id.to_string()))?;
        playbook.is_active = active;
        Ok(())
    }

    pub async fn get_execution(&self, id: Uuid) -> Option<PlaybookExecution> {
        self.executions.read().await.get(&id).cloned()
    }

    /// Every stored execution, oldest first.
    pub async fn executions(&self) -> Vec<PlaybookExecution> {
        let mut all: Vec<PlaybookExecution> = self.executions.read().await.values().cloned().collect();
        all.sort_by_key(|e| e.started_at);
        all
    }

    pub async fn executions_for(&self, playbook_id: Uuid) -> Vec<PlaybookExecution> {
        self.executions()
            .await
            .into_iter()
            .filter(|e| e.playbook_id == playbook_id)
            .collect()
    }
}

#[async_trait]
impl PlaybookRepository for InMemoryPlaybookRepository {
    async fn get_playbook(&self, id: Uuid) -> WardenResult<Option<Playbook>> {
        Ok(self.playbooks.read().await.get(&id).cloned())
    }

    async fn list_active_playbooks(&self) -> WardenResult<Vec<Playbook>> {
        let mut active: Vec<Playbook> = self
            .playbooks
            .read()
            .await
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(active)
    }

    async fn create_execution(&self, execution: &PlaybookExecution) -> WardenResult<()> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            return Err(WardenError::Repository(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &PlaybookExecution) -> WardenResult<()> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&execution.id) {
            Some(stored) => {
                *stored = execution.clone();
                Ok(())
            }
            None => Err(WardenError::ExecutionNotFound(execution.id.to_string())),
        }
    }

    async fn increment_execution_stats(&self, playbook_id: Uuid, duration_ms: u64) -> WardenResult<()> {
        let mut playbooks = self.playbooks.write().await;
        let playbook = playbooks
            .get_mut(&playbook_id)
            .ok_or_else(|| WardenError::PlaybookNotFound(playbook_id.to_string()))?;
        playbook.record_execution(duration_ms);
        debug!(
            playbook_id = %playbook_id,
            execution_count = playbook.execution_count,
            avg_execution_time_ms = playbook.avg_execution_time_ms,
            "Updated playbook statistics"
        );
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlaybookFile {
    List(Vec<Playbook>),
    Wrapped { playbooks: Vec<Playbook> },
}

/// Read playbook definitions from a YAML or JSON file. The file may hold a
/// bare list or an object with a `playbooks` list.
pub fn load_playbooks_file(path: impl AsRef<Path>) -> WardenResult<Vec<Playbook>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    parse_playbooks(&content, path.extension().and_then(|e| e.to_str()))
}

pub fn parse_playbooks(content: &str, extension: Option<&str>) -> WardenResult<Vec<Playbook>> {
    let file: PlaybookFile = match extension {
        Some(ext) if ext.eq_ignore_ascii_case("json") => serde_json::from_str(content)?,
        _ => serde_yaml::from_str(content)?,
    };

    Ok(match file {
        PlaybookFile::List(playbooks) => playbooks,
        PlaybookFile::Wrapped { playbooks } => playbooks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventType, PlaybookStep, TriggerSource};
    use serde_json::json;
    use std::io::Write;

    fn playbook(name: &str) -> Playbook {
        Playbook::new(name, EventType::AlertCreated)
            .with_step(PlaybookStep::new("send_slack", json!({})))
    }

    #[tokio::test]
    async fn test_lists_only_active_playbooks() {
        let repo = InMemoryPlaybookRepository::with_playbooks([
            playbook("b-active"),
            playbook("a-active"),
            playbook("inactive").inactive(),
        ]);

        let active = repo.list_active_playbooks().await.unwrap();
        let names: Vec<&str> = active.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a-active", "b-active"]);
    }

    #[tokio::test]
    async fn test_execution_lifecycle() {
        let repo = InMemoryPlaybookRepository::new();
        let mut execution = PlaybookExecution::start(Uuid::new_v4(), Uuid::new_v4(), TriggerSource::Alert);

        repo.create_execution(&execution).await.unwrap();
        assert!(repo.create_execution(&execution).await.is_err());

        execution.finish();
        repo.update_execution(&execution).await.unwrap();
        assert!(repo.get_execution(execution.id).await.unwrap().is_terminal());

        let stranger = PlaybookExecution::start(Uuid::new_v4(), Uuid::new_v4(), TriggerSource::Manual);
        assert!(matches!(
            repo.update_execution(&stranger).await,
            Err(WardenError::ExecutionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_increment_stats_uses_moving_average() {
        let pb = playbook("stats");
        let id = pb.id;
        let repo = InMemoryPlaybookRepository::with_playbooks([pb]);

        repo.increment_execution_stats(id, 1000).await.unwrap();
        repo.increment_execution_stats(id, 3000).await.unwrap();

        let stored = repo.get_playbook(id).await.unwrap().unwrap();
        assert_eq!(stored.execution_count, 2);
        assert!((stored.avg_execution_time_ms - 1600.0).abs() < 1e-9);

        assert!(repo.increment_execution_stats(Uuid::new_v4(), 5).await.is_err());
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
playbooks:
  - name: Critical alert response
    triggerType: alert.created
    triggerConditions:
      field: severity
      op: eq
      value: critical
    steps:
      - actionName: send_slack
        parameters:
          webhook_url: https://hooks.slack.test/x
          title: "{{{{data.title}}}}"
          message: New critical alert
"#
        )
        .unwrap();

        let playbooks = load_playbooks_file(file.path()).unwrap();
        assert_eq!(playbooks.len(), 1);
        assert_eq!(playbooks[0].trigger_type, EventType::AlertCreated);
        assert!(playbooks[0].trigger_conditions.is_some());
        assert_eq!(playbooks[0].steps[0].parameter_template["title"], "{{data.title}}");
    }

    #[test]
    fn test_load_json_list() {
        let content = json!([
            {"name": "One", "triggerType": "incident.correlated", "steps": [{"actionName": "create_ticket"}]}
        ])
        .to_string();

        let playbooks = parse_playbooks(&content, Some("json")).unwrap();
        assert_eq!(playbooks[0].trigger_type, EventType::IncidentCorrelated);
        assert!(playbooks[0].is_active);
    }

    #[test]
    fn test_load_rejects_garbage() {
        assert!(parse_playbooks("name: [unclosed", Some("yaml")).is_err());
        assert!(load_playbooks_file("/nonexistent/playbooks.yaml").is_err());
    }
}
