use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, info, warn};

use crate::error::{WardenError, WardenResult};
use crate::events::EventHandler;
use crate::models::{Event, Playbook};
use crate::playbooks::{ExecutionRequest, PlaybookRepository};

/// Matches published events against the cached set of active playbooks and
/// queues an execution for every match.
pub struct TriggerEngine {
    repository: Arc<dyn PlaybookRepository>,
    queue: mpsc::Sender<ExecutionRequest>,
    playbooks: RwLock<Vec<Arc<Playbook>>>,
    refresh_interval_ms: AtomicU64,
    invalidated: Notify,
}

impl TriggerEngine {
    pub fn new(repository: Arc<dyn PlaybookRepository>, queue: mpsc::Sender<ExecutionRequest>) -> Self {
        Self {
            repository,
            queue,
            playbooks: RwLock::new(Vec::new()),
            refresh_interval_ms: AtomicU64::new(60_000),
            invalidated: Notify::new(),
        }
    }

    pub fn with_refresh_interval(self, interval: Duration) -> Self {
        self.set_refresh_interval(interval);
        self
    }

    pub fn set_refresh_interval(&self, interval: Duration) {
        self.refresh_interval_ms
            .store(interval.as_millis().max(1) as u64, Ordering::Relaxed);
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.load(Ordering::Relaxed))
    }

    /// Reload active playbooks from the repository. On error the previous
    /// cache is kept.
    pub async fn refresh(&self) -> WardenResult<usize> {
        let active: Vec<Arc<Playbook>> = self
            .repository
            .list_active_playbooks()
            .await?
            .into_iter()
            .filter(|p| p.is_active)
            .map(Arc::new)
            .collect();

        for playbook in &active {
            if let Err(e) = playbook.validate() {
                warn!(playbook_id = %playbook.id, error = %e, "Active playbook is not runnable as defined");
            }
        }

        let count = active.len();
        *self.write_cache() = active;
        debug!(playbooks = count, "Refreshed active playbooks");
        Ok(count)
    }

    /// Ask the refresh loop to reload now instead of waiting for the interval.
    pub fn invalidate(&self) {
        self.invalidated.notify_one();
    }

    pub fn cached_playbooks(&self) -> Vec<Arc<Playbook>> {
        self.read_cache().clone()
    }

    /// Playbooks that should fire for `event`. A condition that cannot be
    /// evaluated is logged and counts as no match for that playbook only.
    pub fn matching(&self, event: &Event) -> Vec<Arc<Playbook>> {
        let data = serde_json::Value::Object(event.data.clone());
        self.read_cache()
            .iter()
            .filter(|p| p.is_active && p.trigger_type == event.event_type)
            .filter(|p| p.applies_to(event.organization_id))
            .filter(|p| match &p.trigger_conditions {
                None => true,
                Some(condition) => match condition.evaluate(&data) {
                    Ok(matched) => matched,
                    Err(e) => {
                        warn!(
                            playbook_id = %p.id,
                            event_type = %event.event_type,
                            entity_id = %event.entity_id,
                            error = %e,
                            "Trigger condition could not be evaluated, treating as no match"
                        );
                        false
                    }
                },
            })
            .cloned()
            .collect()
    }

    /// Queue an execution for every matching playbook. Never blocks; a full
    /// queue drops the request with an error log. Returns how many were queued.
    pub fn on_event(&self, event: &Event) -> usize {
        let mut queued = 0;
        for playbook in self.matching(event) {
            let playbook_id = playbook.id;
            match self.queue.try_send(ExecutionRequest::from_event(playbook, event)) {
                Ok(()) => {
                    queued += 1;
                    debug!(
                        playbook_id = %playbook_id,
                        event_type = %event.event_type,
                        entity_id = %event.entity_id,
                        "Queued playbook execution"
                    );
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    error!(
                        playbook_id = %playbook_id,
                        event_type = %event.event_type,
                        "Execution queue is full, dropping request"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    error!(playbook_id = %playbook_id, "{}", WardenError::ExecutionQueueClosed);
                }
            }
        }
        queued
    }

    /// Refresh on every interval tick or invalidation until `shutdown` flips.
    pub async fn run_refresh_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.refresh_interval().as_millis() as u64, "Playbook refresh loop started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.refresh_interval()) => {}
                _ = self.invalidated.notified() => {
                    debug!("Playbook cache invalidated");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.refresh().await {
                error!(error_code = e.error_code(), "Failed to refresh playbooks: {}", e);
            }
        }
        info!("Playbook refresh loop stopped");
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Playbook>>> {
        match self.playbooks.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_cache(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<Playbook>>> {
        match self.playbooks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl EventHandler for TriggerEngine {
    fn name(&self) -> &str {
        "trigger_engine"
    }

    fn handle(&self, event: &Event) -> WardenResult<()> {
        self.on_event(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventType, PlaybookStep, TriggerSource};
    use crate::playbooks::InMemoryPlaybookRepository;
    use crate::triggers::{ConditionOp, TriggerCondition};
    use serde_json::json;
    use uuid::Uuid;

    fn critical_playbook(name: &str) -> Playbook {
        Playbook::new(name, EventType::AlertCreated)
            .with_condition(TriggerCondition::eq("severity", "critical"))
            .with_step(PlaybookStep::new("send_slack", json!({})))
    }

    async fn engine(
        playbooks: Vec<Playbook>,
        capacity: usize,
    ) -> (Arc<TriggerEngine>, mpsc::Receiver<ExecutionRequest>, Arc<InMemoryPlaybookRepository>) {
        let repository = Arc::new(InMemoryPlaybookRepository::with_playbooks(playbooks));
        let (tx, rx) = mpsc::channel(capacity);
        let engine = Arc::new(TriggerEngine::new(repository.clone(), tx));
        engine.refresh().await.unwrap();
        (engine, rx, repository)
    }

    fn critical_alert(org: Uuid) -> Event {
        Event::alert_created("alert-9", org).with_data("severity", "critical")
    }

    #[tokio::test]
    async fn test_matching_active_playbook_only() {
        let active = critical_playbook("Active");
        let inactive = critical_playbook("Inactive twin").inactive();
        let (engine, mut rx, _) = engine(vec![active.clone(), inactive], 8).await;

        assert_eq!(engine.on_event(&critical_alert(Uuid::new_v4())), 1);

        let request = rx.try_recv().unwrap();
        assert_eq!(request.playbook.id, active.id);
        assert_eq!(request.trigger_entity_id.as_deref(), Some("alert-9"));
        assert_eq!(request.trigger_source, TriggerSource::Alert);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_condition_and_type_filtering() {
        let (engine, _rx, _) = engine(vec![critical_playbook("Critical only")], 8).await;
        let org = Uuid::new_v4();

        let low = Event::alert_created("a", org).with_data("severity", "low");
        assert!(engine.matching(&low).is_empty());

        let incident = Event::incident_correlated("i", org).with_data("severity", "critical");
        assert!(engine.matching(&incident).is_empty());
    }

    #[tokio::test]
    async fn test_evaluation_error_is_isolated() {
        let broken = Playbook::new("Broken", EventType::AlertCreated)
            .with_condition(TriggerCondition::field("severity", ConditionOp::Gt, json!(3)))
            .with_step(PlaybookStep::new("send_slack", json!({})));
        let (engine, _rx, _) = engine(vec![broken, critical_playbook("Healthy")], 8).await;

        let matched = engine.matching(&critical_alert(Uuid::new_v4()));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "Healthy");
    }

    #[tokio::test]
    async fn test_organization_scoping() {
        let org = Uuid::new_v4();
        let scoped = critical_playbook("Scoped").with_organization(org);
        let (engine, _rx, _) = engine(vec![scoped], 8).await;

        assert_eq!(engine.matching(&critical_alert(org)).len(), 1);
        assert!(engine.matching(&critical_alert(Uuid::new_v4())).is_empty());
    }

    #[tokio::test]
    async fn test_no_condition_matches_every_event_of_type() {
        let open = Playbook::new("Any heartbeat", EventType::AgentHeartbeat)
            .with_step(PlaybookStep::new("lookup_ioc", json!({})));
        let (engine, _rx, _) = engine(vec![open], 8).await;

        assert_eq!(engine.matching(&Event::agent_heartbeat("agt", Uuid::new_v4())).len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (engine, _rx, _) = engine(vec![critical_playbook("A")], 1).await;
        let org = Uuid::new_v4();

        assert_eq!(engine.on_event(&critical_alert(org)), 1);
        assert_eq!(engine.on_event(&critical_alert(org)), 0);
    }

    #[tokio::test]
    async fn test_refresh_picks_up_changes() {
        let playbook = critical_playbook("Toggle");
        let (engine, _rx, repository) = engine(vec![playbook.clone()], 8).await;
        assert_eq!(engine.cached_playbooks().len(), 1);

        repository.set_active(playbook.id, false).await.unwrap();
        assert_eq!(engine.refresh().await.unwrap(), 0);
        assert!(engine.matching(&critical_alert(Uuid::new_v4())).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_loop_reacts_to_invalidation() {
        let repository = Arc::new(InMemoryPlaybookRepository::new());
        let (tx, _rx) = mpsc::channel(1);
        let engine = Arc::new(
            TriggerEngine::new(repository.clone(), tx).with_refresh_interval(Duration::from_secs(3600)),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(engine.clone().run_refresh_loop(shutdown_rx));

        repository.upsert_playbook(critical_playbook("Late")).await;
        engine.invalidate();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.cached_playbooks().len(), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
