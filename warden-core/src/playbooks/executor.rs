use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::actions::{ActionCategory, ActionContext, ActionRegistry, Actor};
use crate::broadcast::{BroadcastSink, NoopBroadcaster, EXECUTIONS_CHANNEL};
use crate::error::{WardenError, WardenResult};
use crate::models::{Event, Playbook, PlaybookExecution, StepResult, TriggerSource};
use crate::triggers::TemplateScope;

use super::repository::PlaybookRepository;

/// A request to run one playbook, produced by the trigger engine or by a
/// manual invocation.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub playbook: Arc<Playbook>,
    pub organization_id: Uuid,
    pub trigger_source: TriggerSource,
    pub trigger_entity_id: Option<String>,
    pub actor: Actor,
    pub event: Option<Event>,
    pub data: Map<String, Value>,
}

impl ExecutionRequest {
    pub fn from_event(playbook: Arc<Playbook>, event: &Event) -> Self {
        Self {
            playbook,
            organization_id: event.organization_id,
            trigger_source: TriggerSource::from_entity_type(&event.entity_type),
            trigger_entity_id: Some(event.entity_id.clone()),
            actor: Actor::System,
            event: Some(event.clone()),
            data: event.data.clone(),
        }
    }

    pub fn manual(
        playbook: Arc<Playbook>,
        organization_id: Uuid,
        actor: Actor,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            playbook,
            organization_id,
            trigger_source: TriggerSource::Manual,
            trigger_entity_id: None,
            actor,
            event: None,
            data,
        }
    }

    pub fn with_source(mut self, source: TriggerSource) -> Self {
        self.trigger_source = source;
        self
    }
}

type InFlightKey = (Uuid, String);

/// Removes its key from the in-flight set when the run ends.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<InFlightKey>>,
    key: InFlightKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = match self.set.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        set.remove(&self.key);
    }
}

/// Runs playbooks step by step and owns each execution record while it is
/// running.
pub struct PlaybookExecutor {
    registry: Arc<ActionRegistry>,
    repository: Arc<dyn PlaybookRepository>,
    broadcaster: Arc<dyn BroadcastSink>,
    dedupe_in_flight: AtomicBool,
    in_flight: Mutex<HashSet<InFlightKey>>,
}

impl PlaybookExecutor {
    pub fn new(registry: Arc<ActionRegistry>, repository: Arc<dyn PlaybookRepository>) -> Self {
        Self {
            registry,
            repository,
            broadcaster: Arc::new(NoopBroadcaster),
            dedupe_in_flight: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn BroadcastSink>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn with_dedupe_in_flight(self, enabled: bool) -> Self {
        self.set_dedupe_in_flight(enabled);
        self
    }

    pub fn set_dedupe_in_flight(&self, enabled: bool) {
        self.dedupe_in_flight.store(enabled, Ordering::Relaxed);
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// Claim the playbook + entity pair. `None` means an identical run is
    /// already in flight and this request should be dropped.
    fn claim(&self, request: &ExecutionRequest) -> Option<Option<InFlightGuard<'_>>> {
        if !self.dedupe_in_flight.load(Ordering::Relaxed) {
            return Some(None);
        }
        let Some(entity) = request.trigger_entity_id.clone() else {
            return Some(None);
        };

        let key = (request.playbook.id, entity);
        let mut set = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !set.insert(key.clone()) {
            return None;
        }
        Some(Some(InFlightGuard {
            set: &self.in_flight,
            key,
        }))
    }

    /// Run one request to completion.
    ///
    /// Returns `Ok(None)` when the in-flight guard dropped the request. Errors
    /// only when the execution record could not be created; once a record
    /// exists every failure is captured on it.
    pub async fn run(&self, request: ExecutionRequest) -> WardenResult<Option<PlaybookExecution>> {
        let Some(_guard) = self.claim(&request) else {
            debug!(
                playbook_id = %request.playbook.id,
                trigger_entity_id = ?request.trigger_entity_id,
                "Playbook already running for this entity, skipping"
            );
            return Ok(None);
        };

        let playbook = request.playbook.clone();
        let started = Instant::now();

        let mut execution = PlaybookExecution::start(
            playbook.id,
            request.organization_id,
            request.trigger_source,
        )
        .triggered_by(request.actor.user_id())
        .for_entity(request.trigger_entity_id.clone());

        self.repository.create_execution(&execution).await?;

        info!(
            playbook_id = %playbook.id,
            execution_id = %execution.id,
            playbook = %playbook.name,
            trigger_source = %execution.trigger_source,
            "Playbook execution started"
        );
        self.announce("started", &playbook, &execution);

        let ctx = ActionContext::system(request.organization_id)
            .with_actor(request.actor)
            .for_execution(execution.id, playbook.id)
            .with_trigger_source(request.trigger_source);

        if playbook.steps.is_empty() {
            execution.fail("playbook has no steps");
        } else {
            self.run_steps(&playbook, &request, &ctx, &mut execution).await;
        }
        execution.finish();

        if let Err(e) = self.repository.update_execution(&execution).await {
            error!(execution_id = %execution.id, error = %e, "Failed to persist final execution state");
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        if let Err(e) = self
            .repository
            .increment_execution_stats(playbook.id, duration_ms)
            .await
        {
            warn!(playbook_id = %playbook.id, error = %e, "Failed to update playbook statistics");
        }

        info!(
            playbook_id = %playbook.id,
            execution_id = %execution.id,
            status = %execution.status,
            steps = execution.step_results.len(),
            failed_steps = execution.failed_steps(),
            duration_ms = duration_ms,
            "Playbook execution finished"
        );
        self.announce("finished", &playbook, &execution);

        Ok(Some(execution))
    }

    async fn run_steps(
        &self,
        playbook: &Playbook,
        request: &ExecutionRequest,
        ctx: &ActionContext,
        execution: &mut PlaybookExecution,
    ) {
        let mut scope = TemplateScope::new(request.event.as_ref(), &request.data, ctx);

        for (index, step) in playbook.steps.iter().enumerate() {
            let params = scope.render(&step.parameter_template);
            let started_at = Utc::now();
            let clock = Instant::now();

            debug!(
                execution_id = %execution.id,
                step = index,
                action = %step.action_name,
                "Running playbook step"
            );
            let result = self.registry.dispatch(&step.action_name, params, ctx).await;

            let abort = !result.success
                && result.abort_playbook
                && self.registry.category_of(&step.action_name) == Some(ActionCategory::Remediation);

            if !result.success {
                warn!(
                    execution_id = %execution.id,
                    step = index,
                    action = %step.action_name,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    abort = abort,
                    "Playbook step failed"
                );
            }

            let step_result = StepResult {
                step_index: index,
                action_name: step.action_name.clone(),
                result,
                started_at,
                duration_ms: clock.elapsed().as_millis() as u64,
            };
            scope.push_step(&step_result);
            execution.record_step(step_result);

            if let Err(e) = self.repository.update_execution(execution).await {
                warn!(execution_id = %execution.id, error = %e, "Failed to persist step result");
            }

            if abort {
                execution.fail(format!(
                    "step {} ('{}') failed and aborted the playbook",
                    index,
                    step.label()
                ));
                break;
            }
        }
    }

    /// Load a playbook and run it on behalf of `actor`.
    pub async fn run_manual(
        &self,
        playbook_id: Uuid,
        organization_id: Uuid,
        actor: Actor,
        data: Map<String, Value>,
    ) -> WardenResult<PlaybookExecution> {
        let playbook = self
            .repository
            .get_playbook(playbook_id)
            .await?
            .ok_or_else(|| WardenError::PlaybookNotFound(playbook_id.to_string()))?;

        if !playbook.applies_to(organization_id) {
            return Err(WardenError::PlaybookNotFound(playbook_id.to_string()));
        }

        let request = ExecutionRequest::manual(Arc::new(playbook), organization_id, actor, data);
        self.run(request)
            .await?
            .ok_or_else(|| WardenError::Internal("manual run was deduplicated".to_string()))
    }

    /// Consume queued requests, each on its own task, until `shutdown`
    /// flips. Requests already queued at shutdown still run; the loop returns
    /// once every spawned run has finished.
    pub async fn run_worker(
        self: Arc<Self>,
        mut queue: mpsc::Receiver<ExecutionRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tasks = JoinSet::new();
        let mut closing = *shutdown.borrow();
        if closing {
            queue.close();
        }

        info!("Playbook executor worker started");
        loop {
            tokio::select! {
                request = queue.recv() => match request {
                    Some(request) => {
                        let executor = self.clone();
                        tasks.spawn(async move { executor.run_logged(request).await });
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Playbook execution task panicked");
                    }
                }
                changed = shutdown.changed(), if !closing => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Executor worker draining queue");
                        closing = true;
                        queue.close();
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Playbook execution task panicked");
            }
        }
        info!("Playbook executor worker stopped");
    }

    async fn run_logged(&self, request: ExecutionRequest) {
        let playbook_id = request.playbook.id;
        if let Err(e) = self.run(request).await {
            error!(
                playbook_id = %playbook_id,
                error_code = e.error_code(),
                "Could not start playbook execution: {}",
                e
            );
        }
    }

    fn announce(&self, phase: &str, playbook: &Playbook, execution: &PlaybookExecution) {
        let payload = json!({
            "event": format!("execution.{}", phase),
            "executionId": execution.id.to_string(),
            "playbookId": playbook.id.to_string(),
            "playbookName": playbook.name,
            "organizationId": execution.organization_id.to_string(),
            "status": execution.status,
            "triggerSource": execution.trigger_source,
            "triggerEntityId": execution.trigger_entity_id,
            "steps": execution.step_results.len(),
            "failedSteps": execution.failed_steps(),
            "durationMs": execution.duration_ms(),
            "error": execution.error,
        });
        if let Err(e) = self.broadcaster.broadcast(EXECUTIONS_CHANNEL, payload) {
            warn!(execution_id = %execution.id, error = %e, "Failed to broadcast execution update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, ActionResult, UserRole};
    use crate::broadcast::ChannelBroadcaster;
    use crate::models::{EventType, ExecutionStatus, PlaybookStep};
    use crate::playbooks::InMemoryPlaybookRepository;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Records each call's params; fails when `fail` is set in them.
    struct ScriptedAction {
        name: &'static str,
        category: ActionCategory,
        calls: Arc<Mutex<Vec<Value>>>,
    }

    #[async_trait]
    impl Action for ScriptedAction {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "scripted test action"
        }

        fn category(&self) -> ActionCategory {
            self.category
        }

        fn parameter_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, params: Value, _ctx: &ActionContext) -> WardenResult<ActionResult> {
            self.calls.lock().unwrap().push(params.clone());
            if params["fail"].as_bool().unwrap_or(false) {
                return Ok(ActionResult::failure("scripted failure")
                    .abort_playbook(params["abort_on_failure"].as_bool().unwrap_or(false)));
            }
            if let Some(delay) = params["sleep_ms"].as_u64() {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Ok(ActionResult::ok("ok").with_field("echo", params))
        }
    }

    struct Harness {
        executor: Arc<PlaybookExecutor>,
        repository: Arc<InMemoryPlaybookRepository>,
        calls: Arc<Mutex<Vec<Value>>>,
    }

    fn harness(playbooks: Vec<Playbook>) -> Harness {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ActionRegistry::new();
        registry
            .register(Arc::new(ScriptedAction {
                name: "notify",
                category: ActionCategory::Notification,
                calls: calls.clone(),
            }))
            .unwrap();
        registry
            .register(Arc::new(ScriptedAction {
                name: "contain",
                category: ActionCategory::Remediation,
                calls: calls.clone(),
            }))
            .unwrap();

        let repository = Arc::new(InMemoryPlaybookRepository::with_playbooks(playbooks));
        let executor = Arc::new(PlaybookExecutor::new(Arc::new(registry), repository.clone()));
        Harness {
            executor,
            repository,
            calls,
        }
    }

    fn event() -> Event {
        Event::alert_created("alert-1", Uuid::new_v4())
            .with_data("severity", "critical")
            .with_data("host", "ws-42")
    }

    fn request(playbook: &Playbook) -> ExecutionRequest {
        ExecutionRequest::from_event(Arc::new(playbook.clone()), &event())
    }

    #[tokio::test]
    async fn test_failed_step_does_not_stop_later_steps() {
        let playbook = Playbook::new("three", EventType::AlertCreated)
            .with_step(PlaybookStep::new("notify", json!({"n": 1})))
            .with_step(PlaybookStep::new("notify", json!({"n": 2, "fail": true})))
            .with_step(PlaybookStep::new("notify", json!({"n": 3})));
        let h = harness(vec![playbook.clone()]);

        let execution = h.executor.run(request(&playbook)).await.unwrap().unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.step_results.len(), 3);
        assert!(execution.step_results[2].succeeded());
        assert_eq!(h.calls.lock().unwrap().len(), 3);

        let stored = h.repository.get_execution(execution.id).await.unwrap();
        assert_eq!(stored, execution);
    }

    #[tokio::test]
    async fn test_remediation_abort_stops_execution() {
        let playbook = Playbook::new("abort", EventType::AlertCreated)
            .with_step(PlaybookStep::new("contain", json!({"fail": true, "abort_on_failure": true})))
            .with_step(PlaybookStep::new("notify", json!({})));
        let h = harness(vec![playbook.clone()]);

        let execution = h.executor.run(request(&playbook)).await.unwrap().unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.step_results.len(), 1);
        assert!(execution.error.unwrap().contains("aborted"));
    }

    #[tokio::test]
    async fn test_abort_flag_ignored_outside_remediation() {
        let playbook = Playbook::new("no-abort", EventType::AlertCreated)
            .with_step(PlaybookStep::new("notify", json!({"fail": true, "abort_on_failure": true})))
            .with_step(PlaybookStep::new("notify", json!({})));
        let h = harness(vec![playbook.clone()]);

        let execution = h.executor.run(request(&playbook)).await.unwrap().unwrap();
        assert_eq!(execution.step_results.len(), 2);
        assert_eq!(execution.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let playbook = Playbook::new("ok", EventType::AlertCreated)
            .with_step(PlaybookStep::new("notify", json!({"host": "{{data.host}}"})))
            .with_step(PlaybookStep::new(
                "contain",
                json!({"previous": "{{steps.0.data.echo.host}}", "source": "{{context.triggerSource}}"}),
            ));
        let h = harness(vec![playbook.clone()]);

        let execution = h.executor.run(request(&playbook)).await.unwrap().unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.error.is_none());
        assert_eq!(execution.trigger_source, TriggerSource::Alert);
        assert_eq!(execution.trigger_entity_id.as_deref(), Some("alert-1"));

        let calls = h.calls.lock().unwrap();
        assert_eq!(calls[0]["host"], "ws-42");
        assert_eq!(calls[1]["previous"], "ws-42");
        assert_eq!(calls[1]["source"], "alert");
    }

    #[tokio::test]
    async fn test_unknown_action_is_recorded_as_failed_step() {
        let playbook = Playbook::new("typo", EventType::AlertCreated)
            .with_step(PlaybookStep::new("notfy", json!({})))
            .with_step(PlaybookStep::new("notify", json!({})));
        let h = harness(vec![playbook.clone()]);

        let execution = h.executor.run(request(&playbook)).await.unwrap().unwrap();
        assert_eq!(execution.step_results[0].result.error_kind.as_deref(), Some("action_not_found"));
        assert!(execution.step_results[1].succeeded());
    }

    #[tokio::test]
    async fn test_empty_playbook_fails() {
        let playbook = Playbook::new("empty", EventType::AlertCreated);
        let h = harness(vec![playbook.clone()]);

        let execution = h.executor.run(request(&playbook)).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("playbook has no steps"));
    }

    #[tokio::test]
    async fn test_stats_updated_after_run() {
        let playbook = Playbook::new("stats", EventType::AlertCreated)
            .with_step(PlaybookStep::new("notify", json!({})));
        let h = harness(vec![playbook.clone()]);

        h.executor.run(request(&playbook)).await.unwrap();
        h.executor.run(request(&playbook)).await.unwrap();

        let stored = h.repository.get_playbook(playbook.id).await.unwrap().unwrap();
        assert_eq!(stored.execution_count, 2);
    }

    #[tokio::test]
    async fn test_run_manual() {
        let org = Uuid::new_v4();
        let user = Uuid::new_v4();
        let playbook = Playbook::new("manual", EventType::AlertCreated)
            .with_organization(org)
            .with_step(PlaybookStep::new("notify", json!({"note": "{{data.note}}"})));
        let h = harness(vec![playbook.clone()]);

        let mut data = Map::new();
        data.insert("note".to_string(), json!("by hand"));
        let actor = Actor::User {
            id: user,
            role: UserRole::Analyst,
        };

        let execution = h
            .executor
            .run_manual(playbook.id, org, actor, data.clone())
            .await
            .unwrap();
        assert_eq!(execution.trigger_source, TriggerSource::Manual);
        assert_eq!(execution.triggered_by, Some(user));
        assert_eq!(h.calls.lock().unwrap()[0]["note"], "by hand");

        let other_org = h.executor.run_manual(playbook.id, Uuid::new_v4(), actor, data.clone()).await;
        assert!(matches!(other_org, Err(WardenError::PlaybookNotFound(_))));

        let missing = h.executor.run_manual(Uuid::new_v4(), org, actor, data).await;
        assert!(matches!(missing, Err(WardenError::PlaybookNotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_runs_produce_independent_records() {
        let playbook = Playbook::new("burst", EventType::AlertCreated)
            .with_step(PlaybookStep::new("notify", json!({"sleep_ms": 20})));
        let h = harness(vec![playbook.clone()]);

        let (a, b) = tokio::join!(h.executor.run(request(&playbook)), h.executor.run(request(&playbook)));
        let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());
        assert_ne!(a.id, b.id);
        assert_eq!(h.repository.executions_for(playbook.id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_dedupe_in_flight_skips_duplicate() {
        let playbook = Playbook::new("burst", EventType::AlertCreated)
            .with_step(PlaybookStep::new("notify", json!({"sleep_ms": 50})));
        let h = harness(vec![playbook.clone()]);
        h.executor.set_dedupe_in_flight(true);

        let (a, b) = tokio::join!(h.executor.run(request(&playbook)), h.executor.run(request(&playbook)));
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| o.is_some()).count(), 1);

        // Guard is released once the run ends.
        assert!(h.executor.run(request(&playbook)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_worker_drains_queue_on_shutdown() {
        let playbook = Playbook::new("queued", EventType::AlertCreated)
            .with_step(PlaybookStep::new("notify", json!({})));
        let h = harness(vec![playbook.clone()]);

        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        for _ in 0..3 {
            tx.send(request(&playbook)).await.unwrap();
        }

        let worker = tokio::spawn(h.executor.clone().run_worker(rx, shutdown_rx));
        shutdown_tx.send(true).unwrap();
        worker.await.unwrap();

        assert_eq!(h.repository.executions_for(playbook.id).await.len(), 3);
    }

    #[tokio::test]
    async fn test_broadcasts_start_and_finish() {
        let playbook = Playbook::new("loud", EventType::AlertCreated)
            .with_step(PlaybookStep::new("notify", json!({})));
        let h = harness(vec![playbook.clone()]);
        let sink = ChannelBroadcaster::new(8);
        let mut rx = sink.subscribe();

        let executor = PlaybookExecutor::new(h.executor.registry().clone(), h.repository.clone())
            .with_broadcaster(Arc::new(sink));
        executor.run(request(&playbook)).await.unwrap();

        for phase in ["execution.started", "execution.finished"] {
            let message = rx.recv().await.unwrap();
            assert_eq!(message.channel, EXECUTIONS_CHANNEL);
            assert_eq!(message.payload["event"], phase);
        }
    }
}
