use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::actions::{builtin_registry, ActionRegistry, Actor};
use crate::broadcast::{BroadcastSink, NoopBroadcaster};
use crate::config::WardenConfig;
use crate::error::{WardenError, WardenResult};
use crate::events::{EventBus, EventFilter, EventHandler, Subscription};
use crate::models::{Event, EventType, PlaybookExecution};
use crate::notifications::{Notification, NotificationManager, NotificationSummary};
use crate::playbooks::{ExecutionRequest, PlaybookExecutor, PlaybookRepository};
use crate::triggers::TriggerEngine;

/// Event types that produce a notification on their own.
pub const NOTIFYING_EVENTS: [EventType; 3] = [
    EventType::AlertCreated,
    EventType::IncidentCreated,
    EventType::IncidentCorrelated,
];

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Bus subscriber that hands events to the notification fan-out on the
/// runtime, off the publisher's thread.
struct NotificationForwarder {
    manager: Arc<NotificationManager>,
    runtime: Handle,
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl EventHandler for NotificationForwarder {
    fn name(&self) -> &str {
        "notification_fanout"
    }

    fn handle(&self, event: &Event) -> WardenResult<()> {
        let manager = self.manager.clone();
        let event = event.clone();
        let mut pending = lock(&self.pending);
        // Reap finished sends so the set stays small.
        while pending.try_join_next().is_some() {}
        pending.spawn_on(
            async move {
                let summary = manager.notify_event(&event).await;
                debug!(
                    event_type = %event.event_type,
                    entity_id = %event.entity_id,
                    skipped = summary.skipped,
                    successful = summary.successful,
                    failed = summary.failed,
                    "Event notification finished"
                );
            },
            &self.runtime,
        );
        Ok(())
    }
}

/// Everything wired together: registry, bus, trigger engine, executor worker
/// and notification fan-out.
pub struct AutomationService {
    config: RwLock<Arc<WardenConfig>>,
    registry: Arc<ActionRegistry>,
    bus: EventBus,
    engine: Arc<TriggerEngine>,
    executor: Arc<PlaybookExecutor>,
    notifications: Arc<NotificationManager>,
    queue: Mutex<Option<mpsc::Receiver<ExecutionRequest>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    pending_notifications: Arc<Mutex<JoinSet<()>>>,
}

impl AutomationService {
    /// Service with every built-in action registered.
    pub fn new(config: WardenConfig, repository: Arc<dyn PlaybookRepository>) -> WardenResult<Self> {
        let registry = builtin_registry(&config)?;
        Ok(Self::from_parts(config, registry, repository, Arc::new(NoopBroadcaster)))
    }

    pub fn from_parts(
        config: WardenConfig,
        registry: ActionRegistry,
        repository: Arc<dyn PlaybookRepository>,
        broadcaster: Arc<dyn BroadcastSink>,
    ) -> Self {
        registry.set_default_timeout(config.automation.action_timeout());
        let registry = Arc::new(registry);

        let (queue_tx, queue_rx) = mpsc::channel(config.automation.execution_queue_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        let engine = Arc::new(
            TriggerEngine::new(repository.clone(), queue_tx)
                .with_refresh_interval(config.automation.refresh_interval()),
        );
        let executor = Arc::new(
            PlaybookExecutor::new(registry.clone(), repository)
                .with_broadcaster(broadcaster.clone())
                .with_dedupe_in_flight(config.automation.dedupe_in_flight),
        );
        let notifications = Arc::new(
            NotificationManager::new(registry.clone(), config.notifications.clone())
                .with_broadcaster(broadcaster),
        );

        Self {
            config: RwLock::new(Arc::new(config)),
            registry,
            bus: EventBus::new(),
            engine,
            executor,
            notifications,
            queue: Mutex::new(Some(queue_rx)),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            pending_notifications: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn config(&self) -> Arc<WardenConfig> {
        match self.config.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn engine(&self) -> &Arc<TriggerEngine> {
        &self.engine
    }

    pub fn executor(&self) -> &Arc<PlaybookExecutor> {
        &self.executor
    }

    pub fn notifications(&self) -> &Arc<NotificationManager> {
        &self.notifications
    }

    /// Load playbooks, subscribe to the bus and spawn the background tasks.
    /// Succeeds once; a failed start may be retried.
    pub async fn start(&self) -> WardenResult<()> {
        let already_started = || WardenError::Internal("automation service already started".to_string());
        if lock(&self.queue).is_none() {
            return Err(already_started());
        }

        let loaded = self.engine.refresh().await?;
        let queue = lock(&self.queue).take().ok_or_else(already_started)?;

        {
            let mut subscriptions = lock(&self.subscriptions);
            subscriptions.push(self.bus.subscribe(EventFilter::All, self.engine.clone()));
            subscriptions.push(self.bus.subscribe(
                EventFilter::any_of(NOTIFYING_EVENTS),
                Arc::new(NotificationForwarder {
                    manager: self.notifications.clone(),
                    runtime: Handle::current(),
                    pending: self.pending_notifications.clone(),
                }),
            ));
        }

        let mut tasks = lock(&self.tasks);
        tasks.push(tokio::spawn(
            self.executor
                .clone()
                .run_worker(queue, self.shutdown_tx.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.engine
                .clone()
                .run_refresh_loop(self.shutdown_tx.subscribe()),
        ));

        info!(
            actions = self.registry.len(),
            playbooks = loaded,
            "Automation service started"
        );
        Ok(())
    }

    /// Publish on the service's bus. Returns the number of subscribers reached.
    pub fn publish(&self, event: &Event) -> usize {
        self.bus.publish(event)
    }

    pub async fn run_manual(
        &self,
        playbook_id: Uuid,
        organization_id: Uuid,
        actor: Actor,
        data: Map<String, Value>,
    ) -> WardenResult<PlaybookExecution> {
        self.executor
            .run_manual(playbook_id, organization_id, actor, data)
            .await
    }

    pub async fn notify(&self, notification: &Notification) -> NotificationSummary {
        self.notifications.notify(notification).await
    }

    /// Validate and swap in a new configuration. Channel settings, the
    /// default action timeout, the refresh interval and the in-flight guard
    /// take effect immediately; integrations keep the clients built at
    /// startup.
    pub fn update_config(&self, config: WardenConfig) -> WardenResult<()> {
        config.validate()?;

        self.notifications.update_config(config.notifications.clone());
        self.registry
            .set_default_timeout(config.automation.action_timeout());
        self.engine
            .set_refresh_interval(config.automation.refresh_interval());
        self.executor
            .set_dedupe_in_flight(config.automation.dedupe_in_flight);

        let config = Arc::new(config);
        match self.config.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
        info!("Automation configuration updated");
        Ok(())
    }

    /// Stop accepting work, let queued executions and in-flight notifications
    /// finish, then return.
    pub async fn shutdown(&self) {
        for subscription in lock(&self.subscriptions).drain(..) {
            subscription.unsubscribe();
        }
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task ended abnormally");
            }
        }

        let mut pending = std::mem::take(&mut *lock(&self.pending_notifications));
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Notification task ended abnormally");
            }
        }
        info!("Automation service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbooks::InMemoryPlaybookRepository;

    #[tokio::test]
    async fn test_start_twice_fails() {
        let repository = Arc::new(InMemoryPlaybookRepository::new());
        let service = AutomationService::new(WardenConfig::default(), repository).unwrap();

        service.start().await.unwrap();
        assert_eq!(service.bus().subscriber_count(), 2);
        assert!(service.start().await.is_err());

        service.shutdown().await;
        assert_eq!(service.bus().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_update_config_rejects_invalid() {
        let repository = Arc::new(InMemoryPlaybookRepository::new());
        let service = AutomationService::new(WardenConfig::default(), repository).unwrap();

        let mut bad = WardenConfig::default();
        bad.notifications.max_per_hour = 0;
        assert!(service.update_config(bad).is_err());

        let mut good = WardenConfig::default();
        good.automation.action_timeout_secs = 5;
        service.update_config(good).unwrap();
        assert_eq!(service.registry().default_timeout().as_secs(), 5);
        assert_eq!(service.config().automation.action_timeout_secs, 5);
    }
}
