use futures::future::join_all;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::actions::{ActionContext, ActionRegistry, ActionResult};
use crate::broadcast::{BroadcastSink, NoopBroadcaster, NOTIFICATIONS_CHANNEL};
use crate::config::NotificationConfig;
use crate::error::WardenError;
use crate::models::Event;

use super::payload::{build_channel_payloads, configured_channels};
use super::rate_limit::SlidingWindowLimiter;
use super::types::{ChannelOutcome, Notification, NotificationSummary};

/// Fans one notification out to every enabled channel through the action
/// registry, under a global hourly budget.
pub struct NotificationManager {
    registry: Arc<ActionRegistry>,
    config: RwLock<Arc<NotificationConfig>>,
    limiter: SlidingWindowLimiter,
    broadcaster: Arc<dyn BroadcastSink>,
}

impl NotificationManager {
    pub fn new(registry: Arc<ActionRegistry>, config: NotificationConfig) -> Self {
        Self {
            registry,
            config: RwLock::new(Arc::new(config)),
            limiter: SlidingWindowLimiter::hourly(),
            broadcaster: Arc::new(NoopBroadcaster),
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn BroadcastSink>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn with_limiter(mut self, limiter: SlidingWindowLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Snapshot of the configuration in force.
    pub fn config(&self) -> Arc<NotificationConfig> {
        match self.config.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the configuration. Sends already under way keep the snapshot
    /// they started with.
    pub fn update_config(&self, config: NotificationConfig) {
        let config = Arc::new(config);
        match self.config.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
        info!("Notification configuration updated");
    }

    pub fn remaining_budget(&self) -> usize {
        self.limiter.remaining(self.config().max_per_hour)
    }

    pub async fn notify_event(&self, event: &Event) -> NotificationSummary {
        self.notify(&Notification::from_event(event)).await
    }

    pub async fn notify(&self, notification: &Notification) -> NotificationSummary {
        let config = self.config();

        let payloads = build_channel_payloads(&config, notification);
        if payloads.is_empty() {
            if configured_channels(&config).is_empty() {
                debug!(severity = %notification.severity, "No notification channels enabled");
                return NotificationSummary::skipped(true, "no channels enabled");
            }
            debug!(
                severity = %notification.severity,
                min_severity = %config.min_severity,
                "Notification below every channel threshold"
            );
            return NotificationSummary::skipped(true, "severity below threshold");
        }

        if let Err(retry_after) = self.limiter.try_acquire(config.max_per_hour) {
            let err = WardenError::NotificationRateLimited {
                limit: config.max_per_hour,
                retry_after_secs: retry_after.as_secs(),
            };
            warn!(
                title = %notification.title,
                retry_after_secs = retry_after.as_secs(),
                "Notification rate limited"
            );
            let summary = NotificationSummary::skipped(false, format!("rate limit exceeded: {}", err));
            self.publish(notification, &summary);
            return summary;
        }

        let ctx = ActionContext::system(notification.organization_id);
        let timeout = config.channel_timeout();
        let sends = payloads.into_iter().map(|(channel, params)| {
            let ctx = &ctx;
            async move {
                let action = channel.action_name();
                let started = Instant::now();
                let result = match tokio::time::timeout(
                    timeout,
                    self.registry.dispatch(action, params, ctx),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => ActionResult::from_error(&WardenError::ActionTimeout {
                        action: action.to_string(),
                        timeout_secs: timeout.as_secs(),
                    }),
                };

                if !result.success {
                    warn!(
                        channel = %channel,
                        action = %action,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "Notification channel failed"
                    );
                }

                ChannelOutcome {
                    channel,
                    action: action.to_string(),
                    success: result.success,
                    error: result.error,
                    error_kind: result.error_kind,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
        });

        let summary = NotificationSummary::from_outcomes(join_all(sends).await);
        info!(
            title = %notification.title,
            severity = %notification.severity,
            successful = summary.successful,
            failed = summary.failed,
            "Notification dispatched"
        );
        self.publish(notification, &summary);
        summary
    }

    fn publish(&self, notification: &Notification, summary: &NotificationSummary) {
        let payload = serde_json::json!({
            "title": notification.title,
            "severity": notification.severity,
            "organizationId": notification.organization_id.to_string(),
            "eventType": notification.event_type,
            "entityId": notification.entity_id,
            "summary": summary,
        });
        if let Err(e) = self.broadcaster.broadcast(NOTIFICATIONS_CHANNEL, payload) {
            warn!(error = %e, "Failed to broadcast notification summary");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, ActionCategory};
    use crate::error::WardenResult;
    use crate::models::Severity;
    use crate::notifications::NotificationChannel;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct CountingChannel {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        behaviour: &'static str,
    }

    #[async_trait]
    impl Action for CountingChannel {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "counting channel"
        }

        fn category(&self) -> ActionCategory {
            ActionCategory::Notification
        }

        fn parameter_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _params: Value, _ctx: &ActionContext) -> WardenResult<ActionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                "fail" => Err(WardenError::external(self.name, "503 from upstream")),
                "hang" => {
                    tokio::time::sleep(Duration::from_secs(600)).await;
                    Ok(ActionResult::ok("late"))
                }
                _ => Ok(ActionResult::ok("sent")),
            }
        }
    }

    fn manager(slack: &'static str, teams: &'static str) -> (NotificationManager, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ActionRegistry::new();
        for (name, behaviour) in [("send_slack", slack), ("send_teams", teams)] {
            registry
                .register(Arc::new(CountingChannel {
                    name,
                    calls: calls.clone(),
                    behaviour,
                }))
                .unwrap();
        }

        let mut config = NotificationConfig::default();
        config.slack.enabled = true;
        config.slack.webhook_url = "https://hooks.slack.test/x".to_string();
        config.teams.enabled = true;
        config.teams.webhook_url = "https://teams.test/x".to_string();
        config.max_per_hour = 2;

        (NotificationManager::new(Arc::new(registry), config), calls)
    }

    fn note(severity: Severity) -> Notification {
        Notification::new("Test", "body", severity, Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_below_threshold_is_skipped() {
        let (manager, calls) = manager("ok", "ok");

        let summary = manager.notify(&note(Severity::Low)).await;

        assert!(summary.success);
        assert!(summary.skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.remaining_budget(), 2);
    }

    #[tokio::test]
    async fn test_all_settled_summary() {
        let (manager, calls) = manager("ok", "fail");

        let summary = manager.notify(&note(Severity::High)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.success);
        let teams = summary
            .channels
            .iter()
            .find(|c| c.channel == NotificationChannel::Teams)
            .unwrap();
        assert_eq!(teams.error_kind.as_deref(), Some("external_call_failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_timeout() {
        let (manager, _calls) = manager("ok", "hang");

        let summary = manager.notify(&note(Severity::Critical)).await;

        assert_eq!(summary.successful, 1);
        let teams = summary
            .channels
            .iter()
            .find(|c| c.channel == NotificationChannel::Teams)
            .unwrap();
        assert_eq!(teams.error_kind.as_deref(), Some("timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit() {
        let (manager, calls) = manager("ok", "ok");

        assert!(!manager.notify(&note(Severity::High)).await.skipped);
        assert!(!manager.notify(&note(Severity::High)).await.skipped);

        let limited = manager.notify(&note(Severity::High)).await;
        assert!(limited.is_rate_limited());
        assert!(!limited.success);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!manager.notify(&note(Severity::High)).await.skipped);
    }

    #[tokio::test]
    async fn test_update_config_swaps_atomically() {
        let (manager, calls) = manager("ok", "ok");
        let before = manager.config();

        let mut next = (*before).clone();
        next.min_severity = Severity::Critical;
        manager.update_config(next);

        assert_eq!(before.min_severity, Severity::Medium);
        assert!(manager.notify(&note(Severity::High)).await.skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lower_channel_threshold_below_global() {
        let (manager, calls) = manager("ok", "ok");
        let mut config = (*manager.config()).clone();
        config.min_severity = Severity::High;
        config.slack.min_severity = Some(Severity::Low);
        manager.update_config(config);

        let summary = manager.notify(&note(Severity::Medium)).await;

        assert!(!summary.skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.channels.len(), 1);
        assert_eq!(summary.channels[0].channel, NotificationChannel::Slack);
    }

    #[tokio::test]
    async fn test_no_enabled_channels() {
        let manager = NotificationManager::new(Arc::new(ActionRegistry::new()), NotificationConfig::default());
        let summary = manager.notify(&note(Severity::Critical)).await;
        assert!(summary.skipped);
        assert_eq!(summary.reason.as_deref(), Some("no channels enabled"));
    }
}
