use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{WardenError, WardenResult};

use super::schema::ParameterValidator;
use super::traits::Action;
use super::types::{ActionCategory, ActionContext, ActionDescriptor, ActionResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

struct RegisteredAction {
    action: Arc<dyn Action>,
    validator: ParameterValidator,
}

/// Every known action, keyed by name.
///
/// Filled once at startup through `&mut self` and shared behind an `Arc`
/// afterwards, so lookups take no lock.
pub struct ActionRegistry {
    actions: HashMap<String, RegisteredAction>,
    default_timeout_ms: AtomicU64,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::with_default_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            actions: HashMap::new(),
            default_timeout_ms: AtomicU64::new(timeout.as_millis() as u64),
        }
    }

    /// Register an action. Fails on a duplicate name (the existing entry is
    /// kept) or on a schema that does not compile.
    pub fn register(&mut self, action: Arc<dyn Action>) -> WardenResult<()> {
        let name = action.name().to_string();
        if self.actions.contains_key(&name) {
            error!(action = %name, "Duplicate action registration rejected");
            return Err(WardenError::ActionAlreadyRegistered(name));
        }

        let validator = ParameterValidator::compile(&action.parameter_schema()).map_err(|message| {
            WardenError::InvalidActionSchema {
                action: name.clone(),
                message,
            }
        })?;

        debug!(action = %name, category = %action.category(), "Registering action");
        self.actions
            .insert(name, RegisteredAction { action, validator });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).map(|entry| entry.action.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn category_of(&self, name: &str) -> Option<ActionCategory> {
        self.actions.get(name).map(|entry| entry.action.category())
    }

    pub fn get_action_schema(&self, name: &str) -> Option<ActionDescriptor> {
        self.actions.get(name).map(|entry| entry.action.descriptor())
    }

    /// Descriptors for every action, sorted by name.
    pub fn get_all_action_schemas(&self) -> Vec<ActionDescriptor> {
        let mut descriptors: Vec<ActionDescriptor> = self
            .actions
            .values()
            .map(|entry| entry.action.descriptor())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_default_timeout(&self, timeout: Duration) {
        self.default_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    /// Schema check followed by the action's own semantic checks.
    pub fn validate_parameters(&self, name: &str, params: &Value) -> WardenResult<()> {
        let entry = self
            .actions
            .get(name)
            .ok_or_else(|| WardenError::ActionNotFound(name.to_string()))?;
        Self::validate_entry(name, entry, params)
    }

    fn validate_entry(name: &str, entry: &RegisteredAction, params: &Value) -> WardenResult<()> {
        let mut errors = entry.validator.violations(params);
        if errors.is_empty() {
            if let Err(semantic) = entry.action.validate_parameters(params) {
                errors = semantic;
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(WardenError::InvalidParameters {
                action: name.to_string(),
                errors,
            })
        }
    }

    /// Look up, authorise, validate, then run the action under its timeout.
    ///
    /// Lookup, permission and validation failures are returned as errors and
    /// nothing is executed. Anything that goes wrong inside the action itself
    /// (an error, a panic, the timeout) comes back as a failed result.
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        ctx: &ActionContext,
    ) -> WardenResult<ActionResult> {
        let entry = match self.actions.get(name) {
            Some(entry) => entry,
            None => {
                error!(action = %name, "Action not found");
                return Err(WardenError::ActionNotFound(name.to_string()));
            }
        };

        if !entry.action.check_permissions(ctx).await {
            warn!(
                action = %name,
                organization_id = %ctx.organization_id,
                "Permission check refused action"
            );
            return Err(WardenError::permission_denied(
                name,
                "caller is not allowed to run this action",
            ));
        }

        if let Err(e) = Self::validate_entry(name, entry, &params) {
            warn!(action = %name, error = %e, "Rejected invalid parameters");
            return Err(e);
        }

        let timeout = entry.action.timeout().unwrap_or_else(|| self.default_timeout());
        let started = Instant::now();
        debug!(action = %name, timeout_ms = timeout.as_millis() as u64, "Executing action");

        let call = AssertUnwindSafe(entry.action.execute(params, ctx)).catch_unwind();
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                e.log();
                ActionResult::from_error(&e)
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!(action = %name, panic = %message, "Action panicked");
                ActionResult::failure(format!("action '{}' panicked: {}", name, message))
                    .with_kind("internal")
            }
            Err(_) => {
                let err = WardenError::ActionTimeout {
                    action: name.to_string(),
                    timeout_secs: timeout.as_secs(),
                };
                warn!(action = %name, timeout_ms = timeout.as_millis() as u64, "Action timed out");
                ActionResult::from_error(&err)
            }
        };

        info!(
            action = %name,
            success = result.success,
            duration_ms = started.elapsed().as_millis() as u64,
            "Action finished"
        );

        Ok(result)
    }

    /// Like [`execute`](Self::execute) but never fails: every error becomes a
    /// failed result carrying its kind.
    pub async fn dispatch(&self, name: &str, params: Value, ctx: &ActionContext) -> ActionResult {
        match self.execute(name, params, ctx).await {
            Ok(result) => result,
            Err(e) => ActionResult::from_error(&e),
        }
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    struct EchoAction {
        description: &'static str,
    }

    #[async_trait]
    impl Action for EchoAction {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            self.description
        }

        fn category(&self) -> ActionCategory {
            ActionCategory::Investigation
        }

        fn parameter_schema(&self) -> Value {
            json!({
                "type": "object",
                "required": ["text"],
                "properties": { "text": { "type": "string" } }
            })
        }

        fn validate_parameters(&self, params: &Value) -> Result<(), Vec<String>> {
            if params["text"] == "forbidden" {
                return Err(vec!["text must not be 'forbidden'".to_string()]);
            }
            Ok(())
        }

        async fn execute(&self, params: Value, _ctx: &ActionContext) -> WardenResult<ActionResult> {
            Ok(ActionResult::ok("echoed").with_field("text", params["text"].clone()))
        }
    }

    struct SlowAction;

    #[async_trait]
    impl Action for SlowAction {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Never finishes in time"
        }

        fn category(&self) -> ActionCategory {
            ActionCategory::Remediation
        }

        fn parameter_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _params: Value, _ctx: &ActionContext) -> WardenResult<ActionResult> {
            tokio::time::sleep(Duration::from_secs(120)).await;
            Ok(ActionResult::ok("done"))
        }

        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_secs(5))
        }
    }

    struct PanickingAction;

    #[async_trait]
    impl Action for PanickingAction {
        fn name(&self) -> &str {
            "explode"
        }

        fn description(&self) -> &str {
            "Panics"
        }

        fn category(&self) -> ActionCategory {
            ActionCategory::Agent
        }

        fn parameter_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _params: Value, _ctx: &ActionContext) -> WardenResult<ActionResult> {
            panic!("vendor SDK blew up");
        }
    }

    struct FailingAction;

    #[async_trait]
    impl Action for FailingAction {
        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "Always errors"
        }

        fn category(&self) -> ActionCategory {
            ActionCategory::Cloud
        }

        fn parameter_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _params: Value, _ctx: &ActionContext) -> WardenResult<ActionResult> {
            Err(WardenError::external("failing", "503 Service Unavailable"))
        }
    }

    struct DeniedAction {
        executions: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Action for DeniedAction {
        fn name(&self) -> &str {
            "denied"
        }

        fn description(&self) -> &str {
            "Permission check always refuses"
        }

        fn category(&self) -> ActionCategory {
            ActionCategory::Remediation
        }

        fn parameter_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn check_permissions(&self, _ctx: &ActionContext) -> bool {
            false
        }

        async fn execute(&self, _params: Value, _ctx: &ActionContext) -> WardenResult<ActionResult> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            Ok(ActionResult::ok("should not run"))
        }
    }

    struct BadSchemaAction;

    #[async_trait]
    impl Action for BadSchemaAction {
        fn name(&self) -> &str {
            "bad_schema"
        }

        fn description(&self) -> &str {
            "Declares a broken schema"
        }

        fn category(&self) -> ActionCategory {
            ActionCategory::Agent
        }

        fn parameter_schema(&self) -> Value {
            json!({"type": "no-such-type"})
        }

        async fn execute(&self, _params: Value, _ctx: &ActionContext) -> WardenResult<ActionResult> {
            Ok(ActionResult::ok("unused"))
        }
    }

    fn ctx() -> ActionContext {
        ActionContext::system(Uuid::new_v4())
    }

    fn registry() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry
            .register(Arc::new(EchoAction {
                description: "Echo the input",
            }))
            .unwrap();
        registry.register(Arc::new(SlowAction)).unwrap();
        registry.register(Arc::new(PanickingAction)).unwrap();
        registry.register(Arc::new(FailingAction)).unwrap();
        registry
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let mut registry = registry();
        let result = registry.register(Arc::new(EchoAction {
            description: "Impostor",
        }));

        assert!(matches!(result, Err(WardenError::ActionAlreadyRegistered(name)) if name == "echo"));
        assert_eq!(
            registry.get_action_schema("echo").unwrap().description,
            "Echo the input"
        );
    }

    #[test]
    fn test_rejects_uncompilable_schema() {
        let mut registry = ActionRegistry::new();
        let result = registry.register(Arc::new(BadSchemaAction));
        assert!(matches!(result, Err(WardenError::InvalidActionSchema { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_schemas_sorted_by_name() {
        let registry = registry();
        let names: Vec<String> = registry
            .get_all_action_schemas()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["echo", "explode", "failing", "slow"]);
        assert_eq!(registry.names(), names);
        assert_eq!(registry.category_of("slow"), Some(ActionCategory::Remediation));
    }

    #[tokio::test]
    async fn test_execute_success() {
        let result = registry()
            .execute("echo", json!({"text": "hi"}), &ctx())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.data.unwrap()["text"], "hi");
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let result = registry().execute("unknown_action", json!({}), &ctx()).await;
        assert!(matches!(result, Err(WardenError::ActionNotFound(name)) if name == "unknown_action"));
    }

    #[tokio::test]
    async fn test_schema_violation_is_rejected() {
        let result = registry().execute("echo", json!({"text": 5}), &ctx()).await;
        match result {
            Err(WardenError::InvalidParameters { action, errors }) => {
                assert_eq!(action, "echo");
                assert_eq!(errors.len(), 1);
            }
            other => panic!("expected InvalidParameters, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_semantic_validation_runs_after_schema() {
        let result = registry()
            .execute("echo", json!({"text": "forbidden"}), &ctx())
            .await;
        assert!(matches!(result, Err(WardenError::InvalidParameters { .. })));
    }

    #[tokio::test]
    async fn test_permission_denied_never_executes() {
        let executions = Arc::new(AtomicUsize::new(0));
        let mut registry = ActionRegistry::new();
        registry
            .register(Arc::new(DeniedAction {
                executions: executions.clone(),
            }))
            .unwrap();

        let result = registry.execute("denied", json!({}), &ctx()).await;

        assert!(matches!(result, Err(WardenError::PermissionDenied { .. })));
        assert_eq!(executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_action_error_becomes_failed_result() {
        let result = registry()
            .execute("failing", json!({}), &ctx())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("external_call_failed"));
        assert!(result.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_panic_becomes_failed_result() {
        let result = registry()
            .execute("explode", json!({}), &ctx())
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.error.unwrap().contains("vendor SDK blew up"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_failed_result() {
        let result = registry()
            .execute("slow", json!({}), &ctx())
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.is_timeout());
    }

    #[test]
    fn test_default_timeout_can_be_changed() {
        let registry = registry();
        registry.set_default_timeout(Duration::from_secs(2));
        assert_eq!(registry.default_timeout(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_dispatch_flattens_errors() {
        let result = registry()
            .dispatch("unknown_action", json!({}), &ctx())
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("action_not_found"));
    }
}
