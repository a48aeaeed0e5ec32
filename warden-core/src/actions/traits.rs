use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::WardenResult;

use super::types::{ActionCategory, ActionContext, ActionDescriptor, ActionResult};

/// A named, schema-validated unit of external side effect.
///
/// Implementations are registered once with the
/// [`ActionRegistry`](super::ActionRegistry), which checks permissions and
/// validates parameters before `execute` is ever called.
#[async_trait]
pub trait Action: Send + Sync {
    /// Unique registry key, e.g. `block_ip`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn category(&self) -> ActionCategory;

    /// JSON Schema for the parameter object.
    fn parameter_schema(&self) -> Value;

    /// Semantic checks the schema cannot express (address parsing, cross-field
    /// rules). Runs after the schema check passed.
    fn validate_parameters(&self, _params: &Value) -> Result<(), Vec<String>> {
        Ok(())
    }

    async fn check_permissions(&self, _ctx: &ActionContext) -> bool {
        true
    }

    /// Perform the side effect. Vendor failures should come back as a failed
    /// [`ActionResult`] or a [`WardenError`](crate::error::WardenError); both
    /// end up as a failed step.
    async fn execute(&self, params: Value, ctx: &ActionContext) -> WardenResult<ActionResult>;

    /// Per-action override of the registry's default timeout.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            category: self.category(),
            parameter_schema: self.parameter_schema(),
        }
    }
}
