//! Network isolation of endpoints through the EDR platform.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::actions::http::IntegrationClient;
use crate::actions::{Action, ActionCategory, ActionContext, ActionResult};
use crate::error::{WardenError, WardenResult};

use super::{abort_on_failure, optional_str, path_segment, remediation_failure, required_str};

/// Hostnames are single labels or dotted names, never paths.
fn check_hostname(hostname: &str) -> Result<(), String> {
    if hostname.contains('/') || hostname.contains('\\') || hostname.contains("..") {
        Err(format!("'{}' is not a valid hostname", hostname))
    } else {
        Ok(())
    }
}

pub struct IsolateHostAction {
    edr: IntegrationClient,
    critical_hosts: Vec<Regex>,
    /// Hosts that may be isolated even when they match a critical pattern.
    allowlist: Vec<String>,
}

impl IsolateHostAction {
    pub fn new(edr: IntegrationClient, critical_hosts: Vec<Regex>) -> Self {
        Self {
            edr,
            critical_hosts,
            allowlist: Vec::new(),
        }
    }

    pub fn with_allowlist(mut self, hosts: Vec<String>) -> Self {
        self.allowlist = hosts.into_iter().map(|h| h.to_ascii_lowercase()).collect();
        self
    }

    /// The critical pattern a hostname matches, unless it is allowlisted.
    pub fn critical_match(&self, hostname: &str) -> Option<&str> {
        let host = hostname.trim().to_ascii_lowercase();
        if self.allowlist.contains(&host) {
            return None;
        }
        self.critical_hosts
            .iter()
            .find(|pattern| pattern.is_match(&host))
            .map(|pattern| pattern.as_str())
    }
}

#[async_trait]
impl Action for IsolateHostAction {
    fn name(&self) -> &str {
        "isolate_host"
    }

    fn description(&self) -> &str {
        "Cut an endpoint off the network while keeping its EDR channel open"
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Remediation
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["hostname"],
            "properties": {
                "hostname": { "type": "string", "minLength": 1 },
                "agent_id": { "type": "string" },
                "reason": { "type": "string" },
                "abort_on_failure": { "type": "boolean", "default": false }
            }
        })
    }

    fn validate_parameters(&self, params: &Value) -> Result<(), Vec<String>> {
        let hostname = params["hostname"].as_str().unwrap_or_default().trim();
        check_hostname(hostname).map_err(|e| vec![e])
    }

    async fn check_permissions(&self, ctx: &ActionContext) -> bool {
        ctx.actor.can_remediate()
    }

    async fn execute(&self, params: Value, ctx: &ActionContext) -> WardenResult<ActionResult> {
        let abort = abort_on_failure(&params);
        let hostname = required_str(&params, "hostname")?.trim();
        check_hostname(hostname).map_err(|e| WardenError::InvalidParameters {
            action: self.name().to_string(),
            errors: vec![e],
        })?;

        if let Some(pattern) = self.critical_match(hostname) {
            warn!(
                action = "isolate_host",
                hostname = %hostname,
                pattern = %pattern,
                "Refusing to isolate critical host"
            );
            let err = WardenError::SafetyPolicyViolation {
                action: self.name().to_string(),
                reason: format!("{} matches critical host pattern '{}'", hostname, pattern),
            };
            return Ok(remediation_failure(&err, abort));
        }

        let request = json!({
            "agentId": optional_str(&params, "agent_id"),
            "reason": optional_str(&params, "reason").unwrap_or("Isolated by Warden playbook"),
            "organizationId": ctx.organization_id.to_string(),
            "executionId": ctx.execution_id.map(|id| id.to_string()),
        });

        let path = format!("hosts/{}/isolate", path_segment(self.name(), hostname)?);
        match self.edr.post(self.name(), &path, &request).await {
            Ok(response) => {
                info!(action = "isolate_host", hostname = %hostname, "Host isolated");
                Ok(ActionResult::ok(format!("Host {} isolated", hostname))
                    .with_field("hostname", json!(hostname))
                    .with_field(
                        "isolationId",
                        response.get("id").cloned().unwrap_or(Value::Null),
                    ))
            }
            Err(e) => Ok(remediation_failure(&e, abort)),
        }
    }
}
