//! Firewall IP blocking.

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use serde_json::{json, Value};
use std::net::IpAddr;
use tracing::{info, warn};

use crate::actions::http::IntegrationClient;
use crate::actions::{Action, ActionCategory, ActionContext, ActionResult};
use crate::error::{WardenError, WardenResult};

use super::{abort_on_failure, optional_str, remediation_failure, required_str};

pub struct BlockIpAction {
    firewall: IntegrationClient,
    protected: Vec<IpNetwork>,
}

impl BlockIpAction {
    pub fn new(firewall: IntegrationClient, protected: Vec<IpNetwork>) -> Self {
        Self {
            firewall,
            protected,
        }
    }

    fn is_internal(ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => {
                v4.is_private()
                    || v4.is_loopback()
                    || v4.is_link_local()
                    || v4.is_unspecified()
                    || v4.is_broadcast()
            }
            IpAddr::V6(v6) => {
                // fc00::/7 unique local, fe80::/10 link local
                v6.is_loopback()
                    || v6.is_unspecified()
                    || (v6.segments()[0] & 0xfe00) == 0xfc00
                    || (v6.segments()[0] & 0xffc0) == 0xfe80
            }
        }
    }

    /// Reason the address must not be blocked, if any.
    fn safety_check(&self, ip: &IpAddr, allow_private: bool) -> Option<String> {
        if let Some(range) = self.protected.iter().find(|net| net.contains(*ip)) {
            return Some(format!("{} is inside protected range {}", ip, range));
        }
        if !allow_private && Self::is_internal(ip) {
            return Some(format!(
                "{} is an internal address; set allow_private to block it",
                ip
            ));
        }
        None
    }
}

#[async_trait]
impl Action for BlockIpAction {
    fn name(&self) -> &str {
        "block_ip"
    }

    fn description(&self) -> &str {
        "Block an IP address at the perimeter firewall"
    }

    fn category(&self) -> ActionCategory {
        ActionCategory::Remediation
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["ip"],
            "properties": {
                "ip": { "type": "string", "description": "IPv4 or IPv6 address" },
                "duration_minutes": { "type": "integer", "minimum": 1, "maximum": 43200, "default": 60 },
                "direction": { "type": "string", "enum": ["inbound", "outbound", "both"], "default": "inbound" },
                "reason": { "type": "string" },
                "allow_private": { "type": "boolean", "default": false },
                "abort_on_failure": { "type": "boolean", "default": false }
            }
        })
    }

    fn validate_parameters(&self, params: &Value) -> Result<(), Vec<String>> {
        let ip = params["ip"].as_str().unwrap_or_default();
        match ip.trim().parse::<IpAddr>() {
            Ok(_) => Ok(()),
            Err(_) => Err(vec![format!("'{}' is not a valid IP address", ip)]),
        }
    }

    async fn check_permissions(&self, ctx: &ActionContext) -> bool {
        ctx.actor.can_remediate()
    }

    async fn execute(&self, params: Value, ctx: &ActionContext) -> WardenResult<ActionResult> {
        let abort = abort_on_failure(&params);
        let raw = required_str(&params, "ip")?;
        let ip: IpAddr = raw.trim().parse().map_err(|_| WardenError::InvalidParameters {
            action: self.name().to_string(),
            errors: vec![format!("'{}' is not a valid IP address", raw)],
        })?;

        let allow_private = params["allow_private"].as_bool().unwrap_or(false);
        if let Some(reason) = self.safety_check(&ip, allow_private) {
            warn!(action = "block_ip", ip = %ip, reason = %reason, "Refusing to block address");
            let err = WardenError::SafetyPolicyViolation {
                action: self.name().to_string(),
                reason,
            };
            return Ok(remediation_failure(&err, abort));
        }

        let duration = params["duration_minutes"].as_u64().unwrap_or(60);
        let request = json!({
            "ip": ip.to_string(),
            "direction": optional_str(&params, "direction").unwrap_or("inbound"),
            "durationMinutes": duration,
            "reason": optional_str(&params, "reason").unwrap_or("Blocked by Warden playbook"),
            "organizationId": ctx.organization_id.to_string(),
            "executionId": ctx.execution_id.map(|id| id.to_string()),
        });

        match self.firewall.post(self.name(), "blocks", &request).await {
            Ok(response) => {
                info!(action = "block_ip", ip = %ip, duration_minutes = duration, "Address blocked");
                Ok(ActionResult::ok(format!("Blocked {} for {} minutes", ip, duration))
                    .with_field("ip", json!(ip.to_string()))
                    .with_field("blockId", response.get("id").cloned().unwrap_or(Value::Null)))
            }
            Err(e) => Ok(remediation_failure(&e, abort)),
        }
    }
}
