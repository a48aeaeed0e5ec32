//! Built-in Actions
//!
//! Actions that ship with Warden. Each one is constructed from
//! [`WardenConfig`] and registered at startup.
//!
//! ## Notification
//!
//! - [`SendEmailAction`]: SMTP email
//! - [`SendSlackAction`]: Slack incoming webhook
//! - [`SendTeamsAction`]: Microsoft Teams MessageCard
//! - [`SendWebhookAction`]: generic JSON webhook
//! - [`SendPushAction`]: mobile push via the push gateway
//!
//! ## Remediation
//!
//! - [`BlockIpAction`]: firewall block, refuses protected ranges
//! - [`IsolateHostAction`]: EDR isolation, refuses critical hosts
//!
//! ## Investigation, cloud and agent
//!
//! - [`CreateTicketAction`], [`LookupIocAction`], [`DisableCloudUserAction`],
//!   [`RunAgentCommandAction`]

mod agent_command;
mod block_ip;
mod cloud_user;
mod email;
mod isolate_host;
mod lookup_ioc;
mod push;
mod slack;
mod teams;
mod ticket;
mod webhook;

pub use agent_command::RunAgentCommandAction;
pub use block_ip::BlockIpAction;
pub use cloud_user::DisableCloudUserAction;
pub use email::{EmailTransport, OutgoingEmail, SendEmailAction, SmtpEmailTransport};
pub use isolate_host::IsolateHostAction;
pub use lookup_ioc::LookupIocAction;
pub use push::SendPushAction;
pub use slack::SendSlackAction;
pub use teams::SendTeamsAction;
pub use ticket::CreateTicketAction;
pub use webhook::SendWebhookAction;

use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;

use crate::config::WardenConfig;
use crate::error::{WardenError, WardenResult};
use crate::models::Severity;

use super::http::{HttpClient, IntegrationClient};
use super::registry::ActionRegistry;
use super::traits::Action;
use super::types::ActionResult;

pub const BUILTIN_ACTIONS: &[&str] = &[
    "send_email",
    "send_slack",
    "send_teams",
    "send_webhook",
    "send_push",
    "block_ip",
    "isolate_host",
    "create_ticket",
    "lookup_ioc",
    "disable_cloud_user",
    "run_agent_command",
];

pub fn is_builtin_action(name: &str) -> bool {
    BUILTIN_ACTIONS.contains(&name)
}

/// Construct every built-in action from configuration.
pub fn builtin_actions(config: &WardenConfig) -> WardenResult<Vec<Arc<dyn Action>>> {
    let integrations = &config.integrations;
    let protection = &config.protection;
    let webhook_http = HttpClient::new(config.notifications.channel_timeout())?;

    let critical_hosts = protection.compile_host_patterns()?;
    let protected_ranges = protection.parse_protected_ranges()?;

    Ok(vec![
        Arc::new(SendEmailAction::smtp(integrations.smtp.clone())),
        Arc::new(SendSlackAction::new(webhook_http.clone())),
        Arc::new(SendTeamsAction::new(webhook_http.clone())),
        Arc::new(SendWebhookAction::new(webhook_http)),
        Arc::new(SendPushAction::new(IntegrationClient::new(
            "push_gateway",
            integrations.push_gateway.clone(),
        )?)),
        Arc::new(BlockIpAction::new(
            IntegrationClient::new("firewall", integrations.firewall.clone())?,
            protected_ranges,
        )),
        Arc::new(
            IsolateHostAction::new(
                IntegrationClient::new("edr", integrations.edr.clone())?,
                critical_hosts,
            )
            .with_allowlist(protection.isolation_allowlist.clone()),
        ),
        Arc::new(CreateTicketAction::new(IntegrationClient::new(
            "ticketing",
            integrations.ticketing.clone(),
        )?)),
        Arc::new(LookupIocAction::new(IntegrationClient::new(
            "threat_intel",
            integrations.threat_intel.clone(),
        )?)),
        Arc::new(DisableCloudUserAction::new(IntegrationClient::new(
            "cloud_identity",
            integrations.cloud_identity.clone(),
        )?)),
        Arc::new(RunAgentCommandAction::new(
            IntegrationClient::new("agent_control", integrations.agent_control.clone())?,
            protection.allowed_agent_commands.clone(),
        )),
    ])
}

pub fn register_builtin_actions(
    registry: &mut ActionRegistry,
    config: &WardenConfig,
) -> WardenResult<()> {
    for action in builtin_actions(config)? {
        registry.register(action)?;
    }
    Ok(())
}

/// Registry with every built-in action and the configured default timeout.
pub fn builtin_registry(config: &WardenConfig) -> WardenResult<ActionRegistry> {
    let mut registry = ActionRegistry::with_default_timeout(config.automation.action_timeout());
    register_builtin_actions(&mut registry, config)?;
    Ok(registry)
}

pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> WardenResult<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| WardenError::InvalidParameters {
            action: "builtin".to_string(),
            errors: vec![format!("missing string parameter '{}'", key)],
        })
}

pub(crate) fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// Percent-encode a parameter for use as one URL path segment. Dot segments
/// are refused since the URL parser would resolve them.
pub(crate) fn path_segment<'a>(action: &str, value: &'a str) -> WardenResult<Cow<'a, str>> {
    if value.is_empty() || value == "." || value == ".." {
        return Err(WardenError::InvalidParameters {
            action: action.to_string(),
            errors: vec![format!("'{}' is not a valid path segment", value)],
        });
    }
    Ok(urlencoding::encode(value))
}

pub(crate) fn severity_param(params: &Value) -> Severity {
    optional_str(params, "severity")
        .and_then(Severity::parse)
        .unwrap_or_default()
}

pub(crate) fn abort_on_failure(params: &Value) -> bool {
    params["abort_on_failure"].as_bool().unwrap_or(false)
}

/// Failed remediation result, carrying the abort signal when requested.
pub(crate) fn remediation_failure(err: &WardenError, abort: bool) -> ActionResult {
    ActionResult::from_error(err).abort_playbook(abort)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionCategory;
    use serde_json::json;

    #[test]
    fn test_builtin_registry_contains_every_action() {
        let registry = builtin_registry(&WardenConfig::default()).unwrap();

        assert_eq!(registry.len(), BUILTIN_ACTIONS.len());
        for name in BUILTIN_ACTIONS {
            assert!(registry.contains(name), "missing {}", name);
            assert!(is_builtin_action(name));
        }
        assert!(!is_builtin_action("format_disk"));
    }

    #[test]
    fn test_builtin_categories() {
        let registry = builtin_registry(&WardenConfig::default()).unwrap();

        assert_eq!(registry.category_of("send_slack"), Some(ActionCategory::Notification));
        assert_eq!(registry.category_of("block_ip"), Some(ActionCategory::Remediation));
        assert_eq!(registry.category_of("isolate_host"), Some(ActionCategory::Remediation));
        assert_eq!(registry.category_of("lookup_ioc"), Some(ActionCategory::Investigation));
        assert_eq!(registry.category_of("disable_cloud_user"), Some(ActionCategory::Cloud));
        assert_eq!(registry.category_of("run_agent_command"), Some(ActionCategory::Agent));
    }

    #[test]
    fn test_registering_twice_fails() {
        let config = WardenConfig::default();
        let mut registry = builtin_registry(&config).unwrap();
        let result = register_builtin_actions(&mut registry, &config);
        assert!(matches!(result, Err(WardenError::ActionAlreadyRegistered(_))));
    }

    #[test]
    fn test_param_helpers() {
        let params = json!({"title": "x", "channel": "", "severity": "HIGH", "abort_on_failure": true});
        assert_eq!(required_str(&params, "title").unwrap(), "x");
        assert!(required_str(&params, "missing").is_err());
        assert_eq!(optional_str(&params, "channel"), None);
        assert_eq!(severity_param(&params), Severity::High);
        assert!(abort_on_failure(&params));
        assert_eq!(severity_param(&json!({})), Severity::Medium);
    }

    #[test]
    fn test_path_segment() {
        assert_eq!(path_segment("lookup_ioc", "1.2.3.4").unwrap(), "1.2.3.4");
        assert_eq!(
            path_segment("lookup_ioc", "https://a/b?c").unwrap(),
            "https%3A%2F%2Fa%2Fb%3Fc"
        );
        assert_eq!(path_segment("isolate_host", "ws-1/../dc01").unwrap(), "ws-1%2F..%2Fdc01");
        assert!(path_segment("isolate_host", "..").is_err());
        assert!(path_segment("isolate_host", "").is_err());
    }
}
