use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::models::Severity;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigLoadError> for crate::error::WardenError {
    fn from(err: ConfigLoadError) -> Self {
        match err {
            ConfigLoadError::Config(e) => e.into(),
            ConfigLoadError::MissingRequired(key) => crate::error::WardenError::InvalidConfigValue {
                key,
                message: "Missing required value".to_string(),
            },
            ConfigLoadError::InvalidValue { key, message } => {
                crate::error::WardenError::InvalidConfigValue { key, message }
            }
            ConfigLoadError::Io(e) => e.into(),
        }
    }
}

/// Complete runtime configuration. Treated as immutable; replace the whole value
/// to change it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WardenConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub integrations: IntegrationsConfig,
    #[serde(default)]
    pub protection: ProtectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,

    #[serde(default = "default_refresh_interval")]
    pub playbook_refresh_secs: u64,

    /// Skip a trigger while the same playbook is already running for the same entity.
    #[serde(default)]
    pub dedupe_in_flight: bool,

    #[serde(default = "default_queue_capacity")]
    pub execution_queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub min_severity: Severity,

    #[serde(default = "default_max_per_hour")]
    pub max_per_hour: u32,

    #[serde(default = "default_channel_timeout")]
    pub channel_timeout_secs: u64,

    #[serde(default)]
    pub email: EmailChannelConfig,

    #[serde(default)]
    pub slack: WebhookChannelConfig,

    #[serde(default)]
    pub teams: WebhookChannelConfig,

    #[serde(default)]
    pub webhook: GenericWebhookChannelConfig,

    #[serde(default)]
    pub push: PushChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmailChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Overrides the global minimum severity for this channel.
    #[serde(default)]
    pub min_severity: Option<Severity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub min_severity: Option<Severity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GenericWebhookChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub min_severity: Option<Severity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PushChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub device_tokens: Vec<String>,
    #[serde(default)]
    pub min_severity: Option<Severity>,
}

/// Base URL and credential for one third-party API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_endpoint_timeout")]
    pub timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            timeout_secs: default_endpoint_timeout(),
        }
    }
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_from_address")]
    pub from_address: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: default_from_address(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IntegrationsConfig {
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub push_gateway: EndpointConfig,
    #[serde(default)]
    pub firewall: EndpointConfig,
    #[serde(default)]
    pub edr: EndpointConfig,
    #[serde(default)]
    pub ticketing: EndpointConfig,
    #[serde(default)]
    pub threat_intel: EndpointConfig,
    #[serde(default)]
    pub cloud_identity: EndpointConfig,
    #[serde(default)]
    pub agent_control: EndpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionConfig {
    /// Case-insensitive regexes; matching hostnames are never isolated.
    #[serde(default = "default_critical_host_patterns")]
    pub critical_host_patterns: Vec<String>,

    /// CIDR ranges that may never be blocked at the firewall.
    #[serde(default = "default_protected_ranges")]
    pub protected_ip_ranges: Vec<String>,

    /// Hostnames that may be isolated even though they match a critical pattern.
    #[serde(default)]
    pub isolation_allowlist: Vec<String>,

    /// Commands endpoint agents may be asked to run.
    #[serde(default = "default_agent_commands")]
    pub allowed_agent_commands: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_action_timeout() -> u64 {
    30
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_per_hour() -> u32 {
    50
}

fn default_channel_timeout() -> u64 {
    10
}

fn default_endpoint_timeout() -> u64 {
    15
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_address() -> String {
    "warden@localhost".to_string()
}

fn default_critical_host_patterns() -> Vec<String> {
    vec![
        r"^dc\d*($|[.-])".to_string(),
        r"domain-?controller".to_string(),
        r"^ad\d*($|[.-])".to_string(),
        r"^prod-db".to_string(),
        r"^(core|edge)-(router|fw)".to_string(),
    ]
}

fn default_protected_ranges() -> Vec<String> {
    vec![
        "127.0.0.0/8".to_string(),
        "::1/128".to_string(),
        "169.254.0.0/16".to_string(),
    ]
}

fn default_agent_commands() -> Vec<String> {
    vec![
        "collect_logs".to_string(),
        "collect_forensics".to_string(),
        "kill_process".to_string(),
        "quarantine_file".to_string(),
        "full_scan".to_string(),
    ]
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: default_action_timeout(),
            playbook_refresh_secs: default_refresh_interval(),
            dedupe_in_flight: false,
            execution_queue_capacity: default_queue_capacity(),
        }
    }
}

impl AutomationConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.playbook_refresh_secs)
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            min_severity: Severity::Medium,
            max_per_hour: default_max_per_hour(),
            channel_timeout_secs: default_channel_timeout(),
            email: EmailChannelConfig::default(),
            slack: WebhookChannelConfig::default(),
            teams: WebhookChannelConfig::default(),
            webhook: GenericWebhookChannelConfig::default(),
            push: PushChannelConfig::default(),
        }
    }
}

impl NotificationConfig {
    pub fn channel_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.max_per_hour == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "notifications.max_per_hour".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.channel_timeout_secs == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "notifications.channel_timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.email.enabled && self.email.recipients.is_empty() {
            return Err(ConfigLoadError::MissingRequired(
                "notifications.email.recipients".to_string(),
            ));
        }
        if self.slack.enabled && self.slack.webhook_url.is_empty() {
            return Err(ConfigLoadError::MissingRequired(
                "notifications.slack.webhook_url".to_string(),
            ));
        }
        if self.teams.enabled && self.teams.webhook_url.is_empty() {
            return Err(ConfigLoadError::MissingRequired(
                "notifications.teams.webhook_url".to_string(),
            ));
        }
        if self.webhook.enabled && self.webhook.url.is_empty() {
            return Err(ConfigLoadError::MissingRequired(
                "notifications.webhook.url".to_string(),
            ));
        }
        if self.push.enabled && self.push.device_tokens.is_empty() {
            return Err(ConfigLoadError::MissingRequired(
                "notifications.push.device_tokens".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            critical_host_patterns: default_critical_host_patterns(),
            protected_ip_ranges: default_protected_ranges(),
            isolation_allowlist: Vec::new(),
            allowed_agent_commands: default_agent_commands(),
        }
    }
}

impl ProtectionConfig {
    pub fn compile_host_patterns(&self) -> Result<Vec<Regex>, ConfigLoadError> {
        self.critical_host_patterns
            .iter()
            .map(|p| {
                regex::RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ConfigLoadError::InvalidValue {
                        key: "protection.critical_host_patterns".to_string(),
                        message: format!("'{}': {}", p, e),
                    })
            })
            .collect()
    }

    pub fn parse_protected_ranges(&self) -> Result<Vec<ipnetwork::IpNetwork>, ConfigLoadError> {
        self.protected_ip_ranges
            .iter()
            .map(|r| {
                r.parse::<ipnetwork::IpNetwork>()
                    .map_err(|e| ConfigLoadError::InvalidValue {
                        key: "protection.protected_ip_ranges".to_string(),
                        message: format!("'{}': {}", r, e),
                    })
            })
            .collect()
    }
}

impl WardenConfig {
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from_paths(get_config_paths())
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> Result<Self, ConfigLoadError> {
        load_dotenv_files();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("WARDEN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;

        let mut warden_config: WardenConfig = config.try_deserialize()?;

        if let Ok(level) = std::env::var("WARDEN_LOG_LEVEL") {
            warden_config.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            warden_config.logging.level = level;
        }

        warden_config.validate()?;

        Ok(warden_config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.automation.action_timeout_secs == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "automation.action_timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.automation.playbook_refresh_secs == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "automation.playbook_refresh_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.automation.execution_queue_capacity == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "automation.execution_queue_capacity".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        self.notifications.validate()?;
        self.protection.compile_host_patterns()?;
        self.protection.parse_protected_ranges()?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !valid_levels.contains(&level_lower.as_str()) && !level_lower.contains('=') {
            return Err(ConfigLoadError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Must be one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        Ok(())
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }

    /// Copy with every credential replaced, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let mask = |s: &mut String| {
            if !s.is_empty() {
                *s = "********".to_string();
            }
        };
        let mask_opt = |s: &mut Option<String>| {
            if s.is_some() {
                *s = Some("********".to_string());
            }
        };

        mask(&mut copy.integrations.smtp.password);
        mask(&mut copy.notifications.slack.webhook_url);
        mask(&mut copy.notifications.teams.webhook_url);
        mask_opt(&mut copy.integrations.push_gateway.token);
        mask_opt(&mut copy.integrations.firewall.token);
        mask_opt(&mut copy.integrations.edr.token);
        mask_opt(&mut copy.integrations.ticketing.token);
        mask_opt(&mut copy.integrations.threat_intel.token);
        mask_opt(&mut copy.integrations.cloud_identity.token);
        mask_opt(&mut copy.integrations.agent_control.token);
        for value in copy.notifications.webhook.headers.values_mut() {
            mask(value);
        }
        copy
    }
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("config").join("default.toml"));
        paths.push(cwd.join("config").join("local.toml"));
        paths.push(cwd.join("warden.toml"));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("warden").join("config.toml"));
    }

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".warden").join("config.toml"));
    }

    paths
}

fn load_dotenv_files() {
    let mut env_paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        env_paths.push(cwd.join(".env"));
        env_paths.push(cwd.join(".env.local"));
    }

    if let Some(config_dir) = dirs::config_dir() {
        env_paths.push(config_dir.join("warden").join(".env"));
    }

    for path in env_paths {
        if path.exists() {
            let _ = dotenvy::from_path(&path);
        }
    }
}

pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("warden"))
}
