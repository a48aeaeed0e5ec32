//! Error types for the Warden automation core.
//!
//! Every fallible operation in the crate returns [`WardenResult`]. Errors that
//! originate inside an action never escape the action registry as panics; the
//! registry converts them into failed [`ActionResult`](crate::actions::ActionResult)
//! values so that one misbehaving integration cannot abort a playbook.
//!
//! # Error Codes Reference
//!
//! | Code Range | Category | Description |
//! |------------|----------|-------------|
//! | E1001-E1099 | Config | Environment, config file, and validation errors |
//! | E2001-E2099 | Action | Lookup, permission, parameter, and external call errors |
//! | E3001-E3099 | Playbook | Playbook definition and execution errors |
//! | E4001-E4099 | Trigger | Condition evaluation and template errors |
//! | E5001-E5099 | Notification | Rate limiting, channel, and broadcast errors |
//! | E6001-E6099 | Repository | Playbook and execution storage errors |
//! | E9001-E9099 | General | Internal, IO, and serialization errors |

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Backoff policy for outbound integration calls. Delays double from
/// `base_delay` up to `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first call included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Stretch each delay by up to a quarter so parallel steps do not retry
    /// in lockstep.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Two attempts with a short pause; actions run under their own timeout.
    pub fn for_external_call() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            jitter: true,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Pause before retry number `retry` (0 for the first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if !self.jitter {
            return delay;
        }
        let spread = delay / 4;
        delay + spread.mul_f64(jitter_fraction())
    }
}

fn jitter_fraction() -> f64 {
    let nanos = chrono::Utc::now().timestamp_subsec_nanos();
    f64::from(nanos % 1024) / 1024.0
}

/// The main error type for the Warden core library.
#[derive(Debug, Error)]
pub enum WardenError {
    // ========================================================================
    // Configuration Errors (E1001-E1099)
    // ========================================================================
    /// Required environment variable is missing
    #[error("[E1001] Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// Configuration file parse error
    #[error("[E1002] Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// Invalid configuration value
    #[error("[E1003] Invalid configuration value for '{key}': {message}")]
    InvalidConfigValue { key: String, message: String },

    /// Configuration error (generic)
    #[error("[E1004] Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Action Errors (E2001-E2099)
    // ========================================================================
    /// No action registered under the requested name
    #[error("[E2001] Action not found: {0}")]
    ActionNotFound(String),

    /// An action with the same name is already registered
    #[error("[E2002] Action already registered: {0}")]
    ActionAlreadyRegistered(String),

    /// Parameters failed schema validation
    #[error("[E2003] Invalid parameters for action '{action}': {}", .errors.join("; "))]
    InvalidParameters { action: String, errors: Vec<String> },

    /// Permission check refused the call
    #[error("[E2004] Permission denied for action '{action}': {reason}")]
    PermissionDenied { action: String, reason: String },

    /// The third-party system rejected or failed the call
    #[error("[E2005] External call failed for action '{action}': {message}")]
    ExternalCallFailed { action: String, message: String },

    /// The action did not finish within its time budget
    #[error("[E2006] Action '{action}' timed out after {timeout_secs} seconds")]
    ActionTimeout { action: String, timeout_secs: u64 },

    /// The action declared a schema that cannot be compiled
    #[error("[E2007] Invalid parameter schema for action '{action}': {message}")]
    InvalidActionSchema { action: String, message: String },

    /// The action refused to act on a protected target
    #[error("[E2008] Action '{action}' blocked by safety policy: {reason}")]
    SafetyPolicyViolation { action: String, reason: String },

    // ========================================================================
    // Playbook Errors (E3001-E3099)
    // ========================================================================
    /// Playbook not found
    #[error("[E3001] Playbook not found: {0}")]
    PlaybookNotFound(String),

    /// Playbook definition is not runnable
    #[error("[E3002] Invalid playbook '{playbook}': {message}")]
    InvalidPlaybook { playbook: String, message: String },

    /// Execution record not found
    #[error("[E3003] Execution not found: {0}")]
    ExecutionNotFound(String),

    /// The execution queue has been shut down
    #[error("[E3004] Execution queue is closed")]
    ExecutionQueueClosed,

    // ========================================================================
    // Trigger Errors (E4001-E4099)
    // ========================================================================
    /// A trigger condition could not be evaluated against the event data
    #[error("[E4001] Condition evaluation failed: {0}")]
    ConditionEvaluation(String),

    /// A parameter template could not be rendered
    #[error("[E4002] Template rendering failed: {0}")]
    TemplateError(String),

    // ========================================================================
    // Notification Errors (E5001-E5099)
    // ========================================================================
    /// Hourly notification budget exhausted
    #[error("[E5001] Notification rate limit of {limit}/hour exceeded, retry after {retry_after_secs} seconds")]
    NotificationRateLimited { limit: u32, retry_after_secs: u64 },

    /// A channel is enabled but missing its destination
    #[error("[E5002] Notification channel '{0}' is not configured")]
    ChannelNotConfigured(String),

    /// The real-time broadcast sink rejected a message
    #[error("[E5003] Broadcast failed: {0}")]
    BroadcastFailed(String),

    // ========================================================================
    // Repository Errors (E6001-E6099)
    // ========================================================================
    /// Repository operation failed
    #[error("[E6001] Repository error: {0}")]
    Repository(String),

    // ========================================================================
    // General Errors (E9001-E9099)
    // ========================================================================
    /// Internal error (catch-all for unexpected conditions)
    #[error("[E9001] Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("[E9002] IO error: {0}")]
    IoError(String),

    /// Serialization/deserialization error
    #[error("[E9003] Serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias for Warden operations.
pub type WardenResult<T> = Result<T, WardenError>;

// ============================================================================
// From trait implementations
// ============================================================================

impl From<reqwest::Error> for WardenError {
    fn from(err: reqwest::Error) -> Self {
        let service = err
            .url()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "http".to_string());

        if err.is_timeout() {
            WardenError::ExternalCallFailed {
                action: service,
                message: "request timed out".to_string(),
            }
        } else if err.is_connect() {
            WardenError::ExternalCallFailed {
                action: service,
                message: format!("connection failed: {}", err),
            }
        } else {
            WardenError::ExternalCallFailed {
                action: service,
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        WardenError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for WardenError {
    fn from(err: serde_yaml::Error) -> Self {
        WardenError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for WardenError {
    fn from(err: std::io::Error) -> Self {
        WardenError::IoError(err.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for WardenError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        WardenError::ExternalCallFailed {
            action: "send_email".to_string(),
            message: format!("SMTP delivery failed: {}", err),
        }
    }
}

impl From<config::ConfigError> for WardenError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => WardenError::InvalidConfigValue {
                key,
                message: "Key not found".to_string(),
            },
            config::ConfigError::FileParse { uri, cause } => WardenError::ConfigParseError(
                format!("Failed to parse {}: {}", uri.unwrap_or_default(), cause),
            ),
            config::ConfigError::Type {
                origin,
                unexpected,
                expected,
                key,
            } => WardenError::InvalidConfigValue {
                key: key.unwrap_or_else(|| origin.map(|o| o.to_string()).unwrap_or_default()),
                message: format!("Expected {}, got {}", expected, unexpected),
            },
            _ => WardenError::ConfigParseError(err.to_string()),
        }
    }
}

// ============================================================================
// Error categorization helpers
// ============================================================================

impl WardenError {
    pub fn external(action: impl Into<String>, message: impl Into<String>) -> Self {
        WardenError::ExternalCallFailed {
            action: action.into(),
            message: message.into(),
        }
    }

    pub fn permission_denied(action: impl Into<String>, reason: impl Into<String>) -> Self {
        WardenError::PermissionDenied {
            action: action.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error is related to configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            WardenError::MissingEnvVar(_)
                | WardenError::ConfigParseError(_)
                | WardenError::InvalidConfigValue { .. }
                | WardenError::Config(_)
        )
    }

    /// Returns true if this error was produced at the action boundary.
    pub fn is_action_error(&self) -> bool {
        matches!(
            self,
            WardenError::ActionNotFound(_)
                | WardenError::ActionAlreadyRegistered(_)
                | WardenError::InvalidParameters { .. }
                | WardenError::PermissionDenied { .. }
                | WardenError::ExternalCallFailed { .. }
                | WardenError::ActionTimeout { .. }
                | WardenError::InvalidActionSchema { .. }
                | WardenError::SafetyPolicyViolation { .. }
        )
    }

    /// Returns true if the operation might succeed when attempted again.
    ///
    /// Timeouts count as failed external calls.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WardenError::ExternalCallFailed { .. }
                | WardenError::ActionTimeout { .. }
                | WardenError::NotificationRateLimited { .. }
        )
    }

    /// Returns an error code suitable for logging or external reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            WardenError::MissingEnvVar(_) => "E1001",
            WardenError::ConfigParseError(_) => "E1002",
            WardenError::InvalidConfigValue { .. } => "E1003",
            WardenError::Config(_) => "E1004",
            WardenError::ActionNotFound(_) => "E2001",
            WardenError::ActionAlreadyRegistered(_) => "E2002",
            WardenError::InvalidParameters { .. } => "E2003",
            WardenError::PermissionDenied { .. } => "E2004",
            WardenError::ExternalCallFailed { .. } => "E2005",
            WardenError::ActionTimeout { .. } => "E2006",
            WardenError::InvalidActionSchema { .. } => "E2007",
            WardenError::SafetyPolicyViolation { .. } => "E2008",
            WardenError::PlaybookNotFound(_) => "E3001",
            WardenError::InvalidPlaybook { .. } => "E3002",
            WardenError::ExecutionNotFound(_) => "E3003",
            WardenError::ExecutionQueueClosed => "E3004",
            WardenError::ConditionEvaluation(_) => "E4001",
            WardenError::TemplateError(_) => "E4002",
            WardenError::NotificationRateLimited { .. } => "E5001",
            WardenError::ChannelNotConfigured(_) => "E5002",
            WardenError::BroadcastFailed(_) => "E5003",
            WardenError::Repository(_) => "E6001",
            WardenError::Internal(_) => "E9001",
            WardenError::IoError(_) => "E9002",
            WardenError::SerializationError(_) => "E9003",
        }
    }

    /// Returns a short machine-friendly kind name, stored on failed action results.
    pub fn kind(&self) -> &'static str {
        match self {
            WardenError::ActionNotFound(_) => "action_not_found",
            WardenError::InvalidParameters { .. } => "invalid_parameters",
            WardenError::PermissionDenied { .. } => "permission_denied",
            WardenError::ExternalCallFailed { .. } => "external_call_failed",
            WardenError::ActionTimeout { .. } => "timeout",
            WardenError::SafetyPolicyViolation { .. } => "safety_policy",
            WardenError::ConditionEvaluation(_) => "condition_evaluation",
            WardenError::TemplateError(_) => "template",
            WardenError::NotificationRateLimited { .. } => "rate_limited",
            _ => "internal",
        }
    }

    /// Returns a user-friendly suggestion for how to resolve this error.
    pub fn user_suggestion(&self) -> Option<&'static str> {
        match self {
            WardenError::MissingEnvVar(_) => {
                Some("Create a .env file or set the environment variable")
            }
            WardenError::ActionNotFound(_) => {
                Some("Run 'warden actions' to list the registered actions")
            }
            WardenError::InvalidParameters { .. } => {
                Some("Compare the step parameters with the schema shown by 'warden actions --json'")
            }
            WardenError::ChannelNotConfigured(_) => {
                Some("Set the channel destination in warden.toml or disable the channel")
            }
            WardenError::NotificationRateLimited { .. } => {
                Some("Raise notifications.max_per_hour or wait for the window to roll over")
            }
            _ => None,
        }
    }

    /// Log this error with appropriate severity level.
    pub fn log(&self) {
        let code = self.error_code();
        let suggestion = self.user_suggestion();

        if self.is_transient() {
            warn!(
                error_code = %code,
                suggestion = suggestion,
                "Transient error occurred: {}",
                self
            );
        } else {
            error!(
                error_code = %code,
                suggestion = suggestion,
                "Error occurred: {}",
                self
            );
        }
    }
}

// ============================================================================
// Retry utilities
// ============================================================================

/// Run `operation` until it succeeds, fails with a non-transient error, or the
/// policy runs out of attempts. The last error is returned.
pub async fn retry_async_with_config<F, Fut, T>(
    operation: F,
    config: RetryConfig,
) -> WardenResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = WardenResult<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt = attempt, "Call succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < attempts => {
                let pause = config.backoff(attempt - 1);
                warn!(
                    attempt = attempt,
                    max_attempts = attempts,
                    retry_in_ms = pause.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(pause).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// User-friendly error formatting for CLI
// ============================================================================

/// Format an error for CLI display with suggestions.
pub struct CliErrorDisplay<'a> {
    error: &'a WardenError,
    show_suggestion: bool,
}

impl<'a> CliErrorDisplay<'a> {
    pub fn new(error: &'a WardenError) -> Self {
        Self {
            error,
            show_suggestion: true,
        }
    }

    pub fn without_suggestion(mut self) -> Self {
        self.show_suggestion = false;
        self
    }
}

impl<'a> fmt::Display for CliErrorDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.error)?;

        if self.show_suggestion {
            if let Some(suggestion) = self.error.user_suggestion() {
                writeln!(f)?;
                writeln!(f, "  Suggestion: {}", suggestion)?;
            }
        }

        Ok(())
    }
}
