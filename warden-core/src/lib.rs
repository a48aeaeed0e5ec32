#![allow(
    clippy::needless_borrows_for_generic_args,
    clippy::manual_range_contains,
    clippy::assertions_on_constants,
    clippy::type_complexity,
    clippy::option_option
)]

pub mod actions;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod notifications;
pub mod playbooks;
pub mod service;
pub mod triggers;

pub use actions::{
    builtin_actions, builtin_registry, register_builtin_actions, validate_against, Action,
    ActionCategory, ActionContext, ActionDescriptor, ActionRegistry, ActionResult, Actor,
    ParameterValidator, UserRole, BUILTIN_ACTIONS,
};
pub use broadcast::{
    BroadcastMessage, BroadcastSink, ChannelBroadcaster, NoopBroadcaster, EXECUTIONS_CHANNEL,
    NOTIFICATIONS_CHANNEL,
};
pub use config::{
    get_config_dir, AutomationConfig, ConfigLoadError, EndpointConfig, IntegrationsConfig,
    LoggingConfig, NotificationConfig, ProtectionConfig, SmtpConfig, WardenConfig,
};
pub use error::{retry_async_with_config, CliErrorDisplay, RetryConfig, WardenError, WardenResult};
pub use events::{EventBus, EventBusStats, EventFilter, EventHandler, FnHandler, Subscription};
pub use models::{
    Event, EventType, ExecutionStatus, Playbook, PlaybookExecution, PlaybookStep, Severity,
    StepResult, TriggerSource,
};
pub use notifications::{
    ChannelOutcome, Notification, NotificationChannel, NotificationManager, NotificationSummary,
    SlidingWindowLimiter,
};
pub use playbooks::{
    load_playbooks_file, parse_playbooks, ExecutionRequest, InMemoryPlaybookRepository,
    PlaybookExecutor, PlaybookRepository,
};
pub use service::AutomationService;
pub use triggers::{ConditionOp, FieldCondition, TemplateScope, TriggerCondition, TriggerEngine};
