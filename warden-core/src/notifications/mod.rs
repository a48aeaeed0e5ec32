mod manager;
mod payload;
mod rate_limit;
mod types;

pub use manager::NotificationManager;
pub use payload::{build_channel_payloads, channel_payload, configured_channels};
pub use rate_limit::{SlidingWindowLimiter, HOUR};
pub use types::{ChannelOutcome, Notification, NotificationChannel, NotificationSummary};
