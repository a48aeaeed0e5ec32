use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::WardenResult;

pub const EXECUTIONS_CHANNEL: &str = "executions";
pub const NOTIFICATIONS_CHANNEL: &str = "notifications";

/// Outbound sink for UI-facing updates. Implementations must not block.
pub trait BroadcastSink: Send + Sync {
    fn broadcast(&self, channel: &str, payload: Value) -> WardenResult<()>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

impl BroadcastSink for NoopBroadcaster {
    fn broadcast(&self, channel: &str, _payload: Value) -> WardenResult<()> {
        trace!(channel = %channel, "Dropping broadcast");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    pub channel: String,
    pub payload: Value,
    pub sent_at: DateTime<Utc>,
}

/// Forwards messages onto a tokio broadcast channel, for in-process bridges
/// such as a websocket gateway.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BroadcastSink for ChannelBroadcaster {
    fn broadcast(&self, channel: &str, payload: Value) -> WardenResult<()> {
        let message = BroadcastMessage {
            channel: channel.to_string(),
            payload,
            sent_at: Utc::now(),
        };
        // Nobody listening is not an error.
        if self.sender.send(message).is_err() {
            trace!(channel = %channel, "No broadcast receivers");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_broadcaster_delivers() {
        let sink = ChannelBroadcaster::new(8);
        let mut rx = sink.subscribe();

        sink.broadcast(EXECUTIONS_CHANNEL, json!({"status": "running"})).unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.channel, "executions");
        assert_eq!(message.payload["status"], "running");
    }

    #[test]
    fn test_broadcast_without_receivers_is_ok() {
        let sink = ChannelBroadcaster::default();
        assert_eq!(sink.receiver_count(), 0);
        assert!(sink.broadcast(NOTIFICATIONS_CHANNEL, json!({})).is_ok());
        assert!(NoopBroadcaster.broadcast("x", json!(null)).is_ok());
    }
}
