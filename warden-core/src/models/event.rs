use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::severity::Severity;

/// Domain event kinds published by the data layer.
///
/// Serialized as its dotted wire name (`"alert.created"`), so playbook files and
/// event feeds can name types directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    AlertCreated,
    AlertUpdated,
    AlertResolved,
    IncidentCreated,
    IncidentCorrelated,
    IncidentUpdated,
    AgentHeartbeat,
    AgentOffline,
    IocDetected,
    ScheduleTick,
    Custom(String),
}

impl EventType {
    pub fn name(&self) -> &str {
        match self {
            EventType::AlertCreated => "alert.created",
            EventType::AlertUpdated => "alert.updated",
            EventType::AlertResolved => "alert.resolved",
            EventType::IncidentCreated => "incident.created",
            EventType::IncidentCorrelated => "incident.correlated",
            EventType::IncidentUpdated => "incident.updated",
            EventType::AgentHeartbeat => "agent.heartbeat",
            EventType::AgentOffline => "agent.offline",
            EventType::IocDetected => "ioc.detected",
            EventType::ScheduleTick => "schedule.tick",
            EventType::Custom(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "alert.created" => EventType::AlertCreated,
            "alert.updated" => EventType::AlertUpdated,
            "alert.resolved" => EventType::AlertResolved,
            "incident.created" => EventType::IncidentCreated,
            "incident.correlated" => EventType::IncidentCorrelated,
            "incident.updated" => EventType::IncidentUpdated,
            "agent.heartbeat" => EventType::AgentHeartbeat,
            "agent.offline" => EventType::AgentOffline,
            "ioc.detected" => EventType::IocDetected,
            "schedule.tick" => EventType::ScheduleTick,
            custom => EventType::Custom(custom.to_string()),
        }
    }

    pub fn all_standard() -> Vec<Self> {
        vec![
            EventType::AlertCreated,
            EventType::AlertUpdated,
            EventType::AlertResolved,
            EventType::IncidentCreated,
            EventType::IncidentCorrelated,
            EventType::IncidentUpdated,
            EventType::AgentHeartbeat,
            EventType::AgentOffline,
            EventType::IocDetected,
            EventType::ScheduleTick,
        ]
    }

    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            EventType::AlertCreated | EventType::AlertUpdated | EventType::AlertResolved
        )
    }

    pub fn is_incident(&self) -> bool {
        matches!(
            self,
            EventType::IncidentCreated | EventType::IncidentCorrelated | EventType::IncidentUpdated
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        EventType::from_name(&value)
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        EventType::from_name(value)
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.name().to_string()
    }
}

/// Something that happened in the data layer. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub entity_id: String,
    pub entity_type: String,
    pub organization_id: Uuid,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Event {
    pub fn new(
        event_type: impl Into<EventType>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        organization_id: Uuid,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            organization_id,
            timestamp: Utc::now(),
            data: Map::new(),
        }
    }

    pub fn with_data<V: Serialize>(mut self, key: impl Into<String>, value: V) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.data.insert(key.into(), v);
        }
        self
    }

    /// Merge every key of a JSON object into the event data; non-objects are ignored.
    pub fn with_payload(mut self, payload: Value) -> Self {
        if let Value::Object(map) = payload {
            self.data.extend(map);
        }
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn alert_created(alert_id: impl Into<String>, organization_id: Uuid) -> Self {
        Self::new(EventType::AlertCreated, "alert", alert_id, organization_id)
    }

    pub fn incident_correlated(incident_id: impl Into<String>, organization_id: Uuid) -> Self {
        Self::new(
            EventType::IncidentCorrelated,
            "incident",
            incident_id,
            organization_id,
        )
    }

    pub fn agent_heartbeat(agent_id: impl Into<String>, organization_id: Uuid) -> Self {
        Self::new(EventType::AgentHeartbeat, "agent", agent_id, organization_id)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Severity carried in `data.severity`, if present and recognised.
    pub fn severity(&self) -> Option<Severity> {
        self.data
            .get("severity")
            .and_then(|v| v.as_str())
            .and_then(Severity::parse)
    }

    pub fn title(&self) -> Option<&str> {
        self.data
            .get("title")
            .or_else(|| self.data.get("name"))
            .and_then(|v| v.as_str())
    }

    /// The event as a JSON object, in its wire shape.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names_round_trip() {
        for event_type in EventType::all_standard() {
            assert_eq!(EventType::from_name(event_type.name()), event_type);
        }
        assert_eq!(
            EventType::from_name("billing.updated"),
            EventType::Custom("billing.updated".to_string())
        );
    }

    #[test]
    fn test_event_wire_shape() {
        let org = Uuid::new_v4();
        let event = Event::alert_created("alert-1", org).with_data("severity", "critical");
        let json = event.to_value();

        assert_eq!(json["type"], "alert.created");
        assert_eq!(json["entityId"], "alert-1");
        assert_eq!(json["entityType"], "alert");
        assert_eq!(json["organizationId"], org.to_string());
        assert_eq!(json["data"]["severity"], "critical");
    }

    #[test]
    fn test_event_deserialize_defaults() {
        let org = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"incident.correlated","entityId":"inc-9","entityType":"incident","organizationId":"{}"}}"#,
            org
        );
        let event: Event = serde_json::from_str(&raw).unwrap();

        assert_eq!(event.event_type, EventType::IncidentCorrelated);
        assert!(event.data.is_empty());
        assert!(event.event_type.is_incident());
    }

    #[test]
    fn test_event_helpers() {
        let event = Event::alert_created("a", Uuid::new_v4())
            .with_payload(serde_json::json!({"severity": "High", "title": "Brute force"}));

        assert_eq!(event.severity(), Some(Severity::High));
        assert_eq!(event.title(), Some("Brute force"));
        assert!(event.event_type.is_alert());
    }
}
