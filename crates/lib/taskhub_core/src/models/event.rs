//! Domain events and their wire envelope.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A state change worth telling the rest of the system about.
///
/// Built by the component that performed the mutation and handed by value to
/// the publisher; consumers only ever see it by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub event_type: String,
    pub tenant_id: Option<String>,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl DomainEvent {
    pub fn new(
        event_type: impl Into<String>,
        tenant_id: Option<String>,
        payload: Value,
        source: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            tenant_id,
            payload,
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    /// The envelope as it travels over the broker. The tenant is folded into
    /// `data.tenantId` when the payload is an object that lacks one, so a
    /// consumer can recover it without the message key.
    pub fn to_envelope(&self) -> EventEnvelope {
        let mut data = self.payload.clone();
        if let (Some(tenant), Value::Object(map)) = (&self.tenant_id, &mut data) {
            map.entry("tenantId")
                .or_insert_with(|| Value::String(tenant.clone()));
        }
        EventEnvelope {
            event_type: self.event_type.clone(),
            data,
            source: self.source.clone(),
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Rebuild an event from a received envelope. `key` is the broker
    /// partition key, used as the tenant when `data` does not name one.
    pub fn from_envelope(envelope: EventEnvelope, key: Option<&str>) -> Self {
        let tenant_id = envelope
            .data
            .get("tenantId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                key.filter(|k| *k != DEFAULT_PARTITION_KEY)
                    .map(str::to_string)
            });
        let timestamp = DateTime::parse_from_rfc3339(&envelope.timestamp)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Self {
            event_type: envelope.event_type,
            tenant_id,
            payload: envelope.data,
            timestamp,
            source: envelope.source,
        }
    }

    /// Partition key: the tenant, or a fixed default for tenantless events.
    pub fn partition_key(&self) -> &str {
        self.tenant_id.as_deref().unwrap_or(DEFAULT_PARTITION_KEY)
    }
}

/// Partition key used for events that carry no tenant.
pub const DEFAULT_PARTITION_KEY: &str = "default";

/// UTF-8 JSON wire format: `{eventType, data, source, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_type: String,
    pub data: Value,
    pub source: String,
    /// ISO-8601 timestamp.
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_uses_wire_field_names() {
        let event = DomainEvent::new("project.created", Some("t1".into()), json!({"name": "P"}), "api");
        let wire = serde_json::to_value(event.to_envelope()).unwrap();
        assert_eq!(wire["eventType"], "project.created");
        assert_eq!(wire["data"]["tenantId"], "t1");
        assert_eq!(wire["source"], "api");
        assert!(wire["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn explicit_payload_tenant_is_kept() {
        let event = DomainEvent::new("x", Some("t1".into()), json!({"tenantId": "other"}), "api");
        assert_eq!(event.to_envelope().data["tenantId"], "other");
    }

    #[test]
    fn tenant_recovered_from_key_when_missing_in_data() {
        let envelope = EventEnvelope {
            event_type: "user.login".into(),
            data: json!({"userId": "u1"}),
            source: "api".into(),
            timestamp: "2026-01-02T03:04:05.000Z".into(),
        };
        let event = DomainEvent::from_envelope(envelope.clone(), Some("t7"));
        assert_eq!(event.tenant_id.as_deref(), Some("t7"));

        let tenantless = DomainEvent::from_envelope(envelope, Some(DEFAULT_PARTITION_KEY));
        assert_eq!(tenantless.tenant_id, None);
        assert_eq!(tenantless.partition_key(), DEFAULT_PARTITION_KEY);
    }
}
