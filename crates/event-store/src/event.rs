use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AggregateId;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<EventId> for Uuid {
    fn from(id: EventId) -> Self {
        id.0
    }
}

/// Per-aggregate version number.
///
/// Versions start at 1 for the first event and increment by 1 for each
/// subsequent event. The `(aggregate_id, version)` uniqueness constraint in
/// the log is the system's only concurrency primitive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of an aggregate with no events.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1) assigned to the creation event.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns true for the zero version of a fresh aggregate.
    pub fn is_initial(&self) -> bool {
        self.0 == 0
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Metadata key used to thread the position ID between saga steps.
pub const METADATA_POSITION_ID: &str = "position_id";

/// A stored or in-flight event together with its addressing metadata.
///
/// The envelope is both the row shape of the event log and the wire format
/// on the message bus: the body of a published message is the JSON of the
/// whole envelope, routed by `event_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Globally unique identifier for this event.
    pub event_id: EventId,

    /// The event type, e.g. "OrderAccepted". Doubles as the routing key.
    pub event_type: String,

    /// The aggregate stream this event belongs to.
    pub aggregate_id: AggregateId,

    /// The aggregate kind, "Order" or "Position".
    pub aggregate_type: String,

    /// The aggregate version after this event.
    pub version: Version,

    /// When the event was created.
    pub timestamp: DateTime<Utc>,

    /// Type-specific payload as JSON.
    pub payload: serde_json::Value,

    /// Free-form correlation metadata (e.g. `position_id` between saga steps).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelope {
    /// Creates a new envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Returns a metadata value as a string slice, if present and a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Returns the `position_id` correlation entry, if threaded through.
    pub fn position_id(&self) -> Option<AggregateId> {
        self.metadata_str(METADATA_POSITION_ID)
            .and_then(|s| s.parse().ok())
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    aggregate_id: Option<AggregateId>,
    aggregate_type: Option<String>,
    version: Option<Version>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the aggregate ID.
    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    /// Sets the aggregate type.
    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Sets the version.
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: serde::Serialize>(
        mut self,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Threads a position ID through the envelope metadata.
    pub fn position_id(self, position_id: AggregateId) -> Self {
        self.metadata(
            METADATA_POSITION_ID,
            serde_json::Value::String(position_id.to_string()),
        )
    }

    /// Builds the event envelope.
    ///
    /// # Panics
    ///
    /// Panics if required fields (event_type, aggregate_id, aggregate_type,
    /// version, payload) are not set.
    pub fn build(self) -> EventEnvelope {
        EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.expect("event_type is required"),
            aggregate_id: self.aggregate_id.expect("aggregate_id is required"),
            aggregate_type: self.aggregate_type.expect("aggregate_type is required"),
            version: self.version.expect("version is required"),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload.expect("payload is required"),
            metadata: self.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_new_creates_unique_ids() {
        let id1 = EventId::new();
        let id2 = EventId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn version_ordering() {
        let v1 = Version::new(1);
        let v2 = Version::new(2);
        assert!(v1 < v2);
        assert_eq!(v1.next(), v2);
    }

    #[test]
    fn version_initial_and_first() {
        assert!(Version::initial().is_initial());
        assert_eq!(Version::first().as_i64(), 1);
        assert_eq!(Version::initial().next(), Version::first());
    }

    #[test]
    fn envelope_builder_sets_fields() {
        let aggregate_id = AggregateId::new();
        let payload = serde_json::json!({"from_amount": 1000.0});

        let envelope = EventEnvelope::builder()
            .event_type("OrderAccepted")
            .aggregate_id(aggregate_id)
            .aggregate_type("Order")
            .version(Version::first())
            .payload_raw(payload.clone())
            .build();

        assert_eq!(envelope.event_type, "OrderAccepted");
        assert_eq!(envelope.aggregate_id, aggregate_id);
        assert_eq!(envelope.version, Version::first());
        assert_eq!(envelope.payload, payload);
        assert!(envelope.metadata.is_empty());
    }

    #[test]
    fn envelope_position_id_roundtrip() {
        let position_id = AggregateId::new();
        let envelope = EventEnvelope::builder()
            .event_type("SwapExecuted")
            .aggregate_id(AggregateId::new())
            .aggregate_type("Order")
            .version(Version::new(4))
            .payload_raw(serde_json::json!({}))
            .position_id(position_id)
            .build();

        assert_eq!(envelope.position_id(), Some(position_id));
    }

    #[test]
    fn envelope_position_id_absent() {
        let envelope = EventEnvelope::builder()
            .event_type("OrderAccepted")
            .aggregate_id(AggregateId::new())
            .aggregate_type("Order")
            .version(Version::first())
            .payload_raw(serde_json::json!({}))
            .build();

        assert_eq!(envelope.position_id(), None);
    }

    #[test]
    fn envelope_wire_roundtrip() {
        let envelope = EventEnvelope::builder()
            .event_type("PriceQuoted")
            .aggregate_id(AggregateId::new())
            .aggregate_type("Order")
            .version(Version::new(2))
            .payload_raw(serde_json::json!({"price": 100000.0}))
            .metadata("trace", serde_json::json!("abc"))
            .build();

        let bytes = serde_json::to_vec(&envelope).unwrap();
        let decoded: EventEnvelope = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded.event_id, envelope.event_id);
        assert_eq!(decoded.event_type, "PriceQuoted");
        assert_eq!(decoded.payload["price"], 100000.0);
        assert_eq!(decoded.metadata_str("trace"), Some("abc"));
    }
}
