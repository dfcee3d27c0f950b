//! Core aggregate and domain event traits.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events are immutable facts, named in past tense. Each aggregate's
/// events form a tagged enum, so replaying an unknown event type fails at
/// deserialization (strict replay).
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name, e.g. "OrderAccepted".
    ///
    /// Used as the stored `event_type` column and the bus routing key.
    fn event_type(&self) -> &'static str;
}

/// Trait for event-sourced aggregates.
///
/// An aggregate is a pure in-memory state machine driven by its event
/// stream. Commands validate business rules and call [`Aggregate::apply`]
/// with new events; the store replays committed events through
/// [`Aggregate::replay`]. The `when` transition must be deterministic and
/// side-effect free: committed events are facts and cannot be rejected.
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The event family this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The error type produced by command validation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the aggregate type name ("Order" or "Position").
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's identifier, or None before creation.
    fn id(&self) -> Option<AggregateId>;

    /// Returns the current version (0 for a fresh aggregate).
    fn version(&self) -> Version;

    /// Sets the version. Called when applying and replaying events.
    fn set_version(&mut self, version: Version);

    /// Pure state transition shared by apply and replay.
    ///
    /// `at` is the event's timestamp: wall-clock now for new events, the
    /// stored envelope timestamp during replay.
    fn when(&mut self, event: &Self::Event, at: DateTime<Utc>);

    /// Events produced by commands and not yet persisted.
    fn uncommitted(&self) -> &[Self::Event];

    /// Records a freshly produced event in the uncommitted list.
    fn record(&mut self, event: Self::Event);

    /// Drains the uncommitted list, returning the events in order.
    fn take_uncommitted(&mut self) -> Vec<Self::Event>;

    /// Applies a new event: transition, bump the version, and record it
    /// for the next save.
    fn apply(&mut self, event: Self::Event) {
        self.when(&event, Utc::now());
        self.set_version(self.version().next());
        self.record(event);
    }

    /// Replays a committed event at its stored version. Does not touch the
    /// uncommitted list.
    fn replay(&mut self, version: Version, at: DateTime<Utc>, event: &Self::Event) {
        self.when(event, at);
        self.set_version(version);
    }
}
