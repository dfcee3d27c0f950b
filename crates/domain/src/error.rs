//! Domain error types.

use common::AggregateId;
use event_store::EventStoreError;
use thiserror::Error;

use crate::order::OrderError;
use crate::position::PositionError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event log.
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A command against the order aggregate was rejected.
    #[error("order error: {0}")]
    Order(#[from] OrderError),

    /// A command against the position aggregate was rejected.
    #[error("position error: {0}")]
    Position(#[from] PositionError),

    /// The aggregate's stream is empty.
    #[error("aggregate not found: {aggregate_type} {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// An aggregate produced events before its creation event assigned an ID.
    #[error("{aggregate_type} has uncommitted events but no identity")]
    MissingAggregateId { aggregate_type: &'static str },

    /// An event payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// True for an optimistic-lock loss, which handlers recover from by
    /// reloading and retrying the command.
    pub fn is_version_conflict(&self) -> bool {
        matches!(
            self,
            DomainError::EventStore(EventStoreError::VersionConflict { .. })
        )
    }
}
