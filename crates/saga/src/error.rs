//! Saga error types.

use domain::DomainError;
use event_store::{EventId, EventStoreError};
use messaging::MessagingError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A domain command or aggregate load failed.
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    /// The processed-event set or log failed directly.
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A bus publish failed.
    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// An event payload could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The price service failed or returned an error.
    #[error("price service error: {0}")]
    PriceService(String),

    /// The swap worker failed or returned an error.
    #[error("swap worker error: {0}")]
    SwapWorker(String),

    /// An external call exceeded its deadline.
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    /// A handler received an event type it does not process.
    #[error("expected {expected} payload, got {got}")]
    UnexpectedEvent {
        expected: &'static str,
        got: String,
    },

    /// A correlation identifier was missing from event metadata.
    #[error("event {event_id} is missing correlation field '{field}'")]
    MissingCorrelation {
        field: &'static str,
        event_id: EventId,
    },

    /// A command kept losing the optimistic lock.
    #[error("gave up after {attempts} version-conflict retries")]
    ConflictRetriesExhausted { attempts: usize },
}

impl SagaError {
    /// True when the underlying failure is an optimistic-lock loss.
    pub fn is_version_conflict(&self) -> bool {
        match self {
            SagaError::Domain(e) => e.is_version_conflict(),
            SagaError::EventStore(EventStoreError::VersionConflict { .. }) => true,
            _ => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
