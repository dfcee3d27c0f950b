use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur in the messaging layer.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The broker could not be reached within the retry budget.
    #[error("failed to connect to message bus: {0}")]
    Connect(String),

    /// An AMQP operation failed.
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// The relay failed against the outbox.
    #[error("outbox error: {0}")]
    Store(#[from] EventStoreError),

    /// A message body could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
