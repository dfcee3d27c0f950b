use thiserror::Error;

use crate::{AggregateId, EventId, Version};

/// Errors that can occur when interacting with the event log.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// A `(aggregate_id, version)` pair already exists: the optimistic lock
    /// was lost. Callers reload the aggregate and retry the command.
    #[error("version conflict for aggregate {aggregate_id} at version {version}")]
    VersionConflict {
        aggregate_id: AggregateId,
        version: Version,
    },

    /// The event ID has already been committed.
    #[error("duplicate event: {0}")]
    Duplicate(EventId),

    /// The batch handed to `append` is malformed (empty, gapped versions,
    /// or repeated event IDs).
    #[error("invalid append batch: {0}")]
    InvalidBatch(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
