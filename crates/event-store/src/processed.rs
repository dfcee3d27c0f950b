//! Consumer-side idempotency: the durable set of handled event IDs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{AggregateId, EventId, Result};

/// Record of one event a consumer has fully processed.
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub event_id: EventId,
    pub aggregate_id: AggregateId,
    pub event_type: String,
    pub processed_by: String,
    pub processed_at: DateTime<Utc>,
}

/// Durable set of processed event IDs.
///
/// Consumers check membership before side-effects and insert after them, so
/// a crash in between results in a safe replay rather than a lost event.
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Returns true if the event has already been processed by any consumer.
    async fn is_processed(&self, event_id: EventId) -> Result<bool>;

    /// Records an event as processed. Inserting an already-recorded
    /// `event_id` is a no-op.
    async fn mark_processed(
        &self,
        event_id: EventId,
        aggregate_id: AggregateId,
        event_type: &str,
        processed_by: &str,
    ) -> Result<()>;

    /// Returns the processed records for an aggregate, oldest first.
    /// Intended for audit and debugging.
    async fn processed_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<ProcessedEvent>>;
}
