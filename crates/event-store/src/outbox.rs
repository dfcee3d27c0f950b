//! Transactional outbox rows and the relay-facing store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{AggregateId, EventId, Result};

/// A publish-queue row mirroring one committed event.
///
/// Rows are written in the same transaction as their events; the relay
/// flips `published` after the bus acknowledges the publish.
#[derive(Debug, Clone)]
pub struct OutboxRow {
    /// Storage-assigned row ID, used to mark rows published.
    pub id: i64,

    /// The mirrored event's ID.
    pub event_id: EventId,

    /// The aggregate the event belongs to.
    pub aggregate_id: AggregateId,

    /// Routing key for the bus publish.
    pub event_type: String,

    /// Full event envelope as JSON; becomes the message body verbatim.
    pub payload: serde_json::Value,

    /// Whether the relay has published this row.
    pub published: bool,

    /// When the row was published, if it was.
    pub published_at: Option<DateTime<Utc>>,

    /// When the row was committed. Relay publish order follows this.
    pub created_at: DateTime<Utc>,
}

/// Relay-side view of the outbox.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Returns up to `limit` unpublished rows in `created_at` order.
    async fn fetch_unpublished(&self, limit: i64) -> Result<Vec<OutboxRow>>;

    /// Marks rows as published with the current timestamp.
    async fn mark_published(&self, ids: &[i64]) -> Result<()>;
}
