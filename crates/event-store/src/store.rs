use std::collections::HashMap;

use async_trait::async_trait;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

/// Core trait for event log implementations.
///
/// The log is append-only and organized as streams keyed by `aggregate_id`.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events to the log atomically.
    ///
    /// The batch may span multiple aggregates (the atomic completion step
    /// commits an Order event and a Position event together). Either every
    /// event and its outbox mirror row commit, or none do. Fails with
    /// [`EventStoreError::VersionConflict`] if any `(aggregate_id, version)`
    /// already exists, or [`EventStoreError::Duplicate`] if any `event_id`
    /// is already committed. Callers are expected to reload and retry on a
    /// version conflict.
    async fn append(&self, events: Vec<EventEnvelope>) -> Result<()>;

    /// Returns the full stream for an aggregate in ascending version order.
    ///
    /// An empty vector means the aggregate does not exist.
    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>>;

    /// Returns the stream starting at `min_version` (inclusive).
    async fn load_from_version(
        &self,
        aggregate_id: AggregateId,
        min_version: Version,
    ) -> Result<Vec<EventEnvelope>>;
}

/// Validates a batch before it is handed to the storage backend.
///
/// Within the batch, versions must be contiguous and ascending per aggregate
/// and event IDs must be distinct. Cross-batch conflicts are left to the
/// database constraints.
pub fn validate_batch(events: &[EventEnvelope]) -> Result<()> {
    if events.is_empty() {
        return Err(EventStoreError::InvalidBatch(
            "cannot append an empty batch".to_string(),
        ));
    }

    let mut seen_ids = std::collections::HashSet::new();
    let mut last_version: HashMap<AggregateId, Version> = HashMap::new();

    for event in events {
        if !seen_ids.insert(event.event_id) {
            return Err(EventStoreError::InvalidBatch(format!(
                "event id {} repeated within batch",
                event.event_id
            )));
        }

        if let Some(prev) = last_version.get(&event.aggregate_id) {
            if event.version != prev.next() {
                return Err(EventStoreError::InvalidBatch(format!(
                    "versions for aggregate {} must be contiguous: {} follows {}",
                    event.aggregate_id, event.version, prev
                )));
            }
        }
        last_version.insert(event.aggregate_id, event.version);
    }

    Ok(())
}
