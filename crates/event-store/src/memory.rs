use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventId, EventStoreError, OutboxRow, ProcessedEvent, Result,
    Version,
    outbox::OutboxStore,
    processed::ProcessedEventStore,
    store::{EventStore, validate_batch},
};

#[derive(Default)]
struct Inner {
    events: Vec<EventEnvelope>,
    outbox: Vec<OutboxRow>,
    next_outbox_id: i64,
    processed: HashMap<EventId, ProcessedEvent>,
}

/// In-memory event log for tests.
///
/// Simulates the database uniqueness constraints: appends fail with
/// `VersionConflict` or `Duplicate` exactly as the PostgreSQL store does,
/// and the whole batch is rejected on any conflict.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }

    /// Returns the number of unpublished outbox rows.
    pub async fn unpublished_count(&self) -> usize {
        self.inner
            .read()
            .await
            .outbox
            .iter()
            .filter(|r| !r.published)
            .count()
    }

    /// Re-flags an outbox row as unpublished, simulating a relay crash
    /// between publish and mark.
    pub async fn unmark_published(&self, event_id: EventId) {
        let mut inner = self.inner.write().await;
        for row in inner.outbox.iter_mut() {
            if row.event_id == event_id {
                row.published = false;
                row.published_at = None;
            }
        }
    }

    /// Clears all state.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.events.clear();
        inner.outbox.clear();
        inner.processed.clear();
        inner.next_outbox_id = 0;
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>) -> Result<()> {
        validate_batch(&events)?;

        let mut inner = self.inner.write().await;

        // Check every constraint before mutating so the append is atomic.
        for event in &events {
            if inner.events.iter().any(|e| e.event_id == event.event_id) {
                return Err(EventStoreError::Duplicate(event.event_id));
            }
            let conflict = inner.events.iter().any(|e| {
                e.aggregate_id == event.aggregate_id && e.version == event.version
            });
            if conflict {
                return Err(EventStoreError::VersionConflict {
                    aggregate_id: event.aggregate_id,
                    version: event.version,
                });
            }
        }

        for event in events {
            inner.next_outbox_id += 1;
            let row = OutboxRow {
                id: inner.next_outbox_id,
                event_id: event.event_id,
                aggregate_id: event.aggregate_id,
                event_type: event.event_type.clone(),
                payload: serde_json::to_value(&event)?,
                published: false,
                published_at: None,
                created_at: Utc::now(),
            };
            inner.outbox.push(row);
            inner.events.push(event);
        }

        Ok(())
    }

    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn load_from_version(
        &self,
        aggregate_id: AggregateId,
        min_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id && e.version >= min_version)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }
}

#[async_trait]
impl OutboxStore for InMemoryEventStore {
    async fn fetch_unpublished(&self, limit: i64) -> Result<Vec<OutboxRow>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<_> = inner
            .outbox
            .iter()
            .filter(|r| !r.published)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.created_at, r.id));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn mark_published(&self, ids: &[i64]) -> Result<()> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        for row in inner.outbox.iter_mut() {
            if ids.contains(&row.id) {
                row.published = true;
                row.published_at = Some(now);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryEventStore {
    async fn is_processed(&self, event_id: EventId) -> Result<bool> {
        Ok(self.inner.read().await.processed.contains_key(&event_id))
    }

    async fn mark_processed(
        &self,
        event_id: EventId,
        aggregate_id: AggregateId,
        event_type: &str,
        processed_by: &str,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.processed.entry(event_id).or_insert(ProcessedEvent {
            event_id,
            aggregate_id,
            event_type: event_type.to_string(),
            processed_by: processed_by.to_string(),
            processed_at: Utc::now(),
        });
        Ok(())
    }

    async fn processed_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<ProcessedEvent>> {
        let inner = self.inner.read().await;
        let mut records: Vec<_> = inner
            .processed
            .values()
            .filter(|p| p.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        records.sort_by_key(|p| p.processed_at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(aggregate_id: AggregateId, version: i64, event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Order")
            .event_type(event_type)
            .version(Version::new(version))
            .payload_raw(serde_json::json!({"test": true}))
            .build()
    }

    #[tokio::test]
    async fn append_and_load_single_aggregate() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(vec![
                envelope(id, 1, "OrderAccepted"),
                envelope(id, 2, "PriceQuoted"),
            ])
            .await
            .unwrap();

        let events = store.load(id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].version, Version::first());
        assert_eq!(events[1].event_type, "PriceQuoted");
    }

    #[tokio::test]
    async fn version_conflict_rejects_whole_batch() {
        let store = InMemoryEventStore::new();
        let order = AggregateId::new();
        let position = AggregateId::new();

        store
            .append(vec![envelope(order, 1, "OrderAccepted")])
            .await
            .unwrap();

        // The position event would be fine on its own, but the order event
        // collides: nothing from the batch may land.
        let result = store
            .append(vec![
                envelope(order, 1, "OrderAccepted"),
                envelope(position, 1, "PositionCreated"),
            ])
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::VersionConflict { .. })
        ));
        assert_eq!(store.event_count().await, 1);
        assert!(store.load(position).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_event_id_rejected() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let first = envelope(id, 1, "OrderAccepted");
        let mut replay = envelope(id, 2, "PriceQuoted");
        replay.event_id = first.event_id;

        store.append(vec![first]).await.unwrap();
        let result = store.append(vec![replay]).await;

        assert!(matches!(result, Err(EventStoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn every_committed_event_has_one_outbox_row() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(vec![
                envelope(id, 1, "OrderAccepted"),
                envelope(id, 2, "PriceQuoted"),
            ])
            .await
            .unwrap();

        let rows = store.fetch_unpublished(100).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].event_type, "OrderAccepted");
        assert_eq!(rows[1].event_type, "PriceQuoted");
    }

    #[tokio::test]
    async fn mark_published_removes_from_pending() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(vec![envelope(id, 1, "OrderAccepted")])
            .await
            .unwrap();

        let rows = store.fetch_unpublished(100).await.unwrap();
        store.mark_published(&[rows[0].id]).await.unwrap();

        assert_eq!(store.unpublished_count().await, 0);
        assert!(store.fetch_unpublished(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_unpublished_respects_limit_and_order() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(vec![
                envelope(id, 1, "OrderAccepted"),
                envelope(id, 2, "PriceQuoted"),
                envelope(id, 3, "SwapExecuting"),
            ])
            .await
            .unwrap();

        let rows = store.fetch_unpublished(2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].event_type, "OrderAccepted");
        assert_eq!(rows[1].event_type, "PriceQuoted");
    }

    #[tokio::test]
    async fn processed_set_is_idempotent() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();
        let event_id = EventId::new();

        assert!(!store.is_processed(event_id).await.unwrap());

        store
            .mark_processed(event_id, aggregate_id, "OrderAccepted", "saga-step-1")
            .await
            .unwrap();
        store
            .mark_processed(event_id, aggregate_id, "OrderAccepted", "saga-step-1")
            .await
            .unwrap();

        assert!(store.is_processed(event_id).await.unwrap());
        let records = store.processed_for_aggregate(aggregate_id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].processed_by, "saga-step-1");
    }

    #[tokio::test]
    async fn load_from_version_returns_suffix() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(vec![
                envelope(id, 1, "OrderAccepted"),
                envelope(id, 2, "PriceQuoted"),
                envelope(id, 3, "SwapExecuting"),
            ])
            .await
            .unwrap();

        let tail = store.load_from_version(id, Version::new(2)).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].version, Version::new(2));
    }

    #[tokio::test]
    async fn load_unknown_aggregate_is_empty() {
        let store = InMemoryEventStore::new();
        let events = store.load(AggregateId::new()).await.unwrap();
        assert!(events.is_empty());
    }
}
