//! Aggregate store: replay-based loading and atomic saving of aggregates
//! through the event log.

use std::collections::HashMap;

use common::AggregateId;
use event_store::{EventEnvelope, EventStore, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Loads aggregates by replaying their streams and persists their
/// uncommitted events as a single log append.
///
/// Version numbering is application-assigned here: envelope versions are
/// computed from the aggregate's loaded version and its uncommitted events,
/// and the log's `(aggregate_id, version)` uniqueness provides the
/// optimistic concurrency check. On a conflict the caller discards the
/// instance and restarts from a fresh load.
#[derive(Clone)]
pub struct AggregateStore<S> {
    store: S,
}

impl<S: EventStore> AggregateStore<S> {
    /// Creates a new aggregate store over the given event log.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying event log.
    pub fn event_store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate by replaying its stream.
    ///
    /// An empty stream is an error: callers that tolerate absence use
    /// [`AggregateStore::try_load`].
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type()))]
    pub async fn load<A: Aggregate>(&self, id: AggregateId) -> Result<A, DomainError> {
        self.try_load(id)
            .await?
            .ok_or(DomainError::AggregateNotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id: id,
            })
    }

    /// Loads an aggregate, returning None for an empty stream.
    pub async fn try_load<A: Aggregate>(&self, id: AggregateId) -> Result<Option<A>, DomainError> {
        let envelopes = self.store.load(id).await?;
        if envelopes.is_empty() {
            return Ok(None);
        }

        let mut aggregate = A::default();
        for envelope in envelopes {
            let event: A::Event = serde_json::from_value(envelope.payload)?;
            aggregate.replay(envelope.version, envelope.timestamp, &event);
        }

        Ok(Some(aggregate))
    }

    /// Saves an aggregate's uncommitted events in one atomic append.
    ///
    /// A no-op when there is nothing uncommitted.
    pub async fn save<A: Aggregate>(&self, aggregate: &mut A) -> Result<(), DomainError> {
        self.save_with_metadata(aggregate, HashMap::new()).await
    }

    /// Saves like [`AggregateStore::save`], stamping the metadata map onto
    /// every produced envelope. Used to thread saga correlation identifiers
    /// (e.g. `position_id`) through stored events.
    pub async fn save_with_metadata<A: Aggregate>(
        &self,
        aggregate: &mut A,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<(), DomainError> {
        let envelopes = Self::drain_envelopes(aggregate, metadata)?;
        if envelopes.is_empty() {
            return Ok(());
        }
        self.store.append(envelopes).await?;
        Ok(())
    }

    /// Appends pre-built envelopes, possibly spanning aggregates.
    ///
    /// The atomic completion use case gathers envelopes from an Order and a
    /// Position and commits them here as one write.
    pub async fn commit(&self, envelopes: Vec<EventEnvelope>) -> Result<(), DomainError> {
        self.store.append(envelopes).await?;
        Ok(())
    }

    /// Drains an aggregate's uncommitted events into envelopes with
    /// sequential application-assigned versions.
    pub fn drain_envelopes<A: Aggregate>(
        aggregate: &mut A,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let events = aggregate.take_uncommitted();
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let aggregate_id = aggregate.id().ok_or(DomainError::MissingAggregateId {
            aggregate_type: A::aggregate_type(),
        })?;

        // The aggregate's version already counts the uncommitted events.
        let base = Version::new(aggregate.version().as_i64() - events.len() as i64);

        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = base;
        for event in &events {
            version = version.next();
            let mut builder = EventEnvelope::builder()
                .aggregate_id(aggregate_id)
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .payload(event)?;
            for (key, value) in &metadata {
                builder = builder.metadata(key.clone(), value.clone());
            }
            envelopes.push(builder.build());
        }

        Ok(envelopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{Order, OrderStatus, OrderType};
    use crate::position::Position;
    use common::UserId;
    use event_store::{EventStoreError, InMemoryEventStore};

    fn accepted(order_id: AggregateId) -> Order {
        let mut order = Order::default();
        order
            .accept(
                order_id,
                UserId::new(),
                1000.0,
                "USDT",
                "BTC",
                OrderType::Market,
            )
            .unwrap();
        order
    }

    #[tokio::test]
    async fn save_then_load_roundtrip() {
        let store = AggregateStore::new(InMemoryEventStore::new());
        let order_id = AggregateId::new();

        let mut order = accepted(order_id);
        order.quote_price(100000.0, 0.01).unwrap();
        store.save(&mut order).await.unwrap();

        assert!(order.uncommitted().is_empty());

        let loaded: Order = store.load(order_id).await.unwrap();
        assert_eq!(loaded.id(), Some(order_id));
        assert_eq!(loaded.status(), OrderStatus::Pending);
        assert_eq!(loaded.executed_price(), 100000.0);
        assert_eq!(loaded.version(), Version::new(2));
        assert!(loaded.uncommitted().is_empty());
    }

    #[tokio::test]
    async fn load_missing_aggregate_fails() {
        let store = AggregateStore::new(InMemoryEventStore::new());
        let result: Result<Order, _> = store.load(AggregateId::new()).await;
        assert!(matches!(result, Err(DomainError::AggregateNotFound { .. })));
    }

    #[tokio::test]
    async fn try_load_missing_aggregate_is_none() {
        let store = AggregateStore::new(InMemoryEventStore::new());
        let result: Option<Order> = store.try_load(AggregateId::new()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn save_nothing_is_noop() {
        let events = InMemoryEventStore::new();
        let store = AggregateStore::new(events.clone());
        let order_id = AggregateId::new();

        let mut order = accepted(order_id);
        store.save(&mut order).await.unwrap();
        assert_eq!(events.event_count().await, 1);

        // No new uncommitted events: second save writes nothing.
        store.save(&mut order).await.unwrap();
        assert_eq!(events.event_count().await, 1);
    }

    #[tokio::test]
    async fn stale_instance_sees_version_conflict() {
        let store = AggregateStore::new(InMemoryEventStore::new());
        let order_id = AggregateId::new();

        let mut order = accepted(order_id);
        store.save(&mut order).await.unwrap();

        let mut first: Order = store.load(order_id).await.unwrap();
        let mut second: Order = store.load(order_id).await.unwrap();

        first.quote_price(100000.0, 0.01).unwrap();
        store.save(&mut first).await.unwrap();

        second.quote_price(99000.0, 0.0101).unwrap();
        let result = store.save(&mut second).await;

        assert!(matches!(
            result,
            Err(DomainError::EventStore(
                EventStoreError::VersionConflict { .. }
            ))
        ));
        assert!(result.unwrap_err().is_version_conflict());
    }

    #[tokio::test]
    async fn versions_are_contiguous_across_saves() {
        let events = InMemoryEventStore::new();
        let store = AggregateStore::new(events.clone());
        let order_id = AggregateId::new();

        let mut order = accepted(order_id);
        store.save(&mut order).await.unwrap();

        let mut order: Order = store.load(order_id).await.unwrap();
        order.quote_price(100000.0, 0.01).unwrap();
        order.start_swap_execution("swap-x").unwrap();
        store.save(&mut order).await.unwrap();

        let stream = events.load(order_id).await.unwrap();
        let versions: Vec<i64> = stream.iter().map(|e| e.version.as_i64()).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn metadata_is_stamped_on_saved_envelopes() {
        let events = InMemoryEventStore::new();
        let store = AggregateStore::new(events.clone());
        let order_id = AggregateId::new();
        let position_id = AggregateId::new();

        let mut order = accepted(order_id);
        let mut metadata = HashMap::new();
        metadata.insert(
            "position_id".to_string(),
            serde_json::Value::String(position_id.to_string()),
        );
        store.save_with_metadata(&mut order, metadata).await.unwrap();

        let stream = events.load(order_id).await.unwrap();
        assert_eq!(stream[0].position_id(), Some(position_id));
    }

    #[tokio::test]
    async fn multi_aggregate_commit_is_atomic() {
        let events = InMemoryEventStore::new();
        let store = AggregateStore::new(events.clone());
        let order_id = AggregateId::new();
        let position_id = AggregateId::new();

        let mut order = accepted(order_id);
        order.quote_price(100000.0, 0.01).unwrap();
        order.start_swap_execution("swap-x").unwrap();
        order
            .record_swap_execution("0xabc", 1000.0, 0.01, 100000.0, 0.5, 0.02)
            .unwrap();
        store.save(&mut order).await.unwrap();

        let mut position = Position::default();
        position.create(position_id, UserId::new()).unwrap();
        store.save(&mut position).await.unwrap();

        let mut order: Order = store.load(order_id).await.unwrap();
        let mut position: Position = store.load(position_id).await.unwrap();
        order.complete().unwrap();
        position.add_order(order_id, 0.01, 1000.0, 0.0).unwrap();

        let mut batch = AggregateStore::<InMemoryEventStore>::drain_envelopes(
            &mut order,
            HashMap::new(),
        )
        .unwrap();
        batch.extend(
            AggregateStore::<InMemoryEventStore>::drain_envelopes(&mut position, HashMap::new())
                .unwrap(),
        );
        store.commit(batch).await.unwrap();

        let order: Order = store.load(order_id).await.unwrap();
        let position: Position = store.load(position_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Completed);
        assert!(position.contains_order(order_id));
    }
}
