//! Outbox relay: the background worker publishing committed events.

use std::time::Duration;

use event_store::OutboxStore;
use tokio::sync::watch;

use crate::Result;
use crate::bus::MessageBus;

/// Default polling interval between outbox sweeps.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Default maximum rows fetched per sweep.
pub const DEFAULT_BATCH_SIZE: i64 = 100;

/// Polls the outbox for unpublished rows and publishes them to the bus.
///
/// Guarantees at-least-once publication: a crash between publish and mark
/// republishes the row on the next sweep, and consumers deduplicate via
/// the processed-event set. Rows are published in `created_at` order, which
/// preserves per-aggregate causal order.
pub struct OutboxRelay<S, B> {
    outbox: S,
    bus: B,
    interval: Duration,
    batch_size: i64,
}

impl<S, B> OutboxRelay<S, B>
where
    S: OutboxStore,
    B: MessageBus,
{
    /// Creates a relay with default tuning.
    pub fn new(outbox: S, bus: B) -> Self {
        Self {
            outbox,
            bus,
            interval: DEFAULT_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Overrides the polling interval and batch size.
    pub fn with_tuning(mut self, interval: Duration, batch_size: i64) -> Self {
        self.interval = interval;
        self.batch_size = batch_size;
        self
    }

    /// Runs the polling loop until the shutdown channel fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "outbox relay started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_pending().await {
                        tracing::warn!(error = %e, "outbox sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("outbox relay stopped");
                    return;
                }
            }
        }
    }

    /// Performs one sweep: fetch, publish, mark. Returns how many rows were
    /// published and marked.
    pub async fn publish_pending(&self) -> Result<usize> {
        let rows = self.outbox.fetch_unpublished(self.batch_size).await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut published_ids = Vec::with_capacity(rows.len());
        for row in rows {
            let body = serde_json::to_vec(&row.payload)?;
            match self.bus.publish(&row.event_type, &body).await {
                Ok(()) => published_ids.push(row.id),
                Err(e) => {
                    // Leave the row unpublished; the next sweep retries it.
                    tracing::warn!(event_id = %row.event_id, error = %e, "publish failed");
                }
            }
        }

        let count = published_ids.len();
        if count > 0 {
            self.outbox.mark_published(&published_ids).await?;
            metrics::counter!("outbox_published_total").increment(count as u64);
            tracing::debug!(count, "published outbox batch");
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBus;
    use common::AggregateId;
    use event_store::{EventEnvelope, EventStore, InMemoryEventStore, Version};

    fn envelope(aggregate_id: AggregateId, version: i64, event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Order")
            .event_type(event_type)
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
    }

    #[tokio::test]
    async fn sweep_publishes_and_marks() {
        let store = InMemoryEventStore::new();
        let bus = InMemoryBus::new();
        let relay = OutboxRelay::new(store.clone(), bus.clone());

        let id = AggregateId::new();
        store
            .append(vec![
                envelope(id, 1, "OrderAccepted"),
                envelope(id, 2, "PriceQuoted"),
            ])
            .await
            .unwrap();

        let published = relay.publish_pending().await.unwrap();
        assert_eq!(published, 2);
        assert_eq!(store.unpublished_count().await, 0);
        assert_eq!(bus.publish_log().await, vec!["OrderAccepted", "PriceQuoted"]);
    }

    #[tokio::test]
    async fn empty_outbox_sweep_is_noop() {
        let store = InMemoryEventStore::new();
        let bus = InMemoryBus::new();
        let relay = OutboxRelay::new(store, bus.clone());

        assert_eq!(relay.publish_pending().await.unwrap(), 0);
        assert!(bus.publish_log().await.is_empty());
    }

    #[tokio::test]
    async fn crash_between_publish_and_mark_republishes() {
        let store = InMemoryEventStore::new();
        let bus = InMemoryBus::new();
        let relay = OutboxRelay::new(store.clone(), bus.clone());

        let id = AggregateId::new();
        let event = envelope(id, 1, "OrderAccepted");
        let event_id = event.event_id;
        store.append(vec![event]).await.unwrap();

        relay.publish_pending().await.unwrap();

        // Simulate the relay dying after the publish but before the mark.
        store.unmark_published(event_id).await;

        let republished = relay.publish_pending().await.unwrap();
        assert_eq!(republished, 1);
        assert_eq!(bus.publish_log().await.len(), 2);
    }

    #[tokio::test]
    async fn batch_size_bounds_one_sweep() {
        let store = InMemoryEventStore::new();
        let bus = InMemoryBus::new();
        let relay = OutboxRelay::new(store.clone(), bus.clone())
            .with_tuning(DEFAULT_INTERVAL, 2);

        let id = AggregateId::new();
        store
            .append(vec![
                envelope(id, 1, "A"),
                envelope(id, 2, "B"),
                envelope(id, 3, "C"),
            ])
            .await
            .unwrap();

        assert_eq!(relay.publish_pending().await.unwrap(), 2);
        assert_eq!(store.unpublished_count().await, 1);
        assert_eq!(relay.publish_pending().await.unwrap(), 1);
        assert_eq!(store.unpublished_count().await, 0);
    }
}
