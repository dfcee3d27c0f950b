//! Notification subscriber for terminal order events.
//!
//! Consumes `OrderCompleted` and `OrderFailed`, loads the order for its
//! details, and renders a user-facing message through a [`Notifier`]. The
//! subscriber is the template for any idempotent external consumer: it
//! checks the processed-event set before side-effects and records the
//! event ID after them.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::UserId;
use domain::{AggregateStore, DomainError, Order, OrderEvent};
use event_store::{EventEnvelope, EventStore, ProcessedEventStore};
use messaging::{EventHandler, HandlerError, MessageBus, MessagingError};
use thiserror::Error;

const PROCESSED_BY: &str = "notification-service";

/// Errors that can occur while delivering notifications.
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivery channel for user notifications (Telegram, email, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends a message to a user.
    async fn send_message(&self, user_id: UserId, message: &str)
    -> Result<(), NotifierError>;
}

/// Notifier that just logs, used by the demo wiring.
#[derive(Debug, Clone, Default)]
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send_message(&self, user_id: UserId, message: &str) -> Result<(), NotifierError> {
        tracing::info!(%user_id, message, "notification");
        Ok(())
    }
}

/// Notifier that records messages for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<(UserId, String)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the delivered messages in order.
    pub fn messages(&self) -> Vec<(UserId, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_message(&self, user_id: UserId, message: &str) -> Result<(), NotifierError> {
        self.messages
            .lock()
            .unwrap()
            .push((user_id, message.to_string()));
        Ok(())
    }
}

struct SubscriberContext<S, N> {
    aggregates: AggregateStore<S>,
    processed: S,
    notifier: N,
}

/// Consumes terminal order events and notifies the owning user.
pub struct NotificationSubscriber<S, N> {
    ctx: Arc<SubscriberContext<S, N>>,
}

impl<S, N> Clone for NotificationSubscriber<S, N> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<S, N> NotificationSubscriber<S, N>
where
    S: EventStore + ProcessedEventStore + Clone + 'static,
    N: Notifier + 'static,
{
    /// Creates a subscriber over the given store and delivery channel.
    pub fn new(store: S, notifier: N) -> Self {
        Self {
            ctx: Arc::new(SubscriberContext {
                aggregates: AggregateStore::new(store.clone()),
                processed: store,
                notifier,
            }),
        }
    }

    /// Subscribes to the terminal order events.
    pub async fn start<B: MessageBus>(&self, bus: &B) -> Result<(), MessagingError> {
        bus.subscribe(
            "OrderCompleted",
            Arc::new(TerminalEventHandler {
                ctx: self.ctx.clone(),
            }),
        )
        .await?;
        bus.subscribe(
            "OrderFailed",
            Arc::new(TerminalEventHandler {
                ctx: self.ctx.clone(),
            }),
        )
        .await?;

        tracing::info!("notification subscriber started");
        Ok(())
    }
}

struct TerminalEventHandler<S, N> {
    ctx: Arc<SubscriberContext<S, N>>,
}

#[async_trait]
impl<S, N> EventHandler for TerminalEventHandler<S, N>
where
    S: EventStore + ProcessedEventStore + Clone + 'static,
    N: Notifier + 'static,
{
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        self.ctx.handle(payload).await.map_err(Into::into)
    }
}

impl<S, N> SubscriberContext<S, N>
where
    S: EventStore + ProcessedEventStore + Clone + 'static,
    N: Notifier + 'static,
{
    async fn handle(&self, payload: &[u8]) -> Result<(), NotifierError> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)?;

        if self.processed.is_processed(envelope.event_id).await? {
            tracing::debug!(event_id = %envelope.event_id, "already notified, skipping");
            return Ok(());
        }

        let order: Order = self.aggregates.load(envelope.aggregate_id).await?;
        let user_id = match order.user_id() {
            Some(user_id) => user_id,
            None => {
                tracing::warn!(order_id = %envelope.aggregate_id, "order has no user, dropping notification");
                return Ok(());
            }
        };

        let message = match serde_json::from_value::<OrderEvent>(envelope.payload.clone())? {
            OrderEvent::OrderCompleted(data) => format!(
                "Order completed: {} {} -> {} {} at {}",
                data.from_amount,
                order.from_currency(),
                data.to_amount,
                order.to_currency(),
                data.executed_price,
            ),
            OrderEvent::OrderFailed(data) => format!(
                "Order failed: {} {} -> {} ({})",
                order.from_amount(),
                order.from_currency(),
                order.to_currency(),
                data.reason,
            ),
            _ => {
                tracing::warn!(event_type = %envelope.event_type, "unexpected event, dropping");
                return Ok(());
            }
        };

        self.notifier.send_message(user_id, &message).await?;
        tracing::info!(%user_id, order_id = %envelope.aggregate_id, "notification sent");

        self.processed
            .mark_processed(
                envelope.event_id,
                envelope.aggregate_id,
                &envelope.event_type,
                PROCESSED_BY,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateId;
    use domain::OrderType;
    use event_store::InMemoryEventStore;
    use messaging::{InMemoryBus, OutboxRelay};

    async fn accepted_and_failed_order(
        store: &InMemoryEventStore,
    ) -> (AggregateId, UserId) {
        let aggregates = AggregateStore::new(store.clone());
        let order_id = AggregateId::new();
        let user_id = UserId::new();

        let mut order = Order::default();
        order
            .accept(order_id, user_id, 1000.0, "USDT", "BTC", OrderType::Market)
            .unwrap();
        order.fail("price_unavailable").unwrap();
        aggregates.save(&mut order).await.unwrap();

        (order_id, user_id)
    }

    #[tokio::test]
    async fn failed_order_notifies_user_once() {
        let store = InMemoryEventStore::new();
        let bus = InMemoryBus::new();
        let notifier = RecordingNotifier::new();

        let subscriber = NotificationSubscriber::new(store.clone(), notifier.clone());
        subscriber.start(&bus).await.unwrap();

        let (_, user_id) = accepted_and_failed_order(&store).await;

        let relay = OutboxRelay::new(store.clone(), bus.clone());
        relay.publish_pending().await.unwrap();

        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, user_id);
        assert!(messages[0].1.contains("price_unavailable"));
    }

    #[tokio::test]
    async fn duplicate_delivery_sends_one_notification() {
        let store = InMemoryEventStore::new();
        let bus = InMemoryBus::new();
        let notifier = RecordingNotifier::new();

        let subscriber = NotificationSubscriber::new(store.clone(), notifier.clone());
        subscriber.start(&bus).await.unwrap();

        let (order_id, _) = accepted_and_failed_order(&store).await;

        let relay = OutboxRelay::new(store.clone(), bus.clone());
        relay.publish_pending().await.unwrap();
        assert_eq!(notifier.messages().len(), 1);

        // Simulate a relay crash after publish but before mark: the failed
        // event is republished and the subscriber must deduplicate.
        let stream = store.load(order_id).await.unwrap();
        let failed = stream
            .iter()
            .find(|e| e.event_type == "OrderFailed")
            .unwrap();
        store.unmark_published(failed.event_id).await;
        relay.publish_pending().await.unwrap();

        assert_eq!(notifier.messages().len(), 1);
    }
}
