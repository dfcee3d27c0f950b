use async_trait::async_trait;

use crate::Result;

/// Error type returned by event handlers.
///
/// A handler error causes the delivery to be negatively acknowledged and
/// requeued; the concrete error only matters for logging.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A consumer callback bound to one event type.
///
/// Handlers must be idempotent: delivery is at-least-once, and a crash
/// between side-effects and acknowledgement replays the message.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Processes one message body (the JSON of an event envelope).
    async fn handle(&self, payload: &[u8]) -> std::result::Result<(), HandlerError>;
}

/// Topic-routed publish/subscribe with manual acknowledgement.
///
/// Publishing routes by `event_type`; each subscription owns a durable
/// queue bound to exactly that routing key. On handler success the message
/// is acked; on failure it is nacked and requeued for another attempt.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a message with persistent delivery.
    async fn publish(&self, event_type: &str, payload: &[u8]) -> Result<()>;

    /// Binds `handler` to the queue for `event_type` and starts consuming.
    async fn subscribe(
        &self,
        event_type: &str,
        handler: std::sync::Arc<dyn EventHandler>,
    ) -> Result<()>;
}
