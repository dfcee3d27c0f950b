//! Message bus adapter and outbox relay.
//!
//! Producers publish event envelopes with the event type as routing key;
//! consumers bind durable per-subscription queues with manual
//! acknowledgement. `RabbitMqBus` is the broker-backed implementation;
//! `InMemoryBus` provides the same contract for tests. `OutboxRelay` is the
//! background worker draining the transactional outbox onto the bus.

pub mod bus;
pub mod error;
pub mod memory;
pub mod rabbitmq;
pub mod relay;

pub use bus::{EventHandler, HandlerError, MessageBus};
pub use error::{MessagingError, Result};
pub use memory::InMemoryBus;
pub use rabbitmq::RabbitMqBus;
pub use relay::OutboxRelay;
