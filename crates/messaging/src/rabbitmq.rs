//! RabbitMQ-backed message bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};

use crate::bus::{EventHandler, MessageBus};
use crate::{MessagingError, Result};

/// Name of the topic exchange all events flow through.
pub const EXCHANGE: &str = "events";

const PERSISTENT_DELIVERY: u8 = 2;

struct Inner {
    // Dropping the connection tears down the channel, so it lives here for
    // the lifetime of the bus.
    _connection: Connection,
    channel: Channel,
}

/// Message bus over a RabbitMQ topic exchange.
///
/// Publishes persistent messages routed by event type and consumes from
/// durable `queue.<event_type>` queues with manual acknowledgement.
#[derive(Clone)]
pub struct RabbitMqBus {
    inner: Arc<Inner>,
}

impl RabbitMqBus {
    /// Connects to the broker and declares the `events` topic exchange.
    pub async fn connect(url: &str) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        tracing::info!(url, "connected to message bus");

        Ok(Self {
            inner: Arc::new(Inner {
                _connection: connection,
                channel,
            }),
        })
    }

    /// Connects with bounded retry, for broker startup races at boot.
    pub async fn connect_with_retry(
        url: &str,
        max_attempts: u32,
        delay: Duration,
    ) -> Result<Self> {
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            match Self::connect(url).await {
                Ok(bus) => return Ok(bus),
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, error = %e, "message bus connect failed");
                    last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(MessagingError::Connect(format!(
            "gave up after {max_attempts} attempts: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

#[async_trait]
impl MessageBus for RabbitMqBus {
    async fn publish(&self, event_type: &str, payload: &[u8]) -> Result<()> {
        self.inner
            .channel
            .basic_publish(
                EXCHANGE,
                event_type,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(PERSISTENT_DELIVERY),
            )
            .await?
            .await?;

        tracing::debug!(event_type, "published event");
        Ok(())
    }

    async fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> Result<()> {
        let queue_name = format!("queue.{event_type}");

        self.inner
            .channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        self.inner
            .channel
            .queue_bind(
                &queue_name,
                EXCHANGE,
                event_type,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let mut consumer = self
            .inner
            .channel
            .basic_consume(
                &queue_name,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let event_type = event_type.to_string();
        tokio::spawn(async move {
            tracing::info!(event_type, queue = queue_name, "subscribed");

            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        tracing::error!(event_type, error = %e, "consumer stream error");
                        continue;
                    }
                };

                match handler.handle(&delivery.data).await {
                    Ok(()) => {
                        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                            tracing::error!(event_type, error = %e, "ack failed");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(event_type, error = %e, "handler failed, requeueing");
                        metrics::counter!("bus_handler_failures_total").increment(1);
                        let requeue = BasicNackOptions {
                            requeue: true,
                            ..Default::default()
                        };
                        if let Err(e) = delivery.nack(requeue).await {
                            tracing::error!(event_type, error = %e, "nack failed");
                        }
                    }
                }
            }

            tracing::info!(event_type, "consumer stream closed");
        });

        Ok(())
    }
}
