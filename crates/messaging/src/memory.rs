//! In-memory message bus for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Result;
use crate::bus::{EventHandler, MessageBus};

/// How many times a delivery is retried before it is dropped.
///
/// Stands in for the broker's nack-requeue loop; tests that exercise
/// redelivery rely on at least one retry happening.
const MAX_DELIVERY_ATTEMPTS: usize = 5;

#[derive(Default)]
struct Inner {
    handlers: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    publish_log: Vec<String>,
    dropped: usize,
}

/// In-memory bus delivering inline to bound handlers.
///
/// Delivery happens synchronously inside `publish`, so a chain of handlers
/// that publish follow-up events runs to completion before `publish`
/// returns. Handler failures are retried a bounded number of times to
/// mimic nack-requeue.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryBus {
    /// Creates a new bus with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the routing keys of every publish, in order.
    pub async fn publish_log(&self) -> Vec<String> {
        self.inner.read().await.publish_log.clone()
    }

    /// Returns how many deliveries exhausted their retry budget.
    pub async fn dropped_count(&self) -> usize {
        self.inner.read().await.dropped
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, event_type: &str, payload: &[u8]) -> Result<()> {
        let handlers = {
            let mut inner = self.inner.write().await;
            inner.publish_log.push(event_type.to_string());
            inner
                .handlers
                .get(event_type)
                .cloned()
                .unwrap_or_default()
        };

        for handler in handlers {
            let mut delivered = false;
            for attempt in 1..=MAX_DELIVERY_ATTEMPTS {
                match handler.handle(payload).await {
                    Ok(()) => {
                        delivered = true;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(event_type, attempt, error = %e, "handler failed, redelivering");
                    }
                }
            }
            if !delivered {
                self.inner.write().await.dropped += 1;
            }
        }

        Ok(())
    }

    async fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .handlers
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }
}
