//! The four workflow step handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::order::SwapExecutedData;
use domain::{Aggregate, DomainError, DomainEvent, Order, OrderEvent, OrderStatus, Position};
use event_store::{EventEnvelope, EventStore, METADATA_POSITION_ID, ProcessedEventStore};
use messaging::{EventHandler, HandlerError, MessageBus};

use crate::error::{Result, SagaError};
use crate::events::{
    POSITION_CREATED_FOR_ORDER, POSITION_LINKED_TO_ORDER, PositionCreatedForOrder,
    PositionLinkedToOrder,
};
use crate::orchestrator::{MAX_COMMAND_ATTEMPTS, SagaContext};
use crate::services::{PriceService, SwapRequest, SwapWorker};

/// Slippage tolerance (percent) passed to the swap worker.
const SWAP_SLIPPAGE: f64 = 0.5;

fn idempotency_key_for(order_id: AggregateId) -> String {
    format!("swap-{order_id}")
}

fn position_metadata(position_id: AggregateId) -> HashMap<String, serde_json::Value> {
    let mut metadata = HashMap::new();
    metadata.insert(
        METADATA_POSITION_ID.to_string(),
        serde_json::Value::String(position_id.to_string()),
    );
    metadata
}

/// Step 1: `OrderAccepted` → quote price → `PriceQuoted`.
pub(crate) struct QuotePriceStep<S, B, P, W>(pub(crate) Arc<SagaContext<S, B, P, W>>);

/// Step 2: `PriceQuoted` → create position → `PositionCreatedForOrder`.
pub(crate) struct CreatePositionStep<S, B, P, W>(pub(crate) Arc<SagaContext<S, B, P, W>>);

/// Step 3: `PositionCreatedForOrder` → execute swap → `SwapExecuted`.
pub(crate) struct ExecuteSwapStep<S, B, P, W>(pub(crate) Arc<SagaContext<S, B, P, W>>);

/// Step 4: `SwapExecuted` → atomic completion → `PositionLinkedToOrder`.
pub(crate) struct CompleteOrderStep<S, B, P, W>(pub(crate) Arc<SagaContext<S, B, P, W>>);

macro_rules! impl_event_handler {
    ($step:ident, $method:ident) => {
        #[async_trait]
        impl<S, B, P, W> EventHandler for $step<S, B, P, W>
        where
            S: EventStore + ProcessedEventStore + Clone + 'static,
            B: MessageBus + 'static,
            P: PriceService + 'static,
            W: SwapWorker + 'static,
        {
            async fn handle(&self, payload: &[u8]) -> std::result::Result<(), HandlerError> {
                self.0.$method(payload).await.map_err(Into::into)
            }
        }
    };
}

impl_event_handler!(QuotePriceStep, handle_order_accepted);
impl_event_handler!(CreatePositionStep, handle_price_quoted);
impl_event_handler!(ExecuteSwapStep, handle_position_created);
impl_event_handler!(CompleteOrderStep, handle_swap_executed);

impl<S, B, P, W> SagaContext<S, B, P, W>
where
    S: EventStore + ProcessedEventStore + Clone + 'static,
    B: MessageBus + 'static,
    P: PriceService + 'static,
    W: SwapWorker + 'static,
{
    async fn already_processed(&self, envelope: &EventEnvelope) -> Result<bool> {
        if self.processed.is_processed(envelope.event_id).await? {
            tracing::debug!(
                event_id = %envelope.event_id,
                event_type = %envelope.event_type,
                "event already processed, skipping"
            );
            metrics::counter!("saga_dedup_hits_total").increment(1);
            return Ok(true);
        }
        Ok(false)
    }

    async fn mark(&self, envelope: &EventEnvelope, processed_by: &str) -> Result<()> {
        self.processed
            .mark_processed(
                envelope.event_id,
                envelope.aggregate_id,
                &envelope.event_type,
                processed_by,
            )
            .await?;
        metrics::counter!("saga_steps_completed_total").increment(1);
        Ok(())
    }

    /// Step 1: fetch the market price and record the quote; fail the order
    /// when no price is available.
    #[tracing::instrument(skip(self, payload))]
    pub(crate) async fn handle_order_accepted(&self, payload: &[u8]) -> Result<()> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)?;
        if self.already_processed(&envelope).await? {
            return Ok(());
        }

        let data = match serde_json::from_value::<OrderEvent>(envelope.payload.clone())? {
            OrderEvent::OrderAccepted(data) => data,
            other => {
                return Err(SagaError::UnexpectedEvent {
                    expected: "OrderAccepted",
                    got: other.event_type().to_string(),
                });
            }
        };
        let order_id = envelope.aggregate_id;

        let price = match tokio::time::timeout(
            self.price_timeout,
            self.price
                .get_market_price(&data.from_currency, &data.to_currency),
        )
        .await
        {
            Ok(Ok(price)) => Some(price),
            Ok(Err(e)) => {
                tracing::warn!(%order_id, error = %e, "price fetch failed");
                None
            }
            Err(_) => {
                tracing::warn!(%order_id, "price fetch timed out");
                None
            }
        };

        match price {
            Some(price) => {
                let to_amount = data.from_amount / price;
                let mut attempts = 0;
                loop {
                    attempts += 1;
                    let mut order: Order = self.aggregates.load(order_id).await?;
                    if order.is_terminal() {
                        tracing::info!(%order_id, status = %order.status(), "order already terminal, skipping quote");
                        break;
                    }
                    order
                        .quote_price(price, to_amount)
                        .map_err(DomainError::from)?;
                    match self.aggregates.save(&mut order).await {
                        Ok(()) => {
                            tracing::info!(%order_id, price, to_amount, "price quoted");
                            break;
                        }
                        Err(e) if e.is_version_conflict() && attempts < MAX_COMMAND_ATTEMPTS => {
                            continue;
                        }
                        Err(e) if e.is_version_conflict() => {
                            return Err(SagaError::ConflictRetriesExhausted { attempts });
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            None => {
                self.compensate_order_failed(order_id, "price_unavailable")
                    .await?;
            }
        }

        self.mark(&envelope, "order-saga-step1").await
    }

    /// Step 2: allocate a position for the order's user and publish the
    /// coordination event that hands the position ID to step 3.
    #[tracing::instrument(skip(self, payload))]
    pub(crate) async fn handle_price_quoted(&self, payload: &[u8]) -> Result<()> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)?;
        if self.already_processed(&envelope).await? {
            return Ok(());
        }
        let order_id = envelope.aggregate_id;

        let order: Order = self.aggregates.load(order_id).await?;
        if order.is_terminal() {
            tracing::info!(%order_id, status = %order.status(), "order already terminal, skipping position");
            return self.mark(&envelope, "order-saga-step2").await;
        }
        let user_id = order.user_id().ok_or(SagaError::MissingCorrelation {
            field: "user_id",
            event_id: envelope.event_id,
        })?;

        let position_id = AggregateId::new();
        let mut position = Position::default();
        position
            .create(position_id, user_id)
            .map_err(DomainError::from)?;
        self.aggregates.save(&mut position).await?;
        tracing::info!(%order_id, %position_id, "position created");

        let coordination = EventEnvelope::builder()
            .event_type(POSITION_CREATED_FOR_ORDER)
            .aggregate_id(order_id)
            .aggregate_type("Order")
            .version(envelope.version.next())
            .payload(&PositionCreatedForOrder {
                position_id,
                user_id,
            })?
            .position_id(position_id)
            .build();
        self.bus
            .publish(POSITION_CREATED_FOR_ORDER, &serde_json::to_vec(&coordination)?)
            .await?;

        self.mark(&envelope, "order-saga-step2").await
    }

    /// Step 3: record the execution intent, call the swap worker, record
    /// the result, and hand the position ID to step 4. The slowest step;
    /// multiple copies of this handler may drain the queue in parallel.
    #[tracing::instrument(skip(self, payload))]
    pub(crate) async fn handle_position_created(&self, payload: &[u8]) -> Result<()> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)?;
        if self.already_processed(&envelope).await? {
            return Ok(());
        }

        let coordination: PositionCreatedForOrder =
            serde_json::from_value(envelope.payload.clone())?;
        let position_id = coordination.position_id;
        let order_id = envelope.aggregate_id;
        let idempotency_key = idempotency_key_for(order_id);

        // Record the intent before calling out, so the idempotency key is
        // durable across a crash mid-call.
        let mut attempts = 0;
        let order = loop {
            attempts += 1;
            let mut order: Order = self.aggregates.load(order_id).await?;
            match order.status() {
                OrderStatus::Completed | OrderStatus::Failed => {
                    tracing::info!(%order_id, status = %order.status(), "order already terminal, skipping swap");
                    return self.mark(&envelope, "order-saga-step3").await;
                }
                // A replayed delivery finds the intent already recorded.
                OrderStatus::Executing => break order,
                OrderStatus::Pending => {}
            }
            order
                .start_swap_execution(idempotency_key.clone())
                .map_err(DomainError::from)?;
            match self
                .aggregates
                .save_with_metadata(&mut order, position_metadata(position_id))
                .await
            {
                Ok(()) => break order,
                Err(e) if e.is_version_conflict() && attempts < MAX_COMMAND_ATTEMPTS => continue,
                Err(e) if e.is_version_conflict() => {
                    return Err(SagaError::ConflictRetriesExhausted { attempts });
                }
                Err(e) => return Err(e.into()),
            }
        };

        let request = SwapRequest {
            idempotency_key,
            from_currency: order.from_currency().to_string(),
            to_currency: order.to_currency().to_string(),
            from_amount: order.from_amount(),
            slippage: SWAP_SLIPPAGE,
        };

        tracing::info!(%order_id, "executing swap");
        let result = match tokio::time::timeout(self.swap_timeout, self.swap.execute_swap(request))
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::warn!(%order_id, error = %e, "swap execution failed");
                self.compensate_swap_failed(order_id, position_id, &e.to_string())
                    .await?;
                return self.mark(&envelope, "order-saga-step3").await;
            }
            Err(_) => {
                tracing::warn!(%order_id, "swap execution timed out");
                self.compensate_swap_failed(order_id, position_id, "swap_timeout")
                    .await?;
                return self.mark(&envelope, "order-saga-step3").await;
            }
        };
        tracing::info!(%order_id, tx_hash = %result.transaction_hash, "swap executed");

        // Record the settled result.
        let mut attempts = 0;
        let order = loop {
            attempts += 1;
            let mut order: Order = self.aggregates.load(order_id).await?;
            if order.status() != OrderStatus::Executing {
                break order;
            }
            order
                .record_swap_execution(
                    result.transaction_hash.clone(),
                    order.from_amount(),
                    result.to_amount,
                    result.executed_price,
                    result.fees,
                    result.slippage,
                )
                .map_err(DomainError::from)?;
            match self
                .aggregates
                .save_with_metadata(&mut order, position_metadata(position_id))
                .await
            {
                Ok(()) => break order,
                Err(e) if e.is_version_conflict() && attempts < MAX_COMMAND_ATTEMPTS => continue,
                Err(e) if e.is_version_conflict() => {
                    return Err(SagaError::ConflictRetriesExhausted { attempts });
                }
                Err(e) => return Err(e.into()),
            }
        };

        let synthetic = EventEnvelope::builder()
            .event_type("SwapExecuted")
            .aggregate_id(order_id)
            .aggregate_type("Order")
            .version(order.version())
            .payload(&OrderEvent::SwapExecuted(SwapExecutedData {
                transaction_hash: result.transaction_hash.clone(),
                from_amount: order.from_amount(),
                to_amount: result.to_amount,
                executed_price: result.executed_price,
                fees: result.fees,
                slippage: result.slippage,
            }))?
            .position_id(position_id)
            .build();
        self.bus
            .publish("SwapExecuted", &serde_json::to_vec(&synthetic)?)
            .await?;

        self.mark(&envelope, "order-saga-step3").await
    }

    /// Step 4: atomically complete order and position. Non-compensable:
    /// the swap has settled, so any failure here surfaces and the delivery
    /// is requeued rather than discarded.
    #[tracing::instrument(skip(self, payload))]
    pub(crate) async fn handle_swap_executed(&self, payload: &[u8]) -> Result<()> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)?;
        if self.already_processed(&envelope).await? {
            return Ok(());
        }

        let position_id = envelope
            .position_id()
            .ok_or(SagaError::MissingCorrelation {
                field: METADATA_POSITION_ID,
                event_id: envelope.event_id,
            })?;
        let order_id = envelope.aggregate_id;

        let data = match serde_json::from_value::<OrderEvent>(envelope.payload.clone())? {
            OrderEvent::SwapExecuted(data) => data,
            other => {
                return Err(SagaError::UnexpectedEvent {
                    expected: "SwapExecuted",
                    got: other.event_type().to_string(),
                });
            }
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.completion.execute(order_id, position_id, &data).await {
                Ok(()) => break,
                Err(e) if e.is_version_conflict() && attempts < MAX_COMMAND_ATTEMPTS => continue,
                Err(e) if e.is_version_conflict() => {
                    return Err(SagaError::ConflictRetriesExhausted { attempts });
                }
                Err(e) => return Err(e),
            }
        }

        let linked = EventEnvelope::builder()
            .event_type(POSITION_LINKED_TO_ORDER)
            .aggregate_id(order_id)
            .aggregate_type("Order")
            .version(envelope.version.next())
            .payload(&PositionLinkedToOrder {
                position_id,
                order_id,
            })?
            .position_id(position_id)
            .build();
        self.bus
            .publish(POSITION_LINKED_TO_ORDER, &serde_json::to_vec(&linked)?)
            .await?;

        self.mark(&envelope, "order-saga-step4").await
    }
}
