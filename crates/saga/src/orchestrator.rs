//! Saga orchestrator wiring and compensations.

use std::sync::Arc;
use std::time::Duration;

use common::AggregateId;
use domain::{AggregateStore, DomainError, Order, Position};
use event_store::{EventStore, ProcessedEventStore};
use messaging::MessageBus;

use crate::completion::CompleteOrderAndUpdatePosition;
use crate::error::{Result, SagaError};
use crate::services::{PriceService, SwapWorker};
use crate::steps::{CompleteOrderStep, CreatePositionStep, ExecuteSwapStep, QuotePriceStep};

/// How many times a handler reloads and retries a command after losing the
/// optimistic lock before surfacing the error for requeue.
pub(crate) const MAX_COMMAND_ATTEMPTS: usize = 3;

/// Default deadline for the price service call.
pub const DEFAULT_PRICE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default deadline for the swap worker call.
pub const DEFAULT_SWAP_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) struct SagaContext<S, B, P, W> {
    pub(crate) aggregates: AggregateStore<S>,
    pub(crate) processed: S,
    pub(crate) bus: B,
    pub(crate) price: P,
    pub(crate) swap: W,
    pub(crate) completion: CompleteOrderAndUpdatePosition<S>,
    pub(crate) price_timeout: Duration,
    pub(crate) swap_timeout: Duration,
}

/// Drives the market-order workflow as four independently subscribed
/// handlers.
///
/// Each handler follows the same skeleton: decode, dedup-check, load
/// aggregates fresh from the log, act, save, publish the follow-up, and
/// only then record the event as processed. A crash before the final mark
/// replays the step safely because every side-effect is idempotent.
pub struct SagaOrchestrator<S, B, P, W> {
    ctx: Arc<SagaContext<S, B, P, W>>,
}

impl<S, B, P, W> Clone for SagaOrchestrator<S, B, P, W> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<S, B, P, W> SagaOrchestrator<S, B, P, W>
where
    S: EventStore + ProcessedEventStore + Clone + 'static,
    B: MessageBus + 'static,
    P: PriceService + 'static,
    W: SwapWorker + 'static,
{
    /// Creates an orchestrator over the given stores, bus, and external
    /// services.
    pub fn new(store: S, bus: B, price: P, swap: W) -> Self {
        let aggregates = AggregateStore::new(store.clone());
        let completion = CompleteOrderAndUpdatePosition::new(AggregateStore::new(store.clone()));
        Self {
            ctx: Arc::new(SagaContext {
                aggregates,
                processed: store,
                bus,
                price,
                swap,
                completion,
                price_timeout: DEFAULT_PRICE_TIMEOUT,
                swap_timeout: DEFAULT_SWAP_TIMEOUT,
            }),
        }
    }

    /// Overrides the external-call deadlines (mainly for tests).
    pub fn with_timeouts(mut self, price_timeout: Duration, swap_timeout: Duration) -> Self {
        let ctx = Arc::get_mut(&mut self.ctx)
            .expect("with_timeouts must be called before the orchestrator is shared");
        ctx.price_timeout = price_timeout;
        ctx.swap_timeout = swap_timeout;
        self
    }

    /// Subscribes the four step handlers to their trigger events.
    pub async fn start(&self) -> Result<()> {
        self.ctx
            .bus
            .subscribe("OrderAccepted", Arc::new(QuotePriceStep(self.ctx.clone())))
            .await?;
        self.ctx
            .bus
            .subscribe("PriceQuoted", Arc::new(CreatePositionStep(self.ctx.clone())))
            .await?;
        self.ctx
            .bus
            .subscribe(
                crate::events::POSITION_CREATED_FOR_ORDER,
                Arc::new(ExecuteSwapStep(self.ctx.clone())),
            )
            .await?;
        self.ctx
            .bus
            .subscribe("SwapExecuted", Arc::new(CompleteOrderStep(self.ctx.clone())))
            .await?;

        tracing::info!("saga orchestrator subscribed to workflow events");
        Ok(())
    }
}

impl<S, B, P, W> SagaContext<S, B, P, W>
where
    S: EventStore + ProcessedEventStore + Clone + 'static,
    B: MessageBus + 'static,
    P: PriceService + 'static,
    W: SwapWorker + 'static,
{
    /// Marks the order failed. Idempotent through `Order::fail`.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn compensate_order_failed(
        &self,
        order_id: AggregateId,
        reason: &str,
    ) -> Result<()> {
        tracing::warn!(%order_id, reason, "compensation: failing order");
        metrics::counter!("saga_compensations_total").increment(1);

        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut order: Order = self.aggregates.load(order_id).await?;
            order.fail(reason).map_err(DomainError::from)?;
            match self.aggregates.save(&mut order).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_version_conflict() && attempts < MAX_COMMAND_ATTEMPTS => continue,
                Err(e) if e.is_version_conflict() => {
                    return Err(SagaError::ConflictRetriesExhausted { attempts });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Rolls back order and position after a failed swap. Valid only while
    /// the swap has not settled; step 4 has no compensation path.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn compensate_swap_failed(
        &self,
        order_id: AggregateId,
        position_id: AggregateId,
        reason: &str,
    ) -> Result<()> {
        self.compensate_order_failed(order_id, reason).await?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut position: Position = self.aggregates.load(position_id).await?;
            position
                .close("order_failed")
                .map_err(DomainError::from)?;
            match self.aggregates.save(&mut position).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_version_conflict() && attempts < MAX_COMMAND_ATTEMPTS => continue,
                Err(e) if e.is_version_conflict() => {
                    return Err(SagaError::ConflictRetriesExhausted { attempts });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
