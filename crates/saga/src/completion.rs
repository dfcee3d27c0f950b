//! Atomic completion of an order and its position.

use std::collections::HashMap;

use common::AggregateId;
use domain::order::SwapExecutedData;
use domain::{AggregateStore, Order, Position};
use event_store::EventStore;

use crate::error::Result;

/// Completes an order and attaches it to its position in one log append.
///
/// Both aggregates' uncommitted events are gathered into a single batch, so
/// the `(aggregate_id, version)` uniqueness on each entry makes the commit
/// all-or-nothing: two workers racing on the same pair produce exactly one
/// winner, and the loser's reload observes the completed order and exits
/// without emitting anything.
pub struct CompleteOrderAndUpdatePosition<S> {
    aggregates: AggregateStore<S>,
}

impl<S: EventStore> CompleteOrderAndUpdatePosition<S> {
    /// Creates the use case over the given aggregate store.
    pub fn new(aggregates: AggregateStore<S>) -> Self {
        Self { aggregates }
    }

    /// Executes the completion.
    ///
    /// Idempotent: when the order is already completed and the position
    /// already carries it, no events are produced and nothing is written.
    #[tracing::instrument(skip(self, swap))]
    pub async fn execute(
        &self,
        order_id: AggregateId,
        position_id: AggregateId,
        swap: &SwapExecutedData,
    ) -> Result<()> {
        let mut order: Order = self.aggregates.load(order_id).await?;
        order.complete().map_err(domain::DomainError::from)?;

        let mut position: Position = self.aggregates.load(position_id).await?;
        // PnL is zero for an order attaching to its freshly created
        // position; there is no prior cost basis to compute against.
        let total_value = swap.from_amount;
        position
            .add_order(order_id, swap.to_amount, total_value, 0.0)
            .map_err(domain::DomainError::from)?;

        let mut batch = AggregateStore::<S>::drain_envelopes(&mut order, HashMap::new())
            .map_err(crate::SagaError::Domain)?;
        batch.extend(
            AggregateStore::<S>::drain_envelopes(&mut position, HashMap::new())
                .map_err(crate::SagaError::Domain)?,
        );

        if batch.is_empty() {
            tracing::debug!(%order_id, %position_id, "completion already committed");
            return Ok(());
        }

        self.aggregates.commit(batch).await?;
        metrics::counter!("orders_completed_total").increment(1);
        tracing::info!(%order_id, %position_id, "order completed and position updated");

        Ok(())
    }
}
