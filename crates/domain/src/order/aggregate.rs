//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use event_store::Version;

use crate::aggregate::Aggregate;

use super::{
    OrderError, OrderEvent, OrderStatus, OrderType,
    events::{
        BalanceCheckFailedData, BalanceCheckPassedData, LimitPriceSetData, OrderAcceptedData,
        OrderCancelledData, OrderCompletedData, OrderFailedData, OrderPartiallyFilledData,
        OrderPlacedInBookData, OrderUpdate, PriceQuotedData, SwapExecutedData, SwapExecutingData,
    },
};

/// Smallest accepted `from_amount`.
pub const MIN_ORDER_AMOUNT: f64 = 10.0;

/// Swap order aggregate root.
///
/// A user's request to swap `from_amount` of `from_currency` into
/// `to_currency`, driven from acceptance through pricing and swap execution
/// to a terminal completed or failed status.
#[derive(Debug, Clone, Default)]
pub struct Order {
    id: Option<AggregateId>,
    user_id: Option<UserId>,
    from_amount: f64,
    from_currency: String,
    to_currency: String,
    to_amount: f64,
    executed_price: f64,
    order_type: OrderType,
    status: OrderStatus,
    version: Version,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    changes: Vec<OrderEvent>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn when(&mut self, event: &Self::Event, at: DateTime<Utc>) {
        match event {
            OrderEvent::OrderAccepted(data) => {
                self.id = Some(data.order_id);
                self.user_id = Some(data.user_id);
                self.from_amount = data.from_amount;
                self.from_currency = data.from_currency.clone();
                self.to_currency = data.to_currency.clone();
                self.order_type = data.order_type;
                self.status = OrderStatus::Pending;
                self.created_at = Some(at);
            }
            OrderEvent::PriceQuoted(data) => {
                self.to_amount = data.to_amount;
                self.executed_price = data.price;
            }
            OrderEvent::SwapExecuting(_) => {
                self.status = OrderStatus::Executing;
            }
            OrderEvent::SwapExecuted(data) => {
                self.to_amount = data.to_amount;
                self.executed_price = data.executed_price;
            }
            OrderEvent::OrderCompleted(data) => {
                self.status = OrderStatus::Completed;
                self.from_amount = data.from_amount;
                self.to_amount = data.to_amount;
                self.executed_price = data.executed_price;
            }
            OrderEvent::OrderFailed(_) => {
                self.status = OrderStatus::Failed;
            }
            OrderEvent::OrderInitialized => {}
            OrderEvent::LimitPriceSet(data) => {
                self.executed_price = data.limit_price;
            }
            OrderEvent::OrderUpdated(update) => {
                if let Some(from_amount) = update.from_amount {
                    self.from_amount = from_amount;
                }
                if let Some(to_amount) = update.to_amount {
                    self.to_amount = to_amount;
                }
            }
            OrderEvent::OrderCancelled(_) => {
                self.status = OrderStatus::Failed;
            }
            OrderEvent::BalanceCheckPassed(_) | OrderEvent::BalanceCheckFailed(_) => {}
            OrderEvent::OrderPlacedInBook(_) => {}
            OrderEvent::OrderPartiallyFilled(data) => {
                self.to_amount += data.filled_amount;
                self.executed_price = data.executed_price;
            }
        }
        self.updated_at = Some(at);
    }

    fn uncommitted(&self) -> &[Self::Event] {
        &self.changes
    }

    fn record(&mut self, event: Self::Event) {
        self.changes.push(event);
    }

    fn take_uncommitted(&mut self) -> Vec<Self::Event> {
        std::mem::take(&mut self.changes)
    }
}

// Query methods
impl Order {
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn from_amount(&self) -> f64 {
        self.from_amount
    }

    pub fn from_currency(&self) -> &str {
        &self.from_currency
    }

    pub fn to_currency(&self) -> &str {
        &self.to_currency
    }

    pub fn to_amount(&self) -> f64 {
        self.to_amount
    }

    pub fn executed_price(&self) -> f64 {
        self.executed_price
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn require_status(&self, expected: OrderStatus, action: &'static str) -> Result<(), OrderError> {
        if self.status != expected {
            return Err(OrderError::InvalidTransition {
                status: self.status,
                action,
            });
        }
        Ok(())
    }

    fn require_limit(&self, action: &'static str) -> Result<(), OrderError> {
        if self.order_type != OrderType::Limit {
            return Err(OrderError::NotLimitOrder { action });
        }
        Ok(())
    }
}

// Command methods
impl Order {
    /// Accepts a new order after validating the business rules.
    pub fn accept(
        &mut self,
        order_id: AggregateId,
        user_id: UserId,
        from_amount: f64,
        from_currency: impl Into<String>,
        to_currency: impl Into<String>,
        order_type: OrderType,
    ) -> Result<(), OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyAccepted);
        }

        if from_amount <= 0.0 {
            return Err(OrderError::AmountNotPositive {
                amount: from_amount,
            });
        }

        if from_amount < MIN_ORDER_AMOUNT {
            return Err(OrderError::BelowMinimum {
                amount: from_amount,
                minimum: MIN_ORDER_AMOUNT,
            });
        }

        self.apply(OrderEvent::OrderAccepted(OrderAcceptedData {
            order_id,
            user_id,
            from_amount,
            from_currency: from_currency.into(),
            to_currency: to_currency.into(),
            order_type,
        }));
        Ok(())
    }

    /// Records that the order's working data has been loaded.
    pub fn initialize(&mut self) -> Result<(), OrderError> {
        self.require_status(OrderStatus::Pending, "initialize")?;
        self.apply(OrderEvent::OrderInitialized);
        Ok(())
    }

    /// Checks the user's balance against the order amount, recording the
    /// outcome either way.
    pub fn check_balances(&mut self, available_balance: f64) -> Result<(), OrderError> {
        self.require_status(OrderStatus::Pending, "check balances")?;

        if available_balance < self.from_amount {
            self.apply(OrderEvent::BalanceCheckFailed(BalanceCheckFailedData {
                required_amount: self.from_amount,
                available_amount: available_balance,
                currency: self.from_currency.clone(),
            }));
        } else {
            self.apply(OrderEvent::BalanceCheckPassed(BalanceCheckPassedData {
                available_amount: available_balance,
                currency: self.from_currency.clone(),
            }));
        }
        Ok(())
    }

    /// Records a market price quote.
    pub fn quote_price(&mut self, price: f64, to_amount: f64) -> Result<(), OrderError> {
        self.require_status(OrderStatus::Pending, "quote price")?;

        if price <= 0.0 || to_amount <= 0.0 {
            return Err(OrderError::InvalidQuote);
        }

        self.apply(OrderEvent::PriceQuoted(PriceQuotedData {
            price,
            to_amount,
            quoted_at: Utc::now(),
        }));
        Ok(())
    }

    /// Sets the limit price on a limit order.
    pub fn set_limit_price(&mut self, limit_price: f64) -> Result<(), OrderError> {
        self.require_limit("set limit price")?;
        self.require_status(OrderStatus::Pending, "set limit price")?;

        if limit_price <= 0.0 {
            return Err(OrderError::InvalidLimitPrice { price: limit_price });
        }

        self.apply(OrderEvent::LimitPriceSet(LimitPriceSetData { limit_price }));
        Ok(())
    }

    /// Places a limit order in an order book.
    pub fn place_in_order_book(
        &mut self,
        order_book_id: impl Into<String>,
    ) -> Result<(), OrderError> {
        self.require_limit("place in order book")?;
        self.require_status(OrderStatus::Pending, "place in order book")?;

        self.apply(OrderEvent::OrderPlacedInBook(OrderPlacedInBookData {
            order_book_id: order_book_id.into(),
            placed_at: Utc::now(),
        }));
        Ok(())
    }

    /// Records the intent to execute the swap before the external call, so
    /// the idempotency key is durable across retries.
    pub fn start_swap_execution(
        &mut self,
        idempotency_key: impl Into<String>,
    ) -> Result<(), OrderError> {
        self.require_status(OrderStatus::Pending, "start swap execution")?;

        self.apply(OrderEvent::SwapExecuting(SwapExecutingData {
            idempotency_key: idempotency_key.into(),
        }));
        Ok(())
    }

    /// Records the settled swap result.
    #[allow(clippy::too_many_arguments)]
    pub fn record_swap_execution(
        &mut self,
        transaction_hash: impl Into<String>,
        from_amount: f64,
        to_amount: f64,
        executed_price: f64,
        fees: f64,
        slippage: f64,
    ) -> Result<(), OrderError> {
        self.require_status(OrderStatus::Executing, "record swap execution")?;

        self.apply(OrderEvent::SwapExecuted(SwapExecutedData {
            transaction_hash: transaction_hash.into(),
            from_amount,
            to_amount,
            executed_price,
            fees,
            slippage,
        }));
        Ok(())
    }

    /// Records a partial fill of a limit order.
    pub fn partially_fill(
        &mut self,
        filled_amount: f64,
        executed_price: f64,
        transaction_hash: impl Into<String>,
    ) -> Result<(), OrderError> {
        self.require_status(OrderStatus::Executing, "partially fill")?;

        if filled_amount <= 0.0 || filled_amount > self.from_amount {
            return Err(OrderError::InvalidFillAmount {
                filled: filled_amount,
                from_amount: self.from_amount,
            });
        }

        self.apply(OrderEvent::OrderPartiallyFilled(OrderPartiallyFilledData {
            filled_amount,
            executed_price,
            transaction_hash: transaction_hash.into(),
            filled_at: Utc::now(),
        }));
        Ok(())
    }

    /// Completes the order. A no-op when already completed.
    pub fn complete(&mut self) -> Result<(), OrderError> {
        if self.status == OrderStatus::Completed {
            return Ok(());
        }

        self.require_status(OrderStatus::Executing, "complete")?;

        self.apply(OrderEvent::OrderCompleted(OrderCompletedData {
            from_amount: self.from_amount,
            to_amount: self.to_amount,
            executed_price: self.executed_price,
            status: OrderStatus::Completed.as_str().to_string(),
        }));
        Ok(())
    }

    /// Fails the order (compensation path). A no-op when already failed;
    /// a completed order can no longer fail.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        if self.status == OrderStatus::Failed {
            return Ok(());
        }

        if self.status == OrderStatus::Completed {
            return Err(OrderError::InvalidTransition {
                status: self.status,
                action: "fail",
            });
        }

        self.apply(OrderEvent::OrderFailed(OrderFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        }));
        Ok(())
    }

    /// Cancels a pending order at the user's request.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        self.require_status(OrderStatus::Pending, "cancel")?;

        self.apply(OrderEvent::OrderCancelled(OrderCancelledData {
            reason: reason.into(),
            cancelled_at: Utc::now(),
        }));
        Ok(())
    }

    /// Applies a recognized-field update to a live order.
    pub fn update(&mut self, update: OrderUpdate) -> Result<(), OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::InvalidTransition {
                status: self.status,
                action: "update",
            });
        }

        if update.is_empty() {
            return Ok(());
        }

        self.apply(OrderEvent::OrderUpdated(update));
        Ok(())
    }
}
