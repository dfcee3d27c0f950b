//! Order aggregate and related types.

mod aggregate;
mod events;
mod state;

pub use aggregate::{MIN_ORDER_AMOUNT, Order};
pub use events::{
    BalanceCheckFailedData, BalanceCheckPassedData, LimitPriceSetData, OrderAcceptedData,
    OrderCancelledData, OrderCompletedData, OrderEvent, OrderFailedData, OrderPartiallyFilledData,
    OrderPlacedInBookData, OrderUpdate, PriceQuotedData, SwapExecutedData, SwapExecutingData,
};
pub use state::{OrderStatus, OrderType};

use thiserror::Error;

/// Errors produced by order command validation.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The order stream already has a creation event.
    #[error("order already accepted")]
    AlreadyAccepted,

    /// The command is not allowed in the order's current status.
    #[error("cannot {action}: order status is {status}")]
    InvalidTransition {
        status: OrderStatus,
        action: &'static str,
    },

    /// `from_amount` must be strictly positive.
    #[error("from_amount must be positive, got {amount}")]
    AmountNotPositive { amount: f64 },

    /// `from_amount` is below the minimum order size.
    #[error("minimum order amount is {minimum}, got {amount}")]
    BelowMinimum { amount: f64, minimum: f64 },

    /// Quoted price and target amount must be strictly positive.
    #[error("price and to_amount must be positive")]
    InvalidQuote,

    /// Limit price must be strictly positive.
    #[error("limit price must be positive, got {price}")]
    InvalidLimitPrice { price: f64 },

    /// Fill amount must be in (0, from_amount].
    #[error("invalid filled amount {filled} for order of {from_amount}")]
    InvalidFillAmount { filled: f64, from_amount: f64 },

    /// The command only applies to limit orders.
    #[error("cannot {action}: order is not a limit order")]
    NotLimitOrder { action: &'static str },

    /// The order type string is not "market" or "limit".
    #[error("order_type must be 'market' or 'limit', got '{0}'")]
    UnknownOrderType(String),
}
