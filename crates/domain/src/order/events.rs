//! Order domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::OrderType;

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was accepted after validation.
    OrderAccepted(OrderAcceptedData),

    /// Market price quote was recorded.
    PriceQuoted(PriceQuotedData),

    /// Swap execution was started; intent recorded before the external call.
    SwapExecuting(SwapExecutingData),

    /// The on-chain swap settled.
    SwapExecuted(SwapExecutedData),

    /// Order reached its completed terminal state.
    OrderCompleted(OrderCompletedData),

    /// Order reached its failed terminal state.
    OrderFailed(OrderFailedData),

    /// Order data was loaded and prepared.
    OrderInitialized,

    /// A limit price was set on a limit order.
    LimitPriceSet(LimitPriceSetData),

    /// Recognized order parameters were changed.
    OrderUpdated(OrderUpdate),

    /// Order was cancelled by the user before execution.
    OrderCancelled(OrderCancelledData),

    /// The user's balance covers the order.
    BalanceCheckPassed(BalanceCheckPassedData),

    /// The user's balance does not cover the order.
    BalanceCheckFailed(BalanceCheckFailedData),

    /// A limit order was placed in an order book.
    OrderPlacedInBook(OrderPlacedInBookData),

    /// A limit order was partially filled.
    OrderPartiallyFilled(OrderPartiallyFilledData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderAccepted(_) => "OrderAccepted",
            OrderEvent::PriceQuoted(_) => "PriceQuoted",
            OrderEvent::SwapExecuting(_) => "SwapExecuting",
            OrderEvent::SwapExecuted(_) => "SwapExecuted",
            OrderEvent::OrderCompleted(_) => "OrderCompleted",
            OrderEvent::OrderFailed(_) => "OrderFailed",
            OrderEvent::OrderInitialized => "OrderInitialized",
            OrderEvent::LimitPriceSet(_) => "LimitPriceSet",
            OrderEvent::OrderUpdated(_) => "OrderUpdated",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
            OrderEvent::BalanceCheckPassed(_) => "BalanceCheckPassed",
            OrderEvent::BalanceCheckFailed(_) => "BalanceCheckFailed",
            OrderEvent::OrderPlacedInBook(_) => "OrderPlacedInBook",
            OrderEvent::OrderPartiallyFilled(_) => "OrderPartiallyFilled",
        }
    }
}

/// Data for OrderAccepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAcceptedData {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub from_amount: f64,
    pub from_currency: String,
    pub to_currency: String,
    pub order_type: OrderType,
}

/// Data for PriceQuoted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuotedData {
    pub price: f64,
    pub to_amount: f64,
    pub quoted_at: DateTime<Utc>,
}

/// Data for SwapExecuting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapExecutingData {
    /// Key the swap worker deduplicates by; retries reuse the same key.
    pub idempotency_key: String,
}

/// Data for SwapExecuted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapExecutedData {
    pub transaction_hash: String,
    pub from_amount: f64,
    pub to_amount: f64,
    pub executed_price: f64,
    pub fees: f64,
    pub slippage: f64,
}

/// Data for OrderCompleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCompletedData {
    pub from_amount: f64,
    pub to_amount: f64,
    pub executed_price: f64,
    pub status: String,
}

/// Data for OrderFailed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFailedData {
    /// Machine-readable reason, surfaced to the user by the notifier.
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Data for LimitPriceSet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitPriceSetData {
    pub limit_price: f64,
}

/// Recognized fields for an order update.
///
/// Unknown fields are rejected at deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_amount: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_amount: Option<f64>,
}

impl OrderUpdate {
    /// True when the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.from_amount.is_none() && self.to_amount.is_none()
    }
}

/// Data for OrderCancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

/// Data for BalanceCheckPassed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceCheckPassedData {
    pub available_amount: f64,
    pub currency: String,
}

/// Data for BalanceCheckFailed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceCheckFailedData {
    pub required_amount: f64,
    pub available_amount: f64,
    pub currency: String,
}

/// Data for OrderPlacedInBook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedInBookData {
    pub order_book_id: String,
    pub placed_at: DateTime<Utc>,
}

/// Data for OrderPartiallyFilled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPartiallyFilledData {
    pub filled_amount: f64,
    pub executed_price: f64,
    pub transaction_hash: String,
    pub filled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_names() {
        let event = OrderEvent::OrderAccepted(OrderAcceptedData {
            order_id: AggregateId::new(),
            user_id: UserId::new(),
            from_amount: 1000.0,
            from_currency: "USDT".to_string(),
            to_currency: "BTC".to_string(),
            order_type: OrderType::Market,
        });
        assert_eq!(event.event_type(), "OrderAccepted");

        let event = OrderEvent::SwapExecuting(SwapExecutingData {
            idempotency_key: "swap-abc".to_string(),
        });
        assert_eq!(event.event_type(), "SwapExecuting");

        assert_eq!(OrderEvent::OrderInitialized.event_type(), "OrderInitialized");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = OrderEvent::PriceQuoted(PriceQuotedData {
            price: 100000.0,
            to_amount: 0.01,
            quoted_at: Utc::now(),
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("PriceQuoted"));

        let decoded: OrderEvent = serde_json::from_str(&json).unwrap();
        match decoded {
            OrderEvent::PriceQuoted(data) => {
                assert_eq!(data.price, 100000.0);
                assert_eq!(data.to_amount, 0.01);
            }
            other => panic!("expected PriceQuoted, got {}", other.event_type()),
        }
    }

    #[test]
    fn unknown_event_type_fails_replay() {
        let json = r#"{"type":"OrderTeleported","data":{}}"#;
        let result: Result<OrderEvent, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn order_update_rejects_unknown_fields() {
        let json = r#"{"from_amount": 50.0, "priority": "high"}"#;
        let result: Result<OrderUpdate, _> = serde_json::from_str(json);
        assert!(result.is_err());

        let json = r#"{"to_amount": 0.5}"#;
        let update: OrderUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update.to_amount, Some(0.5));
        assert!(!update.is_empty());
    }
}
