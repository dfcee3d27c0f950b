//! Order status state machine and order kind.

use serde::{Deserialize, Serialize};

use super::OrderError;

/// The status of a swap order in its lifecycle.
///
/// Transitions:
/// ```text
/// Pending ──► Executing ──► Completed
///    │            │
///    └────────────┴──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Accepted and moving through pricing and position allocation.
    #[default]
    Pending,

    /// The on-chain swap has been started.
    Executing,

    /// Swap settled and position linked (terminal).
    Completed,

    /// Failed or cancelled (terminal).
    Failed,
}

impl OrderStatus {
    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Failed)
    }

    /// Returns the status name as stored in event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Executing => "executing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Market or limit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
}

impl OrderType {
    /// Returns the order type name as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderType {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            other => Err(OrderError::UnknownOrderType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Executing.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&OrderStatus::Executing).unwrap();
        assert_eq!(json, "\"executing\"");
    }

    #[test]
    fn order_type_parsing() {
        assert_eq!("market".parse::<OrderType>().unwrap(), OrderType::Market);
        assert_eq!("limit".parse::<OrderType>().unwrap(), OrderType::Limit);
        assert!(matches!(
            "stop".parse::<OrderType>(),
            Err(OrderError::UnknownOrderType(_))
        ));
    }

    #[test]
    fn default_status_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }
}
