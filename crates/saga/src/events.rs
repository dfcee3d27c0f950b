//! Synthetic coordination events.
//!
//! These events never enter the log; the saga publishes them directly to
//! the bus to hand correlation identifiers to the next step. The envelope
//! carries `position_id` in both the payload and the metadata.

use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};

/// Routing key for the step-2 → step-3 coordination event.
pub const POSITION_CREATED_FOR_ORDER: &str = "PositionCreatedForOrder";

/// Routing key for the terminal coordination event after completion.
pub const POSITION_LINKED_TO_ORDER: &str = "PositionLinkedToOrder";

/// Published after a position has been allocated for an order.
///
/// The envelope's `aggregate_id` is the order ID; the position travels in
/// the payload and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionCreatedForOrder {
    pub position_id: AggregateId,
    pub user_id: UserId,
}

/// Published after the atomic completion committed both aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLinkedToOrder {
    pub position_id: AggregateId,
    pub order_id: AggregateId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordination_payload_roundtrip() {
        let payload = PositionCreatedForOrder {
            position_id: AggregateId::new(),
            user_id: UserId::new(),
        };

        let json = serde_json::to_string(&payload).unwrap();
        let decoded: PositionCreatedForOrder = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.position_id, payload.position_id);
        assert_eq!(decoded.user_id, payload.user_id);
    }
}
