//! Position domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// Events that can occur on a position aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PositionEvent {
    /// Position was opened for a user.
    PositionCreated(PositionCreatedData),

    /// An order's proceeds were attached to the position.
    PositionUpdated(PositionUpdatedData),

    /// Position was closed (terminal).
    PositionClosed(PositionClosedData),
}

impl DomainEvent for PositionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PositionEvent::PositionCreated(_) => "PositionCreated",
            PositionEvent::PositionUpdated(_) => "PositionUpdated",
            PositionEvent::PositionClosed(_) => "PositionClosed",
        }
    }
}

/// Data for PositionCreated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionCreatedData {
    pub position_id: AggregateId,
    pub user_id: UserId,
    pub remaining_amount: f64,
    pub status: String,
}

/// Data for PositionUpdated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdatedData {
    pub added_order_id: AggregateId,
    pub to_amount: f64,
    pub total_value: f64,
    pub pnl: f64,
    pub remaining_amount: f64,
}

/// Data for PositionClosed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClosedData {
    pub reason: String,
    pub closed_at: DateTime<Utc>,
}
