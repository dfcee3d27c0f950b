//! Position aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use event_store::Version;

use crate::aggregate::Aggregate;

use super::{
    PositionError, PositionEvent, PositionStatus,
    events::{PositionClosedData, PositionCreatedData, PositionUpdatedData},
};

/// One order attached to a position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionOrder {
    pub order_id: AggregateId,
    pub to_amount: f64,
    pub value: f64,
    pub pnl: f64,
}

/// Position aggregate root.
///
/// Accumulates the proceeds of completed orders for a user. Created by the
/// saga when an order is priced; closed when the order fails before the
/// swap settles.
#[derive(Debug, Clone, Default)]
pub struct Position {
    id: Option<AggregateId>,
    user_id: Option<UserId>,
    orders: Vec<PositionOrder>,
    remaining_amount: f64,
    status: PositionStatus,
    version: Version,
    changes: Vec<PositionEvent>,
}

impl Aggregate for Position {
    type Event = PositionEvent;
    type Error = PositionError;

    fn aggregate_type() -> &'static str {
        "Position"
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

    fn when(&mut self, event: &Self::Event, _at: DateTime<Utc>) {
        match event {
            PositionEvent::PositionCreated(data) => {
                self.id = Some(data.position_id);
                self.user_id = Some(data.user_id);
                self.remaining_amount = data.remaining_amount;
                self.status = PositionStatus::Open;
            }
            PositionEvent::PositionUpdated(data) => {
                self.orders.push(PositionOrder {
                    order_id: data.added_order_id,
                    to_amount: data.to_amount,
                    value: data.total_value,
                    pnl: data.pnl,
                });
                self.remaining_amount = data.remaining_amount;
            }
            PositionEvent::PositionClosed(_) => {
                self.status = PositionStatus::Closed;
            }
        }
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
impl Position {
    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn orders(&self) -> &[PositionOrder] {
        &self.orders
    }

    pub fn contains_order(&self, order_id: AggregateId) -> bool {
        self.orders.iter().any(|o| o.order_id == order_id)
    }

    pub fn remaining_amount(&self) -> f64 {
        self.remaining_amount
    }

    pub fn status(&self) -> PositionStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

// Command methods
impl Position {
    /// Opens a new position for a user.
    pub fn create(
        &mut self,
        position_id: AggregateId,
        user_id: UserId,
    ) -> Result<(), PositionError> {
        if self.id.is_some() {
            return Err(PositionError::AlreadyCreated);
        }

        self.apply(PositionEvent::PositionCreated(PositionCreatedData {
            position_id,
            user_id,
            remaining_amount: 0.0,
            status: PositionStatus::Open.as_str().to_string(),
        }));
        Ok(())
    }

    /// Attaches an order's proceeds. Re-attaching an order already on the
    /// position is a no-op, so a retried completion cannot double-count.
    pub fn add_order(
        &mut self,
        order_id: AggregateId,
        to_amount: f64,
        total_value: f64,
        pnl: f64,
    ) -> Result<(), PositionError> {
        if self.contains_order(order_id) {
            return Ok(());
        }

        if self.status != PositionStatus::Open {
            return Err(PositionError::InvalidTransition {
                status: self.status,
                action: "add order",
            });
        }

        self.apply(PositionEvent::PositionUpdated(PositionUpdatedData {
            added_order_id: order_id,
            to_amount,
            total_value,
            pnl,
            remaining_amount: self.remaining_amount + to_amount,
        }));
        Ok(())
    }

    /// Closes the position. A no-op when already closed.
    pub fn close(&mut self, reason: impl Into<String>) -> Result<(), PositionError> {
        if self.status == PositionStatus::Closed {
            return Ok(());
        }

        self.apply(PositionEvent::PositionClosed(PositionClosedData {
            reason: reason.into(),
            closed_at: Utc::now(),
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_position() -> Position {
        let mut position = Position::default();
        position.create(AggregateId::new(), UserId::new()).unwrap();
        position
    }

    #[test]
    fn create_opens_position() {
        let position = open_position();
        assert!(position.is_open());
        assert_eq!(position.version(), Version::first());
        assert_eq!(position.remaining_amount(), 0.0);
        assert!(position.orders().is_empty());
    }

    #[test]
    fn create_twice_fails() {
        let mut position = open_position();
        let result = position.create(AggregateId::new(), UserId::new());
        assert!(matches!(result, Err(PositionError::AlreadyCreated)));
    }

    #[test]
    fn add_order_tracks_proceeds() {
        let mut position = open_position();
        let order_id = AggregateId::new();

        position.add_order(order_id, 0.01, 1000.0, 0.0).unwrap();

        assert_eq!(position.orders().len(), 1);
        assert!(position.contains_order(order_id));
        assert_eq!(position.remaining_amount(), 0.01);
        assert_eq!(position.version(), Version::new(2));
    }

    #[test]
    fn add_same_order_twice_is_noop() {
        let mut position = open_position();
        let order_id = AggregateId::new();

        position.add_order(order_id, 0.01, 1000.0, 0.0).unwrap();
        position.add_order(order_id, 0.01, 1000.0, 0.0).unwrap();

        assert_eq!(position.orders().len(), 1);
        assert_eq!(position.remaining_amount(), 0.01);
        assert_eq!(position.version(), Version::new(2));
    }

    #[test]
    fn add_order_rejected_when_closed() {
        let mut position = open_position();
        position.close("order_failed").unwrap();

        let result = position.add_order(AggregateId::new(), 0.01, 1000.0, 0.0);
        assert!(matches!(
            result,
            Err(PositionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let mut position = open_position();
        position.close("order_failed").unwrap();
        assert_eq!(position.status(), PositionStatus::Closed);

        let version_before = position.version();
        position.close("again").unwrap();
        assert_eq!(position.version(), version_before);
    }

    #[test]
    fn remaining_amount_accumulates() {
        let mut position = open_position();
        position
            .add_order(AggregateId::new(), 0.01, 1000.0, 0.0)
            .unwrap();
        position
            .add_order(AggregateId::new(), 0.02, 2000.0, 0.0)
            .unwrap();

        assert!((position.remaining_amount() - 0.03).abs() < 1e-12);
        assert_eq!(position.orders().len(), 2);
    }
}
