//! Domain layer for the swap order workflow.
//!
//! This crate provides:
//! - the `Aggregate` and `DomainEvent` traits for event-sourced entities
//! - the Order aggregate (market and limit swap orders)
//! - the Position aggregate
//! - the `AggregateStore` that replays and persists aggregates through the
//!   event log

pub mod aggregate;
pub mod error;
pub mod order;
pub mod position;
pub mod store;

pub use aggregate::{Aggregate, DomainEvent};
pub use error::DomainError;
pub use order::{MIN_ORDER_AMOUNT, Order, OrderError, OrderEvent, OrderStatus, OrderType,
    OrderUpdate};
pub use position::{Position, PositionError, PositionEvent, PositionOrder, PositionStatus};
pub use store::AggregateStore;
