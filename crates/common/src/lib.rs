//! Shared identifier types for the swap order system.

pub mod types;

pub use types::{AggregateId, UserId};
