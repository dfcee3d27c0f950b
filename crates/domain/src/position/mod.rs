//! Position aggregate and related types.

mod aggregate;
mod events;

pub use aggregate::{Position, PositionOrder};
pub use events::{PositionClosedData, PositionCreatedData, PositionEvent, PositionUpdatedData};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    #[default]
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors produced by position command validation.
#[derive(Debug, Error)]
pub enum PositionError {
    /// The position stream already has a creation event.
    #[error("position already created")]
    AlreadyCreated,

    /// The command is not allowed in the position's current status.
    #[error("cannot {action}: position status is {status}")]
    InvalidTransition {
        status: PositionStatus,
        action: &'static str,
    },
}
