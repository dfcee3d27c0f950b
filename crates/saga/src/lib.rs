//! Saga orchestrator for the market swap order workflow.
//!
//! The workflow runs as four independent handlers, each subscribed to one
//! event type and producing the next:
//!
//! 1. `OrderAccepted` → quote the market price → `PriceQuoted`
//! 2. `PriceQuoted` → allocate a position → `PositionCreatedForOrder`
//! 3. `PositionCreatedForOrder` → execute the swap → `SwapExecuted`
//! 4. `SwapExecuted` → atomically complete order and position →
//!    `PositionLinkedToOrder`
//!
//! Steps 1–3 compensate on failure by failing the order (and closing the
//! position once one exists). Step 4 is non-compensable: the swap has
//! settled on chain, so errors surface to the bus and the delivery is
//! retried. The saga owns no persistent state; its progress is implied by
//! the log and the processed-event set.

pub mod completion;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod services;
mod steps;

pub use completion::CompleteOrderAndUpdatePosition;
pub use error::SagaError;
pub use events::{POSITION_CREATED_FOR_ORDER, POSITION_LINKED_TO_ORDER, PositionCreatedForOrder,
    PositionLinkedToOrder};
pub use orchestrator::SagaOrchestrator;
pub use services::{
    MockPriceService, MockSwapWorker, PriceService, SwapRequest, SwapResult, SwapWorker,
};
