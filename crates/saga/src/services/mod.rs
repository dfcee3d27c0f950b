//! External service contracts for saga steps, with in-memory
//! implementations for tests and demo wiring.

pub mod price;
pub mod swap;

pub use price::{MockPriceService, PriceService};
pub use swap::{MockSwapWorker, SwapRequest, SwapResult, SwapWorker};
