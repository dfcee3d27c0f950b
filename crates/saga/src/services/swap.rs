//! Swap worker trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::SagaError;

/// A blockchain swap request.
#[derive(Debug, Clone)]
pub struct SwapRequest {
    /// Deduplication key; the worker must return the original result for a
    /// repeated key instead of swapping twice.
    pub idempotency_key: String,
    pub from_currency: String,
    pub to_currency: String,
    pub from_amount: f64,
    /// Accepted slippage in percent.
    pub slippage: f64,
}

/// The settled result of a swap.
#[derive(Debug, Clone)]
pub struct SwapResult {
    pub transaction_hash: String,
    pub to_amount: f64,
    pub executed_price: f64,
    pub fees: f64,
    pub slippage: f64,
}

/// Trait for executing on-chain swaps.
///
/// Implementations must deduplicate by `idempotency_key`: without that
/// guarantee the saga cannot safely retry the call.
#[async_trait]
pub trait SwapWorker: Send + Sync {
    /// Executes (or returns the already-executed result of) a swap.
    async fn execute_swap(&self, request: SwapRequest) -> Result<SwapResult, SagaError>;
}

#[derive(Debug, Default)]
struct MockSwapState {
    fail_on_execute: bool,
    // Keyed by idempotency key, so a retried request observes the original
    // result rather than a second execution.
    executed: HashMap<String, SwapResult>,
    execution_count: u32,
}

/// In-memory swap worker honoring the idempotency-key contract.
#[derive(Debug, Clone, Default)]
pub struct MockSwapWorker {
    state: Arc<RwLock<MockSwapState>>,
}

impl MockSwapWorker {
    /// Creates a new mock swap worker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the worker to fail on subsequent execute calls.
    pub fn set_fail_on_execute(&self, fail: bool) {
        self.state.write().unwrap().fail_on_execute = fail;
    }

    /// Returns how many distinct swaps were executed.
    pub fn execution_count(&self) -> u32 {
        self.state.read().unwrap().execution_count
    }
}

#[async_trait]
impl SwapWorker for MockSwapWorker {
    async fn execute_swap(&self, request: SwapRequest) -> Result<SwapResult, SagaError> {
        let mut state = self.state.write().unwrap();

        if let Some(existing) = state.executed.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }

        if state.fail_on_execute {
            return Err(SagaError::SwapWorker("insufficient liquidity".to_string()));
        }

        let price = match (request.from_currency.as_str(), request.to_currency.as_str()) {
            ("USDT", "BTC") => 100000.0,
            ("USDT", "ETH") => 4000.0,
            _ => 1.0,
        };

        let result = SwapResult {
            transaction_hash: "0xabc".to_string(),
            to_amount: request.from_amount / price,
            executed_price: price,
            fees: 0.5,
            slippage: 0.02,
        };

        state.execution_count += 1;
        state
            .executed
            .insert(request.idempotency_key, result.clone());

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str) -> SwapRequest {
        SwapRequest {
            idempotency_key: key.to_string(),
            from_currency: "USDT".to_string(),
            to_currency: "BTC".to_string(),
            from_amount: 1000.0,
            slippage: 0.5,
        }
    }

    #[tokio::test]
    async fn executes_swap_with_fixed_price() {
        let worker = MockSwapWorker::new();
        let result = worker.execute_swap(request("swap-1")).await.unwrap();

        assert_eq!(result.transaction_hash, "0xabc");
        assert_eq!(result.to_amount, 0.01);
        assert_eq!(result.executed_price, 100000.0);
        assert_eq!(worker.execution_count(), 1);
    }

    #[tokio::test]
    async fn repeated_idempotency_key_returns_cached_result() {
        let worker = MockSwapWorker::new();
        let first = worker.execute_swap(request("swap-1")).await.unwrap();
        let second = worker.execute_swap(request("swap-1")).await.unwrap();

        assert_eq!(first.transaction_hash, second.transaction_hash);
        assert_eq!(worker.execution_count(), 1);
    }

    #[tokio::test]
    async fn cached_result_survives_fail_flag() {
        let worker = MockSwapWorker::new();
        worker.execute_swap(request("swap-1")).await.unwrap();

        // A retry after the worker starts failing still sees the original.
        worker.set_fail_on_execute(true);
        let retried = worker.execute_swap(request("swap-1")).await.unwrap();
        assert_eq!(retried.transaction_hash, "0xabc");

        let fresh = worker.execute_swap(request("swap-2")).await;
        assert!(matches!(fresh, Err(SagaError::SwapWorker(_))));
    }
}
