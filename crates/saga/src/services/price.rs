//! Price service trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::SagaError;

/// Trait for fetching market prices.
#[async_trait]
pub trait PriceService: Send + Sync {
    /// Returns the market price of one unit of `to` in `from`.
    async fn get_market_price(&self, from: &str, to: &str) -> Result<f64, SagaError>;
}

#[derive(Debug, Default)]
struct MockPriceState {
    fail_on_quote: bool,
    quote_count: u32,
}

/// In-memory price service with a fixed price table.
#[derive(Debug, Clone, Default)]
pub struct MockPriceService {
    state: Arc<RwLock<MockPriceState>>,
}

impl MockPriceService {
    /// Creates a new mock price service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail on subsequent quote calls.
    pub fn set_fail_on_quote(&self, fail: bool) {
        self.state.write().unwrap().fail_on_quote = fail;
    }

    /// Returns how many quotes were served.
    pub fn quote_count(&self) -> u32 {
        self.state.read().unwrap().quote_count
    }
}

#[async_trait]
impl PriceService for MockPriceService {
    async fn get_market_price(&self, from: &str, to: &str) -> Result<f64, SagaError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_quote {
            return Err(SagaError::PriceService("price feed unavailable".to_string()));
        }

        state.quote_count += 1;

        let price = match (from, to) {
            ("USDT", "BTC") => 100000.0,
            ("USDT", "ETH") => 4000.0,
            _ => 1.0,
        };
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_pairs_have_fixed_prices() {
        let service = MockPriceService::new();
        assert_eq!(service.get_market_price("USDT", "BTC").await.unwrap(), 100000.0);
        assert_eq!(service.get_market_price("USDT", "ETH").await.unwrap(), 4000.0);
        assert_eq!(service.get_market_price("USDC", "DAI").await.unwrap(), 1.0);
        assert_eq!(service.quote_count(), 3);
    }

    #[tokio::test]
    async fn fail_flag_rejects_quotes() {
        let service = MockPriceService::new();
        service.set_fail_on_quote(true);

        let result = service.get_market_price("USDT", "BTC").await;
        assert!(matches!(result, Err(SagaError::PriceService(_))));
        assert_eq!(service.quote_count(), 0);
    }
}
