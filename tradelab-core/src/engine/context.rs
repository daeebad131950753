//! Explicit simulation context — no process-wide singletons.

use crate::data::PriceSource;
use crate::pricing::{ClosePriceLogic, PriceLogic};
use std::sync::Arc;

/// Everything the engine triad needs from its collaborators: the price
/// source, the execution-price logic, and the settlement delay. Passed to
/// constructors explicitly so multiple simulations can run with different
/// configurations in the same process.
#[derive(Clone)]
pub struct SimContext {
    pub prices: Arc<dyn PriceSource>,
    pub price_logic: Arc<dyn PriceLogic>,
    /// Days between an order's origination date and the earliest date it may
    /// execute.
    pub settlement_delay_days: i64,
}

impl SimContext {
    pub fn new(prices: Arc<dyn PriceSource>, settlement_delay_days: i64) -> Self {
        Self {
            prices,
            price_logic: Arc::new(ClosePriceLogic),
            settlement_delay_days,
        }
    }

    pub fn with_price_logic(mut self, price_logic: Arc<dyn PriceLogic>) -> Self {
        self.price_logic = price_logic;
        self
    }

    pub fn settlement_delay(&self) -> chrono::Duration {
        chrono::Duration::days(self.settlement_delay_days)
    }
}
