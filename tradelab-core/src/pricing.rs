//! PriceLogic — maps a price record and a trade direction to an execution price.

use crate::domain::PriceRecord;

/// Pluggable execution-price policy.
pub trait PriceLogic: Send + Sync {
    fn price(&self, record: &PriceRecord, is_buy: bool) -> f64;
}

/// Default logic: the closing price, regardless of direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosePriceLogic;

impl PriceLogic for ClosePriceLogic {
    fn price(&self, record: &PriceRecord, _is_buy: bool) -> f64 {
        record.close
    }
}

/// Pessimistic logic: buys pay the high, sells receive the low.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorstCasePriceLogic;

impl PriceLogic for WorstCasePriceLogic {
    fn price(&self, record: &PriceRecord, is_buy: bool) -> f64 {
        if is_buy {
            record.high
        } else {
            record.low
        }
    }
}
