//! PriceRecord — one daily quote for a single instrument.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Daily OHLCV record plus the split/dividend adjustment factor.
///
/// Series are kept ascending by date. A record is only usable by the engine
/// when its closing price is finite; records failing `is_valid` never produce
/// ticks and never satisfy a fill condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRecord {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub adjustment: f64,
}

impl PriceRecord {
    /// A record is valid when its closing price is present and finite.
    pub fn is_valid(&self) -> bool {
        self.close.is_finite()
    }
}
