//! Instrument identity — ticker plus optional exchange, and the cash pseudo-instrument.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Ticker of the pseudo-instrument that represents currency movements.
const CASH_TICKER: &str = "CASH";

/// Identity of a tradable instrument: case-sensitive ticker plus optional exchange.
///
/// Used as a map key everywhere in the engine. The total order (ticker, then
/// exchange) is what makes the tick merge deterministic when several
/// instruments trade on the same date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentId {
    pub ticker: String,
    pub exchange: Option<String>,
}

impl InstrumentId {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            exchange: None,
        }
    }

    pub fn with_exchange(ticker: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            exchange: Some(exchange.into()),
        }
    }

    /// The distinguished pseudo-instrument for cash transfers.
    pub fn cash() -> Self {
        Self::new(CASH_TICKER)
    }

    pub fn is_cash(&self) -> bool {
        self.ticker == CASH_TICKER && self.exchange.is_none()
    }

    /// Loose match: tickers must be equal; exchanges are compared only when
    /// both sides specify one. Lookups use this so a ledger entry without an
    /// exchange still matches an exchange-qualified quote series.
    pub fn matches(&self, other: &InstrumentId) -> bool {
        if self.ticker != other.ticker {
            return false;
        }
        match (&self.exchange, &other.exchange) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl Ord for InstrumentId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ticker
            .cmp(&other.ticker)
            .then_with(|| self.exchange.cmp(&other.exchange))
    }
}

impl PartialOrd for InstrumentId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.exchange {
            Some(ex) => write!(f, "{}.{}", self.ticker, ex),
            None => write!(f, "{}", self.ticker),
        }
    }
}
