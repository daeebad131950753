//! Portfolio — a valued snapshot of the ledger at one as-of date.

use super::instrument::InstrumentId;
use super::transaction::Transaction;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const QTY_EPSILON: f64 = 1e-9;

/// One portfolio line per instrument ever traded.
///
/// Recording rules:
/// - buy fill: quantity and purchased value both grow by the trade's
///   quantity/notional; the average purchase price is purchased value over
///   quantity.
/// - sell fill: realized gain grows by `(fill − avg) × |qty sold|` where avg
///   is the pre-sale average purchase price; purchased value shrinks
///   proportionally at that same pre-sale average.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioLine {
    pub instrument: InstrumentId,
    pub quantity: f64,
    /// Cumulative cost basis of the open quantity.
    pub purchased_value: f64,
    /// Mark-to-market value; last trade notional until a mark is applied.
    pub market_value: f64,
    pub fees: f64,
    pub cash_impact: f64,
    pub realized_gains: f64,
    pub trade_count: usize,
    /// Transactions contributing to this line, in replay order.
    pub transactions: Vec<Transaction>,
}

impl PortfolioLine {
    pub fn new(instrument: InstrumentId) -> Self {
        Self {
            instrument,
            quantity: 0.0,
            purchased_value: 0.0,
            market_value: 0.0,
            fees: 0.0,
            cash_impact: 0.0,
            realized_gains: 0.0,
            trade_count: 0,
            transactions: Vec::new(),
        }
    }

    /// Average purchase price of the open quantity; zero when flat.
    pub fn average_purchase_price(&self) -> f64 {
        if self.quantity.abs() < QTY_EPSILON {
            0.0
        } else {
            self.purchased_value / self.quantity
        }
    }

    /// Paper profit on the open quantity: mark-to-market minus cost basis.
    pub fn unrealized_gain(&self) -> f64 {
        self.market_value - self.purchased_value
    }

    pub fn is_open(&self) -> bool {
        self.quantity.abs() >= QTY_EPSILON
    }

    /// Folds one filled, non-cash transaction into the line.
    pub fn record(&mut self, transaction: &Transaction) {
        let quantity = transaction.quantity;
        let price = transaction.filled_price;

        if quantity >= 0.0 {
            self.quantity += quantity;
            self.purchased_value += quantity * price;
        } else {
            let avg = self.average_purchase_price();
            self.realized_gains += (price - avg) * quantity.abs();
            // Cost basis shrinks at the pre-sale average, not the sale price.
            self.purchased_value += quantity * avg;
            self.quantity += quantity;
            if self.quantity.abs() < QTY_EPSILON {
                self.quantity = 0.0;
                self.purchased_value = 0.0;
            }
        }

        self.fees += transaction.fees;
        self.cash_impact += transaction.cash_impact();
        self.trade_count += 1;
        // Provisional mark at the trade's own price; overwritten when the
        // projector marks the line to market.
        self.market_value = self.quantity * price;
        self.transactions.push(transaction.clone());
    }

    /// Marks the open quantity to a market price.
    pub fn mark(&mut self, price: f64) {
        self.market_value = self.quantity * price;
    }
}

/// A deterministic value snapshot of an account at `as_of`: one line per
/// instrument ever traded. Rebuilt on demand by replaying the ledger; never
/// mutated outside replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub as_of: NaiveDate,
    /// Serialized as a plain sequence of lines; each line carries its
    /// instrument, and the instrument is not a valid JSON map key.
    #[serde(with = "lines_as_seq")]
    pub lines: BTreeMap<InstrumentId, PortfolioLine>,
}

mod lines_as_seq {
    use super::{InstrumentId, PortfolioLine};
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S>(
        lines: &BTreeMap<InstrumentId, PortfolioLine>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(lines.len()))?;
        for line in lines.values() {
            seq.serialize_element(line)?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<BTreeMap<InstrumentId, PortfolioLine>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let lines = Vec::<PortfolioLine>::deserialize(deserializer)?;
        Ok(lines
            .into_iter()
            .map(|line| (line.instrument.clone(), line))
            .collect())
    }
}

impl Portfolio {
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            lines: BTreeMap::new(),
        }
    }

    pub fn line(&self, instrument: &InstrumentId) -> Option<&PortfolioLine> {
        self.lines.get(instrument)
    }

    pub(crate) fn line_mut(&mut self, instrument: &InstrumentId) -> &mut PortfolioLine {
        self.lines
            .entry(instrument.clone())
            .or_insert_with(|| PortfolioLine::new(instrument.clone()))
    }

    pub fn quantity_of(&self, instrument: &InstrumentId) -> f64 {
        self.lines.get(instrument).map_or(0.0, |l| l.quantity)
    }

    pub fn market_value_of(&self, instrument: &InstrumentId) -> f64 {
        self.lines.get(instrument).map_or(0.0, |l| l.market_value)
    }

    /// Mark-to-market value of all open positions.
    pub fn actual_value(&self) -> f64 {
        self.lines.values().map(|l| l.market_value).sum()
    }

    pub fn total_fees(&self) -> f64 {
        self.lines.values().map(|l| l.fees).sum()
    }

    pub fn realized_gains(&self) -> f64 {
        self.lines.values().map(|l| l.realized_gains).sum()
    }

    pub fn unrealized_gains(&self) -> f64 {
        self.lines.values().map(PortfolioLine::unrealized_gain).sum()
    }

    /// The global profit identity:
    /// `total_profit == realized + unrealized − fees`, by construction.
    pub fn total_profit(&self) -> f64 {
        self.realized_gains() + self.unrealized_gains() - self.total_fees()
    }

    /// Total account value given the cash balance at the same date.
    pub fn total_value(&self, cash: f64) -> f64 {
        cash + self.actual_value()
    }

    /// Sum of per-line cash impacts. Together with the ledger's cash
    /// transfers this must equal the account's running cash balance.
    pub fn traded_cash_impact(&self) -> f64 {
        self.lines.values().map(|l| l.cash_impact).sum()
    }
}
