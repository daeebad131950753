//! Account — the append-only transaction ledger plus its metadata.

use super::instrument::InstrumentId;
use super::transaction::{Transaction, TransactionStatus, TxId};
use crate::fees::FeeModel;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors on the persisted account shape.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An account owns an ordered, append-only sequence of transactions plus the
/// metadata needed to value and execute against it: open/close dates, initial
/// cash, a margin flag, and a fee model.
///
/// No transaction is ever removed except by `reset`, which clears the history
/// and re-seeds the initial-cash transfer. Cash and quantity are pure folds
/// over the ledger; there is no cached running balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub currency: String,
    pub opened: NaiveDate,
    /// Trading after the close date is out of range.
    pub closed: Option<NaiveDate>,
    pub initial_cash: f64,
    pub margin: bool,
    pub fees: FeeModel,
    transactions: Vec<Transaction>,
    next_id: u64,
}

impl Account {
    /// Opens an account and seeds the initial-cash transfer (skipped when the
    /// initial cash is zero).
    pub fn new(id: impl Into<String>, opened: NaiveDate, initial_cash: f64) -> Self {
        let mut account = Self {
            id: id.into(),
            currency: "USD".to_string(),
            opened,
            closed: None,
            initial_cash,
            margin: false,
            fees: FeeModel::default(),
            transactions: Vec::new(),
            next_id: 1,
        };
        account.seed_initial_cash();
        account
    }

    pub fn with_fees(mut self, fees: FeeModel) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_margin(mut self, margin: bool) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_close_date(mut self, closed: NaiveDate) -> Self {
        self.closed = Some(closed);
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    fn seed_initial_cash(&mut self) {
        if self.initial_cash != 0.0 {
            let transfer = Transaction::cash_transfer(self.opened, self.initial_cash)
                .with_comment("initial cash");
            self.add_transaction(transfer);
        }
    }

    /// Appends unconditionally, assigning the next monotonic id. No validation
    /// beyond the structural fields; execution decides what actually fills.
    pub fn add_transaction(&mut self, mut transaction: Transaction) -> TxId {
        let id = TxId(self.next_id);
        self.next_id += 1;
        transaction.id = id;
        self.transactions.push(transaction);
        id
    }

    /// Clears the history and re-seeds the initial-cash transfer.
    pub fn reset(&mut self) {
        self.transactions.clear();
        self.next_id = 1;
        self.seed_initial_cash();
    }

    /// The full ordered transaction history.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn transaction(&self, id: TxId) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.id == id)
    }

    pub(crate) fn transaction_mut(&mut self, id: TxId) -> Option<&mut Transaction> {
        self.transactions.iter_mut().find(|t| t.id == id)
    }

    /// Cash balance as of a date: the sum of the cash impact of every
    /// transaction dated on or before it. Non-filled and cancelled
    /// transactions contribute nothing.
    pub fn cash_at(&self, as_of: NaiveDate) -> f64 {
        self.transactions
            .iter()
            .filter(|t| t.date <= as_of)
            .map(Transaction::cash_impact)
            .sum()
    }

    /// Held (or pending) quantity for an instrument: the signed sum over all
    /// non-cancelled, non-cash transactions. Planned transactions count, so a
    /// pending sell already shields the position from a second sell the same
    /// day.
    pub fn quantity_of(&self, instrument: &InstrumentId) -> f64 {
        self.transactions
            .iter()
            .filter(|t| {
                !t.is_cash_transfer()
                    && t.status != TransactionStatus::Cancelled
                    && t.instrument.matches(instrument)
            })
            .map(|t| t.quantity)
            .sum()
    }

    /// Instruments ever traded (cash excluded), in first-seen order.
    pub fn instruments(&self) -> Vec<InstrumentId> {
        let mut seen = Vec::new();
        for t in &self.transactions {
            if !t.is_cash_transfer() && !seen.contains(&t.instrument) {
                seen.push(t.instrument.clone());
            }
        }
        seen
    }

    /// Whether a date falls inside the account's valid trading range.
    pub fn is_within(&self, date: NaiveDate) -> bool {
        date >= self.opened && self.closed.map_or(true, |c| date <= c)
    }

    /// Serialize the full persisted shape (metadata + ordered transactions).
    pub fn to_json(&self) -> Result<String, AccountError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, AccountError> {
        Ok(serde_json::from_str(json)?)
    }
}
