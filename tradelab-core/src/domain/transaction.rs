//! Transaction — the atomic unit of the ledger, with its terminal state machine.

use super::instrument::InstrumentId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Monotonically increasing transaction identifier, assigned by the account
/// on append.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct TxId(pub u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of order a transaction represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Fill at the first record reached after the settlement delay.
    Market,
    /// Buy fills when close <= requested price; sell when close >= requested.
    Limit,
    /// Buy fills when close >= requested price; sell when close <= requested.
    Stop,
    /// Direct cash movement; created already Filled, bypasses execution.
    CashTransfer,
}

/// Transaction lifecycle states.
///
/// `Submitted` exists for the persisted interop shape (live paper trading
/// hands orders to a broker before they fill); the backtest execution engine
/// only ever consumes `Planned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Planned,
    Submitted,
    Filled,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Filled | TransactionStatus::Cancelled)
    }
}

/// Contract violations on the transaction state machine. These indicate a
/// caller bug, not a data condition, and propagate.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction {id} is already terminal ({status:?})")]
    AlreadyTerminal { id: TxId, status: TransactionStatus },
}

/// One ledger entry. Signed quantity: positive = buy, negative = sell,
/// zero = no-op.
///
/// Invariants: `Filled` implies `filled_price` and `fees` are set and
/// immutable thereafter; `Cancelled` implies `fees == 0.0` and
/// `filled_price == 0.0`. A transaction transitions to a terminal state
/// exactly once and is never re-opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub date: NaiveDate,
    pub instrument: InstrumentId,
    pub quantity: f64,
    pub kind: OrderKind,
    /// Meaningful for Limit/Stop only.
    pub requested_price: f64,
    pub filled_price: f64,
    pub fees: f64,
    pub status: TransactionStatus,
    /// Direct cash delta; used by CashTransfer instead of quantity × price.
    pub cash_delta: f64,
    pub comment: String,
}

impl Transaction {
    pub fn market(date: NaiveDate, instrument: InstrumentId, quantity: f64) -> Self {
        Self::order(date, instrument, quantity, OrderKind::Market, 0.0)
    }

    pub fn limit(
        date: NaiveDate,
        instrument: InstrumentId,
        quantity: f64,
        requested_price: f64,
    ) -> Self {
        Self::order(date, instrument, quantity, OrderKind::Limit, requested_price)
    }

    pub fn stop(
        date: NaiveDate,
        instrument: InstrumentId,
        quantity: f64,
        requested_price: f64,
    ) -> Self {
        Self::order(date, instrument, quantity, OrderKind::Stop, requested_price)
    }

    fn order(
        date: NaiveDate,
        instrument: InstrumentId,
        quantity: f64,
        kind: OrderKind,
        requested_price: f64,
    ) -> Self {
        Self {
            id: TxId::default(),
            date,
            instrument,
            quantity,
            kind,
            requested_price,
            filled_price: 0.0,
            fees: 0.0,
            status: TransactionStatus::Planned,
            cash_delta: 0.0,
            comment: String::new(),
        }
    }

    /// A cash transfer is created already Filled and carries a direct delta.
    pub fn cash_transfer(date: NaiveDate, amount: f64) -> Self {
        Self {
            id: TxId::default(),
            date,
            instrument: InstrumentId::cash(),
            quantity: 0.0,
            kind: OrderKind::CashTransfer,
            requested_price: 0.0,
            filled_price: 0.0,
            fees: 0.0,
            status: TransactionStatus::Filled,
            cash_delta: amount,
            comment: String::new(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn is_buy(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn is_cash_transfer(&self) -> bool {
        self.kind == OrderKind::CashTransfer
    }

    /// Still awaiting resolution (not yet terminal).
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Resolve into an executed trade. Errors if the transaction is already
    /// terminal — that is a caller bug, never a data condition.
    pub fn fill(&mut self, price: f64, fees: f64) -> Result<(), TransactionError> {
        if self.status.is_terminal() {
            return Err(TransactionError::AlreadyTerminal {
                id: self.id,
                status: self.status,
            });
        }
        self.filled_price = price;
        self.fees = fees;
        self.status = TransactionStatus::Filled;
        Ok(())
    }

    /// Terminal cancellation. Clears price and fees per the ledger invariant.
    pub fn cancel(&mut self, comment: impl Into<String>) -> Result<(), TransactionError> {
        if self.status.is_terminal() {
            return Err(TransactionError::AlreadyTerminal {
                id: self.id,
                status: self.status,
            });
        }
        self.filled_price = 0.0;
        self.fees = 0.0;
        self.status = TransactionStatus::Cancelled;
        self.comment = comment.into();
        Ok(())
    }

    /// Cash effect of this transaction. Zero unless filled: a filled trade
    /// costs `-(quantity × filled_price) - fees`; a cash transfer contributes
    /// its direct delta.
    pub fn cash_impact(&self) -> f64 {
        if self.is_cash_transfer() {
            return self.cash_delta;
        }
        match self.status {
            TransactionStatus::Filled => -(self.quantity * self.filled_price) - self.fees,
            _ => 0.0,
        }
    }
}
