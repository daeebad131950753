//! Domain types: instruments, price records, transactions, the account
//! ledger, and portfolio snapshots.

pub mod account;
pub mod instrument;
pub mod portfolio;
pub mod record;
pub mod transaction;

pub use account::{Account, AccountError};
pub use instrument::InstrumentId;
pub use portfolio::{Portfolio, PortfolioLine};
pub use record::PriceRecord;
pub use transaction::{OrderKind, Transaction, TransactionError, TransactionStatus, TxId};
