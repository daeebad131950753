//! Price data collaborators: the source contract, date matching, and CSV
//! ingestion.

pub mod csv;
pub mod source;

pub use csv::load_records;
pub use source::{find_at, history_from, DataError, DateMatch, MemoryPriceSource, PriceSource};
