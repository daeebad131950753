//! Price source collaborator contract and an in-memory implementation.

use crate::domain::{InstrumentId, PriceRecord};
use chrono::NaiveDate;
use std::collections::HashMap;
use thiserror::Error;

/// Errors from price-data handling. Missing data during a simulation is a
/// warning condition, not an error; these surface only at load/setup time.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("csv error for {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("io error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("series for {instrument} is not ascending by date at {date}")]
    UnsortedSeries {
        instrument: InstrumentId,
        date: NaiveDate,
    },
}

/// How `value_at` resolves a date with no exact record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateMatch {
    /// Only a record dated exactly at the requested date.
    Exact,
    /// The latest record dated at or before the requested date.
    Prior,
    /// The earliest record dated at or after the requested date.
    Next,
}

/// Ordered per-instrument daily price history.
///
/// Implementations return series ascending by date. `history` yields an empty
/// slice for unknown instruments — absence of data is a condition the engine
/// tolerates, never an error.
pub trait PriceSource: Send + Sync {
    fn history(&self, instrument: &InstrumentId) -> &[PriceRecord];

    /// Nearest-record lookup with the Exact/Prior/Next matching policy.
    fn value_at(
        &self,
        instrument: &InstrumentId,
        date: NaiveDate,
        matching: DateMatch,
    ) -> Option<PriceRecord> {
        find_at(self.history(instrument), date, matching).cloned()
    }
}

/// Binary search for the record matching `date` under the given policy.
///
/// `partition_point` yields the index of the first record dated >= `date`;
/// Exact demands equality there, Next takes it as-is, and Prior steps back
/// one index when the record at the partition point is later than `date`.
pub fn find_at(
    records: &[PriceRecord],
    date: NaiveDate,
    matching: DateMatch,
) -> Option<&PriceRecord> {
    let idx = records.partition_point(|r| r.date < date);
    match matching {
        DateMatch::Exact => records.get(idx).filter(|r| r.date == date),
        DateMatch::Next => records.get(idx),
        DateMatch::Prior => {
            if let Some(r) = records.get(idx) {
                if r.date == date {
                    return Some(r);
                }
            }
            if idx == 0 {
                None
            } else {
                records.get(idx - 1)
            }
        }
    }
}

/// The tail of `records` starting at the first record dated >= `date`.
pub fn history_from(records: &[PriceRecord], date: NaiveDate) -> &[PriceRecord] {
    &records[records.partition_point(|r| r.date < date)..]
}

/// In-memory price source used by tests and the CLI after CSV ingestion.
#[derive(Debug, Default)]
pub struct MemoryPriceSource {
    series: HashMap<InstrumentId, Vec<PriceRecord>>,
}

impl MemoryPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a series, which must already be ascending by date.
    pub fn insert(
        &mut self,
        instrument: InstrumentId,
        records: Vec<PriceRecord>,
    ) -> Result<(), DataError> {
        for pair in records.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(DataError::UnsortedSeries {
                    instrument,
                    date: pair[1].date,
                });
            }
        }
        self.series.insert(instrument, records);
        Ok(())
    }

    pub fn instruments(&self) -> impl Iterator<Item = &InstrumentId> {
        self.series.keys()
    }
}

impl PriceSource for MemoryPriceSource {
    fn history(&self, instrument: &InstrumentId) -> &[PriceRecord] {
        // Exact key first, then the loose ticker/exchange match.
        if let Some(records) = self.series.get(instrument) {
            return records;
        }
        self.series
            .iter()
            .find(|(id, _)| id.matches(instrument))
            .map(|(_, records)| records.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn record(d: u32, close: f64) -> PriceRecord {
        PriceRecord {
            date: date(d),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000,
            adjustment: 1.0,
        }
    }

    fn series() -> Vec<PriceRecord> {
        // Trading days with a weekend-style gap: 2, 3, 8, 9
        vec![
            record(2, 100.0),
            record(3, 101.0),
            record(8, 102.0),
            record(9, 103.0),
        ]
    }

    #[test]
    fn exact_match() {
        let s = series();
        assert_eq!(find_at(&s, date(3), DateMatch::Exact).unwrap().close, 101.0);
        assert!(find_at(&s, date(5), DateMatch::Exact).is_none());
    }

    #[test]
    fn prior_match_steps_back_over_gaps() {
        let s = series();
        assert_eq!(find_at(&s, date(5), DateMatch::Prior).unwrap().close, 101.0);
        assert_eq!(find_at(&s, date(3), DateMatch::Prior).unwrap().close, 101.0);
        assert!(find_at(&s, date(1), DateMatch::Prior).is_none());
        assert_eq!(
            find_at(&s, date(31), DateMatch::Prior).unwrap().close,
            103.0
        );
    }

    #[test]
    fn next_match_steps_forward_over_gaps() {
        let s = series();
        assert_eq!(find_at(&s, date(5), DateMatch::Next).unwrap().close, 102.0);
        assert_eq!(find_at(&s, date(8), DateMatch::Next).unwrap().close, 102.0);
        assert!(find_at(&s, date(10), DateMatch::Next).is_none());
    }

    #[test]
    fn history_from_slices_the_tail() {
        let s = series();
        let tail = history_from(&s, date(4));
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].close, 102.0);
        assert!(history_from(&s, date(10)).is_empty());
    }

    #[test]
    fn memory_source_rejects_unsorted() {
        let mut source = MemoryPriceSource::new();
        let result = source.insert(
            InstrumentId::new("SPY"),
            vec![record(3, 101.0), record(2, 100.0)],
        );
        assert!(result.is_err());
    }

    #[test]
    fn memory_source_loose_lookup() {
        let mut source = MemoryPriceSource::new();
        source
            .insert(InstrumentId::with_exchange("SAP", "XETRA"), series())
            .unwrap();
        // Bare ticker still finds the exchange-qualified series
        assert_eq!(source.history(&InstrumentId::new("SAP")).len(), 4);
        assert!(source.history(&InstrumentId::new("MSFT")).is_empty());
    }
}
