//! CSV price ingestion for the CLI and integration tests.
//!
//! Expected columns: `date,open,high,low,close,volume[,adjustment]` with
//! ISO dates. Rows must be ascending by date.

use super::source::DataError;
use crate::domain::PriceRecord;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    #[serde(default)]
    adjustment: Option<f64>,
}

impl From<CsvRow> for PriceRecord {
    fn from(row: CsvRow) -> Self {
        PriceRecord {
            date: row.date,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            adjustment: row.adjustment.unwrap_or(1.0),
        }
    }
}

/// Load one instrument's daily series from a CSV file.
pub fn load_records(path: &Path) -> Result<Vec<PriceRecord>, DataError> {
    let display = path.display().to_string();
    let mut reader = csv::Reader::from_path(path).map_err(|source| DataError::Csv {
        path: display.clone(),
        source,
    })?;

    let mut records = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let row = row.map_err(|source| DataError::Csv {
            path: display.clone(),
            source,
        })?;
        records.push(PriceRecord::from(row));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_rows_with_and_without_adjustment() {
        let dir = std::env::temp_dir().join("tradelab-csv-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("spy.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "date,open,high,low,close,volume,adjustment").unwrap();
        writeln!(file, "2024-01-02,100.0,105.0,98.0,103.0,50000,1.0").unwrap();
        writeln!(file, "2024-01-03,103.0,106.0,101.0,104.5,40000,1.0").unwrap();
        drop(file);

        let records = load_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].close, 103.0);
        assert_eq!(records[1].volume, 40_000);
        assert_eq!(records[1].adjustment, 1.0);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = load_records(Path::new("/nonexistent/nope.csv"));
        assert!(result.is_err());
    }
}
