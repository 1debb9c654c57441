//! Row types shared by ingestion, curation, features and queries.

use serde::{Deserialize, Serialize};

/// An as-ingested price record. OHLC fields may be missing or invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPriceRow {
    pub ticker: String,
    /// Trading date, `YYYY-MM-DD` (kept as text).
    pub date: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    /// Absolute path of the CSV file the row came from.
    pub source_file: String,
    /// UTC timestamp, `YYYY-MM-DD HH:MM:SS.ffffff`.
    pub ingested_at: String,
}

/// The single validated OHLC record for a (ticker, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedPrice {
    pub ticker: String,
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Derived per-day statistics for a ticker. `None` until enough history exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub ticker: String,
    pub date: String,
    pub return_1d: Option<f64>,
    pub range_pct: Option<f64>,
    pub ma_5: Option<f64>,
    pub ma_20: Option<f64>,
}

/// Ledger entry marking a source file as loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionFileRecord {
    pub file_path: String,
    pub file_size: i64,
    /// Modification time in seconds since the Unix epoch.
    pub mtime: f64,
    pub ingested_at: String,
}

/// Filter for the range read operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuery {
    pub ticker: String,
    /// Inclusive lower bound.
    pub date_from: Option<String>,
    /// Inclusive upper bound.
    pub date_to: Option<String>,
    pub limit: usize,
}

impl PriceQuery {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            date_from: None,
            date_to: None,
            limit: 50,
        }
    }
}

/// Counts reported by one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub rows_inserted: usize,
    /// Records dropped for a missing ticker or malformed date.
    pub rows_dropped: usize,
}

/// Diagnostic counts read back after a curation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurateStats {
    pub raw_rows: i64,
    /// Distinct (ticker, date) pairs in raw storage, valid or not.
    pub distinct_pairs: i64,
    pub curated_rows: i64,
}
