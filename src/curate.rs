//! Raw → curated price build.
//!
//! For every (ticker, date) in `raw_prices` the newest valid row wins: all
//! four OHLC values present, `high >= low`, `open > 0`, `close > 0`, ordered by
//! `ingested_at` then surrogate id. The whole OHLC tuple comes from that one
//! row; fields are never merged across rows.

use anyhow::Result;
use tracing::info;

use crate::data::schema;
use crate::data::SqliteStore;
use crate::types::CurateStats;

/// How existing curated rows are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CurateMode {
    /// Clear `prices` and rebuild from scratch.
    #[default]
    Reset,
    /// Overwrite keys present in raw storage, leave the rest untouched.
    Incremental,
}

/// Rebuild `prices` from `raw_prices` in one transaction.
pub fn build_curated(store: &SqliteStore, mode: CurateMode) -> Result<CurateStats> {
    let tx = store.conn().unchecked_transaction()?;

    if mode == CurateMode::Reset {
        tx.execute(schema::DELETE_ALL_CURATED, [])?;
    }
    let written = tx.execute(schema::UPSERT_CURATED, [])?;

    let stats = CurateStats {
        raw_rows: tx.query_row(schema::COUNT_RAW, [], |row| row.get(0))?,
        distinct_pairs: tx.query_row(schema::COUNT_RAW_DISTINCT_PAIRS, [], |row| row.get(0))?,
        curated_rows: tx.query_row(schema::COUNT_CURATED, [], |row| row.get(0))?,
    };

    tx.commit()?;

    info!(
        ?mode,
        written,
        raw_rows = stats.raw_rows,
        distinct_pairs = stats.distinct_pairs,
        curated_rows = stats.curated_rows,
        "curated prices built"
    );

    Ok(stats)
}
