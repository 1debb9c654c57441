use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::types::{CuratedPrice, FeatureRow, PriceQuery};

use super::schema;

/// Tables owned by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    RawPrices,
    Prices,
    FeaturesDaily,
    IngestionFiles,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::RawPrices => "raw_prices",
            Table::Prices => "prices",
            Table::FeaturesDaily => "features_daily",
            Table::IngestionFiles => "ingestion_files",
        }
    }

    pub const ALL: [Table; 4] = [
        Table::RawPrices,
        Table::Prices,
        Table::FeaturesDaily,
        Table::IngestionFiles,
    ];
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Read-side abstraction over the price store.
///
/// Mutating pipeline stages (ingest, curate, features) work on a
/// transaction borrowed from [`SqliteStore::conn`] instead.
pub trait PriceStore {
    fn init(&self) -> Result<()>;
    fn ping(&self) -> Result<()>;
    fn query_prices(&self, q: &PriceQuery) -> Result<Vec<CuratedPrice>>;
    fn query_features(&self, q: &PriceQuery) -> Result<Vec<FeatureRow>>;
    fn list_tickers(&self) -> Result<Vec<String>>;
    fn count_rows(&self, table: Table) -> Result<i64>;
}

/// SQLite-backed implementation.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a file-backed database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (useful for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Borrow the underlying connection (pipeline stages open transactions on it).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Fold the WAL back into the main database file.
    pub fn checkpoint(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

/// Append the optional inclusive date bounds, ordering and limit shared by
/// both range reads.
fn range_filter(base: &str, q: &PriceQuery) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
    let mut sql = String::from(base);
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(q.ticker.clone())];

    if let Some(ref from) = q.date_from {
        sql.push_str(" AND date >= ?");
        params.push(Box::new(from.clone()));
    }
    if let Some(ref to) = q.date_to {
        sql.push_str(" AND date <= ?");
        params.push(Box::new(to.clone()));
    }

    sql.push_str(" ORDER BY date ASC LIMIT ?");
    params.push(Box::new(i64::try_from(q.limit).unwrap_or(i64::MAX)));

    (sql, params)
}

impl PriceStore for SqliteStore {
    fn init(&self) -> Result<()> {
        self.conn.execute_batch(schema::CREATE_RAW_PRICES)?;
        self.conn.execute_batch(schema::CREATE_PRICES)?;
        self.conn.execute_batch(schema::CREATE_FEATURES_DAILY)?;
        self.conn.execute_batch(schema::CREATE_INGESTION_FILES)?;
        self.conn.execute_batch(schema::CREATE_INDEXES)?;
        Ok(())
    }

    fn ping(&self) -> Result<()> {
        let one: i64 = self.conn.query_row("SELECT 1", [], |row| row.get(0))?;
        anyhow::ensure!(one == 1, "unexpected ping result {}", one);
        Ok(())
    }

    fn query_prices(&self, q: &PriceQuery) -> Result<Vec<CuratedPrice>> {
        let (sql, params) = range_filter(
            "SELECT ticker, date, open, high, low, close FROM prices WHERE ticker = ?",
            q,
        );
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok(CuratedPrice {
                    ticker: row.get(0)?,
                    date: row.get(1)?,
                    open: row.get(2)?,
                    high: row.get(3)?,
                    low: row.get(4)?,
                    close: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn query_features(&self, q: &PriceQuery) -> Result<Vec<FeatureRow>> {
        let (sql, params) = range_filter(
            "SELECT ticker, date, return_1d, range_pct, ma_5, ma_20 FROM features_daily WHERE ticker = ?",
            q,
        );
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok(FeatureRow {
                    ticker: row.get(0)?,
                    date: row.get(1)?,
                    return_1d: row.get(2)?,
                    range_pct: row.get(3)?,
                    ma_5: row.get(4)?,
                    ma_20: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_tickers(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(schema::LIST_CURATED_TICKERS)?;
        let tickers = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(tickers)
    }

    fn count_rows(&self, table: Table) -> Result<i64> {
        // Table names come from a closed enum, never from user input.
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let n: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n)
    }
}
