//! CSV ingestion into `raw_prices`.
//!
//! Walks a folder tree for `.csv` files, parses `ticker,date,open,high,low,close`
//! records and appends them to the raw staging table. Each loaded file is
//! recorded in `ingestion_files` (path, size, mtime) so that re-running on an
//! unchanged tree is a no-op unless `force` is set.
//!
//! A whole run shares one transaction: a storage failure on any file rolls
//! back every insert and ledger change made by the run.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use csv::StringRecord;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::DataError;
use crate::types::{IngestStats, IngestionFileRecord, RawPriceRow};

use super::schema;
use super::store::SqliteStore;

/// Rows buffered before each flush to `raw_prices`.
pub const DEFAULT_CHUNK_SIZE: usize = 5_000;

/// Knobs for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Reload files even when the ledger says they are unchanged.
    pub force: bool,
    /// Only consider the first N files (after sorting).
    pub max_files: Option<usize>,
    pub chunk_size: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            force: false,
            max_files: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// Record parsing
// ---------------------------------------------------------------------------

/// Header positions of the columns we read. Any of them may be absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnIndex {
    ticker: Option<usize>,
    date: Option<usize>,
    open: Option<usize>,
    high: Option<usize>,
    low: Option<usize>,
    close: Option<usize>,
}

impl ColumnIndex {
    pub fn from_headers(headers: &StringRecord) -> Self {
        let find = |name: &str| headers.iter().position(|h| h == name);
        Self {
            ticker: find("ticker"),
            date: find("date"),
            open: find("open"),
            high: find("high"),
            low: find("low"),
            close: find("close"),
        }
    }

    /// Names of required columns missing from the header.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("ticker", self.ticker),
            ("date", self.date),
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ]
        .into_iter()
        .filter(|(_, idx)| idx.is_none())
        .map(|(name, _)| name)
        .collect()
    }
}

fn field<'r>(record: &'r StringRecord, idx: Option<usize>) -> &'r str {
    idx.and_then(|i| record.get(i)).unwrap_or("")
}

/// Lenient float parse: blank or unparsable input becomes `None`.
pub fn parse_float(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok()
}

/// Map one CSV record to a raw row.
///
/// Returns `None` when the ticker is empty or the date is not exactly ten
/// characters after trimming. Bad numeric fields never reject the record.
pub fn parse_record(
    record: &StringRecord,
    cols: &ColumnIndex,
    source_file: &str,
    ingested_at: &str,
) -> Option<RawPriceRow> {
    let ticker = field(record, cols.ticker).trim();
    let date = field(record, cols.date).trim();

    if ticker.is_empty() || date.chars().count() != 10 {
        return None;
    }

    Some(RawPriceRow {
        ticker: ticker.to_string(),
        date: date.to_string(),
        open: parse_float(field(record, cols.open)),
        high: parse_float(field(record, cols.high)),
        low: parse_float(field(record, cols.low)),
        close: parse_float(field(record, cols.close)),
        source_file: source_file.to_string(),
        ingested_at: ingested_at.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Storage helpers (run inside the caller's transaction)
// ---------------------------------------------------------------------------

fn insert_batch(conn: &Connection, rows: &[RawPriceRow]) -> Result<usize> {
    let mut stmt = conn.prepare_cached(schema::INSERT_RAW_PRICE)?;
    for r in rows {
        stmt.execute(rusqlite::params![
            r.ticker,
            r.date,
            r.open,
            r.high,
            r.low,
            r.close,
            r.source_file,
            r.ingested_at,
        ])?;
    }
    Ok(rows.len())
}

fn file_already_loaded(conn: &Connection, file_path: &str, file_size: i64, mtime: f64) -> Result<bool> {
    let hit = conn
        .query_row(
            schema::FILE_ALREADY_LOADED,
            rusqlite::params![file_path, file_size, mtime],
            |_| Ok(()),
        )
        .optional()?;
    Ok(hit.is_some())
}

/// Replace any previous ledger entry for the path.
fn mark_file_loaded(conn: &Connection, record: &IngestionFileRecord) -> Result<()> {
    conn.execute(schema::DELETE_INGESTION_FILE, [&record.file_path])?;
    conn.execute(
        schema::INSERT_INGESTION_FILE,
        rusqlite::params![
            record.file_path,
            record.file_size,
            record.mtime,
            record.ingested_at,
        ],
    )?;
    Ok(())
}

/// UTC timestamp in a lexicographically sortable form.
pub fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

// ---------------------------------------------------------------------------
// File discovery
// ---------------------------------------------------------------------------

/// Recursively collect all `.csv` files under `dir`, sorted.
///
/// Symlinked directories are not descended into, so each file is reached
/// through one path only and link cycles cannot recurse.
pub fn collect_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_csv_recursive(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_csv_recursive(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read dir {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_csv_recursive(&path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "csv") && path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

fn file_mtime(meta: &fs::Metadata, path: &Path) -> Result<f64> {
    let modified = meta
        .modified()
        .with_context(|| format!("no modification time for {}", path.display()))?;
    let secs = match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    };
    Ok(secs)
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Parse one CSV file and append its rows, flushing every `chunk_size` rows.
///
/// Returns `(inserted, dropped)`.
fn ingest_file(
    conn: &Connection,
    path: &Path,
    source_file: &str,
    ingested_at: &str,
    chunk_size: usize,
) -> Result<(usize, usize)> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .clone();
    let cols = ColumnIndex::from_headers(&headers);
    let missing = cols.missing();
    if !missing.is_empty() {
        warn!(file = %source_file, ?missing, "CSV header lacks expected columns");
    }

    let chunk_size = chunk_size.max(1);
    let mut rows = Vec::with_capacity(chunk_size.min(DEFAULT_CHUNK_SIZE));
    let mut inserted = 0usize;
    let mut dropped = 0usize;

    for (line_num, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => {
                return Err(e).with_context(|| {
                    format!("I/O error at record {} of {}", line_num + 1, path.display())
                });
            }
            Err(e) => {
                debug!(file = %source_file, record = line_num + 1, error = %e, "undecodable record dropped");
                dropped += 1;
                continue;
            }
        };

        match parse_record(&record, &cols, source_file, ingested_at) {
            Some(row) => rows.push(row),
            None => dropped += 1,
        }

        if rows.len() >= chunk_size {
            inserted += insert_batch(conn, &rows)?;
            rows.clear();
        }
    }

    if !rows.is_empty() {
        inserted += insert_batch(conn, &rows)?;
    }

    Ok((inserted, dropped))
}

/// Load every CSV under `folder` into `raw_prices`.
pub fn ingest_folder(store: &SqliteStore, folder: &Path, opts: &IngestOptions) -> Result<IngestStats> {
    if !folder.is_dir() {
        return Err(DataError::FolderNotFound(folder.to_path_buf()).into());
    }
    let folder = fs::canonicalize(folder)
        .with_context(|| format!("failed to resolve {}", folder.display()))?;

    let mut files = collect_csv_files(&folder)?;
    if let Some(max) = opts.max_files {
        files.truncate(max);
    }

    info!("found {} CSV files in {}", files.len(), folder.display());

    let mut stats = IngestStats::default();
    let tx = store.conn().unchecked_transaction()?;

    for path in &files {
        let meta = fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
        let file_size = i64::try_from(meta.len()).context("file size overflows i64")?;
        let mtime = file_mtime(&meta, path)?;
        let file_path = path.to_string_lossy().into_owned();

        if !opts.force && file_already_loaded(&tx, &file_path, file_size, mtime)? {
            debug!(file = %file_path, "unchanged, skipping");
            stats.files_skipped += 1;
            continue;
        }

        let ingested_at = now_timestamp();
        let (inserted, dropped) = ingest_file(&tx, path, &file_path, &ingested_at, opts.chunk_size)?;

        mark_file_loaded(
            &tx,
            &IngestionFileRecord {
                file_path: file_path.clone(),
                file_size,
                mtime,
                ingested_at,
            },
        )?;

        debug!(file = %file_path, inserted, dropped, "ingested file");

        stats.files_processed += 1;
        stats.rows_inserted += inserted;
        stats.rows_dropped += dropped;
    }

    tx.commit()?;

    info!(
        files_processed = stats.files_processed,
        files_skipped = stats.files_skipped,
        rows_inserted = stats.rows_inserted,
        rows_dropped = stats.rows_dropped,
        "ingestion complete"
    );

    Ok(stats)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::store::{PriceStore, Table};
    use std::io::Write;
    use tempfile::TempDir;

    const HEADER: &str = "ticker,date,open,high,low,close";

    fn setup() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.init().unwrap();
        store
    }

    fn write_csv(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut f = fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
        path
    }

    fn ledger_entry(store: &SqliteStore, file_path: &str) -> Option<IngestionFileRecord> {
        store
            .conn()
            .query_row(
                "SELECT file_path, file_size, mtime, ingested_at FROM ingestion_files WHERE file_path = ?1",
                [file_path],
                |row| {
                    Ok(IngestionFileRecord {
                        file_path: row.get(0)?,
                        file_size: row.get(1)?,
                        mtime: row.get(2)?,
                        ingested_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .unwrap()
    }

    fn record(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    fn std_cols() -> ColumnIndex {
        ColumnIndex::from_headers(&record(&["ticker", "date", "open", "high", "low", "close"]))
    }

    // -- parsing --------------------------------------------------------------

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float("10.5"), Some(10.5));
        assert_eq!(parse_float("  7 "), Some(7.0));
        assert_eq!(parse_float(""), None);
        assert_eq!(parse_float("   "), None);
        assert_eq!(parse_float("abc"), None);
        assert_eq!(parse_float("1,5"), None);
    }

    #[test]
    fn test_parse_record_trims_and_keeps_nulls() {
        let row = parse_record(
            &record(&[" AACB ", " 2020-01-01 ", "10", "", "x", "11"]),
            &std_cols(),
            "/data/a.csv",
            "2024-01-01 00:00:00.000000",
        )
        .unwrap();
        assert_eq!(row.ticker, "AACB");
        assert_eq!(row.date, "2020-01-01");
        assert_eq!(row.open, Some(10.0));
        assert_eq!(row.high, None);
        assert_eq!(row.low, None);
        assert_eq!(row.close, Some(11.0));
        assert_eq!(row.source_file, "/data/a.csv");
    }

    #[test]
    fn test_parse_record_rejects_empty_ticker() {
        let r = record(&["  ", "2020-01-01", "10", "12", "9", "11"]);
        assert!(parse_record(&r, &std_cols(), "f", "t").is_none());
    }

    #[test]
    fn test_parse_record_rejects_bad_date_length() {
        let cols = std_cols();
        assert!(parse_record(&record(&["A", "2020-1-1", "1", "1", "1", "1"]), &cols, "f", "t").is_none());
        assert!(parse_record(&record(&["A", "2020-01-011", "1", "1", "1", "1"]), &cols, "f", "t").is_none());
        assert!(parse_record(&record(&["A", "", "1", "1", "1", "1"]), &cols, "f", "t").is_none());
    }

    #[test]
    fn test_parse_record_short_row_and_column_order() {
        let cols = ColumnIndex::from_headers(&record(&["close", "volume", "date", "ticker", "open"]));
        assert_eq!(cols.missing(), vec!["high", "low"]);
        let row = parse_record(&record(&["5", "100", "2020-01-01", "X", "4"]), &cols, "f", "t").unwrap();
        assert_eq!(row.close, Some(5.0));
        assert_eq!(row.open, Some(4.0));
        assert_eq!(row.high, None);

        // Ragged record missing the ticker column entirely.
        assert!(parse_record(&record(&["5", "100", "2020-01-01"]), &cols, "f", "t").is_none());
    }

    // -- folder ingestion -----------------------------------------------------

    #[test]
    fn test_ingest_basic_and_malformed_rows() {
        let tmp = TempDir::new().unwrap();
        write_csv(
            tmp.path(),
            "a.csv",
            &[
                HEADER,
                "AACB,2020-01-01,10,12,9,11",
                ",2020-01-02,11,13,10,12",
                "AACB,20200103,11,13,10,12",
                "AACB,2020-01-04,,,,",
            ],
        );
        let store = setup();

        let stats = ingest_folder(&store, tmp.path(), &IngestOptions::default()).unwrap();
        assert_eq!(stats.files_processed, 1);
        assert_eq!(stats.rows_inserted, 2);
        assert_eq!(stats.rows_dropped, 2);
        assert_eq!(store.count_rows(Table::RawPrices).unwrap(), 2);

        let empty_ticker: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM raw_prices WHERE ticker = ''", [], |r| r.get(0))
            .unwrap();
        assert_eq!(empty_ticker, 0);

        let null_close: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM raw_prices WHERE close IS NULL", [], |r| r.get(0))
            .unwrap();
        assert_eq!(null_close, 1);
    }

    #[test]
    fn test_ingest_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        write_csv(tmp.path(), "a.csv", &[HEADER, "AACB,2020-01-01,10,12,9,11", "AACB,2020-01-02,11,13,10,12"]);
        let store = setup();

        let first = ingest_folder(&store, tmp.path(), &IngestOptions::default()).unwrap();
        assert_eq!(first.rows_inserted, 2);

        let second = ingest_folder(&store, tmp.path(), &IngestOptions::default()).unwrap();
        assert_eq!(second.files_processed, 0);
        assert_eq!(second.files_skipped, 1);
        assert_eq!(second.rows_inserted, 0);
        assert_eq!(store.count_rows(Table::RawPrices).unwrap(), 2);
    }

    #[test]
    fn test_forced_reingest_replaces_ledger() {
        let tmp = TempDir::new().unwrap();
        let path = write_csv(tmp.path(), "a.csv", &[HEADER, "AACB,2020-01-01,10,12,9,11", "AACB,2020-01-02,11,13,10,12"]);
        let store = setup();

        ingest_folder(&store, tmp.path(), &IngestOptions::default()).unwrap();
        let forced = ingest_folder(
            &store,
            tmp.path(),
            &IngestOptions {
                force: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(forced.files_processed, 1);
        assert_eq!(forced.rows_inserted, 2);
        assert_eq!(store.count_rows(Table::RawPrices).unwrap(), 4);
        assert_eq!(store.count_rows(Table::IngestionFiles).unwrap(), 1);

        let canonical = fs::canonicalize(&path).unwrap();
        let rec = ledger_entry(&store, &canonical.to_string_lossy()).unwrap();
        assert_eq!(rec.file_size, fs::metadata(&path).unwrap().len() as i64);
    }

    #[test]
    fn test_changed_file_is_reloaded() {
        let tmp = TempDir::new().unwrap();
        write_csv(tmp.path(), "a.csv", &[HEADER, "AACB,2020-01-01,10,12,9,11"]);
        let store = setup();
        ingest_folder(&store, tmp.path(), &IngestOptions::default()).unwrap();

        // Different size ⇒ no ledger match.
        write_csv(tmp.path(), "a.csv", &[HEADER, "AACB,2020-01-01,10,12,9,11", "AACB,2020-01-02,11,13,10,12"]);
        let stats = ingest_folder(&store, tmp.path(), &IngestOptions::default()).unwrap();
        assert_eq!(stats.files_processed, 1);
        assert_eq!(stats.rows_inserted, 2);
        assert_eq!(store.count_rows(Table::RawPrices).unwrap(), 3);
        assert_eq!(store.count_rows(Table::IngestionFiles).unwrap(), 1);
    }

    #[test]
    fn test_ingest_small_chunks() {
        let tmp = TempDir::new().unwrap();
        let mut lines = vec![HEADER.to_string()];
        for d in 1..=7 {
            lines.push(format!("AACB,2020-01-0{},10,12,9,11", d));
        }
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        write_csv(tmp.path(), "a.csv", &refs);
        let store = setup();

        let stats = ingest_folder(
            &store,
            tmp.path(),
            &IngestOptions {
                chunk_size: 3,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(stats.rows_inserted, 7);
        assert_eq!(store.count_rows(Table::RawPrices).unwrap(), 7);
    }

    #[test]
    fn test_recursive_sorted_and_limit() {
        let tmp = TempDir::new().unwrap();
        write_csv(tmp.path(), "b.csv", &[HEADER, "BBB,2020-01-01,1,1,1,1"]);
        write_csv(tmp.path(), "a/nested.csv", &[HEADER, "AAA,2020-01-01,1,1,1,1"]);
        write_csv(tmp.path(), "notes.txt", &["not a csv"]);

        let files = collect_csv_files(tmp.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a/nested.csv"));
        assert!(files[1].ends_with("b.csv"));

        let store = setup();
        let stats = ingest_folder(
            &store,
            tmp.path(),
            &IngestOptions {
                max_files: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(stats.files_processed, 1);
        let tickers: Vec<String> = store
            .conn()
            .prepare("SELECT DISTINCT ticker FROM raw_prices")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(tickers, vec!["AAA"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_dirs_not_followed() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().unwrap();
        write_csv(tmp.path(), "real/a.csv", &[HEADER, "AACB,2020-01-01,10,12,9,11"]);
        symlink(tmp.path().join("real"), tmp.path().join("alias")).unwrap();
        symlink(tmp.path(), tmp.path().join("real/loop")).unwrap();

        let files = collect_csv_files(tmp.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("real/a.csv"));

        let store = setup();
        let stats = ingest_folder(&store, tmp.path(), &IngestOptions::default()).unwrap();
        assert_eq!(stats.files_processed, 1);
        assert_eq!(store.count_rows(Table::RawPrices).unwrap(), 1);
        assert_eq!(store.count_rows(Table::IngestionFiles).unwrap(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_csv_file_is_read() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().unwrap();
        let target = write_csv(tmp.path(), "src/data.txt", &[HEADER, "AACB,2020-01-01,10,12,9,11"]);
        symlink(&target, tmp.path().join("linked.csv")).unwrap();
        symlink(tmp.path().join("gone"), tmp.path().join("dangling.csv")).unwrap();

        let files = collect_csv_files(tmp.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("linked.csv"));
    }

    #[test]
    fn test_missing_folder_is_typed_error() {
        let tmp = TempDir::new().unwrap();
        let store = setup();
        let err = ingest_folder(&store, &tmp.path().join("nope"), &IngestOptions::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::FolderNotFound(_))
        ));
    }

    #[test]
    fn test_failure_rolls_back_whole_run() {
        let tmp = TempDir::new().unwrap();
        write_csv(tmp.path(), "a.csv", &[HEADER, "AACB,2020-01-01,10,12,9,11"]);
        write_csv(tmp.path(), "b.csv", &[HEADER, "BBB,2020-01-01,10,12,9,11"]);
        let store = setup();
        // Ledger writes will fail after the raw rows of the first file land.
        store.conn().execute_batch("DROP TABLE ingestion_files;").unwrap();

        let result = ingest_folder(
            &store,
            tmp.path(),
            &IngestOptions {
                force: true,
                ..Default::default()
            },
        );
        assert!(result.is_err());
        assert_eq!(store.count_rows(Table::RawPrices).unwrap(), 0);
    }
}
