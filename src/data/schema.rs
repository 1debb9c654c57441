/// DDL for the platform's SQLite tables.

pub const CREATE_RAW_PRICES: &str = "
CREATE TABLE IF NOT EXISTS raw_prices (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    ticker      VARCHAR(16) NOT NULL,
    date        VARCHAR(10) NOT NULL,
    open        REAL,
    high        REAL,
    low         REAL,
    close       REAL,
    source_file VARCHAR(255) NOT NULL,
    ingested_at TEXT NOT NULL
);
";

pub const CREATE_PRICES: &str = "
CREATE TABLE IF NOT EXISTS prices (
    ticker VARCHAR(16) NOT NULL,
    date   VARCHAR(10) NOT NULL,
    open   REAL NOT NULL,
    high   REAL NOT NULL,
    low    REAL NOT NULL,
    close  REAL NOT NULL,
    PRIMARY KEY (ticker, date),
    CONSTRAINT ck_prices_high_ge_low CHECK (high >= low),
    CONSTRAINT ck_prices_open_gt_0 CHECK (open > 0),
    CONSTRAINT ck_prices_close_gt_0 CHECK (close > 0)
);
";

pub const CREATE_FEATURES_DAILY: &str = "
CREATE TABLE IF NOT EXISTS features_daily (
    ticker    VARCHAR(16) NOT NULL,
    date      VARCHAR(10) NOT NULL,
    return_1d REAL,
    range_pct REAL,
    ma_5      REAL,
    ma_20     REAL,
    PRIMARY KEY (ticker, date)
);
";

pub const CREATE_INGESTION_FILES: &str = "
CREATE TABLE IF NOT EXISTS ingestion_files (
    file_path   VARCHAR(500) PRIMARY KEY,
    file_size   INTEGER NOT NULL,
    mtime       REAL NOT NULL,
    ingested_at TEXT NOT NULL
);
";

pub const CREATE_INDEXES: &str = "
CREATE INDEX IF NOT EXISTS ix_raw_prices_ticker_date ON raw_prices(ticker, date);
CREATE INDEX IF NOT EXISTS ix_prices_date ON prices(date);
CREATE INDEX IF NOT EXISTS ix_features_date ON features_daily(date);
";

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

pub const INSERT_RAW_PRICE: &str = "
INSERT INTO raw_prices (ticker, date, open, high, low, close, source_file, ingested_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
";

/// Matches a ledger entry on path, size and mtime.
pub const FILE_ALREADY_LOADED: &str = "
SELECT 1 FROM ingestion_files
WHERE file_path = ?1 AND file_size = ?2 AND mtime = ?3
LIMIT 1
";

pub const DELETE_INGESTION_FILE: &str = "DELETE FROM ingestion_files WHERE file_path = ?1";

pub const INSERT_INGESTION_FILE: &str = "
INSERT INTO ingestion_files (file_path, file_size, mtime, ingested_at)
VALUES (?1, ?2, ?3, ?4)
";

// ---------------------------------------------------------------------------
// Curation
// ---------------------------------------------------------------------------

/// Latest valid raw row per (ticker, date), newest `ingested_at` first,
/// ties broken by the highest surrogate id.
pub const UPSERT_CURATED: &str = "
INSERT INTO prices (ticker, date, open, high, low, close)
SELECT ticker, date, open, high, low, close
FROM (
    SELECT
        ticker, date, open, high, low, close,
        ROW_NUMBER() OVER (
            PARTITION BY ticker, date
            ORDER BY ingested_at DESC, id DESC
        ) AS rn
    FROM raw_prices
    WHERE
        open IS NOT NULL AND high IS NOT NULL AND low IS NOT NULL AND close IS NOT NULL
        AND high >= low
        AND open > 0
        AND close > 0
)
WHERE rn = 1
ON CONFLICT (ticker, date) DO UPDATE SET
    open = excluded.open,
    high = excluded.high,
    low = excluded.low,
    close = excluded.close
";

pub const DELETE_ALL_CURATED: &str = "DELETE FROM prices";

pub const COUNT_RAW: &str = "SELECT COUNT(*) FROM raw_prices";

pub const COUNT_RAW_DISTINCT_PAIRS: &str =
    "SELECT COUNT(*) FROM (SELECT DISTINCT ticker, date FROM raw_prices)";

pub const COUNT_CURATED: &str = "SELECT COUNT(*) FROM prices";

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

pub const LOAD_CURATED_FOR_TICKER: &str = "
SELECT ticker, date, open, high, low, close
FROM prices
WHERE ticker = ?1
ORDER BY date ASC
";

pub const LIST_CURATED_TICKERS: &str = "SELECT DISTINCT ticker FROM prices ORDER BY ticker";

pub const UPSERT_FEATURE: &str = "
INSERT INTO features_daily (ticker, date, return_1d, range_pct, ma_5, ma_20)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT (ticker, date) DO UPDATE SET
    return_1d = excluded.return_1d,
    range_pct = excluded.range_pct,
    ma_5 = excluded.ma_5,
    ma_20 = excluded.ma_20
";
