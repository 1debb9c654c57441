use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use dataplatform::backup::backup_db;
use dataplatform::config::Config;
use dataplatform::curate::{build_curated, CurateMode};
use dataplatform::data::{
    ingest_folder, IngestOptions, PriceStore, SqliteStore, Table, DEFAULT_CHUNK_SIZE,
};
use dataplatform::error::DataError;
use dataplatform::features::{build_features_all, build_features_for_ticker};
use dataplatform::report::{export_csv, print_rows, OutputFormat};
use dataplatform::types::PriceQuery;

#[derive(Parser)]
#[command(name = "dp", about = "Local data platform: raw CSV prices -> curated prices -> features")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show DB path and URL
    Info,

    /// Test the connection to the SQLite database and show table row counts
    PingDb,

    /// Create tables in the SQLite database
    InitDb,

    /// Build curated prices table from raw_prices
    BuildCurated {
        /// Upsert over existing curated rows instead of clearing the table first
        #[arg(long)]
        incremental: bool,
    },

    /// Load CSV files into raw_prices (idempotent)
    LoadRaw {
        /// Folder containing CSV files (searched recursively)
        #[arg(long)]
        path: PathBuf,

        /// Reload files even if already ingested
        #[arg(long)]
        force: bool,

        /// Limit number of CSV files (for quick testing)
        #[arg(long)]
        max_files: Option<usize>,

        /// Rows per insert batch
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },

    /// Query curated prices by ticker and optional date range
    QueryPrices(QueryArgs),

    /// Build features_daily from curated prices
    BuildFeatures {
        /// Ticker symbol (e.g. AACB)
        #[arg(long, required_unless_present = "all", conflicts_with = "all")]
        ticker: Option<String>,

        /// Build features for every ticker in the curated table
        #[arg(long)]
        all: bool,
    },

    /// Query features_daily by ticker and optional date range
    QueryFeatures(QueryArgs),

    /// Create a timestamped copy of the SQLite DB in ./backups
    BackupDb,
}

#[derive(Args)]
struct QueryArgs {
    /// Ticker symbol (e.g. AACB)
    #[arg(long)]
    ticker: String,

    /// Start date YYYY-MM-DD (inclusive)
    #[arg(long = "from", value_parser = parse_date)]
    date_from: Option<String>,

    /// End date YYYY-MM-DD (inclusive)
    #[arg(long = "to", value_parser = parse_date)]
    date_to: Option<String>,

    /// Max rows to print
    #[arg(long, default_value = "20")]
    limit: usize,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,

    /// Also export the rows to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,
}

impl QueryArgs {
    fn to_query(&self) -> PriceQuery {
        PriceQuery {
            ticker: self.ticker.clone(),
            date_from: self.date_from.clone(),
            date_to: self.date_to.clone(),
            limit: self.limit,
        }
    }
}

fn parse_date(s: &str) -> std::result::Result<String, DataError> {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| DataError::InvalidDate(s.to_string()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Info => cmd_info(&config),
        Commands::PingDb => cmd_ping(&config),
        Commands::InitDb => cmd_init(&config),
        Commands::BuildCurated { incremental } => cmd_build_curated(&config, incremental),
        Commands::LoadRaw {
            path,
            force,
            max_files,
            chunk_size,
        } => cmd_load_raw(
            &config,
            path,
            IngestOptions {
                force,
                max_files,
                chunk_size,
            },
        ),
        Commands::QueryPrices(args) => cmd_query_prices(&config, &args),
        Commands::BuildFeatures { ticker, all } => cmd_build_features(&config, ticker, all),
        Commands::QueryFeatures(args) => cmd_query_features(&config, &args),
        Commands::BackupDb => cmd_backup(&config),
    }
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(config.db_path())
}

fn cmd_info(config: &Config) -> Result<()> {
    println!("DB_PATH: {}", config.db_path().display());
    println!("DATABASE_URL: {}", config.database_url());
    Ok(())
}

fn cmd_ping(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    store.ping().context("database ping failed")?;
    println!("OK: DB connection works");
    print_table_counts(&store);
    Ok(())
}

/// Row count per table; `None` when the table does not exist yet.
fn table_counts(store: &impl PriceStore) -> Vec<(Table, Option<i64>)> {
    Table::ALL
        .into_iter()
        .map(|table| (table, store.count_rows(table).ok()))
        .collect()
}

fn print_table_counts(store: &impl PriceStore) {
    for (table, count) in table_counts(store) {
        let label = format!("{}:", table);
        match count {
            Some(n) => println!("{:<16} {}", label, n),
            None => println!("{:<16} (missing, run init-db)", label),
        }
    }
}

fn cmd_init(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    store.init().context("failed to initialize schema")?;
    println!("OK: tables created (if not already present)");
    Ok(())
}

fn cmd_build_curated(config: &Config, incremental: bool) -> Result<()> {
    let store = open_store(config)?;
    let mode = if incremental {
        CurateMode::Incremental
    } else {
        CurateMode::Reset
    };
    let stats = build_curated(&store, mode).context("curated build failed")?;

    println!("raw_prices rows:        {}", stats.raw_rows);
    println!("raw distinct (t,d):     {}", stats.distinct_pairs);
    println!("curated prices rows:    {}", stats.curated_rows);
    println!("OK: curated prices built");
    Ok(())
}

fn cmd_load_raw(config: &Config, path: PathBuf, opts: IngestOptions) -> Result<()> {
    let store = open_store(config)?;
    let stats = ingest_folder(&store, &path, &opts)
        .with_context(|| format!("ingestion from {} failed", path.display()))?;

    println!("Files processed: {}", stats.files_processed);
    println!("Files skipped:   {}", stats.files_skipped);
    println!("Rows inserted:   {}", stats.rows_inserted);
    println!("Rows dropped:    {}", stats.rows_dropped);
    Ok(())
}

fn cmd_query_prices(config: &Config, args: &QueryArgs) -> Result<()> {
    let store = open_store(config)?;
    let rows = store.query_prices(&args.to_query())?;
    print_rows(&rows, args.format)?;
    if let Some(ref path) = args.csv {
        export_csv(&rows, path)?;
        println!("Results exported to {}", path.display());
    }
    Ok(())
}

fn cmd_build_features(config: &Config, ticker: Option<String>, all: bool) -> Result<()> {
    let store = open_store(config)?;
    match ticker {
        Some(t) if !all => {
            let n = build_features_for_ticker(&store, &t)
                .with_context(|| format!("feature build failed for {}", t))?;
            println!("OK: features built for {}, rows_upserted={}", t, n);
        }
        _ => {
            let (tickers, rows) = build_features_all(&store).context("feature build failed")?;
            println!("OK: features built for {} tickers, rows_upserted={}", tickers, rows);
        }
    }
    Ok(())
}

fn cmd_query_features(config: &Config, args: &QueryArgs) -> Result<()> {
    let store = open_store(config)?;
    let rows = store.query_features(&args.to_query())?;
    print_rows(&rows, args.format)?;
    if let Some(ref path) = args.csv {
        export_csv(&rows, path)?;
        println!("Results exported to {}", path.display());
    }
    Ok(())
}

fn cmd_backup(config: &Config) -> Result<()> {
    if config.db_path().is_file() {
        // Fold committed WAL pages into the main file before copying it.
        open_store(config)?.checkpoint()?;
    }
    let path = backup_db(config.db_path(), &config.backups_dir())?;
    println!("OK: backup created at {}", path.display());
    Ok(())
}
