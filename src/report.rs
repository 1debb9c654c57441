use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::types::{CuratedPrice, FeatureRow};

/// How query results are rendered on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Header line plus comma-separated rows; nulls are empty fields.
    #[default]
    Csv,
    /// One JSON object per line; nulls are `null`.
    Json,
}

/// Rows with a fixed CSV header.
pub trait Tabular: Serialize {
    const HEADER: &'static [&'static str];
}

impl Tabular for CuratedPrice {
    const HEADER: &'static [&'static str] = &["ticker", "date", "open", "high", "low", "close"];
}

impl Tabular for FeatureRow {
    const HEADER: &'static [&'static str] =
        &["ticker", "date", "return_1d", "range_pct", "ma_5", "ma_20"];
}

/// Render rows to `out`. The CSV header is written even for an empty result.
pub fn write_rows<T: Tabular, W: Write>(rows: &[T], format: OutputFormat, mut out: W) -> Result<()> {
    match format {
        OutputFormat::Csv => {
            let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(out);
            wtr.write_record(T::HEADER)?;
            for r in rows {
                wtr.serialize(r).context("failed to write CSV row")?;
            }
            wtr.flush().context("failed to flush CSV")?;
        }
        OutputFormat::Json => {
            for r in rows {
                serde_json::to_writer(&mut out, r).context("failed to write JSON row")?;
                writeln!(out)?;
            }
            out.flush()?;
        }
    }
    Ok(())
}

/// Print rows to stdout followed by the `rows_returned` footer.
pub fn print_rows<T: Tabular>(rows: &[T], format: OutputFormat) -> Result<()> {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    write_rows(rows, format, &mut lock)?;
    writeln!(lock, "rows_returned: {}", rows.len())?;
    Ok(())
}

/// Export rows to a CSV file.
pub fn export_csv<T: Tabular>(rows: &[T], path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create CSV at {}", path.display()))?;
    write_rows(rows, OutputFormat::Csv, file)
        .with_context(|| format!("failed to export CSV to {}", path.display()))
}
