//! Daily features derived from curated prices.
//!
//! One ordered pass per ticker: 1-day return, high-low range as a fraction of
//! close, and 5/20-day simple moving averages of close. Results are upserted
//! into `features_daily` keyed by (ticker, date).

use std::collections::VecDeque;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::data::schema;
use crate::data::{PriceStore, SqliteStore};
use crate::types::{CuratedPrice, FeatureRow};

pub const SHORT_WINDOW: usize = 5;
pub const LONG_WINDOW: usize = 20;

/// Mean of the last `n` values, or `None` while fewer than `n` are available.
fn trailing_mean(window: &VecDeque<f64>, n: usize) -> Option<f64> {
    if window.len() < n {
        return None;
    }
    let sum: f64 = window.iter().skip(window.len() - n).sum();
    Some(sum / n as f64)
}

/// Compute features for rows of a single ticker sorted by date ascending.
pub fn compute_features(prices: &[CuratedPrice]) -> Vec<FeatureRow> {
    let mut window: VecDeque<f64> = VecDeque::with_capacity(LONG_WINDOW);
    let mut prev_close: Option<f64> = None;
    let mut out = Vec::with_capacity(prices.len());

    for p in prices {
        let close = p.close;
        if window.len() == LONG_WINDOW {
            window.pop_front();
        }
        window.push_back(close);

        let return_1d = match prev_close {
            Some(prev) if prev != 0.0 => Some(close / prev - 1.0),
            _ => None,
        };
        let range_pct = if close != 0.0 {
            Some((p.high - p.low) / close)
        } else {
            None
        };

        out.push(FeatureRow {
            ticker: p.ticker.clone(),
            date: p.date.clone(),
            return_1d,
            range_pct,
            ma_5: trailing_mean(&window, SHORT_WINDOW),
            ma_20: trailing_mean(&window, LONG_WINDOW),
        });

        prev_close = Some(close);
    }

    out
}

/// Recompute and upsert features for one ticker. Returns rows written.
pub fn build_features_for_ticker(store: &SqliteStore, ticker: &str) -> Result<usize> {
    let tx = store.conn().unchecked_transaction()?;

    let prices: Vec<CuratedPrice> = {
        let mut stmt = tx.prepare_cached(schema::LOAD_CURATED_FOR_TICKER)?;
        let mapped = stmt.query_map([ticker], |row| {
            Ok(CuratedPrice {
                ticker: row.get(0)?,
                date: row.get(1)?,
                open: row.get(2)?,
                high: row.get(3)?,
                low: row.get(4)?,
                close: row.get(5)?,
            })
        })?;
        mapped
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("failed to load curated prices for {}", ticker))?
    };

    if prices.is_empty() {
        debug!(ticker, "no curated prices");
        return Ok(0);
    }

    let features = compute_features(&prices);
    {
        let mut stmt = tx.prepare_cached(schema::UPSERT_FEATURE)?;
        for f in &features {
            stmt.execute(rusqlite::params![
                f.ticker,
                f.date,
                f.return_1d,
                f.range_pct,
                f.ma_5,
                f.ma_20,
            ])?;
        }
    }
    tx.commit()?;

    debug!(ticker, rows = features.len(), "features upserted");
    Ok(features.len())
}

/// Run [`build_features_for_ticker`] for every curated ticker, one
/// transaction each. Returns `(tickers, rows)`.
pub fn build_features_all(store: &SqliteStore) -> Result<(usize, usize)> {
    let tickers = store.list_tickers()?;
    let mut rows = 0usize;
    for (i, ticker) in tickers.iter().enumerate() {
        rows += build_features_for_ticker(store, ticker)?;
        if (i + 1) % 100 == 0 || i + 1 == tickers.len() {
            info!("progress: {}/{} tickers, {} rows", i + 1, tickers.len(), rows);
        }
    }
    Ok((tickers.len(), rows))
}
