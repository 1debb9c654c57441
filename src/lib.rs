//! Local data platform: raw CSV prices → curated OHLC → daily features,
//! all stored in a single SQLite file.

pub mod backup;
pub mod config;
pub mod curate;
pub mod data;
pub mod error;
pub mod features;
pub mod report;
pub mod types;
