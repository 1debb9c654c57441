use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::DataError;

/// Backup file name for `db_path` taken at `at`: `<stem>_<YYYYmmdd_HHMMSS>.db`.
pub fn backup_file_name(db_path: &Path, at: DateTime<Utc>) -> String {
    let stem = db_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("data_platform");
    format!("{}_{}.db", stem, at.format("%Y%m%d_%H%M%S"))
}

/// Copy the database file into `backups_dir` under a UTC-timestamped name.
///
/// The caller should checkpoint any WAL first so the main file is complete.
pub fn backup_db(db_path: &Path, backups_dir: &Path) -> Result<PathBuf> {
    if !db_path.is_file() {
        return Err(DataError::DatabaseMissing(db_path.to_path_buf()).into());
    }
    fs::create_dir_all(backups_dir)
        .with_context(|| format!("failed to create {}", backups_dir.display()))?;

    let target = backups_dir.join(backup_file_name(db_path, Utc::now()));
    fs::copy(db_path, &target).with_context(|| {
        format!("failed to copy {} to {}", db_path.display(), target.display())
    })?;

    info!(from = %db_path.display(), to = %target.display(), "database backed up");
    Ok(target)
}
