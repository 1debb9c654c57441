use std::path::PathBuf;

use thiserror::Error;

/// Domain errors callers may want to match on.
///
/// Storage and IO failures are not listed here; they travel as
/// `anyhow::Error` with context attached at the call site.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("input folder not found: {}", .0.display())]
    FolderNotFound(PathBuf),

    #[error("database file not found: {}", .0.display())]
    DatabaseMissing(PathBuf),

    #[error("invalid date '{0}' (expected YYYY-MM-DD)")]
    InvalidDate(String),
}
