//! Process-wide configuration, resolved once at startup.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Environment variable overriding the database file location.
pub const DB_PATH_ENV: &str = "DB_PATH";

/// Database file name used when no override is set.
pub const DEFAULT_DB_FILE: &str = "data_platform.db";

/// Resolved locations for the store and its backups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory the relative defaults hang off.
    pub project_root: PathBuf,
    /// SQLite database file.
    pub db_path: PathBuf,
}

impl Config {
    /// Build from the current working directory and `$DB_PATH`.
    pub fn from_env() -> Result<Self> {
        let root = std::env::current_dir().context("failed to read current directory")?;
        Ok(Self::resolve(root, std::env::var_os(DB_PATH_ENV)))
    }

    /// Pure form of [`Config::from_env`]: an empty override counts as unset.
    pub fn resolve(project_root: PathBuf, db_override: Option<OsString>) -> Self {
        let db_path = match db_override {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => project_root.join(DEFAULT_DB_FILE),
        };
        Self {
            project_root,
            db_path,
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Connection string shown by `dp info`.
    pub fn database_url(&self) -> String {
        format!("sqlite:///{}", self.db_path.display())
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.project_root.join("backups")
    }
}
