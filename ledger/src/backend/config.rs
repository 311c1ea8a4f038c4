//! Runtime configuration for the ledger backend.

use std::path::PathBuf;
use tracing::info;

/// Environment variable overriding the database location
pub const DATABASE_URL_ENV: &str = "ALLOWANCE_LEDGER_DATABASE_URL";

/// Fixed name of the local ledger database
pub const DATABASE_NAME: &str = "allowanceTracker";

const DATA_DIRECTORY_NAME: &str = "allowance-tracker";

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    pub database_url: String,
}

impl LedgerConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// Load configuration, preferring the environment over the default location
    pub fn from_env() -> Self {
        match std::env::var(DATABASE_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => {
                info!("Using database from {}: {}", DATABASE_URL_ENV, url);
                Self::new(url.trim())
            }
            _ => Self::default(),
        }
    }

    /// Directory holding the database file when no override is given
    pub fn default_data_directory() -> PathBuf {
        dirs::data_dir()
            .map(|dir| dir.join(DATA_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn database_url_for(directory: &std::path::Path) -> String {
        let file = directory.join(format!("{}.db", DATABASE_NAME));
        format!("sqlite:{}", file.display())
    }

    /// File backing the database, or `None` for in-memory URLs
    pub fn database_file(&self) -> Option<PathBuf> {
        let rest = self.database_url.strip_prefix("sqlite:")?;
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        let path = rest.split('?').next().unwrap_or_default();
        if path.is_empty() || path == ":memory:" {
            None
        } else {
            Some(PathBuf::from(path))
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::new(Self::database_url_for(&Self::default_data_directory()))
    }
}
