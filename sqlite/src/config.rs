//! Database configuration.
//!
//! Defines the YAML-serializable settings for opening a database: file
//! path, pragmas, pool sizing and the default upgrade options.
//!
//! # Example YAML
//!
//! ```yaml
//! path: app.db
//! foreign_keys: true
//! busy_timeout_ms: 5000
//! journal_mode: wal
//! pool:
//!   max_connections: 4
//!   acquire_timeout_ms: 5000
//! upgrade:
//!   force_recreate: false
//!   keep_old_columns: false
//! ```

use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SqliteError};
use crate::upgrade::UpgradeOptions;

/// Path value selecting a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// Connection pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on open connections. Forced to 1 for in-memory databases.
    pub max_connections: usize,
    /// How long [`ConnectionPool::get`](crate::ConnectionPool::get) waits for
    /// a free connection.
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            acquire_timeout_ms: 5000,
        }
    }
}

/// Top-level database configuration.
///
/// # Examples
///
/// ```
/// use tablemap_sqlite::DatabaseConfig;
///
/// let config: DatabaseConfig = serde_yaml::from_str("path: app.db\n").unwrap();
/// assert!(config.foreign_keys);
/// assert_eq!(config.pool.max_connections, 4);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file, or `:memory:`.
    pub path: String,
    /// Value of `PRAGMA foreign_keys` on every connection.
    pub foreign_keys: bool,
    pub busy_timeout_ms: u64,
    /// `PRAGMA journal_mode`, applied to file databases only.
    pub journal_mode: Option<String>,
    pub pool: PoolConfig,
    /// Default options for [`AutoUpgrader`](crate::AutoUpgrader).
    pub upgrade: UpgradeOptions,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: MEMORY_PATH.to_string(),
            foreign_keys: true,
            busy_timeout_ms: 5000,
            journal_mode: None,
            pool: PoolConfig::default(),
            upgrade: UpgradeOptions::default(),
        }
    }
}

impl DatabaseConfig {
    /// Configuration for a database file with default settings.
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// In-memory configuration with default settings.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn is_memory(&self) -> bool {
        self.path == MEMORY_PATH
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.pool.acquire_timeout_ms)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::ConfigError`] for an empty path, a pool of
    /// zero connections or an unknown journal mode.
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(SqliteError::ConfigError("path cannot be empty".into()));
        }
        if self.pool.max_connections == 0 {
            return Err(SqliteError::ConfigError(
                "pool.max_connections must be at least 1".into(),
            ));
        }
        if let Some(mode) = &self.journal_mode {
            const MODES: [&str; 6] = ["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];
            if !MODES.contains(&mode.to_ascii_uppercase().as_str()) {
                return Err(SqliteError::ConfigError(format!(
                    "unknown journal_mode '{mode}'"
                )));
            }
        }
        Ok(())
    }

    /// Loads and validates configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`](SqliteError::IoError) if the file cannot be read,
    /// [`YamlError`](SqliteError::YamlError) if parsing fails, or
    /// [`ConfigError`](SqliteError::ConfigError) for invalid values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }
}
