//! Error types for SQLite data access and schema upgrades.
//!
//! Provides a unified error type covering database access, mapping,
//! row-count expectations, upgrade and configuration failures.

use tablemap_core::MapError;
use thiserror::Error;

use crate::upgrade::UpgradeMode;

/// Errors that can occur during SQLite operations.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// SQLite database operation failure.
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// Metadata lookup or value conversion failure.
    #[error(transparent)]
    Mapping(#[from] MapError),

    /// An update or delete changed no rows.
    #[error("{operation} on '{table}' changed no rows")]
    NoChange { table: String, operation: String },

    /// A single-row query matched nothing.
    #[error("no matching row in '{table}'")]
    NoRows { table: String },

    /// A single-row query matched more than one row.
    #[error("more than one matching row in '{table}'")]
    TooManyRows { table: String },

    /// A DDL or data-copy step of a schema upgrade failed.
    #[error("{mode} upgrade of table '{table}' failed: {source}")]
    Upgrade {
        table: String,
        mode: UpgradeMode,
        #[source]
        source: Box<SqliteError>,
    },

    /// Rows left violating foreign keys after a table was rebuilt.
    #[error("{count} foreign key violation(s) in '{table}'")]
    ForeignKeyViolation { table: String, count: usize },

    /// Connection pool failure, e.g. acquire timeout.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// File system I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing or serialization failure.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// JSON parsing or serialization failure.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl SqliteError {
    pub(crate) fn no_change(table: &str, operation: &str) -> Self {
        Self::NoChange {
            table: table.to_string(),
            operation: operation.to_string(),
        }
    }
}

/// Convenience alias for results with [`SqliteError`].
pub type Result<T> = std::result::Result<T, SqliteError>;
