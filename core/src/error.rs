//! Error types for metadata registration and query compilation.
//!
//! Every variant names the table, property or constraint involved so that
//! callers can surface the message unchanged.

use thiserror::Error;

/// Errors raised while building metadata or compiling queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    /// Duplicate or conflicting metadata registration.
    #[error("registration error: {0}")]
    Registration(String),

    /// No table with this name is registered.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A foreign key or index name referenced at query time does not exist.
    #[error("constraint '{constraint}' not found on table '{table}'")]
    ConstraintNotFound { table: String, constraint: String },

    /// A model property has no field mapping on the table.
    #[error("property '{property}' is not mapped on table '{table}'")]
    UnknownProperty { table: String, property: String },

    /// A value could not be converted between its model and database form.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// An identifier is empty, contains a NUL byte or is too long.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A filter expression is malformed.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// Convenience alias for results with [`MapError`].
pub type Result<T> = std::result::Result<T, MapError>;
