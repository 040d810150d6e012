//! SQLite backend for tablemap.
//!
//! Builds on the table metadata of [`tablemap_core`] to provide:
//!
//! - **`pool`**: a blocking connection pool configured from [`DatabaseConfig`]
//! - **`dao`**: [`BaseDao`], typed CRUD, partial reads/writes and foreign key navigation
//! - **`catalog`**: [`CatalogReader`], live schema introspection
//! - **`upgrade`**: [`AutoUpgrader`], bringing live tables in line with their declarations
//!
//! # Quick start
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use tablemap_core::{FieldOptions, Model, SchemaRegistry, TableBuilder, TableOptions};
//! use tablemap_sqlite::{AutoUpgrader, BaseDao, ConnectionPool, DatabaseConfig};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Contact {
//!     id: Option<i64>,
//!     email: String,
//! }
//!
//! impl Model for Contact {
//!     const TABLE: &'static str = "contacts";
//! }
//!
//! let registry = SchemaRegistry::new();
//! let contacts = registry
//!     .register_table(
//!         TableBuilder::new("contacts", TableOptions { auto_increment: true, ..Default::default() })
//!             .id("id", FieldOptions::new("INTEGER"))
//!             .field("email", FieldOptions::new("TEXT NOT NULL"))
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let pool = ConnectionPool::open(DatabaseConfig::in_memory()).unwrap();
//! let conn = pool.get().unwrap();
//!
//! AutoUpgrader::new(&conn).upgrade_tables(&[&*contacts]).unwrap();
//!
//! let dao = BaseDao::<Contact>::new(&conn, &registry).unwrap();
//! let saved = dao
//!     .insert(&Contact { id: None, email: "ada@example.com".into() })
//!     .unwrap();
//! assert_eq!(saved.id, Some(1));
//! ```

mod catalog;
mod config;
mod convert;
mod dao;
mod error;
mod pool;
mod upgrade;

pub use catalog::{
    CatalogReader, DbColumnInfo, DbForeignKeyInfo, DbIndexColumn, DbIndexInfo, DbTableInfo,
    declared_foreign_keys, foreign_key_signature,
};
pub use config::{DatabaseConfig, MEMORY_PATH, PoolConfig};
pub use dao::{BaseDao, DaoOptions, InsertMode};
pub use error::{Result, SqliteError};
pub use pool::{ConnectionPool, PooledConnection};
pub use upgrade::{
    AutoUpgrader, UpgradeInfo, UpgradeMode, UpgradeOptions, UpgradeReport, get_upgrade_info,
};
