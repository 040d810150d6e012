//! Table metadata, schema registry and filter compilation.
//!
//! This crate holds the engine-independent half of the mapping layer:
//!
//! - [`Table`] / [`Field`]: how a model maps onto a table: columns, primary
//!   key, indexes and foreign keys, assembled with [`TableBuilder`] or the
//!   `define_*` calls of a [`SchemaRegistry`].
//! - [`DbTypeInfo`]: parsing of declared column types into name, affinity,
//!   `NOT NULL` flag and default.
//! - [`Condition`] / [`Filter`]: typed query conditions, compiled to a SQL
//!   `WHERE` clause with named parameters by [`FilterCompiler`].
//! - Statement generation on [`Table`] for inserts, upserts, updates,
//!   deletes, selects and DDL.
//! - [`TableDefinition`]: the serializable (YAML/JSON) form of a table.
//!
//! The SQLite data access and schema upgrade live in `tablemap-sqlite`.
//!
//! # Example
//!
//! ```
//! use tablemap_core::*;
//!
//! let registry = SchemaRegistry::new();
//! registry
//!     .register_table(
//!         TableBuilder::new("users", TableOptions::default())
//!             .id("id", FieldOptions::new("INTEGER"))
//!             .field("name", FieldOptions::new("TEXT NOT NULL"))
//!             .field("age", FieldOptions::new("INTEGER"))
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let users = registry.get_table("users").unwrap();
//! let query = users
//!     .select_statement(&Filter::with_condition(Condition::gte("age", 18)))
//!     .unwrap();
//! assert_eq!(query.sql, "SELECT id, name, age FROM users WHERE age >= :age");
//! ```

mod condition;
mod dbtype;
mod definition;
mod error;
mod filter;
mod identifier;
mod model;
mod registry;
mod statement;
mod table;
mod value;

pub use condition::{Comparison, Condition};
pub use dbtype::{DbTypeInfo, TypeAffinity, normalize_default};
pub use definition::{
    FieldDefinition, ForeignKeyDefinition, ForeignKeyPairDefinition, IndexColumnDefinition,
    IndexDefinition, TableDefinition,
};
pub use error::{MapError, Result};
pub use filter::{Filter, FilterCompiler, Order, Params};
pub use identifier::{
    quote_identifier, quote_simple_identifier, split_schema_identifier, validate_identifier,
};
pub use model::{Model, Properties, from_properties, to_properties};
pub use registry::SchemaRegistry;
pub use statement::SelectQuery;
pub use table::{
    Field, FieldOptions, ForeignKey, ForeignKeyPair, Index, IndexColumn, IndexOptions, Table,
    TableBuilder, TableOptions,
};
pub use value::{PropertyType, SqlValue, ValueTransform, json_to_sql, sql_to_json};
