//! The schema registry: catalog of declared tables.
//!
//! A registry is an ordinary value that can be created per test or per
//! database. Applications that want one process-wide catalog can use
//! [`SchemaRegistry::global`], which is shared mutable state: tests that
//! touch it must call [`SchemaRegistry::reset`] or
//! [`SchemaRegistry::delete_table`] to stay isolated.
//!
//! Tables are stored as `Arc<Table>` snapshots. The `define_*` calls
//! replace the snapshot, so tables handed out earlier stay unchanged.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{MapError, Result};
use crate::table::{Field, FieldOptions, IndexOptions, Table, TableOptions};

/// Catalog of declared [`Table`] definitions, keyed by registered name.
///
/// # Examples
///
/// ```
/// use tablemap_core::{FieldOptions, SchemaRegistry, TableOptions};
///
/// let registry = SchemaRegistry::new();
/// registry.define_table("users", TableOptions::default()).unwrap();
/// registry.define_id("users", "id", FieldOptions::new("INTEGER")).unwrap();
/// registry.define_field("users", "name", FieldOptions::new("TEXT")).unwrap();
///
/// let users = registry.get_table("users").unwrap();
/// assert_eq!(users.fields().len(), 2);
///
/// // fields can only be defined on registered tables
/// assert!(registry.define_field("nope", "x", FieldOptions::new("TEXT")).is_err());
/// ```
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: RwLock<BTreeMap<String, Arc<Table>>>,
}

static GLOBAL: OnceLock<SchemaRegistry> = OnceLock::new();

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static SchemaRegistry {
        GLOBAL.get_or_init(SchemaRegistry::new)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<Table>>> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<Table>>> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a complete table.
    ///
    /// Registering an identical definition again is a no-op; registering a
    /// different definition under the same name is a
    /// [`MapError::Registration`] error.
    pub fn register_table(&self, table: Table) -> Result<Arc<Table>> {
        table.validate()?;
        let mut tables = self.write();
        if let Some(existing) = tables.get(table.qualified_name()) {
            if **existing == table {
                return Ok(Arc::clone(existing));
            }
            return Err(MapError::Registration(format!(
                "table '{}' is already registered with a different definition",
                table.qualified_name()
            )));
        }
        let table = Arc::new(table);
        tables.insert(table.qualified_name().to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Returns a registered table.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::TableNotFound`] if no table has this name.
    pub fn get_table(&self, name: &str) -> Result<Arc<Table>> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| MapError::TableNotFound(name.to_string()))
    }

    /// Removes a table; returns whether it was registered.
    pub fn delete_table(&self, name: &str) -> bool {
        self.write().remove(name).is_some()
    }

    /// All registered tables, ordered by name.
    pub fn all_tables(&self) -> Vec<Arc<Table>> {
        self.read().values().cloned().collect()
    }

    /// Removes every table.
    pub fn reset(&self) {
        self.write().clear();
    }

    /// Declares a table. Declaring it again with equal options is a no-op.
    pub fn define_table(&self, name: &str, options: TableOptions) -> Result<()> {
        let mut tables = self.write();
        if let Some(existing) = tables.get(name) {
            if *existing.options() != options {
                return Err(MapError::Registration(format!(
                    "table '{name}' is already defined with different options"
                )));
            }
            return Ok(());
        }
        tables.insert(name.to_string(), Arc::new(Table::empty(name, options)?));
        Ok(())
    }

    /// Maps a property onto a column of a declared table.
    pub fn define_field(&self, table: &str, property: &str, opts: FieldOptions) -> Result<()> {
        let field = Field::new(property, opts)?;
        self.update(table, |t| t.add_field(field))
    }

    /// Maps a property and appends it to the table's primary key.
    pub fn define_id(&self, table: &str, property: &str, opts: FieldOptions) -> Result<()> {
        let field = Field::new(property, opts)?;
        self.update(table, |t| {
            t.add_field(field)?;
            t.add_primary_key(property);
            Ok(())
        })
    }

    /// Adds a property to a (possibly new) index of a declared table.
    pub fn define_index(
        &self,
        table: &str,
        property: &str,
        index_name: &str,
        opts: IndexOptions,
    ) -> Result<()> {
        self.update(table, |t| t.add_index_column(property, index_name, opts))
    }

    /// Adds a `(property, ref_column)` pair to a (possibly new) foreign key.
    pub fn define_foreign_key(
        &self,
        table: &str,
        property: &str,
        constraint_name: &str,
        ref_table: &str,
        ref_column: &str,
    ) -> Result<()> {
        self.update(table, |t| {
            t.add_foreign_key_pair(property, constraint_name, ref_table, ref_column)
        })
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut Table) -> Result<()>) -> Result<()> {
        let mut tables = self.write();
        let current = tables.get(name).ok_or_else(|| {
            MapError::Registration(format!("table '{name}' is not defined"))
        })?;
        let mut next = (**current).clone();
        f(&mut next)?;
        tables.insert(name.to_string(), Arc::new(next));
        Ok(())
    }
}
