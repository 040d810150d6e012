//! Generic data access for mapped models.
//!
//! [`BaseDao`] combines a table's metadata with a borrowed connection and
//! offers CRUD operations for one [`Model`] type. Full models go through
//! serde; partial operations take a [`Properties`] map and touch only the
//! columns of the properties present in it.
//!
//! No operation opens a transaction. Callers that need several calls to be
//! atomic wrap them in one (`Connection::unchecked_transaction`).
//!
//! # Example
//!
//! ```
//! use rusqlite::Connection;
//! use serde::{Deserialize, Serialize};
//! use tablemap_core::{FieldOptions, Model, SchemaRegistry, TableBuilder, TableOptions};
//! use tablemap_sqlite::BaseDao;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Note {
//!     id: Option<i64>,
//!     text: String,
//! }
//!
//! impl Model for Note {
//!     const TABLE: &'static str = "notes";
//! }
//!
//! let registry = SchemaRegistry::new();
//! registry
//!     .register_table(
//!         TableBuilder::new("notes", TableOptions { auto_increment: true, ..Default::default() })
//!             .id("id", FieldOptions::new("INTEGER"))
//!             .field("text", FieldOptions::new("TEXT NOT NULL"))
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let conn = Connection::open_in_memory().unwrap();
//! let dao = BaseDao::<Note>::new(&conn, &registry).unwrap();
//! dao.create_table().unwrap();
//!
//! let note = dao.insert(&Note { id: None, text: "hello".into() }).unwrap();
//! assert_eq!(note.id, Some(1));
//! assert_eq!(dao.select(&note).unwrap().text, "hello");
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tablemap_core::{
    Condition, Field, Filter, FilterCompiler, MapError, Model, Params, Properties,
    SchemaRegistry, SqlValue, Table, from_properties, to_properties,
};
use tracing::debug;

use crate::convert::{bind_properties, execute, query_each, query_i64, row_to_properties};
use crate::error::{Result, SqliteError};

/// How `insert` treats the row-id field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertMode {
    /// Insert the primary key as given; a duplicate key fails.
    StrictSqlite,
    /// Leave the row-id column out so the engine always generates it, even
    /// if the model carries a value.
    ForceAutoGeneration,
}

/// Behaviour switches for a [`BaseDao`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaoOptions {
    /// Do not fail updates and deletes that change no rows.
    pub ignore_no_changes: bool,
    /// Insert mode; `None` means [`InsertMode::ForceAutoGeneration`] for
    /// `auto_increment` tables and [`InsertMode::StrictSqlite`] otherwise.
    pub insert_mode: Option<InsertMode>,
}

/// CRUD operations for one model type on one connection.
pub struct BaseDao<'a, M> {
    conn: &'a Connection,
    registry: &'a SchemaRegistry,
    table: Arc<Table>,
    options: DaoOptions,
    _model: PhantomData<fn() -> M>,
}

impl<'a, M: Model> BaseDao<'a, M> {
    /// Creates a DAO for the table registered under `M::TABLE`.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::TableNotFound`] if the table is not registered.
    pub fn new(conn: &'a Connection, registry: &'a SchemaRegistry) -> Result<Self> {
        let table = registry.get_table(M::TABLE)?;
        Ok(Self {
            conn,
            registry,
            table,
            options: DaoOptions::default(),
            _model: PhantomData,
        })
    }

    pub fn with_options(mut self, options: DaoOptions) -> Self {
        self.options = options;
        self
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn options(&self) -> &DaoOptions {
        &self.options
    }

    pub fn connection(&self) -> &Connection {
        self.conn
    }

    fn default_insert_mode(&self) -> InsertMode {
        self.options.insert_mode.unwrap_or(if self.table.auto_increment() {
            InsertMode::ForceAutoGeneration
        } else {
            InsertMode::StrictSqlite
        })
    }

    fn all_fields(&self) -> Vec<&Field> {
        self.table.fields().iter().collect()
    }

    /// Fields named by the keys of a partial model.
    fn partial_fields(&self, props: &Properties) -> Result<Vec<&Field>> {
        Ok(props
            .keys()
            .map(|k| self.table.require_field(k))
            .collect::<std::result::Result<Vec<_>, MapError>>()?)
    }

    fn require_key(&self, props: &Properties) -> Result<()> {
        for pk in self.table.primary_key() {
            if props.get(pk).is_none_or(JsonValue::is_null) {
                return Err(MapError::Conversion(format!(
                    "table '{}': primary key property '{pk}' is missing",
                    self.table.qualified_name()
                ))
                .into());
            }
        }
        Ok(())
    }

    fn check_changed(&self, changed: usize, operation: &str) -> Result<usize> {
        if changed == 0 && !self.options.ignore_no_changes {
            return Err(SqliteError::no_change(self.table.qualified_name(), operation));
        }
        debug!(table = self.table.qualified_name(), operation, changed);
        Ok(changed)
    }

    fn append_where(&self, sql: &mut String, condition: Option<&Condition>, params: &mut Params) -> Result<()> {
        if let Some(cond) = condition {
            let clause = FilterCompiler::new(&self.table, None).compile_into(cond, params)?;
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        Ok(())
    }

    fn query_properties(
        &self,
        sql: &str,
        params: &Params,
        fields: &[&Field],
        limit: Option<usize>,
    ) -> Result<Vec<Properties>> {
        let mut rows = Vec::new();
        query_each(self.conn, sql, params, |values| {
            rows.push(row_to_properties(fields, values)?);
            Ok(limit.is_none_or(|l| rows.len() < l))
        })?;
        Ok(rows)
    }

    fn exactly_one(&self, rows: Vec<Properties>) -> Result<Properties> {
        let mut rows = rows.into_iter();
        match (rows.next(), rows.next()) {
            (Some(row), None) => Ok(row),
            (None, _) => Err(SqliteError::NoRows {
                table: self.table.qualified_name().to_string(),
            }),
            (Some(_), Some(_)) => Err(SqliteError::TooManyRows {
                table: self.table.qualified_name().to_string(),
            }),
        }
    }

    fn insert_fields(
        &self,
        mut props: Properties,
        mut fields: Vec<&Field>,
        mode: InsertMode,
    ) -> Result<Properties> {
        let identity = self.table.row_id_field();
        if let (InsertMode::ForceAutoGeneration, Some(id)) = (mode, identity) {
            fields.retain(|f| f.property != id.property);
        }
        let sql = self.table.insert_into_statement(Some(&fields));
        let mut params = Params::new();
        bind_properties(&fields, &props, &mut params)?;
        execute(self.conn, &sql, &params)?;

        if let Some(id) = identity {
            let rowid = self.conn.last_insert_rowid();
            props.insert(id.property.clone(), id.value_from_db(&SqlValue::Integer(rowid))?);
        }
        Ok(props)
    }

    /// Inserts a model and returns it with the generated row id filled in.
    pub fn insert(&self, model: &M) -> Result<M> {
        self.insert_with_mode(model, self.default_insert_mode())
    }

    pub fn insert_with_mode(&self, model: &M, mode: InsertMode) -> Result<M> {
        let props = self.insert_fields(to_properties(model)?, self.all_fields(), mode)?;
        Ok(from_properties(props)?)
    }

    /// Inserts only the given properties. Every other column must be
    /// nullable or have a default, or the engine rejects the row.
    pub fn insert_partial(&self, props: &Properties) -> Result<Properties> {
        self.insert_partial_with_mode(props, self.default_insert_mode())
    }

    pub fn insert_partial_with_mode(&self, props: &Properties, mode: InsertMode) -> Result<Properties> {
        let fields = self.partial_fields(props)?;
        self.insert_fields(props.clone(), fields, mode)
    }

    fn replace_fields(&self, mut props: Properties, fields: Vec<&Field>) -> Result<Properties> {
        let sql = self.table.insert_or_replace_statement(Some(&fields));
        let mut params = Params::new();
        bind_properties(&fields, &props, &mut params)?;

        let identity = self
            .table
            .row_id_field()
            .filter(|id| props.get(&id.property).is_none_or(JsonValue::is_null));
        let Some(id) = identity else {
            execute(self.conn, &sql, &params)?;
            return Ok(props);
        };

        // the row id of an updated row is not the last inserted one
        let sql = format!("{sql} RETURNING {}", id.quoted_name());
        let mut rowid = None;
        query_each(self.conn, &sql, &params, |values| {
            rowid = values.into_iter().next();
            Ok(false)
        })?;
        if let Some(rowid) = rowid {
            props.insert(id.property.clone(), id.value_from_db(&rowid)?);
        }
        Ok(props)
    }

    /// Inserts the model, or updates the existing row with the same primary
    /// key (or unique index key).
    pub fn replace(&self, model: &M) -> Result<M> {
        let props = self.replace_fields(to_properties(model)?, self.all_fields())?;
        Ok(from_properties(props)?)
    }

    /// Like [`replace`](Self::replace); on update only the given properties
    /// change.
    pub fn replace_partial(&self, props: &Properties) -> Result<Properties> {
        let fields = self.partial_fields(props)?;
        self.replace_fields(props.clone(), fields)
    }

    fn update_fields(&self, props: &Properties, fields: Vec<&Field>) -> Result<usize> {
        self.require_key(props)?;
        let sql = self.table.update_by_id_statement(Some(&fields))?;
        let mut bound = fields;
        for pk in self.table.primary_key_fields() {
            if !bound.iter().any(|f| f.property == pk.property) {
                bound.push(pk);
            }
        }
        let mut params = Params::new();
        bind_properties(&bound, props, &mut params)?;
        let changed = execute(self.conn, &sql, &params)?;
        self.check_changed(changed, "update")
    }

    /// Updates every non-key column of the row with the model's key.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::NoChange`] if no row has that key, unless
    /// `ignore_no_changes` is set.
    pub fn update(&self, model: &M) -> Result<()> {
        self.update_fields(&to_properties(model)?, self.all_fields())?;
        Ok(())
    }

    /// Updates the given non-key properties of the row identified by the
    /// key properties, which must be present.
    pub fn update_partial(&self, props: &Properties) -> Result<()> {
        let fields = self.partial_fields(props)?;
        self.update_fields(props, fields)?;
        Ok(())
    }

    /// Sets the given properties on every row matching `condition`, or on
    /// every row of the table when `condition` is `None`. Returns the number
    /// of changed rows.
    pub fn update_partial_all(&self, props: &Properties, condition: Option<&Condition>) -> Result<usize> {
        let fields = self.partial_fields(props)?;
        let mut sql = self.table.update_all_statement(Some(&fields))?;
        let mut params = Params::new();
        bind_properties(&fields, props, &mut params)?;
        self.append_where(&mut sql, condition, &mut params)?;
        let changed = execute(self.conn, &sql, &params)?;
        self.check_changed(changed, "update")
    }

    /// Deletes every row matching `condition`, or every row when `None`.
    pub fn delete_all(&self, condition: Option<&Condition>) -> Result<usize> {
        let mut sql = self.table.delete_all_statement();
        let mut params = Params::new();
        self.append_where(&mut sql, condition, &mut params)?;
        let changed = execute(self.conn, &sql, &params)?;
        self.check_changed(changed, "delete")
    }

    pub fn delete(&self, model: &M) -> Result<()> {
        self.delete_by_id(&to_properties(model)?)
    }

    /// Deletes the row identified by the key properties.
    pub fn delete_by_id(&self, props: &Properties) -> Result<()> {
        self.require_key(props)?;
        let mut params = Params::new();
        bind_properties(&self.table.primary_key_fields(), props, &mut params)?;
        let changed = execute(self.conn, &self.table.delete_by_id_statement(), &params)?;
        self.check_changed(changed, "delete")?;
        Ok(())
    }

    /// Reloads a model by its primary key.
    pub fn select(&self, model: &M) -> Result<M> {
        self.select_by_id(&to_properties(model)?)
    }

    /// Loads the row identified by the key properties.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::NoRows`] if there is no such row.
    pub fn select_by_id(&self, props: &Properties) -> Result<M> {
        self.require_key(props)?;
        let mut params = Params::new();
        bind_properties(&self.table.primary_key_fields(), props, &mut params)?;
        let rows = self.query_properties(
            &self.table.select_by_id_statement(),
            &params,
            &self.all_fields(),
            Some(2),
        )?;
        Ok(from_properties(self.exactly_one(rows)?)?)
    }

    /// Loads the single row matching a filter.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteError::NoRows`] or [`SqliteError::TooManyRows`]
    /// unless exactly one row matches.
    pub fn select_one(&self, filter: &Filter) -> Result<M> {
        let mut filter = filter.clone();
        filter.limit = Some(2);
        let query = self.table.select_statement(&filter)?;
        let rows = self.query_properties(&query.sql, &query.params, &query.fields, Some(2))?;
        Ok(from_properties(self.exactly_one(rows)?)?)
    }

    pub fn select_all(&self, filter: &Filter) -> Result<Vec<M>> {
        let mut models = Vec::new();
        self.select_each(filter, |m| {
            models.push(m);
            Ok(())
        })?;
        Ok(models)
    }

    /// Streams matching rows to `callback` one at a time. An error from the
    /// callback stops the iteration and is returned.
    pub fn select_each<F>(&self, filter: &Filter, mut callback: F) -> Result<()>
    where
        F: FnMut(M) -> Result<()>,
    {
        let query = self.table.select_statement(filter)?;
        query_each(self.conn, &query.sql, &query.params, |values| {
            let props = row_to_properties(&query.fields, values)?;
            callback(from_properties(props)?)?;
            Ok(true)
        })
    }

    /// Matching rows as partial models, for projections that do not
    /// deserialize into `M`.
    pub fn select_partial_all(&self, filter: &Filter) -> Result<Vec<Properties>> {
        let query = self.table.select_statement(filter)?;
        self.query_properties(&query.sql, &query.params, &query.fields, None)
    }

    pub fn count_all(&self, filter: &Filter) -> Result<u64> {
        let (sql, params) = self.table.count_statement(filter)?;
        Ok(u64::try_from(query_i64(self.conn, &sql, &params)?).unwrap_or_default())
    }

    pub fn exists(&self, filter: &Filter) -> Result<bool> {
        let (sql, params) = self.table.exists_statement(filter)?;
        Ok(query_i64(self.conn, &sql, &params)? != 0)
    }

    /// Loads the parent row that `child` references through the child
    /// table's foreign key `fk`. Called on the parent's DAO.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::ConstraintNotFound`] if the child table has no
    /// such foreign key, or if it references a column this table does not
    /// map.
    pub fn select_by_child<C: Model>(&self, fk: &str, child: &C) -> Result<M> {
        let child_table = self.registry.get_table(C::TABLE)?;
        let child_props = to_properties(child)?;
        let pairs = foreign_key_fields(&child_table, fk, &self.table)?;
        let cond = Condition::and(
            pairs
                .iter()
                .map(|(local, referenced)| {
                    let value = child_props.get(&local.property).cloned().unwrap_or(JsonValue::Null);
                    Condition::eq(referenced.property.clone(), value)
                })
                .collect(),
        );
        self.select_one(&Filter::with_condition(cond))
    }

    /// Loads every row of this table that references `parent` through this
    /// table's foreign key `fk`. Called on the child's DAO.
    pub fn select_all_of<P: Model>(&self, fk: &str, parent: &P) -> Result<Vec<M>> {
        let parent_table = self.registry.get_table(P::TABLE)?;
        let parent_props = to_properties(parent)?;
        let pairs = foreign_key_fields(&self.table, fk, &parent_table)?;
        let cond = Condition::and(
            pairs
                .iter()
                .map(|(local, referenced)| {
                    let value = parent_props
                        .get(&referenced.property)
                        .cloned()
                        .unwrap_or(JsonValue::Null);
                    Condition::eq(local.property.clone(), value)
                })
                .collect(),
        );
        self.select_all(&Filter::with_condition(cond))
    }

    /// Loads the parent of `child` through this table's foreign key `fk`.
    pub fn select_parent_of<P: Model>(&self, fk: &str, child: &M) -> Result<P> {
        BaseDao::<P>::new(self.conn, self.registry)?
            .with_options(self.options.clone())
            .select_by_child(fk, child)
    }

    /// Loads the children of `parent` through the child table's foreign key
    /// `fk`.
    pub fn select_all_childs_of<C: Model>(&self, fk: &str, parent: &M) -> Result<Vec<C>> {
        BaseDao::<C>::new(self.conn, self.registry)?
            .with_options(self.options.clone())
            .select_all_of(fk, parent)
    }

    pub fn create_table(&self) -> Result<()> {
        self.conn.execute_batch(&self.table.create_table_statement())?;
        Ok(())
    }

    pub fn drop_table(&self) -> Result<()> {
        self.conn.execute_batch(&self.table.drop_table_statement())?;
        Ok(())
    }

    pub fn alter_table_add_column(&self, property: &str) -> Result<()> {
        let sql = self.table.alter_table_add_column_statement(property)?;
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    pub fn create_index(&self, index_name: &str) -> Result<()> {
        let sql = self.table.create_index_statement(index_name)?;
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    pub fn drop_index(&self, index_name: &str) -> Result<()> {
        self.conn.execute_batch(&self.table.drop_index_statement(index_name))?;
        Ok(())
    }
}

/// Resolves a foreign key of `child` into (child field, parent field) pairs.
fn foreign_key_fields<'t>(
    child: &'t Table,
    fk_name: &str,
    parent: &'t Table,
) -> Result<Vec<(&'t Field, &'t Field)>> {
    let not_found = |table: &Table, constraint: String| MapError::ConstraintNotFound {
        table: table.qualified_name().to_string(),
        constraint,
    };
    let fk = child.foreign_key(fk_name)?;
    if fk.ref_table != parent.name() && fk.ref_table != parent.qualified_name() {
        return Err(not_found(
            child,
            format!("{fk_name} (references '{}', not '{}')", fk.ref_table, parent.qualified_name()),
        )
        .into());
    }
    fk.pairs
        .iter()
        .map(|pair| {
            let local = child.require_field(&pair.property)?;
            let referenced = parent
                .field_by_column(&pair.ref_column)
                .ok_or_else(|| not_found(parent, format!("{fk_name}.{}", pair.ref_column)))?;
            Ok((local, referenced))
        })
        .collect()
}
