//! Conversion between mapped values and SQLite rows.
//!
//! Statements generated by `tablemap-core` carry `:name` placeholders. The
//! helpers here bind a [`Params`] set onto a prepared statement, run it and
//! turn result rows back into property maps through the table's field
//! descriptors.

use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, Statement};
use tablemap_core::{Field, Params, Properties, SqlValue};
use tracing::trace;

use crate::error::Result;

pub(crate) fn to_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Real(f) => Value::Real(*f),
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Blob(b) => Value::Blob(b.clone()),
    }
}

pub(crate) fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

/// Binds every parameter that the statement references. Parameters the
/// statement does not mention are skipped.
fn bind(stmt: &mut Statement<'_>, params: &Params) -> Result<()> {
    for (name, value) in params.iter() {
        let key = format!(":{name}");
        if let Some(idx) = stmt.parameter_index(&key)? {
            stmt.raw_bind_parameter(idx, to_value(value))?;
        }
    }
    Ok(())
}

/// Executes a statement and returns the number of changed rows.
pub(crate) fn execute(conn: &Connection, sql: &str, params: &Params) -> Result<usize> {
    trace!(sql, params = params.len(), "execute");
    let mut stmt = conn.prepare(sql)?;
    bind(&mut stmt, params)?;
    Ok(stmt.raw_execute()?)
}

/// Runs a query and hands each row, as raw values, to `on_row`. Returning
/// `false` from `on_row` stops the iteration.
pub(crate) fn query_each<F>(conn: &Connection, sql: &str, params: &Params, mut on_row: F) -> Result<()>
where
    F: FnMut(Vec<SqlValue>) -> Result<bool>,
{
    trace!(sql, params = params.len(), "query");
    let mut stmt = conn.prepare(sql)?;
    bind(&mut stmt, params)?;
    let width = stmt.column_count();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(from_value_ref(row.get_ref(idx)?));
        }
        if !on_row(values)? {
            break;
        }
    }
    Ok(())
}

/// Runs a query returning a single integer, e.g. `COUNT(*)`.
pub(crate) fn query_i64(conn: &Connection, sql: &str, params: &Params) -> Result<i64> {
    let mut result = 0;
    query_each(conn, sql, params, |values| {
        if let Some(SqlValue::Integer(i)) = values.first() {
            result = *i;
        }
        Ok(false)
    })?;
    Ok(result)
}

/// Converts one result row into a property map.
pub(crate) fn row_to_properties(fields: &[&Field], values: Vec<SqlValue>) -> Result<Properties> {
    let mut props = Properties::new();
    for (field, value) in fields.iter().zip(values) {
        props.insert(field.property.clone(), field.value_from_db(&value)?);
    }
    Ok(props)
}

/// Binds the given fields' values from a property map. Missing properties
/// bind `NULL`.
pub(crate) fn bind_properties(fields: &[&Field], props: &Properties, params: &mut Params) -> Result<()> {
    for field in fields {
        let value = match props.get(&field.property) {
            Some(v) => field.value_to_db(v)?,
            None => SqlValue::Null,
        };
        params.bind_exact(&field.param_name(), value)?;
    }
    Ok(())
}
