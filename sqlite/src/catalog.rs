//! Live schema introspection.
//!
//! [`CatalogReader`] describes what a table actually looks like in the
//! database, in the same terms the table metadata uses, so the two can be
//! compared by the [`AutoUpgrader`](crate::AutoUpgrader).
//!
//! Foreign keys are keyed by a signature `(a, b) => parent(x, y)` with the
//! column pairs sorted by local column, which makes comparison insensitive to
//! pair order and to constraint names (SQLite does not keep the latter).

use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tablemap_core::{
    Table, TypeAffinity, normalize_default, quote_simple_identifier, split_schema_identifier,
};

use crate::error::Result;

/// One live column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbColumnInfo {
    pub name: String,
    /// Declared type as stored in the catalog.
    pub type_name: String,
    pub type_affinity: TypeAffinity,
    pub not_null: bool,
    /// Normalized default expression.
    pub default_value: Option<String>,
    /// Position in the primary key, 1-based; 0 if not part of it.
    pub pk_position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbIndexColumn {
    pub name: String,
    pub desc: bool,
    /// Collation, `None` for the default `BINARY`.
    pub collation: Option<String>,
}

/// One live index created by `CREATE INDEX`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbIndexInfo {
    pub name: String,
    pub unique: bool,
    /// Created with a `WHERE` clause.
    pub partial: bool,
    pub columns: Vec<DbIndexColumn>,
}

/// One live foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbForeignKeyInfo {
    pub ref_table: String,
    pub columns: Vec<String>,
    pub ref_columns: Vec<String>,
}

/// Snapshot of one live table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbTableInfo {
    pub name: String,
    pub schema: String,
    pub auto_increment: bool,
    pub without_row_id: bool,
    pub columns: BTreeMap<String, DbColumnInfo>,
    /// Primary-key column names in key order.
    pub primary_key: Vec<String>,
    pub indexes: BTreeMap<String, DbIndexInfo>,
    /// Keyed by [`foreign_key_signature`].
    pub foreign_keys: BTreeMap<String, DbForeignKeyInfo>,
}

/// Order-insensitive identity of a foreign key.
///
/// ```
/// use tablemap_sqlite::foreign_key_signature;
///
/// let a = foreign_key_signature(&["b", "a"], "parent", &["y", "x"]);
/// let b = foreign_key_signature(&["a", "b"], "parent", &["x", "y"]);
/// assert_eq!(a, b);
/// assert_eq!(a, "(a, b) => parent(x, y)");
/// ```
pub fn foreign_key_signature<S: AsRef<str>>(columns: &[S], ref_table: &str, ref_columns: &[S]) -> String {
    let mut pairs: Vec<(&str, &str)> = columns
        .iter()
        .map(AsRef::as_ref)
        .zip(ref_columns.iter().map(AsRef::as_ref))
        .collect();
    pairs.sort();
    let (local, refs): (Vec<&str>, Vec<&str>) = pairs.into_iter().unzip();
    format!("({}) => {ref_table}({})", local.join(", "), refs.join(", "))
}

/// Signatures of the foreign keys declared on a table.
pub fn declared_foreign_keys(table: &Table) -> BTreeMap<String, DbForeignKeyInfo> {
    table
        .foreign_keys()
        .values()
        .map(|fk| {
            let columns: Vec<String> = fk
                .pairs
                .iter()
                .map(|p| {
                    table
                        .field(&p.property)
                        .map_or_else(|| p.property.clone(), |f| f.name.clone())
                })
                .collect();
            let ref_columns: Vec<String> = fk.pairs.iter().map(|p| p.ref_column.clone()).collect();
            let signature = foreign_key_signature(&columns, &fk.ref_table, &ref_columns);
            (
                signature,
                DbForeignKeyInfo {
                    ref_table: fk.ref_table.clone(),
                    columns,
                    ref_columns,
                },
            )
        })
        .collect()
}

/// Reads table descriptions from a connection.
pub struct CatalogReader<'a> {
    conn: &'a Connection,
}

impl<'a> CatalogReader<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Attached schema names, `main` first.
    pub fn read_schemas(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_database_list ORDER BY seq")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// User table names of a schema, ordered by name.
    pub fn read_tables(&self, schema: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT name FROM {}.sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name",
            quote_simple_identifier(schema)
        ))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Describes a table, or returns `None` if it does not exist.
    ///
    /// `name` may be schema-qualified (`temp.cache`); unqualified names are
    /// looked up in `main`.
    pub fn read_table_info(&self, name: &str) -> Result<Option<DbTableInfo>> {
        let (schema, table) = split_schema_identifier(name);
        let schema = schema.unwrap_or("main");

        let sql: Option<Option<String>> = self
            .conn
            .query_row(
                &format!(
                    "SELECT sql FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
                    quote_simple_identifier(schema)
                ),
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        let Some(sql) = sql else {
            return Ok(None);
        };
        let sql = sql.unwrap_or_default();

        let columns = self.read_columns(schema, table)?;
        let mut pk: Vec<&DbColumnInfo> = columns.values().filter(|c| c.pk_position > 0).collect();
        pk.sort_by_key(|c| c.pk_position);
        let primary_key = pk.into_iter().map(|c| c.name.clone()).collect();

        Ok(Some(DbTableInfo {
            name: table.to_string(),
            schema: schema.to_string(),
            auto_increment: has_autoincrement(&sql),
            without_row_id: is_without_rowid(&sql),
            primary_key,
            indexes: self.read_indexes(schema, table)?,
            foreign_keys: self.read_foreign_keys(schema, table)?,
            columns,
        }))
    }

    fn read_columns(&self, schema: &str, table: &str) -> Result<BTreeMap<String, DbColumnInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1, ?2)",
        )?;
        let rows = stmt.query_map(params![table, schema], |row| {
            let type_name: String = row.get(1)?;
            Ok(DbColumnInfo {
                name: row.get(0)?,
                type_affinity: TypeAffinity::from_type_name(&type_name),
                type_name,
                not_null: row.get(2)?,
                default_value: row
                    .get::<_, Option<String>>(3)?
                    .map(|d| normalize_default(&d)),
                pk_position: row.get(4)?,
            })
        })?;
        let mut columns = BTreeMap::new();
        for col in rows {
            let col = col?;
            columns.insert(col.name.clone(), col);
        }
        Ok(columns)
    }

    fn read_indexes(&self, schema: &str, table: &str) -> Result<BTreeMap<String, DbIndexInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, \"unique\", partial FROM pragma_index_list(?1, ?2) WHERE origin = 'c'",
        )?;
        let listed = stmt
            .query_map(params![table, schema], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut cols_stmt = self.conn.prepare(
            "SELECT name, \"desc\", coll FROM pragma_index_xinfo(?1, ?2) \
             WHERE key = 1 ORDER BY seqno",
        )?;
        let mut indexes = BTreeMap::new();
        for (name, unique, partial) in listed {
            let columns = cols_stmt
                .query_map(params![name, schema], |row| {
                    let coll: Option<String> = row.get(2)?;
                    Ok(DbIndexColumn {
                        name: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                        desc: row.get(1)?,
                        collation: coll.filter(|c| !c.eq_ignore_ascii_case("BINARY")),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            indexes.insert(
                name.clone(),
                DbIndexInfo {
                    name,
                    unique,
                    partial,
                    columns,
                },
            );
        }
        Ok(indexes)
    }

    fn read_foreign_keys(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<BTreeMap<String, DbForeignKeyInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1, ?2) \
             ORDER BY id, seq",
        )?;
        let rows = stmt
            .query_map(params![table, schema], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut grouped: BTreeMap<i64, DbForeignKeyInfo> = BTreeMap::new();
        for (id, ref_table, from, to) in rows {
            let fk = grouped.entry(id).or_insert_with(|| DbForeignKeyInfo {
                ref_table,
                columns: Vec::new(),
                ref_columns: Vec::new(),
            });
            fk.columns.push(from);
            fk.ref_columns.push(to);
        }
        // `REFERENCES parent` without a column list targets the parent's key
        for fk in grouped.values_mut() {
            if fk.ref_columns.iter().any(String::is_empty) {
                let key = self.primary_key_columns(schema, &fk.ref_table)?;
                if key.len() == fk.ref_columns.len() {
                    fk.ref_columns = key;
                }
            }
        }
        Ok(grouped
            .into_values()
            .map(|fk| {
                (
                    foreign_key_signature(&fk.columns, &fk.ref_table, &fk.ref_columns),
                    fk,
                )
            })
            .collect())
    }

    /// Primary-key column names of a table in key order; empty if the table
    /// does not exist.
    fn primary_key_columns(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM pragma_table_info(?1, ?2) WHERE pk > 0 ORDER BY pk",
        )?;
        let rows = stmt.query_map(params![table, schema], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

/// Bare words of a `CREATE TABLE` statement, upper-cased, with the
/// parenthesis depth they appear at. Quoted strings and identifiers and
/// comments are skipped.
fn sql_words(sql: &str) -> Vec<(String, usize)> {
    let mut words = Vec::new();
    let mut depth = 0usize;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                while let Some(q) = chars.next() {
                    if q == close {
                        // doubled quote is an escaped quote
                        if close != ']' && chars.peek() == Some(&close) {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
            }
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c.is_alphanumeric() || c == '_' || c == '$' => {
                let mut word = c.to_ascii_uppercase().to_string();
                while let Some(&n) = chars.peek() {
                    if n.is_alphanumeric() || n == '_' || n == '$' {
                        word.push(n.to_ascii_uppercase());
                        chars.next();
                    } else {
                        break;
                    }
                }
                words.push((word, depth));
            }
            _ => {}
        }
    }
    words
}

/// `AUTOINCREMENT` as a keyword following `PRIMARY KEY [ASC|DESC]
/// [ON CONFLICT ...]`.
fn has_autoincrement(sql: &str) -> bool {
    const BEFORE: [&str; 8] = [
        "KEY", "ASC", "DESC", "ROLLBACK", "ABORT", "FAIL", "IGNORE", "REPLACE",
    ];
    sql_words(sql)
        .windows(2)
        .any(|w| w[1].0 == "AUTOINCREMENT" && BEFORE.contains(&w[0].0.as_str()))
}

/// `WITHOUT ROWID` among the table options after the column list.
fn is_without_rowid(sql: &str) -> bool {
    let words = sql_words(sql);
    let body_end = words.iter().rposition(|(_, depth)| *depth > 0);
    words[body_end.map_or(0, |i| i + 1)..]
        .windows(2)
        .any(|w| w[0].0 == "WITHOUT" && w[1].0 == "ROWID" && w[0].1 == 0)
}
