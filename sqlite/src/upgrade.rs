//! Schema auto-upgrade.
//!
//! The [`AutoUpgrader`] compares each declared [`Table`] with the live
//! catalog and picks one action per table:
//!
//! | Mode       | When |
//! |------------|------|
//! | `CREATE`   | the table does not exist |
//! | `RECREATE` | forced, or the primary key, `AUTOINCREMENT`, `WITHOUT ROWID`, a kept column's affinity/nullability/default or the foreign keys differ, or a live column is no longer declared (unless kept) |
//! | `ALTER`    | only new columns and index changes |
//! | `ACTUAL`   | nothing differs |
//!
//! `RECREATE` rebuilds the table under a temporary name, copies the
//! columns both versions share, then swaps the tables, all in one
//! transaction with foreign key enforcement switched off. The old table is
//! only dropped after the copy succeeded.
//!
//! Upgrades are meant to run once at startup, table by table, before normal
//! traffic. An error aborts the run; it is not safe to retry blindly.

use std::collections::BTreeSet;
use std::fmt;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tablemap_core::{Index, Table, quote_identifier, quote_simple_identifier};
use tracing::{debug, info, warn};

use crate::catalog::{CatalogReader, DbColumnInfo, DbIndexInfo, DbTableInfo, declared_foreign_keys};
use crate::error::{Result, SqliteError};

/// Action chosen for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpgradeMode {
    Actual,
    Create,
    Alter,
    Recreate,
}

impl fmt::Display for UpgradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Actual => "ACTUAL",
            Self::Create => "CREATE",
            Self::Alter => "ALTER",
            Self::Recreate => "RECREATE",
        })
    }
}

/// Upgrade switches; also the `upgrade` section of
/// [`DatabaseConfig`](crate::DatabaseConfig).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeOptions {
    /// Rebuild every existing table.
    pub force_recreate: bool,
    /// Keep live columns that are no longer declared instead of rebuilding
    /// the table without them.
    pub keep_old_columns: bool,
}

/// The decision for one table and the deltas needed to carry it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeInfo {
    pub table: String,
    pub mode: UpgradeMode,
    /// Why the table is recreated.
    pub reasons: Vec<String>,
    /// Properties of declared fields missing from the live table.
    pub add_columns: Vec<String>,
    /// Declared indexes to create.
    pub add_indexes: Vec<String>,
    /// Live indexes to drop (undeclared or changed).
    pub drop_indexes: Vec<String>,
    /// Live columns copied into the rebuilt table.
    pub copy_columns: Vec<String>,
    /// Undeclared live columns carried into the rebuilt table.
    pub keep_columns: Vec<DbColumnInfo>,
    /// Undeclared live columns whose data is lost.
    pub drop_columns: Vec<String>,
}

impl UpgradeInfo {
    fn new(table: &Table, mode: UpgradeMode) -> Self {
        Self {
            table: table.qualified_name().to_string(),
            mode,
            reasons: Vec::new(),
            add_columns: Vec::new(),
            add_indexes: Vec::new(),
            drop_indexes: Vec::new(),
            copy_columns: Vec::new(),
            keep_columns: Vec::new(),
            drop_columns: Vec::new(),
        }
    }
}

/// Outcome of [`AutoUpgrader::upgrade_tables`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpgradeReport {
    pub actual: Vec<String>,
    pub created: Vec<String>,
    pub altered: Vec<String>,
    pub recreated: Vec<String>,
    /// DDL and copy statements executed across all tables.
    pub statements_executed: usize,
}

impl UpgradeReport {
    fn record(&mut self, table: &str, mode: UpgradeMode, statements: usize) {
        let list = match mode {
            UpgradeMode::Actual => &mut self.actual,
            UpgradeMode::Create => &mut self.created,
            UpgradeMode::Alter => &mut self.altered,
            UpgradeMode::Recreate => &mut self.recreated,
        };
        list.push(table.to_string());
        self.statements_executed += statements;
    }

    /// Number of tables that were changed.
    pub fn changed(&self) -> usize {
        self.created.len() + self.altered.len() + self.recreated.len()
    }
}

/// Decides how to bring a live table in line with its declaration.
///
/// Pure function of its inputs; [`AutoUpgrader::upgrade_info`] reads the
/// catalog and calls it.
pub fn get_upgrade_info(
    table: &Table,
    live: Option<&DbTableInfo>,
    options: &UpgradeOptions,
) -> UpgradeInfo {
    let Some(live) = live else {
        return UpgradeInfo::new(table, UpgradeMode::Create);
    };
    let mut info = UpgradeInfo::new(table, UpgradeMode::Actual);

    if options.force_recreate {
        info.reasons.push("recreate forced".to_string());
    }

    let declared_pk: Vec<String> = table
        .primary_key_fields()
        .iter()
        .map(|f| f.name.clone())
        .collect();
    if declared_pk != live.primary_key {
        info.reasons.push(format!(
            "primary key changed from ({}) to ({})",
            live.primary_key.join(", "),
            declared_pk.join(", ")
        ));
    }
    if table.auto_increment() != live.auto_increment {
        info.reasons.push(format!(
            "autoIncrement changed to {}",
            table.auto_increment()
        ));
    }
    if table.without_row_id() != live.without_row_id {
        info.reasons.push(format!(
            "withoutRowId changed to {}",
            table.without_row_id()
        ));
    }

    for field in table.fields() {
        let Some(col) = live.columns.get(&field.name) else {
            info.add_columns.push(field.property.clone());
            continue;
        };
        info.copy_columns.push(col.name.clone());

        let declared = field.db_type_info();
        // WITHOUT ROWID tables make their key columns NOT NULL implicitly
        let declared_not_null = declared.not_null
            || (table.without_row_id() && table.is_primary_key(&field.property));
        if declared.type_affinity != col.type_affinity {
            info.reasons.push(format!(
                "column '{}' affinity changed from {} to {}",
                col.name, col.type_affinity, declared.type_affinity
            ));
        }
        if declared_not_null != col.not_null {
            info.reasons.push(format!(
                "column '{}' NOT NULL changed to {declared_not_null}",
                col.name
            ));
        }
        if declared.default_value != col.default_value {
            info.reasons.push(format!(
                "column '{}' default changed from {:?} to {:?}",
                col.name, col.default_value, declared.default_value
            ));
        }
    }

    for col in live.columns.values() {
        if table.field_by_column(&col.name).is_some() {
            continue;
        }
        if !options.keep_old_columns {
            info.reasons.push(format!("column '{}' dropped", col.name));
            info.drop_columns.push(col.name.clone());
        } else if col.not_null && col.default_value.is_none() {
            info.reasons.push(format!(
                "old column '{}' is NOT NULL without default and cannot be kept",
                col.name
            ));
            info.drop_columns.push(col.name.clone());
        } else {
            info.copy_columns.push(col.name.clone());
            info.keep_columns.push(col.clone());
        }
    }

    let declared_fks: BTreeSet<String> = declared_foreign_keys(table).into_keys().collect();
    let live_fks: BTreeSet<String> = live.foreign_keys.keys().cloned().collect();
    for sig in declared_fks.symmetric_difference(&live_fks) {
        let side = if declared_fks.contains(sig) {
            "added"
        } else {
            "removed"
        };
        info.reasons.push(format!("foreign key {sig} {side}"));
    }

    for index in table.indexes().values() {
        match live.indexes.get(&index.name) {
            None => info.add_indexes.push(index.name.clone()),
            Some(live_index) if !index_matches(table, index, live_index) => {
                info.drop_indexes.push(index.name.clone());
                info.add_indexes.push(index.name.clone());
            }
            Some(_) => {}
        }
    }
    for name in live.indexes.keys() {
        if !table.indexes().contains_key(name) {
            info.drop_indexes.push(name.clone());
        }
    }

    info.mode = if !info.reasons.is_empty() {
        UpgradeMode::Recreate
    } else if !info.add_columns.is_empty()
        || !info.add_indexes.is_empty()
        || !info.drop_indexes.is_empty()
    {
        UpgradeMode::Alter
    } else {
        UpgradeMode::Actual
    };
    info
}

fn index_matches(table: &Table, declared: &Index, live: &DbIndexInfo) -> bool {
    if live.partial || declared.unique != live.unique || declared.columns.len() != live.columns.len() {
        return false;
    }
    declared.columns.iter().zip(&live.columns).all(|(d, l)| {
        let column = table
            .field(&d.property)
            .map_or(d.property.as_str(), |f| f.name.as_str());
        let collation = d
            .collation
            .as_deref()
            .filter(|c| !c.eq_ignore_ascii_case("BINARY"));
        column == l.name
            && d.desc == l.desc
            && match (collation, l.collation.as_deref()) {
                (None, None) => true,
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            }
    })
}

/// Runs schema upgrades on one connection.
///
/// # Examples
///
/// ```
/// use rusqlite::Connection;
/// use tablemap_core::{FieldOptions, TableBuilder, TableOptions};
/// use tablemap_sqlite::{AutoUpgrader, UpgradeMode};
///
/// let conn = Connection::open_in_memory().unwrap();
/// let table = TableBuilder::new("items", TableOptions::default())
///     .id("id", FieldOptions::new("INTEGER"))
///     .field("label", FieldOptions::new("TEXT"))
///     .build()
///     .unwrap();
///
/// let upgrader = AutoUpgrader::new(&conn);
/// assert_eq!(upgrader.upgrade_info(&table).unwrap().mode, UpgradeMode::Create);
///
/// let report = upgrader.upgrade_tables(&[&table]).unwrap();
/// assert_eq!(report.created, ["items"]);
/// assert!(upgrader.is_actual(&[&table]).unwrap());
/// ```
pub struct AutoUpgrader<'a> {
    conn: &'a Connection,
    options: UpgradeOptions,
}

impl<'a> AutoUpgrader<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            options: UpgradeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: UpgradeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &UpgradeOptions {
        &self.options
    }

    /// Reads the live table and decides what an upgrade would do.
    pub fn upgrade_info(&self, table: &Table) -> Result<UpgradeInfo> {
        let live = CatalogReader::new(self.conn).read_table_info(table.qualified_name())?;
        Ok(get_upgrade_info(table, live.as_ref(), &self.options))
    }

    /// Returns whether every table already matches its declaration.
    pub fn is_actual(&self, tables: &[&Table]) -> Result<bool> {
        for table in tables {
            let info = self.upgrade_info(table)?;
            if info.mode != UpgradeMode::Actual {
                debug!(table = %info.table, mode = %info.mode, "table is not actual");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Upgrades the tables one after another.
    ///
    /// # Errors
    ///
    /// Stops at the first failing table with [`SqliteError::Upgrade`];
    /// tables before it stay upgraded.
    pub fn upgrade_tables(&self, tables: &[&Table]) -> Result<UpgradeReport> {
        let mut report = UpgradeReport::default();
        for table in tables {
            let info = self.upgrade_info(table)?;
            let statements = self.upgrade_table(table, &info)?;
            report.record(table.qualified_name(), info.mode, statements);
        }
        info!(
            changed = report.changed(),
            statements = report.statements_executed,
            "schema upgrade finished"
        );
        Ok(report)
    }

    /// Carries out a decision; returns the number of statements executed.
    pub fn upgrade_table(&self, table: &Table, info: &UpgradeInfo) -> Result<usize> {
        if info.mode == UpgradeMode::Actual {
            debug!(table = %info.table, "table is up to date");
            return Ok(0);
        }
        info!(table = %info.table, mode = %info.mode, "upgrading table");
        for reason in &info.reasons {
            debug!(table = %info.table, reason = %reason, "recreate reason");
        }
        let result = match info.mode {
            UpgradeMode::Actual => Ok(0),
            UpgradeMode::Create => self.create_table(table),
            UpgradeMode::Alter => self.alter_table(table, info),
            UpgradeMode::Recreate => self.recreate_table(table, info),
        };
        result.map_err(|source| SqliteError::Upgrade {
            table: table.qualified_name().to_string(),
            mode: info.mode,
            source: Box::new(source),
        })
    }

    fn run(&self, conn: &Connection, sql: &str, count: &mut usize) -> Result<()> {
        debug!(sql, "executing");
        conn.execute_batch(sql)?;
        *count += 1;
        Ok(())
    }

    /// Creates the table and its declared indexes.
    pub fn create_table(&self, table: &Table) -> Result<usize> {
        let mut count = 0;
        let tx = self.conn.unchecked_transaction()?;
        self.run(&tx, &table.create_table_statement(), &mut count)?;
        for name in table.indexes().keys() {
            self.run(&tx, &table.create_index_statement(name)?, &mut count)?;
        }
        tx.commit()?;
        Ok(count)
    }

    /// Adds the missing columns, then drops and creates indexes.
    ///
    /// Adding a `NOT NULL` column without a default to a table that has rows
    /// fails, and the table is left unchanged.
    pub fn alter_table(&self, table: &Table, info: &UpgradeInfo) -> Result<usize> {
        let mut count = 0;
        let tx = self.conn.unchecked_transaction()?;
        for property in &info.add_columns {
            let sql = table.alter_table_add_column_statement(property)?;
            self.run(&tx, &sql, &mut count)?;
        }
        for name in &info.drop_indexes {
            self.run(&tx, &table.drop_index_statement(name), &mut count)?;
        }
        for name in &info.add_indexes {
            self.run(&tx, &table.create_index_statement(name)?, &mut count)?;
        }
        tx.commit()?;
        Ok(count)
    }

    /// Rebuilds the table with the declared schema, keeping the data of the
    /// columns listed in `info.copy_columns`.
    ///
    /// Foreign key enforcement is switched off for the rebuild and restored
    /// afterwards, also when the rebuild fails. `PRAGMA foreign_keys` has no
    /// effect inside a transaction, so this must not be called while one is
    /// open on the connection.
    pub fn recreate_table(&self, table: &Table, info: &UpgradeInfo) -> Result<usize> {
        let enforced: bool = self
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        if enforced {
            self.conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        }
        let result = self.rebuild(table, info, enforced);
        if enforced {
            if let Err(e) = self.conn.execute_batch("PRAGMA foreign_keys = ON;") {
                warn!(error = %e, "failed to re-enable foreign keys");
                if result.is_ok() {
                    return Err(e.into());
                }
            }
        }
        result
    }

    fn rebuild(&self, table: &Table, info: &UpgradeInfo, check_foreign_keys: bool) -> Result<usize> {
        for column in &info.drop_columns {
            warn!(table = %info.table, column = %column, "dropping column and its data");
        }

        let tmp_name = format!("{}_upgrade_tmp", table.name());
        let tmp = match table.schema() {
            Some(schema) => format!("{schema}.{tmp_name}"),
            None => tmp_name,
        };
        let extra: Vec<String> = info.keep_columns.iter().map(kept_column_definition).collect();

        let mut count = 0;
        let tx = self.conn.unchecked_transaction()?;
        self.run(&tx, &table.create_table_statement_as(&tmp, &extra), &mut count)?;
        if !info.copy_columns.is_empty() {
            let columns = info
                .copy_columns
                .iter()
                .map(|c| quote_simple_identifier(c))
                .collect::<Vec<_>>()
                .join(", ");
            let copy = format!(
                "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
                quote_identifier(&tmp),
                table.quoted_name()
            );
            self.run(&tx, &copy, &mut count)?;
        }
        self.run(&tx, &format!("DROP TABLE {}", table.quoted_name()), &mut count)?;
        self.run(
            &tx,
            &format!(
                "ALTER TABLE {} RENAME TO {}",
                quote_identifier(&tmp),
                quote_simple_identifier(table.name())
            ),
            &mut count,
        )?;
        for name in table.indexes().keys() {
            self.run(&tx, &table.create_index_statement(name)?, &mut count)?;
        }
        if check_foreign_keys {
            let violations = foreign_key_violations(&tx, table)?;
            if violations > 0 {
                return Err(SqliteError::ForeignKeyViolation {
                    table: table.qualified_name().to_string(),
                    count: violations,
                });
            }
        }
        tx.commit()?;
        Ok(count)
    }
}

fn kept_column_definition(col: &DbColumnInfo) -> String {
    let mut def = format!("{} {}", quote_simple_identifier(&col.name), col.type_name);
    if col.not_null {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &col.default_value {
        def.push_str(" DEFAULT (");
        def.push_str(default);
        def.push(')');
    }
    def.trim_end().to_string()
}

fn foreign_key_violations(conn: &Connection, table: &Table) -> Result<usize> {
    let schema = table.schema().unwrap_or("main");
    let mut stmt = conn.prepare(&format!(
        "PRAGMA {}.foreign_key_check({})",
        quote_simple_identifier(schema),
        quote_simple_identifier(table.name())
    ))?;
    let mut rows = stmt.query([])?;
    let mut count = 0;
    while rows.next()?.is_some() {
        count += 1;
    }
    Ok(count)
}
