//! Schema auto-upgrade tests against real SQLite databases.

use rusqlite::Connection;
use tablemap_core::{FieldOptions, IndexOptions, Table, TableBuilder, TableOptions};
use tablemap_sqlite::{
    AutoUpgrader, CatalogReader, DbTableInfo, SqliteError, UpgradeMode, UpgradeOptions,
};

fn conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    conn
}

fn live(conn: &Connection, name: &str) -> DbTableInfo {
    CatalogReader::new(conn)
        .read_table_info(name)
        .unwrap()
        .unwrap_or_else(|| panic!("table {name} missing"))
}

fn columns(conn: &Connection, name: &str) -> Vec<String> {
    live(conn, name).columns.into_keys().collect()
}

fn foreign_keys_enabled(conn: &Connection) -> bool {
    conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap()
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .unwrap()
}

fn items_v1() -> TableBuilder {
    TableBuilder::new("items", TableOptions::default())
        .id("id", FieldOptions::new("INTEGER"))
        .field("label", FieldOptions::new("TEXT NOT NULL"))
        .field("qty", FieldOptions::new("INTEGER DEFAULT 0"))
}

fn mode_of(conn: &Connection, table: &Table, options: UpgradeOptions) -> UpgradeMode {
    AutoUpgrader::new(conn)
        .with_options(options)
        .upgrade_info(table)
        .unwrap()
        .mode
}

/// Creates items_v1 with two rows.
fn seeded() -> Connection {
    let conn = conn();
    let table = items_v1().build().unwrap();
    AutoUpgrader::new(&conn).upgrade_tables(&[&table]).unwrap();
    conn.execute_batch(
        "INSERT INTO items (id, label, qty) VALUES (1, 'bolt', 10);
         INSERT INTO items (id, label, qty) VALUES (2, 'nut', 20);",
    )
    .unwrap();
    conn
}

// =============================================================================
// Create / Actual Tests
// =============================================================================

#[test]
fn test_create_then_actual() {
    let conn = conn();
    let table = items_v1()
        .index("label", "idx_items_label", IndexOptions::default())
        .build()
        .unwrap();
    let upgrader = AutoUpgrader::new(&conn);

    assert!(!upgrader.is_actual(&[&table]).unwrap());
    let report = upgrader.upgrade_tables(&[&table]).unwrap();
    assert_eq!(report.created, ["items"]);
    assert_eq!(report.statements_executed, 2);
    assert!(upgrader.is_actual(&[&table]).unwrap());

    let again = upgrader.upgrade_tables(&[&table]).unwrap();
    assert_eq!(again.actual, ["items"]);
    assert_eq!(again.statements_executed, 0);
    assert_eq!(again.changed(), 0);
}

#[test]
fn test_special_tables_are_actual_after_create() {
    let conn = conn();
    let counters = TableBuilder::new(
        "counters",
        TableOptions {
            auto_increment: true,
            ..Default::default()
        },
    )
    .id("id", FieldOptions::new("INTEGER"))
    .field("hits", FieldOptions::new("INTEGER NOT NULL DEFAULT (0)"))
    .build()
    .unwrap();
    let settings = TableBuilder::new(
        "settings",
        TableOptions {
            without_row_id: true,
            ..Default::default()
        },
    )
    .id("scope", FieldOptions::new("TEXT"))
    .id("name", FieldOptions::new("TEXT"))
    .field("value", FieldOptions::new("TEXT").column("val"))
    .index("value", "idx_settings_val", IndexOptions::default().desc().collate("NOCASE"))
    .build()
    .unwrap();

    let upgrader = AutoUpgrader::new(&conn);
    upgrader.upgrade_tables(&[&counters, &settings]).unwrap();
    assert!(upgrader.is_actual(&[&counters, &settings]).unwrap());

    let info = live(&conn, "settings");
    assert!(info.without_row_id);
    assert_eq!(info.primary_key, ["scope", "name"]);
    assert!(live(&conn, "counters").auto_increment);
}

#[test]
fn test_autoincrement_in_column_name_stays_actual() {
    let conn = conn();
    let counters = TableBuilder::new("counters", TableOptions::default())
        .id("id", FieldOptions::new("INTEGER"))
        .field("autoincrement_step", FieldOptions::new("INTEGER"))
        .build()
        .unwrap();
    let upgrader = AutoUpgrader::new(&conn);

    upgrader.upgrade_tables(&[&counters]).unwrap();
    assert!(!live(&conn, "counters").auto_increment);
    assert!(upgrader.is_actual(&[&counters]).unwrap());
    let again = upgrader.upgrade_tables(&[&counters]).unwrap();
    assert_eq!(again.actual, ["counters"]);
    assert_eq!(again.statements_executed, 0);
}

// =============================================================================
// Alter Tests
// =============================================================================

#[test]
fn test_nullable_column_is_added_in_place() {
    let conn = seeded();
    let table = items_v1()
        .field("note", FieldOptions::new("TEXT"))
        .build()
        .unwrap();
    assert_eq!(mode_of(&conn, &table, UpgradeOptions::default()), UpgradeMode::Alter);

    let report = AutoUpgrader::new(&conn).upgrade_tables(&[&table]).unwrap();
    assert_eq!(report.altered, ["items"]);
    assert_eq!(columns(&conn, "items"), ["id", "label", "note", "qty"]);
    assert_eq!(count(&conn, "items"), 2);
    assert_eq!(mode_of(&conn, &table, UpgradeOptions::default()), UpgradeMode::Actual);
}

#[test]
fn test_not_null_column_without_default_fails_on_populated_table() {
    let conn = seeded();
    let table = items_v1()
        .field("sku", FieldOptions::new("TEXT NOT NULL"))
        .build()
        .unwrap();

    let err = AutoUpgrader::new(&conn)
        .upgrade_tables(&[&table])
        .unwrap_err();
    match err {
        SqliteError::Upgrade { table, mode, .. } => {
            assert_eq!(table, "items");
            assert_eq!(mode, UpgradeMode::Alter);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(columns(&conn, "items"), ["id", "label", "qty"]);
    assert_eq!(count(&conn, "items"), 2);
    assert!(conn.is_autocommit());
}

#[test]
fn test_changed_index_is_rebuilt() {
    let conn = conn();
    let v1 = items_v1()
        .index("label", "idx_items_label", IndexOptions::default())
        .index("qty", "idx_items_qty", IndexOptions::default())
        .build()
        .unwrap();
    AutoUpgrader::new(&conn).upgrade_tables(&[&v1]).unwrap();

    let v2 = items_v1()
        .index("label", "idx_items_label", IndexOptions::unique())
        .index("qty", "idx_items_label", IndexOptions::default())
        .build()
        .unwrap();
    let info = AutoUpgrader::new(&conn).upgrade_info(&v2).unwrap();
    assert_eq!(info.mode, UpgradeMode::Alter);
    assert_eq!(info.drop_indexes, ["idx_items_label", "idx_items_qty"]);
    assert_eq!(info.add_indexes, ["idx_items_label"]);

    AutoUpgrader::new(&conn).upgrade_tables(&[&v2]).unwrap();
    let indexes = live(&conn, "items").indexes;
    assert_eq!(indexes.keys().collect::<Vec<_>>(), ["idx_items_label"]);
    let label = &indexes["idx_items_label"];
    assert!(label.unique);
    let cols: Vec<_> = label.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(cols, ["label", "qty"]);
}

// =============================================================================
// Recreate Tests
// =============================================================================

#[test]
fn test_dropping_content2_recreates_once() {
    let conn = conn();
    let v1 = TableBuilder::new("documents", TableOptions::default())
        .id("id", FieldOptions::new("INTEGER"))
        .field("content", FieldOptions::new("TEXT"))
        .field("content2", FieldOptions::new("TEXT"))
        .build()
        .unwrap();
    let upgrader = AutoUpgrader::new(&conn);
    upgrader.upgrade_tables(&[&v1]).unwrap();
    conn.execute_batch(
        "INSERT INTO documents (id, content, content2) VALUES (1, 'first', 'x');
         INSERT INTO documents (id, content, content2) VALUES (2, 'second', 'y');",
    )
    .unwrap();

    let v2 = TableBuilder::new("documents", TableOptions::default())
        .id("id", FieldOptions::new("INTEGER"))
        .field("content", FieldOptions::new("TEXT"))
        .build()
        .unwrap();
    let info = upgrader.upgrade_info(&v2).unwrap();
    assert_eq!(info.mode, UpgradeMode::Recreate);
    assert_eq!(info.drop_columns, ["content2"]);

    let report = upgrader.upgrade_tables(&[&v2]).unwrap();
    assert_eq!(report.recreated, ["documents"]);
    assert_eq!(upgrader.upgrade_tables(&[&v2]).unwrap().changed(), 0);

    assert_eq!(columns(&conn, "documents"), ["content", "id"]);
    let mut stmt = conn
        .prepare("SELECT id, content FROM documents ORDER BY id")
        .unwrap();
    let rows: Vec<(i64, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows, [(1, "first".to_string()), (2, "second".to_string())]);
}

#[test]
fn test_dropped_column_recreates_and_keeps_data() {
    let conn = seeded();
    let table = TableBuilder::new("items", TableOptions::default())
        .id("id", FieldOptions::new("INTEGER"))
        .field("label", FieldOptions::new("TEXT NOT NULL"))
        .build()
        .unwrap();
    assert_eq!(mode_of(&conn, &table, UpgradeOptions::default()), UpgradeMode::Recreate);

    let report = AutoUpgrader::new(&conn).upgrade_tables(&[&table]).unwrap();
    assert_eq!(report.recreated, ["items"]);
    assert_eq!(columns(&conn, "items"), ["id", "label"]);
    let label: String = conn
        .query_row("SELECT label FROM items WHERE id = 2", [], |r| r.get(0))
        .unwrap();
    assert_eq!(label, "nut");
    assert!(foreign_keys_enabled(&conn));
    assert_eq!(mode_of(&conn, &table, UpgradeOptions::default()), UpgradeMode::Actual);
}

#[test]
fn test_keep_old_columns() {
    let conn = seeded();
    let table = TableBuilder::new("items", TableOptions::default())
        .id("id", FieldOptions::new("INTEGER"))
        .field("label", FieldOptions::new("TEXT"))
        .build()
        .unwrap();
    let options = UpgradeOptions {
        keep_old_columns: true,
        ..Default::default()
    };

    // label loses NOT NULL, qty is kept
    let info = AutoUpgrader::new(&conn)
        .with_options(options.clone())
        .upgrade_info(&table)
        .unwrap();
    assert_eq!(info.mode, UpgradeMode::Recreate);
    assert!(info.drop_columns.is_empty());
    assert_eq!(info.keep_columns.len(), 1);

    AutoUpgrader::new(&conn)
        .with_options(options.clone())
        .upgrade_tables(&[&table])
        .unwrap();
    assert_eq!(columns(&conn, "items"), ["id", "label", "qty"]);
    let qty: i64 = conn
        .query_row("SELECT qty FROM items WHERE id = 1", [], |r| r.get(0))
        .unwrap();
    assert_eq!(qty, 10);
    assert_eq!(live(&conn, "items").columns["qty"].default_value.as_deref(), Some("0"));
    assert_eq!(mode_of(&conn, &table, options), UpgradeMode::Actual);
}

#[test]
fn test_force_recreate() {
    let conn = seeded();
    let table = items_v1().build().unwrap();
    let options = UpgradeOptions {
        force_recreate: true,
        ..Default::default()
    };
    let report = AutoUpgrader::new(&conn)
        .with_options(options)
        .upgrade_tables(&[&table])
        .unwrap();
    assert_eq!(report.recreated, ["items"]);
    assert_eq!(count(&conn, "items"), 2);
    assert_eq!(mode_of(&conn, &table, UpgradeOptions::default()), UpgradeMode::Actual);
}

#[test]
fn test_recreate_fails_on_leftover_temporary_table() {
    let conn = seeded();
    conn.execute_batch(
        "CREATE TABLE items_upgrade_tmp (id INTEGER, label TEXT, qty INTEGER);
         INSERT INTO items_upgrade_tmp (id, label, qty) VALUES (7, 'stale', 0);",
    )
    .unwrap();
    let table = items_v1().build().unwrap();
    let options = UpgradeOptions {
        force_recreate: true,
        ..Default::default()
    };

    let err = AutoUpgrader::new(&conn)
        .with_options(options)
        .upgrade_tables(&[&table])
        .unwrap_err();
    assert!(
        matches!(err, SqliteError::Upgrade { mode: UpgradeMode::Recreate, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(count(&conn, "items"), 2);
    assert_eq!(count(&conn, "items_upgrade_tmp"), 1);
    assert!(foreign_keys_enabled(&conn));
}

#[test]
fn test_primary_key_change_recreates() {
    let conn = seeded();
    let table = TableBuilder::new("items", TableOptions::default())
        .id("id", FieldOptions::new("INTEGER"))
        .id("label", FieldOptions::new("TEXT NOT NULL"))
        .field("qty", FieldOptions::new("INTEGER DEFAULT 0"))
        .build()
        .unwrap();
    AutoUpgrader::new(&conn).upgrade_tables(&[&table]).unwrap();
    assert_eq!(live(&conn, "items").primary_key, ["id", "label"]);
    assert_eq!(count(&conn, "items"), 2);
}

fn parent() -> Table {
    TableBuilder::new("parents", TableOptions::default())
        .id("id", FieldOptions::new("INTEGER"))
        .field("body", FieldOptions::new("TEXT"))
        .build()
        .unwrap()
}

fn child(with_fk: bool) -> Table {
    let builder = TableBuilder::new("children", TableOptions::default())
        .id("id", FieldOptions::new("INTEGER"))
        .field("parent_id", FieldOptions::new("INTEGER"));
    let builder = if with_fk {
        builder.foreign_key("parent_id", "fk_children_parent", "parents", "id")
    } else {
        builder
    };
    builder.build().unwrap()
}

#[test]
fn test_foreign_key_changes_recreate() {
    let conn = conn();
    let upgrader = AutoUpgrader::new(&conn);
    upgrader.upgrade_tables(&[&parent(), &child(false)]).unwrap();
    conn.execute_batch(
        "INSERT INTO parents (id, body) VALUES (1, 'a');
         INSERT INTO children (id, parent_id) VALUES (10, 1);",
    )
    .unwrap();

    let report = upgrader.upgrade_tables(&[&parent(), &child(true)]).unwrap();
    assert_eq!(report.actual, ["parents"]);
    assert_eq!(report.recreated, ["children"]);
    let fks = live(&conn, "children").foreign_keys;
    assert_eq!(fks.len(), 1);
    assert!(fks.contains_key("(parent_id) => parents(id)"));

    let report = upgrader.upgrade_tables(&[&parent(), &child(false)]).unwrap();
    assert_eq!(report.recreated, ["children"]);
    assert!(live(&conn, "children").foreign_keys.is_empty());
    assert_eq!(count(&conn, "children"), 1);
}

#[test]
fn test_foreign_key_without_column_list_matches_declaration() {
    let conn = conn();
    let upgrader = AutoUpgrader::new(&conn);
    upgrader.upgrade_tables(&[&parent()]).unwrap();
    conn.execute_batch(
        "CREATE TABLE children (
           id INTEGER,
           parent_id INTEGER,
           PRIMARY KEY (id),
           CONSTRAINT fk_children_parent FOREIGN KEY (parent_id) REFERENCES parents
         );",
    )
    .unwrap();

    assert!(live(&conn, "children")
        .foreign_keys
        .contains_key("(parent_id) => parents(id)"));
    let children = child(true);
    assert_eq!(
        mode_of(&conn, &children, UpgradeOptions::default()),
        UpgradeMode::Actual
    );
}

#[test]
fn test_recreating_parent_keeps_child_intact_and_runs_once() {
    let conn = conn();
    let upgrader = AutoUpgrader::new(&conn);
    upgrader.upgrade_tables(&[&parent(), &child(true)]).unwrap();
    conn.execute_batch(
        "INSERT INTO parents (id, body) VALUES (1, 'a');
         INSERT INTO children (id, parent_id) VALUES (10, 1);",
    )
    .unwrap();

    let parent_v2 = TableBuilder::new("parents", TableOptions::default())
        .id("id", FieldOptions::new("INTEGER"))
        .field("body", FieldOptions::new("TEXT NOT NULL DEFAULT ''"))
        .build()
        .unwrap();
    let children = child(true);
    let tables = [&parent_v2, &children];

    let report = upgrader.upgrade_tables(&tables).unwrap();
    assert_eq!(report.recreated, ["parents"]);
    assert_eq!(report.actual, ["children"]);

    let again = upgrader.upgrade_tables(&tables).unwrap();
    assert_eq!(again.changed(), 0);

    let violations = conn
        .prepare("PRAGMA foreign_key_check")
        .unwrap()
        .query_map([], |_| Ok(()))
        .unwrap()
        .count();
    assert_eq!(violations, 0);
    assert_eq!(count(&conn, "children"), 1);
    assert!(foreign_keys_enabled(&conn));
}

#[test]
fn test_orphans_abort_recreate() {
    let conn = conn();
    let upgrader = AutoUpgrader::new(&conn);
    upgrader.upgrade_tables(&[&parent(), &child(false)]).unwrap();
    conn.execute_batch("INSERT INTO children (id, parent_id) VALUES (10, 99);")
        .unwrap();

    let err = upgrader
        .upgrade_tables(&[&parent(), &child(true)])
        .unwrap_err();
    match err {
        SqliteError::Upgrade { mode, source, .. } => {
            assert_eq!(mode, UpgradeMode::Recreate);
            assert!(matches!(
                *source,
                SqliteError::ForeignKeyViolation { count: 1, .. }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(live(&conn, "children").foreign_keys.is_empty());
    assert_eq!(count(&conn, "children"), 1);
    assert!(foreign_keys_enabled(&conn));
    let tmp: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'children_upgrade_tmp'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(tmp, 0);
}
