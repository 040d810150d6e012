use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tablemap_core::{SchemaRegistry, Table, TableDefinition};
use tablemap_sqlite::{
    AutoUpgrader, CatalogReader, ConnectionPool, DatabaseConfig, DbTableInfo, UpgradeInfo,
    UpgradeMode, UpgradeOptions,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Output format for `inspect` and `plan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliOutputFormat {
    Text,
    Json,
    Yaml,
}

#[derive(Debug, Parser)]
#[command(name = "tablemap")]
#[command(version)]
#[command(about = "Inspect SQLite tables and upgrade them to a declared schema")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the live structure of a table, or list the tables of a database.
    Inspect(InspectArgs),
    /// Print the upgrade each declared table would receive, without changing anything.
    Plan(PlanArgs),
    /// Bring the database in line with a schema file.
    Upgrade(UpgradeArgs),
}

#[derive(Debug, Args)]
struct InspectArgs {
    /// SQLite database path.
    #[arg(long)]
    db: PathBuf,
    /// Table name, optionally schema-qualified; lists all tables when omitted.
    #[arg(long)]
    table: Option<String>,
    /// Output format.
    #[arg(long, default_value = "json")]
    format: CliOutputFormat,
}

#[derive(Debug, Args)]
struct UpgradeSwitches {
    /// Rebuild every existing table.
    #[arg(long)]
    force_recreate: bool,
    /// Keep live columns that are no longer declared.
    #[arg(long)]
    keep_old_columns: bool,
}

impl UpgradeSwitches {
    fn apply(&self, options: &mut UpgradeOptions) {
        options.force_recreate |= self.force_recreate;
        options.keep_old_columns |= self.keep_old_columns;
    }
}

#[derive(Debug, Args)]
struct PlanArgs {
    /// SQLite database path.
    #[arg(long)]
    db: PathBuf,
    /// YAML or JSON file with a list of table definitions.
    #[arg(long)]
    schema: PathBuf,
    #[command(flatten)]
    switches: UpgradeSwitches,
    /// Output format.
    #[arg(long, default_value = "text")]
    format: CliOutputFormat,
}

#[derive(Debug, Args)]
struct UpgradeArgs {
    /// SQLite database path; overrides the path of `--config`.
    #[arg(long, required_unless_present = "config")]
    db: Option<PathBuf>,
    /// YAML or JSON file with a list of table definitions.
    #[arg(long)]
    schema: PathBuf,
    /// Database configuration YAML.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(flatten)]
    switches: UpgradeSwitches,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Inspect(args) => run_inspect(args),
        Command::Plan(args) => run_plan(args),
        Command::Upgrade(args) => run_upgrade(args),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_inspect(args: InspectArgs) -> Result<(), String> {
    require_existing(&args.db)?;
    let pool = open_pool(DatabaseConfig::with_path(path_string(&args.db)))?;
    let conn = pool.get().map_err(|e| e.to_string())?;
    let reader = CatalogReader::new(&conn);

    let Some(name) = args.table else {
        let mut names = Vec::new();
        for schema in reader.read_schemas().map_err(|e| e.to_string())? {
            for table in reader.read_tables(&schema).map_err(|e| e.to_string())? {
                names.push(if schema == "main" {
                    table
                } else {
                    format!("{schema}.{table}")
                });
            }
        }
        match args.format {
            CliOutputFormat::Text => names.iter().for_each(|n| println!("{n}")),
            format => println!("{}", render(&names, format)?),
        }
        return Ok(());
    };

    let info = reader
        .read_table_info(&name)
        .map_err(|e| format!("Failed to read table '{name}': {e}"))?
        .ok_or_else(|| format!("table '{name}' not found in '{}'", args.db.display()))?;
    match args.format {
        CliOutputFormat::Text => print_table_info(&info),
        format => println!("{}", render(&info, format)?),
    }
    Ok(())
}

fn run_plan(args: PlanArgs) -> Result<(), String> {
    let tables = load_schema_file(&args.schema)?;
    let pool = open_pool(DatabaseConfig::with_path(path_string(&args.db)))?;
    let conn = pool.get().map_err(|e| e.to_string())?;

    let mut options = UpgradeOptions::default();
    args.switches.apply(&mut options);
    let upgrader = AutoUpgrader::new(&conn).with_options(options);

    let mut plan = Vec::with_capacity(tables.len());
    for table in &tables {
        let info = upgrader
            .upgrade_info(table)
            .map_err(|e| format!("Failed to plan '{}': {e}", table.qualified_name()))?;
        plan.push(info);
    }

    match args.format {
        CliOutputFormat::Text => plan.iter().for_each(print_upgrade_info),
        format => println!("{}", render(&plan, format)?),
    }
    Ok(())
}

fn run_upgrade(args: UpgradeArgs) -> Result<(), String> {
    let mut config = match &args.config {
        Some(path) => DatabaseConfig::load(path)
            .map_err(|e| format!("Failed to load config '{}': {e}", path.display()))?,
        None => DatabaseConfig::default(),
    };
    if let Some(db) = &args.db {
        config.path = path_string(db);
    }
    args.switches.apply(&mut config.upgrade);

    let tables = load_schema_file(&args.schema)?;
    let options = config.upgrade.clone();
    let path = config.path.clone();
    let pool = open_pool(config)?;
    let conn = pool.get().map_err(|e| e.to_string())?;

    let refs: Vec<&Table> = tables.iter().map(Arc::as_ref).collect();
    let report = AutoUpgrader::new(&conn)
        .with_options(options)
        .upgrade_tables(&refs)
        .map_err(|e| format!("Upgrade failed: {e}"))?;

    println!("Upgrade of '{path}' complete:");
    println!("  Actual: {}", report.actual.len());
    println!("  Created: {}", list(&report.created));
    println!("  Altered: {}", list(&report.altered));
    println!("  Recreated: {}", list(&report.recreated));
    println!("  Statements executed: {}", report.statements_executed);
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open_pool(config: DatabaseConfig) -> Result<ConnectionPool, String> {
    let path = config.path.clone();
    ConnectionPool::open(config).map_err(|e| format!("Failed to open database '{path}': {e}"))
}

fn require_existing(path: &Path) -> Result<(), String> {
    if path.exists() {
        Ok(())
    } else {
        Err(format!("database '{}' does not exist", path.display()))
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Reads a list of table definitions and registers them, so duplicate or
/// conflicting tables in one file are rejected.
fn load_schema_file(path: &Path) -> Result<Vec<Arc<Table>>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read schema '{}': {e}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let definitions: Vec<TableDefinition> = if is_json {
        serde_json::from_str(&content).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(&content).map_err(|e| e.to_string())
    }
    .map_err(|e| format!("Invalid schema '{}': {e}", path.display()))?;

    let registry = SchemaRegistry::new();
    let mut tables = Vec::with_capacity(definitions.len());
    for definition in definitions {
        let name = definition.name.clone();
        let table = definition
            .into_table()
            .map_err(|e| format!("Invalid table '{name}': {e}"))?;
        let table = registry
            .register_table(table)
            .map_err(|e| format!("Invalid table '{name}': {e}"))?;
        if !tables
            .iter()
            .any(|t: &Arc<Table>| t.qualified_name() == table.qualified_name())
        {
            tables.push(table);
        }
    }
    debug!(path = %path.display(), tables = tables.len(), "loaded schema file");
    Ok(tables)
}

fn render<T: Serialize>(value: &T, format: CliOutputFormat) -> Result<String, String> {
    match format {
        CliOutputFormat::Json => serde_json::to_string_pretty(value)
            .map_err(|e| format!("JSON serialization failed: {e}")),
        CliOutputFormat::Yaml | CliOutputFormat::Text => {
            serde_yaml::to_string(value).map_err(|e| format!("YAML serialization failed: {e}"))
        }
    }
}

fn list(names: &[String]) -> String {
    if names.is_empty() {
        "0".to_string()
    } else {
        format!("{} ({})", names.len(), names.join(", "))
    }
}

fn print_table_info(info: &DbTableInfo) {
    let mut flags = Vec::new();
    if info.auto_increment {
        flags.push("AUTOINCREMENT");
    }
    if info.without_row_id {
        flags.push("WITHOUT ROWID");
    }
    println!("{}.{} {}", info.schema, info.name, flags.join(" "));
    println!("  primary key: ({})", info.primary_key.join(", "));
    for column in info.columns.values() {
        let mut line = format!("  {} {}", column.name, column.type_name);
        if column.not_null {
            line.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default_value {
            line.push_str(&format!(" DEFAULT {default}"));
        }
        println!("{line}");
    }
    for index in info.indexes.values() {
        let columns: Vec<String> = index
            .columns
            .iter()
            .map(|c| if c.desc { format!("{} DESC", c.name) } else { c.name.clone() })
            .collect();
        let unique = if index.unique { "unique " } else { "" };
        println!("  {unique}index {} ({})", index.name, columns.join(", "));
    }
    for signature in info.foreign_keys.keys() {
        println!("  foreign key {signature}");
    }
}

fn print_upgrade_info(info: &UpgradeInfo) {
    println!("{}: {}", info.table, info.mode);
    match info.mode {
        UpgradeMode::Actual | UpgradeMode::Create => {}
        UpgradeMode::Alter => {
            for column in &info.add_columns {
                println!("  add column {column}");
            }
            for index in &info.drop_indexes {
                println!("  drop index {index}");
            }
            for index in &info.add_indexes {
                println!("  create index {index}");
            }
        }
        UpgradeMode::Recreate => {
            for reason in &info.reasons {
                println!("  {reason}");
            }
            for column in &info.drop_columns {
                println!("  data of column {column} is lost");
            }
        }
    }
}
