//! Table metadata: fields, primary key, indexes and foreign keys.
//!
//! A [`Table`] describes how one model type maps onto one database table.
//! Tables are usually assembled through a [`TableBuilder`] or through the
//! `define_*` calls of [`SchemaRegistry`](crate::SchemaRegistry), and are
//! immutable once registered.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::dbtype::{DbTypeInfo, TypeAffinity};
use crate::error::{MapError, Result};
use crate::identifier::{quote_identifier, split_schema_identifier, validate_identifier};
use crate::value::{PropertyType, SqlValue, ValueTransform, json_to_sql, sql_to_json};

/// Options for a table definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableOptions {
    /// Use `INTEGER PRIMARY KEY AUTOINCREMENT` for the row-id field.
    pub auto_increment: bool,
    /// Create the table `WITHOUT ROWID`.
    pub without_row_id: bool,
}

/// Options for a field definition.
///
/// ```
/// use tablemap_core::{FieldOptions, PropertyType};
///
/// let opts = FieldOptions::new("INTEGER NOT NULL DEFAULT 0")
///     .column("is_active")
///     .property_type(PropertyType::Bool);
/// assert_eq!(opts.name.as_deref(), Some("is_active"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldOptions {
    /// Column name; defaults to the property name.
    pub name: Option<String>,
    /// Declared column type; defaults from the property type.
    pub dbtype: Option<String>,
    /// Default expression appended as `DEFAULT ...` unless `dbtype` has one.
    pub default_value: Option<String>,
    pub property_type: Option<PropertyType>,
    /// Serialize the property as JSON text.
    pub is_json: bool,
    /// Store INTEGER dates as milliseconds instead of seconds.
    pub date_in_milliseconds: bool,
    pub transform: Option<ValueTransform>,
}

impl FieldOptions {
    pub fn new(dbtype: impl Into<String>) -> Self {
        Self {
            dbtype: Some(dbtype.into()),
            ..Self::default()
        }
    }

    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn default_value(mut self, expr: impl Into<String>) -> Self {
        self.default_value = Some(expr.into());
        self
    }

    pub fn property_type(mut self, property_type: PropertyType) -> Self {
        self.property_type = Some(property_type);
        self
    }

    pub fn json(mut self) -> Self {
        self.is_json = true;
        self
    }

    pub fn date_in_milliseconds(mut self) -> Self {
        self.date_in_milliseconds = true;
        self
    }

    pub fn transform(mut self, transform: ValueTransform) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// Options for one property's membership in an index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// `None` keeps whatever an earlier definition of the index declared.
    pub unique: Option<bool>,
    pub desc: bool,
    pub collation: Option<String>,
}

impl IndexOptions {
    pub fn unique() -> Self {
        Self {
            unique: Some(true),
            ..Self::default()
        }
    }

    pub fn desc(mut self) -> Self {
        self.desc = true;
        self
    }

    pub fn collate(mut self, collation: impl Into<String>) -> Self {
        self.collation = Some(collation.into());
        self
    }
}

/// Mapping of one model property onto one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Property name on the model.
    pub property: String,
    /// Column name in the database.
    pub name: String,
    /// Declared column type, e.g. `TEXT NOT NULL`.
    pub dbtype: String,
    pub default_value: Option<String>,
    pub property_type: PropertyType,
    pub is_json: bool,
    pub date_in_milliseconds: bool,
    /// Set on the field that aliases the engine's row id.
    pub is_identity: bool,
    pub transform: Option<ValueTransform>,
}

impl Field {
    pub fn new(property: impl Into<String>, opts: FieldOptions) -> Result<Self> {
        let property = property.into();
        let name = opts.name.unwrap_or_else(|| property.clone());
        validate_identifier(&property)?;
        validate_identifier(&name)?;

        let property_type = match (opts.is_json, opts.property_type) {
            (true, _) => PropertyType::Json,
            (false, Some(pt)) => pt,
            (false, None) => opts
                .dbtype
                .as_deref()
                .map(|d| PropertyType::from_affinity(DbTypeInfo::parse(d).type_affinity))
                .unwrap_or(PropertyType::Text),
        };
        let dbtype = opts
            .dbtype
            .unwrap_or_else(|| property_type.default_dbtype().to_string());

        Ok(Self {
            property,
            name,
            dbtype,
            default_value: opts.default_value,
            property_type,
            is_json: opts.is_json,
            date_in_milliseconds: opts.date_in_milliseconds,
            is_identity: false,
            transform: opts.transform,
        })
    }

    /// Parsed declared type, including an explicit `default_value`.
    pub fn db_type_info(&self) -> DbTypeInfo {
        let mut info = DbTypeInfo::parse(&self.dbtype);
        if info.default_value.is_none() {
            info.default_value = self
                .default_value
                .as_deref()
                .map(crate::dbtype::normalize_default);
        }
        info
    }

    pub fn type_affinity(&self) -> TypeAffinity {
        DbTypeInfo::parse(&self.dbtype).type_affinity
    }

    /// Column definition as used in `CREATE TABLE` and `ADD COLUMN`.
    pub fn column_definition(&self) -> String {
        let mut def = format!(
            "{} {}",
            crate::identifier::quote_simple_identifier(&self.name),
            self.dbtype
        );
        if let Some(default) = &self.default_value {
            if DbTypeInfo::parse(&self.dbtype).default_value.is_none() {
                def.push_str(" DEFAULT ");
                def.push_str(default);
            }
        }
        def.trim_end().to_string()
    }

    /// Converts a model-side property value into its database value.
    pub fn value_to_db(&self, value: &JsonValue) -> Result<SqlValue> {
        match &self.transform {
            Some(t) => t.to_db(value),
            None => json_to_sql(
                value,
                self.property_type,
                self.type_affinity(),
                self.date_in_milliseconds,
            ),
        }
        .map_err(|e| self.annotate(e))
    }

    /// Converts a database value into its model-side property value.
    pub fn value_from_db(&self, value: &SqlValue) -> Result<JsonValue> {
        match &self.transform {
            Some(t) => t.from_db(value),
            None => sql_to_json(value, self.property_type, self.date_in_milliseconds),
        }
        .map_err(|e| self.annotate(e))
    }

    fn annotate(&self, err: MapError) -> MapError {
        match err {
            MapError::Conversion(msg) => {
                MapError::Conversion(format!("property '{}': {msg}", self.property))
            }
            other => other,
        }
    }
}

/// One column of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub property: String,
    pub desc: bool,
    pub collation: Option<String>,
}

/// Declared index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub unique: bool,
    pub columns: Vec<IndexColumn>,
}

/// One `(local property, referenced column)` pair of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyPair {
    pub property: String,
    pub ref_column: String,
}

/// Declared foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub name: String,
    pub ref_table: String,
    pub pairs: Vec<ForeignKeyPair>,
}

/// Metadata for one mapped table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Name as registered, possibly schema-qualified (`temp.cache`).
    pub(crate) qualified_name: String,
    pub(crate) options: TableOptions,
    pub(crate) fields: Vec<Field>,
    pub(crate) primary_key: Vec<String>,
    pub(crate) foreign_keys: BTreeMap<String, ForeignKey>,
    pub(crate) indexes: BTreeMap<String, Index>,
}

impl Table {
    pub(crate) fn empty(name: &str, options: TableOptions) -> Result<Self> {
        let (schema, table) = split_schema_identifier(name);
        if let Some(schema) = schema {
            validate_identifier(schema)?;
        }
        validate_identifier(table)?;
        Ok(Self {
            qualified_name: name.to_string(),
            options,
            fields: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: BTreeMap::new(),
            indexes: BTreeMap::new(),
        })
    }

    /// Name as registered, including an optional schema prefix.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Table name without schema.
    pub fn name(&self) -> &str {
        split_schema_identifier(&self.qualified_name).1
    }

    pub fn schema(&self) -> Option<&str> {
        split_schema_identifier(&self.qualified_name).0
    }

    /// Quoted, schema-qualified name for statements.
    pub fn quoted_name(&self) -> String {
        quote_identifier(&self.qualified_name)
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    pub fn auto_increment(&self) -> bool {
        self.options.auto_increment
    }

    pub fn without_row_id(&self) -> bool {
        self.options.without_row_id
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Primary-key property names in key order.
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn primary_key_fields(&self) -> Vec<&Field> {
        self.primary_key
            .iter()
            .filter_map(|p| self.field(p))
            .collect()
    }

    pub fn is_primary_key(&self, property: &str) -> bool {
        self.primary_key.iter().any(|p| p == property)
    }

    pub fn foreign_keys(&self) -> &BTreeMap<String, ForeignKey> {
        &self.foreign_keys
    }

    pub fn indexes(&self) -> &BTreeMap<String, Index> {
        &self.indexes
    }

    pub fn field(&self, property: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.property == property)
    }

    /// Looks up a field by property, failing with [`MapError::UnknownProperty`].
    pub fn require_field(&self, property: &str) -> Result<&Field> {
        self.field(property).ok_or_else(|| MapError::UnknownProperty {
            table: self.qualified_name.clone(),
            property: property.to_string(),
        })
    }

    pub fn field_by_column(&self, column: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == column)
    }

    /// The field aliasing the row id, if any.
    pub fn row_id_field(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.is_identity)
    }

    /// Looks up a foreign key by constraint name.
    pub fn foreign_key(&self, name: &str) -> Result<&ForeignKey> {
        self.foreign_keys
            .get(name)
            .ok_or_else(|| MapError::ConstraintNotFound {
                table: self.qualified_name.clone(),
                constraint: name.to_string(),
            })
    }

    /// Looks up an index by name.
    pub fn index(&self, name: &str) -> Result<&Index> {
        self.indexes
            .get(name)
            .ok_or_else(|| MapError::ConstraintNotFound {
                table: self.qualified_name.clone(),
                constraint: name.to_string(),
            })
    }

    /// Checks structural invariants: a non-empty primary key made of
    /// declared fields, unique column names, and index and foreign key
    /// members that exist.
    pub fn validate(&self) -> Result<()> {
        let err = |msg: String| {
            Err(MapError::Registration(format!(
                "table '{}': {msg}",
                self.qualified_name
            )))
        };
        if self.primary_key.is_empty() {
            return err("no primary key defined".to_string());
        }
        for pk in &self.primary_key {
            if self.field(pk).is_none() {
                return err(format!("primary key property '{pk}' is not a field"));
            }
        }
        for (i, f) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|o| o.name == f.name) {
                return err(format!("duplicate column '{}'", f.name));
            }
        }
        for index in self.indexes.values() {
            for col in &index.columns {
                if self.field(&col.property).is_none() {
                    return err(format!(
                        "index '{}' references unknown property '{}'",
                        index.name, col.property
                    ));
                }
            }
        }
        for fk in self.foreign_keys.values() {
            for pair in &fk.pairs {
                if self.field(&pair.property).is_none() {
                    return err(format!(
                        "foreign key '{}' references unknown property '{}'",
                        fk.name, pair.property
                    ));
                }
            }
        }
        if self.options.auto_increment && self.row_id_field().is_none() {
            return err(
                "autoIncrement requires a single INTEGER primary key on a rowid table".to_string(),
            );
        }
        Ok(())
    }

    /// Recomputes which field, if any, aliases the row id: a single-column
    /// primary key declared exactly as `INTEGER` on a rowid table.
    pub(crate) fn refresh_identity(&mut self) {
        let identity = if self.options.without_row_id || self.primary_key.len() != 1 {
            None
        } else {
            let pk = &self.primary_key[0];
            self.fields
                .iter()
                .find(|f| &f.property == pk)
                .filter(|f| f.db_type_info().type_name.eq_ignore_ascii_case("INTEGER"))
                .map(|f| f.property.clone())
        };
        for f in &mut self.fields {
            f.is_identity = identity.as_deref() == Some(f.property.as_str());
        }
    }

    pub(crate) fn add_field(&mut self, field: Field) -> Result<()> {
        if let Some(existing) = self.field(&field.property) {
            if existing.name != field.name
                || existing.dbtype != field.dbtype
                || existing.default_value != field.default_value
                || existing.property_type != field.property_type
                || existing.is_json != field.is_json
                || existing.date_in_milliseconds != field.date_in_milliseconds
                || existing.transform != field.transform
            {
                return Err(MapError::Registration(format!(
                    "table '{}': property '{}' is already mapped with a different definition",
                    self.qualified_name, field.property
                )));
            }
            return Ok(());
        }
        if let Some(other) = self.field_by_column(&field.name) {
            return Err(MapError::Registration(format!(
                "table '{}': column '{}' is already mapped by property '{}'",
                self.qualified_name, field.name, other.property
            )));
        }
        self.fields.push(field);
        self.refresh_identity();
        Ok(())
    }

    pub(crate) fn add_primary_key(&mut self, property: &str) {
        if !self.is_primary_key(property) {
            self.primary_key.push(property.to_string());
            self.refresh_identity();
        }
    }

    pub(crate) fn add_index_column(
        &mut self,
        property: &str,
        index_name: &str,
        opts: IndexOptions,
    ) -> Result<()> {
        validate_identifier(index_name)?;
        self.require_field(property)
            .map_err(|_| self.unknown_member("index", index_name, property))?;

        let table = self.qualified_name.clone();
        let index = self
            .indexes
            .entry(index_name.to_string())
            .or_insert_with(|| Index {
                name: index_name.to_string(),
                unique: opts.unique.unwrap_or(false),
                columns: Vec::new(),
            });
        if let Some(unique) = opts.unique {
            if index.columns.is_empty() {
                index.unique = unique;
            } else if index.unique != unique {
                return Err(MapError::Registration(format!(
                    "table '{table}': index '{index_name}' redefined with a different unique flag"
                )));
            }
        }
        let column = IndexColumn {
            property: property.to_string(),
            desc: opts.desc,
            collation: opts.collation,
        };
        match index.columns.iter().find(|c| c.property == property) {
            Some(existing) if *existing == column => Ok(()),
            Some(_) => Err(MapError::Registration(format!(
                "table '{table}': index '{index_name}' already contains '{property}' with a different definition"
            ))),
            None => {
                index.columns.push(column);
                Ok(())
            }
        }
    }

    pub(crate) fn add_foreign_key_pair(
        &mut self,
        property: &str,
        constraint_name: &str,
        ref_table: &str,
        ref_column: &str,
    ) -> Result<()> {
        validate_identifier(constraint_name)?;
        validate_identifier(ref_table)?;
        validate_identifier(ref_column)?;
        self.require_field(property)
            .map_err(|_| self.unknown_member("foreign key", constraint_name, property))?;

        let table = self.qualified_name.clone();
        let fk = self
            .foreign_keys
            .entry(constraint_name.to_string())
            .or_insert_with(|| ForeignKey {
                name: constraint_name.to_string(),
                ref_table: ref_table.to_string(),
                pairs: Vec::new(),
            });
        if fk.ref_table != ref_table {
            return Err(MapError::Registration(format!(
                "table '{table}': foreign key '{constraint_name}' already references '{}'",
                fk.ref_table
            )));
        }
        let pair = ForeignKeyPair {
            property: property.to_string(),
            ref_column: ref_column.to_string(),
        };
        match fk.pairs.iter().find(|p| p.property == property) {
            Some(existing) if *existing == pair => Ok(()),
            Some(_) => Err(MapError::Registration(format!(
                "table '{table}': foreign key '{constraint_name}' already maps '{property}' differently"
            ))),
            None => {
                fk.pairs.push(pair);
                Ok(())
            }
        }
    }

    fn unknown_member(&self, kind: &str, name: &str, property: &str) -> MapError {
        MapError::Registration(format!(
            "table '{}': {kind} '{name}' references unmapped property '{property}'",
            self.qualified_name
        ))
    }
}

/// Builder assembling a [`Table`] in one expression.
///
/// ```
/// use tablemap_core::{FieldOptions, IndexOptions, TableBuilder, TableOptions};
///
/// let table = TableBuilder::new("users", TableOptions { auto_increment: true, ..Default::default() })
///     .id("id", FieldOptions::new("INTEGER"))
///     .field("name", FieldOptions::new("TEXT NOT NULL"))
///     .index("name", "idx_users_name", IndexOptions::unique())
///     .build()
///     .unwrap();
/// assert_eq!(table.primary_key(), ["id"]);
/// assert!(table.row_id_field().is_some());
/// ```
pub struct TableBuilder {
    table: Result<Table>,
}

impl TableBuilder {
    pub fn new(name: &str, options: TableOptions) -> Self {
        Self {
            table: Table::empty(name, options),
        }
    }

    fn apply(mut self, f: impl FnOnce(&mut Table) -> Result<()>) -> Self {
        if let Ok(table) = &mut self.table {
            if let Err(e) = f(table) {
                self.table = Err(e);
            }
        }
        self
    }

    pub fn field(self, property: &str, opts: FieldOptions) -> Self {
        self.apply(|t| t.add_field(Field::new(property, opts)?))
    }

    /// Adds a field and appends it to the primary key.
    pub fn id(self, property: &str, opts: FieldOptions) -> Self {
        self.apply(|t| {
            t.add_field(Field::new(property, opts)?)?;
            t.add_primary_key(property);
            Ok(())
        })
    }

    pub fn index(self, property: &str, index_name: &str, opts: IndexOptions) -> Self {
        self.apply(|t| t.add_index_column(property, index_name, opts))
    }

    pub fn foreign_key(
        self,
        property: &str,
        constraint_name: &str,
        ref_table: &str,
        ref_column: &str,
    ) -> Self {
        self.apply(|t| t.add_foreign_key_pair(property, constraint_name, ref_table, ref_column))
    }

    /// Finishes the table and checks its invariants.
    pub fn build(self) -> Result<Table> {
        let table = self.table?;
        table.validate()?;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableBuilder {
        TableBuilder::new("users", TableOptions::default())
            .id("id", FieldOptions::new("INTEGER"))
            .field("name", FieldOptions::new("TEXT"))
    }

    #[test]
    fn test_builder_requires_primary_key() {
        let err = TableBuilder::new("t", TableOptions::default())
            .field("a", FieldOptions::new("TEXT"))
            .build()
            .unwrap_err();
        assert!(matches!(err, MapError::Registration(_)));
    }

    #[test]
    fn test_row_id_detection() {
        let table = users().build().unwrap();
        assert_eq!(table.row_id_field().unwrap().property, "id");

        let text_pk = TableBuilder::new("t", TableOptions::default())
            .id("code", FieldOptions::new("TEXT"))
            .build()
            .unwrap();
        assert!(text_pk.row_id_field().is_none());

        let without = TableBuilder::new(
            "t",
            TableOptions {
                without_row_id: true,
                ..Default::default()
            },
        )
        .id("id", FieldOptions::new("INTEGER"))
        .build()
        .unwrap();
        assert!(without.row_id_field().is_none());

        let composite = TableBuilder::new("t", TableOptions::default())
            .id("a", FieldOptions::new("INTEGER"))
            .id("b", FieldOptions::new("INTEGER"))
            .build()
            .unwrap();
        assert!(composite.row_id_field().is_none());
    }

    #[test]
    fn test_auto_increment_requires_row_id() {
        let err = TableBuilder::new(
            "t",
            TableOptions {
                auto_increment: true,
                ..Default::default()
            },
        )
        .id("code", FieldOptions::new("TEXT"))
        .build();
        assert!(err.is_err());
    }

    #[test]
    fn test_conflicting_field_redefinition() {
        let err = users().field("name", FieldOptions::new("INTEGER")).build();
        assert!(matches!(err, Err(MapError::Registration(_))));

        let same = users().field("name", FieldOptions::new("TEXT")).build();
        assert!(same.is_ok());
    }

    #[test]
    fn test_duplicate_column_name() {
        let err = users()
            .field("other", FieldOptions::new("TEXT").column("name"))
            .build();
        assert!(matches!(err, Err(MapError::Registration(_))));
    }

    #[test]
    fn test_index_unique_flag_conflict() {
        let table = users()
            .field("email", FieldOptions::new("TEXT"))
            .index("name", "idx", IndexOptions::unique())
            .index("email", "idx", IndexOptions::default())
            .build()
            .unwrap();
        assert!(table.index("idx").unwrap().unique);
        assert_eq!(table.index("idx").unwrap().columns.len(), 2);

        let err = users()
            .field("email", FieldOptions::new("TEXT"))
            .index("name", "idx", IndexOptions::unique())
            .index(
                "email",
                "idx",
                IndexOptions {
                    unique: Some(false),
                    ..Default::default()
                },
            )
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn test_foreign_key_pair_redefinition() {
        let base = || {
            users()
                .field("parent_id", FieldOptions::new("INTEGER"))
                .foreign_key("parent_id", "fk_parent", "parents", "id")
        };
        assert!(
            base()
                .foreign_key("parent_id", "fk_parent", "parents", "id")
                .build()
                .is_ok()
        );
        assert!(
            base()
                .foreign_key("parent_id", "fk_parent", "parents", "other")
                .build()
                .is_err()
        );
        assert!(
            base()
                .foreign_key("name", "fk_parent", "others", "id")
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_unknown_constraint_lookup() {
        let table = users().build().unwrap();
        assert!(matches!(
            table.foreign_key("missing"),
            Err(MapError::ConstraintNotFound { .. })
        ));
        assert!(matches!(
            table.index("missing"),
            Err(MapError::ConstraintNotFound { .. })
        ));
    }

    #[test]
    fn test_column_definition_appends_default() {
        let f = Field::new("flag", FieldOptions::new("INTEGER NOT NULL").default_value("0")).unwrap();
        assert_eq!(f.column_definition(), "flag INTEGER NOT NULL DEFAULT 0");
        assert_eq!(f.db_type_info().default_value.as_deref(), Some("0"));
    }

    #[test]
    fn test_property_type_defaults_from_affinity() {
        let f = Field::new("n", FieldOptions::new("BIGINT")).unwrap();
        assert_eq!(f.property_type, PropertyType::Integer);
        let j = Field::new("j", FieldOptions::new("TEXT").json()).unwrap();
        assert_eq!(j.property_type, PropertyType::Json);
        let d = Field::new("d", FieldOptions::default().property_type(PropertyType::Bool)).unwrap();
        assert_eq!(d.dbtype, "INTEGER");
    }
}
