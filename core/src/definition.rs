//! Serializable table definitions.
//!
//! [`TableDefinition`] is the file form of a [`Table`]: a plain data
//! structure that can be read from YAML or JSON and turned into validated
//! metadata. Value transforms cannot be expressed in this form.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::table::{FieldOptions, IndexOptions, Table, TableBuilder, TableOptions};
use crate::value::PropertyType;

/// One mapped field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub property: String,
    /// Column name; defaults to the property name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_type: Option<PropertyType>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_json: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub date_in_milliseconds: bool,
}

/// One column of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexColumnDefinition {
    pub property: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub desc: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    pub name: String,
    #[serde(default)]
    pub unique: bool,
    pub columns: Vec<IndexColumnDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyPairDefinition {
    pub property: String,
    pub ref_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyDefinition {
    pub name: String,
    pub ref_table: String,
    pub pairs: Vec<ForeignKeyPairDefinition>,
}

/// File form of a table.
///
/// ```
/// use tablemap_core::TableDefinition;
///
/// let yaml = r#"
/// name: users
/// autoIncrement: true
/// primaryKey: [id]
/// fields:
///   - { property: id, dbtype: INTEGER }
///   - { property: name, dbtype: TEXT NOT NULL }
/// "#;
/// let def: TableDefinition = serde_yaml::from_str(yaml).unwrap();
/// let table = def.into_table().unwrap();
/// assert!(table.auto_increment());
/// assert_eq!(table.fields().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    /// Table name, optionally schema-qualified.
    pub name: String,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub without_row_id: bool,
    /// Primary-key properties in key order.
    pub primary_key: Vec<String>,
    pub fields: Vec<FieldDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyDefinition>,
}

impl TableDefinition {
    /// Builds and validates the table metadata.
    pub fn into_table(self) -> Result<Table> {
        let options = TableOptions {
            auto_increment: self.auto_increment,
            without_row_id: self.without_row_id,
        };
        let mut builder = TableBuilder::new(&self.name, options);

        // primary key members first so their order is the key order
        let mut fields = self.fields;
        fields.sort_by_key(|f| {
            self.primary_key
                .iter()
                .position(|p| *p == f.property)
                .unwrap_or(usize::MAX)
        });
        for f in fields {
            let is_pk = self.primary_key.contains(&f.property);
            let opts = FieldOptions {
                name: f.name,
                dbtype: f.dbtype,
                default_value: f.default_value,
                property_type: f.property_type,
                is_json: f.is_json,
                date_in_milliseconds: f.date_in_milliseconds,
                transform: None,
            };
            builder = if is_pk {
                builder.id(&f.property, opts)
            } else {
                builder.field(&f.property, opts)
            };
        }
        for index in self.indexes {
            for (i, col) in index.columns.into_iter().enumerate() {
                let opts = IndexOptions {
                    unique: (i == 0).then_some(index.unique),
                    desc: col.desc,
                    collation: col.collation,
                };
                builder = builder.index(&col.property, &index.name, opts);
            }
        }
        for fk in self.foreign_keys {
            for pair in fk.pairs {
                builder = builder.foreign_key(&pair.property, &fk.name, &fk.ref_table, &pair.ref_column);
            }
        }
        builder.build()
    }
}

impl From<&Table> for TableDefinition {
    fn from(table: &Table) -> Self {
        Self {
            name: table.qualified_name().to_string(),
            auto_increment: table.auto_increment(),
            without_row_id: table.without_row_id(),
            primary_key: table.primary_key().to_vec(),
            fields: table
                .fields()
                .iter()
                .map(|f| FieldDefinition {
                    property: f.property.clone(),
                    name: (f.name != f.property).then(|| f.name.clone()),
                    dbtype: Some(f.dbtype.clone()),
                    default_value: f.default_value.clone(),
                    property_type: (!f.is_json).then_some(f.property_type),
                    is_json: f.is_json,
                    date_in_milliseconds: f.date_in_milliseconds,
                })
                .collect(),
            indexes: table
                .indexes()
                .values()
                .map(|i| IndexDefinition {
                    name: i.name.clone(),
                    unique: i.unique,
                    columns: i
                        .columns
                        .iter()
                        .map(|c| IndexColumnDefinition {
                            property: c.property.clone(),
                            desc: c.desc,
                            collation: c.collation.clone(),
                        })
                        .collect(),
                })
                .collect(),
            foreign_keys: table
                .foreign_keys()
                .values()
                .map(|fk| ForeignKeyDefinition {
                    name: fk.name.clone(),
                    ref_table: fk.ref_table.clone(),
                    pairs: fk
                        .pairs
                        .iter()
                        .map(|p| ForeignKeyPairDefinition {
                            property: p.property.clone(),
                            ref_column: p.ref_column.clone(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MapError;

    fn sample() -> TableDefinition {
        serde_json::from_value(serde_json::json!({
            "name": "contacts",
            "primaryKey": ["id"],
            "fields": [
                {"property": "userId", "name": "user_id", "dbtype": "INTEGER NOT NULL"},
                {"property": "id", "dbtype": "INTEGER"},
                {"property": "active", "dbtype": "INTEGER", "propertyType": "bool"}
            ],
            "indexes": [
                {"name": "idx_user", "unique": true, "columns": [{"property": "userId", "desc": true}]}
            ],
            "foreignKeys": [
                {"name": "fk_user", "refTable": "users", "pairs": [{"property": "userId", "refColumn": "id"}]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_into_table() {
        let table = sample().into_table().unwrap();
        assert_eq!(table.primary_key(), ["id"]);
        assert_eq!(table.fields()[0].property, "id");
        assert_eq!(table.field("userId").unwrap().name, "user_id");
        assert_eq!(
            table.field("active").unwrap().property_type,
            PropertyType::Bool
        );
        let index = table.index("idx_user").unwrap();
        assert!(index.unique);
        assert!(index.columns[0].desc);
        assert_eq!(table.foreign_key("fk_user").unwrap().ref_table, "users");
    }

    #[test]
    fn test_definition_from_table_rebuilds_equal_table() {
        let table = sample().into_table().unwrap();
        let rebuilt = TableDefinition::from(&table).into_table().unwrap();
        assert_eq!(rebuilt, table);
    }

    #[test]
    fn test_missing_primary_key_is_rejected() {
        let mut def = sample();
        def.primary_key.clear();
        assert!(matches!(def.into_table(), Err(MapError::Registration(_))));
    }
}
