//! Statement generation from table metadata.
//!
//! Column values are bound under the field's parameter name (the sanitized
//! property name), e.g. `INSERT INTO users (id, name) VALUES (:id, :name)`.
//! `update_all_statement` and `delete_all_statement` carry no `WHERE`
//! clause: callers must append one or every row is affected.

use crate::error::{MapError, Result};
use crate::filter::{Filter, FilterCompiler, Order, Params};
use crate::identifier::{quote_identifier, quote_simple_identifier, sanitize_param_name};
use crate::table::{Field, Index, Table};

impl Field {
    /// Parameter name this field binds under in generated statements.
    pub fn param_name(&self) -> String {
        sanitize_param_name(&self.property)
    }

    fn placeholder(&self) -> String {
        format!(":{}", self.param_name())
    }

    pub fn quoted_name(&self) -> String {
        quote_simple_identifier(&self.name)
    }
}

/// A compiled `SELECT` together with the fields of its result columns.
#[derive(Debug)]
pub struct SelectQuery<'t> {
    pub sql: String,
    pub params: Params,
    /// Result columns, in order.
    pub fields: Vec<&'t Field>,
}

impl Table {
    fn fields_or_all<'a>(&'a self, fields: Option<&[&'a Field]>) -> Vec<&'a Field> {
        match fields {
            Some(f) => f.to_vec(),
            None => self.fields.iter().collect(),
        }
    }

    fn non_key<'a>(&self, fields: Vec<&'a Field>) -> Vec<&'a Field> {
        fields
            .into_iter()
            .filter(|f| !self.is_primary_key(&f.property))
            .collect()
    }

    fn set_clause(fields: &[&Field]) -> String {
        fields
            .iter()
            .map(|f| format!("{} = {}", f.quoted_name(), f.placeholder()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `pk1 = :pk1 AND pk2 = :pk2`.
    pub fn where_by_id_clause(&self) -> String {
        self.primary_key_fields()
            .iter()
            .map(|f| format!("{} = {}", f.quoted_name(), f.placeholder()))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// `INSERT INTO t (cols) VALUES (:params)` for the given fields, or all
    /// fields.
    pub fn insert_into_statement(&self, fields: Option<&[&Field]>) -> String {
        let fields = self.fields_or_all(fields);
        if fields.is_empty() {
            return format!("INSERT INTO {} DEFAULT VALUES", self.quoted_name());
        }
        let columns: Vec<String> = fields.iter().map(|f| f.quoted_name()).collect();
        let values: Vec<String> = fields.iter().map(|f| f.placeholder()).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quoted_name(),
            columns.join(", "),
            values.join(", ")
        )
    }

    /// Insert-or-update: inserts the row, or on a primary key or unique
    /// conflict updates only the supplied non-key columns of the existing
    /// row. Columns not supplied keep their current values.
    pub fn insert_or_replace_statement(&self, fields: Option<&[&Field]>) -> String {
        let fields = self.fields_or_all(fields);
        let insert = self.insert_into_statement(Some(&fields));
        let updates = self.non_key(fields);
        if updates.is_empty() {
            return format!("{insert} ON CONFLICT DO NOTHING");
        }
        let set = updates
            .iter()
            .map(|f| format!("{0} = excluded.{0}", f.quoted_name()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{insert} ON CONFLICT DO UPDATE SET {set}")
    }

    /// `UPDATE t SET ... WHERE <primary key>` for the non-key members of the
    /// given fields, or all non-key fields.
    pub fn update_by_id_statement(&self, fields: Option<&[&Field]>) -> Result<String> {
        let fields = self.non_key(self.fields_or_all(fields));
        if fields.is_empty() {
            return Err(MapError::Conversion(format!(
                "table '{}': no non-key columns to update",
                self.qualified_name
            )));
        }
        Ok(format!(
            "UPDATE {} SET {} WHERE {}",
            self.quoted_name(),
            Self::set_clause(&fields),
            self.where_by_id_clause()
        ))
    }

    /// `UPDATE t SET ...` without a `WHERE` clause.
    pub fn update_all_statement(&self, fields: Option<&[&Field]>) -> Result<String> {
        let fields = self.fields_or_all(fields);
        if fields.is_empty() {
            return Err(MapError::Conversion(format!(
                "table '{}': no columns to update",
                self.qualified_name
            )));
        }
        Ok(format!(
            "UPDATE {} SET {}",
            self.quoted_name(),
            Self::set_clause(&fields)
        ))
    }

    pub fn delete_by_id_statement(&self) -> String {
        format!(
            "DELETE FROM {} WHERE {}",
            self.quoted_name(),
            self.where_by_id_clause()
        )
    }

    /// `DELETE FROM t` without a `WHERE` clause.
    pub fn delete_all_statement(&self) -> String {
        format!("DELETE FROM {}", self.quoted_name())
    }

    /// `SELECT <cols> FROM t [alias]` for the given fields, or all fields.
    pub fn select_all_statement(&self, fields: Option<&[&Field]>, alias: Option<&str>) -> String {
        let fields = self.fields_or_all(fields);
        let prefix = alias
            .map(|a| format!("{}.", quote_simple_identifier(a)))
            .unwrap_or_default();
        let columns = fields
            .iter()
            .map(|f| format!("{prefix}{}", f.quoted_name()))
            .collect::<Vec<_>>()
            .join(", ");
        match alias {
            Some(a) => format!(
                "SELECT {columns} FROM {} {}",
                self.quoted_name(),
                quote_simple_identifier(a)
            ),
            None => format!("SELECT {columns} FROM {}", self.quoted_name()),
        }
    }

    pub fn select_by_id_statement(&self) -> String {
        format!(
            "{} WHERE {}",
            self.select_all_statement(None, None),
            self.where_by_id_clause()
        )
    }

    fn resolve_select(&self, filter: &Filter) -> Result<Vec<&Field>> {
        match &filter.select {
            Some(properties) => properties
                .iter()
                .map(|p| self.require_field(p))
                .collect(),
            None => Ok(self.fields.iter().collect()),
        }
    }

    fn where_part(&self, filter: &Filter, params: &mut Params) -> Result<String> {
        match &filter.condition {
            Some(cond) => {
                let compiler = FilterCompiler::new(self, filter.table_alias.as_deref());
                let clause = compiler.compile_into(cond, params)?;
                Ok(format!(" WHERE {clause}"))
            }
            None => Ok(String::new()),
        }
    }

    fn from_part(&self, filter: &Filter) -> String {
        match &filter.table_alias {
            Some(a) => format!(" FROM {} {}", self.quoted_name(), quote_simple_identifier(a)),
            None => format!(" FROM {}", self.quoted_name()),
        }
    }

    /// Compiles a full `SELECT` for a filter.
    pub fn select_statement(&self, filter: &Filter) -> Result<SelectQuery<'_>> {
        let fields = self.resolve_select(filter)?;
        let mut params = Params::new();
        let mut sql = self.select_all_statement(Some(&fields), filter.table_alias.as_deref());
        sql.push_str(&self.where_part(filter, &mut params)?);

        if !filter.order.is_empty() {
            let prefix = filter
                .table_alias
                .as_deref()
                .map(|a| format!("{}.", quote_simple_identifier(a)))
                .unwrap_or_default();
            let terms = filter
                .order
                .iter()
                .map(|(property, order)| {
                    let field = self.require_field(property)?;
                    let dir = match order {
                        Order::Asc => "ASC",
                        Order::Desc => "DESC",
                    };
                    Ok(format!("{prefix}{} {dir}", field.quoted_name()))
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        match (filter.limit, filter.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        Ok(SelectQuery {
            sql,
            params,
            fields,
        })
    }

    /// `SELECT COUNT(*)` over the rows matching the filter's condition.
    pub fn count_statement(&self, filter: &Filter) -> Result<(String, Params)> {
        let mut params = Params::new();
        let where_part = self.where_part(filter, &mut params)?;
        Ok((
            format!("SELECT COUNT(*){}{where_part}", self.from_part(filter)),
            params,
        ))
    }

    /// `SELECT EXISTS(...)` over the rows matching the filter's condition.
    pub fn exists_statement(&self, filter: &Filter) -> Result<(String, Params)> {
        let mut params = Params::new();
        let where_part = self.where_part(filter, &mut params)?;
        Ok((
            format!("SELECT EXISTS(SELECT 1{}{where_part})", self.from_part(filter)),
            params,
        ))
    }

    /// `CREATE TABLE IF NOT EXISTS` for the full declared schema.
    pub fn create_table_statement(&self) -> String {
        self.table_definition_sql("CREATE TABLE IF NOT EXISTS", &self.qualified_name, &[])
    }

    /// Plain `CREATE TABLE` under another (possibly schema-qualified) name,
    /// with additional raw column definitions appended after the declared
    /// fields. Fails if a table with that name already exists.
    pub fn create_table_statement_as(&self, name: &str, extra_columns: &[String]) -> String {
        self.table_definition_sql("CREATE TABLE", name, extra_columns)
    }

    fn table_definition_sql(&self, create: &str, name: &str, extra_columns: &[String]) -> String {
        let identity = if self.options.auto_increment {
            self.row_id_field()
        } else {
            None
        };

        let mut defs: Vec<String> = self
            .fields
            .iter()
            .map(|f| {
                let def = f.column_definition();
                if identity.is_some_and(|id| id.property == f.property) {
                    format!("{def} PRIMARY KEY AUTOINCREMENT")
                } else {
                    def
                }
            })
            .collect();
        defs.extend(extra_columns.iter().cloned());

        if identity.is_none() {
            let pk = self
                .primary_key_fields()
                .iter()
                .map(|f| f.quoted_name())
                .collect::<Vec<_>>()
                .join(", ");
            defs.push(format!("PRIMARY KEY ({pk})"));
        }
        for fk in self.foreign_keys.values() {
            let (local, refs): (Vec<String>, Vec<String>) = fk
                .pairs
                .iter()
                .map(|p| {
                    let local = self
                        .field(&p.property)
                        .map_or_else(|| quote_simple_identifier(&p.property), |f| f.quoted_name());
                    (local, quote_simple_identifier(&p.ref_column))
                })
                .unzip();
            defs.push(format!(
                "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_simple_identifier(&fk.name),
                local.join(", "),
                quote_simple_identifier(&fk.ref_table),
                refs.join(", ")
            ));
        }

        let mut sql = format!(
            "{create} {} (\n  {}\n)",
            quote_identifier(name),
            defs.join(",\n  ")
        );
        if self.options.without_row_id {
            sql.push_str(" WITHOUT ROWID");
        }
        sql
    }

    pub fn drop_table_statement(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quoted_name())
    }

    /// `ALTER TABLE t ADD COLUMN <definition>` for a declared field.
    pub fn alter_table_add_column_statement(&self, property: &str) -> Result<String> {
        let field = self.require_field(property)?;
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quoted_name(),
            field.column_definition()
        ))
    }

    fn index_identifier(&self, index_name: &str) -> String {
        match self.schema() {
            Some(schema) => format!(
                "{}.{}",
                quote_simple_identifier(schema),
                quote_simple_identifier(index_name)
            ),
            None => quote_simple_identifier(index_name),
        }
    }

    fn index_statement(&self, index: &Index) -> String {
        let columns = index
            .columns
            .iter()
            .map(|c| {
                let mut term = self
                    .field(&c.property)
                    .map_or_else(|| quote_simple_identifier(&c.property), |f| f.quoted_name());
                if let Some(coll) = &c.collation {
                    term.push_str(" COLLATE ");
                    term.push_str(coll);
                }
                if c.desc {
                    term.push_str(" DESC");
                }
                term
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({columns})",
            if index.unique { "UNIQUE " } else { "" },
            self.index_identifier(&index.name),
            quote_simple_identifier(self.name()),
        )
    }

    /// `CREATE [UNIQUE] INDEX` for a declared index.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::ConstraintNotFound`] for an unknown index name.
    pub fn create_index_statement(&self, index_name: &str) -> Result<String> {
        Ok(self.index_statement(self.index(index_name)?))
    }

    /// `DROP INDEX`; the index need not be declared (the upgrader drops
    /// indexes that only exist in the database).
    pub fn drop_index_statement(&self, index_name: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", self.index_identifier(index_name))
    }
}
