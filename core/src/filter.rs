//! Filter compilation: condition trees to SQL text plus named parameters.
//!
//! Every leaf binds its value(s) under a parameter named after the
//! property. When a name is already taken (the same property appears twice,
//! or an `UPDATE` already binds it in its `SET` list) a numeric suffix is
//! appended: `:age`, `:age_1`, `:age_2`, ...
//!
//! Boolean values compile to the stored `0`/`1`, and `Not` compiles to a
//! literal `NOT (...)`. SQL's three-valued logic therefore applies as is:
//! `NOT (active = 0)` matches neither rows where `active` is `0` nor rows
//! where it is `NULL`.

use serde_json::Value as JsonValue;

use crate::condition::{Comparison, Condition};
use crate::error::{MapError, Result};
use crate::identifier::{quote_simple_identifier, sanitize_param_name};
use crate::table::{Field, Table};
use crate::value::SqlValue;

/// Ordered named parameter bindings. Names are stored without the `:`
/// prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, SqlValue)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a value under `base` or the first free `base_N` and returns the
    /// placeholder text (`:name`).
    pub fn bind(&mut self, base: &str, value: SqlValue) -> String {
        let base = sanitize_param_name(base);
        let mut name = base.clone();
        let mut counter = 1;
        while self.contains(&name) {
            name = format!("{base}_{counter}");
            counter += 1;
        }
        let placeholder = format!(":{name}");
        self.entries.push((name, value));
        placeholder
    }

    /// Binds a value under exactly `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidFilter`] if the name is already bound.
    pub fn bind_exact(&mut self, name: &str, value: SqlValue) -> Result<()> {
        let name = name.trim_start_matches(':');
        if self.contains(name) {
            return Err(MapError::InvalidFilter(format!(
                "parameter ':{name}' is bound twice"
            )));
        }
        self.entries.push((name.to_string(), value));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        let name = name.trim_start_matches(':');
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which boolean combinator encloses the expression being compiled.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Parent {
    Root,
    And,
    Or,
    Not,
}

/// Compiles conditions against one table.
pub struct FilterCompiler<'t> {
    table: &'t Table,
    alias: Option<&'t str>,
}

impl<'t> FilterCompiler<'t> {
    pub fn new(table: &'t Table, alias: Option<&'t str>) -> Self {
        Self { table, alias }
    }

    /// Compiles a condition into a `WHERE` clause body and its parameters.
    ///
    /// ```
    /// use tablemap_core::{Condition, FieldOptions, FilterCompiler, TableBuilder, TableOptions};
    ///
    /// let table = TableBuilder::new("people", TableOptions::default())
    ///     .id("id", FieldOptions::new("INTEGER"))
    ///     .field("age", FieldOptions::new("INTEGER"))
    ///     .build()
    ///     .unwrap();
    /// let (sql, params) = FilterCompiler::new(&table, None)
    ///     .compile(&Condition::eq("age", 5))
    ///     .unwrap();
    /// assert_eq!(sql, "age = :age");
    /// assert_eq!(params.len(), 1);
    /// ```
    pub fn compile(&self, condition: &Condition) -> Result<(String, Params)> {
        let mut params = Params::new();
        let sql = self.compile_into(condition, &mut params)?;
        Ok((sql, params))
    }

    /// Compiles a condition, binding into an existing parameter set.
    pub fn compile_into(&self, condition: &Condition, params: &mut Params) -> Result<String> {
        self.compile_node(condition, Parent::Root, params)
    }

    fn compile_node(&self, cond: &Condition, parent: Parent, params: &mut Params) -> Result<String> {
        match cond {
            Condition::Property {
                property,
                comparison,
            } => {
                let field = self.table.require_field(property)?;
                self.compile_comparison(field, comparison, params)
            }
            Condition::And(children) => self.compile_junction(children, Parent::And, parent, params),
            Condition::Or(children) => self.compile_junction(children, Parent::Or, parent, params),
            Condition::Not(child) => {
                let inner = self.compile_node(child, Parent::Not, params)?;
                Ok(format!("NOT ({inner})"))
            }
            Condition::Sql { sql, params: raw } => {
                for (name, value) in raw {
                    params.bind_exact(name, sql_literal(value)?)?;
                }
                Ok(match parent {
                    Parent::And | Parent::Or => format!("({sql})"),
                    _ => sql.clone(),
                })
            }
        }
    }

    fn compile_junction(
        &self,
        children: &[Condition],
        kind: Parent,
        parent: Parent,
        params: &mut Params,
    ) -> Result<String> {
        let (op, empty) = if kind == Parent::And {
            (" AND ", "1")
        } else {
            (" OR ", "0")
        };
        match children {
            [] => Ok(empty.to_string()),
            [single] => self.compile_node(single, parent, params),
            _ => {
                let parts = children
                    .iter()
                    .map(|c| self.compile_node(c, kind, params))
                    .collect::<Result<Vec<_>>>()?;
                let joined = parts.join(op);
                let needs_parens = matches!(parent, Parent::And | Parent::Or) && parent != kind;
                Ok(if needs_parens {
                    format!("({joined})")
                } else {
                    joined
                })
            }
        }
    }

    fn column(&self, field: &Field) -> String {
        let column = quote_simple_identifier(&field.name);
        match self.alias {
            Some(alias) => format!("{}.{column}", quote_simple_identifier(alias)),
            None => column,
        }
    }

    fn bind(&self, field: &Field, value: &JsonValue, params: &mut Params) -> Result<String> {
        let value = field.value_to_db(value)?;
        Ok(params.bind(&field.property, value))
    }

    fn compile_comparison(
        &self,
        field: &Field,
        comparison: &Comparison,
        params: &mut Params,
    ) -> Result<String> {
        let col = self.column(field);
        let binary = |op: &str, value: &JsonValue, params: &mut Params| -> Result<String> {
            Ok(format!("{col} {op} {}", self.bind(field, value, params)?))
        };
        match comparison {
            Comparison::Eq(v) => binary("=", v, params),
            Comparison::Ne(v) => binary("!=", v, params),
            Comparison::Lt(v) => binary("<", v, params),
            Comparison::Lte(v) => binary("<=", v, params),
            Comparison::Gt(v) => binary(">", v, params),
            Comparison::Gte(v) => binary(">=", v, params),
            Comparison::IsLike(v) => {
                Ok(format!("{col} LIKE {}", params.bind(&field.property, sql_literal(v)?)))
            }
            Comparison::IsNotLike(v) => Ok(format!(
                "{col} NOT LIKE {}",
                params.bind(&field.property, sql_literal(v)?)
            )),
            Comparison::IsNull => Ok(format!("{col} IS NULL")),
            Comparison::IsNotNull => Ok(format!("{col} IS NOT NULL")),
            Comparison::In(values) | Comparison::NotIn(values) => {
                let placeholders = values
                    .iter()
                    .map(|v| self.bind(field, v, params))
                    .collect::<Result<Vec<_>>>()?;
                let op = if matches!(comparison, Comparison::In(_)) {
                    "IN"
                } else {
                    "NOT IN"
                };
                Ok(format!("{col} {op} ({})", placeholders.join(", ")))
            }
            Comparison::IsBetween(lo, hi) | Comparison::IsNotBetween(lo, hi) => {
                let lo = self.bind(field, lo, params)?;
                let hi = self.bind(field, hi, params)?;
                let op = if matches!(comparison, Comparison::IsBetween(..)) {
                    "BETWEEN"
                } else {
                    "NOT BETWEEN"
                };
                Ok(format!("{col} {op} {lo} AND {hi}"))
            }
        }
    }
}

/// Converts a JSON literal to a database value without a field mapping
/// (LIKE patterns and raw SQL parameters).
fn sql_literal(value: &JsonValue) -> Result<SqlValue> {
    match value {
        JsonValue::Null => Ok(SqlValue::Null),
        JsonValue::Bool(b) => Ok(SqlValue::from(*b)),
        JsonValue::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .ok_or_else(|| MapError::Conversion(format!("number out of range: {n}"))),
        JsonValue::String(s) => Ok(SqlValue::Text(s.clone())),
        other => Err(MapError::InvalidFilter(format!(
            "expected a scalar value, got {other}"
        ))),
    }
}

/// Sort direction of one `ORDER BY` term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// A complete query over one table: projection, condition, ordering and
/// paging.
///
/// ```
/// use tablemap_core::{Condition, Filter, Order};
///
/// let filter = Filter::new()
///     .select(["id", "name"])
///     .condition(Condition::gt("age", 17))
///     .order_by("name", Order::Asc)
///     .limit(10);
/// assert_eq!(filter.limit, Some(10));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// Properties to select; `None` selects every field.
    pub select: Option<Vec<String>>,
    pub condition: Option<Condition>,
    pub order: Vec<(String, Order)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub table_alias: Option<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A filter consisting only of a condition.
    pub fn with_condition(condition: Condition) -> Self {
        Self::new().condition(condition)
    }

    pub fn select<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(properties.into_iter().map(Into::into).collect());
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn order_by(mut self, property: impl Into<String>, order: Order) -> Self {
        self.order.push((property.into(), order));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.table_alias = Some(alias.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{FieldOptions, TableBuilder, TableOptions};
    use crate::value::PropertyType;

    fn people() -> Table {
        TableBuilder::new("people", TableOptions::default())
            .id("id", FieldOptions::new("INTEGER"))
            .field("name", FieldOptions::new("TEXT"))
            .field("age", FieldOptions::new("INTEGER"))
            .field(
                "active",
                FieldOptions::new("INTEGER").property_type(PropertyType::Bool),
            )
            .field("order", FieldOptions::new("INTEGER").column("sort_order"))
            .build()
            .unwrap()
    }

    fn compile(cond: Condition) -> (String, Params) {
        let table = people();
        FilterCompiler::new(&table, None).compile(&cond).unwrap()
    }

    #[test]
    fn test_eq_leaf() {
        let (sql, params) = compile(Condition::eq("age", 5));
        assert_eq!(sql, "age = :age");
        assert_eq!(params.get("age"), Some(&SqlValue::Integer(5)));
    }

    #[test]
    fn test_like_leaf() {
        let (sql, params) = compile(Condition::is_like("name", "d%"));
        assert_eq!(sql, "name LIKE :name");
        assert_eq!(params.get(":name"), Some(&SqlValue::Text("d%".into())));
    }

    #[test]
    fn test_not_over_bool() {
        let (sql, params) = compile(Condition::not(Condition::eq("active", true)));
        assert_eq!(sql, "NOT (active = :active)");
        assert_eq!(params.get("active"), Some(&SqlValue::Integer(1)));

        let (sql, params) = compile(Condition::not(Condition::eq("active", false)));
        assert_eq!(sql, "NOT (active = :active)");
        assert_eq!(params.get("active"), Some(&SqlValue::Integer(0)));
    }

    #[test]
    fn test_repeated_property_gets_suffixed_names() {
        let (sql, params) = compile(Condition::or(vec![
            Condition::eq("age", 1),
            Condition::eq("age", 2),
            Condition::eq("age", 3),
        ]));
        assert_eq!(sql, "age = :age OR age = :age_1 OR age = :age_2");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_nested_junctions_parenthesized() {
        let (sql, _) = compile(Condition::and(vec![
            Condition::eq("name", "a"),
            Condition::or(vec![Condition::eq("age", 1), Condition::is_null("age")]),
            Condition::and(vec![Condition::gt("id", 0), Condition::lt("id", 9)]),
        ]));
        assert_eq!(
            sql,
            "name = :name AND (age = :age OR age IS NULL) AND id > :id AND id < :id_1"
        );
    }

    #[test]
    fn test_not_of_junction() {
        let (sql, _) = compile(Condition::not(Condition::or(vec![
            Condition::eq("age", 1),
            Condition::eq("age", 2),
        ])));
        assert_eq!(sql, "NOT (age = :age OR age = :age_1)");
    }

    #[test]
    fn test_empty_junctions() {
        assert_eq!(compile(Condition::and(vec![])).0, "1");
        assert_eq!(compile(Condition::or(vec![])).0, "0");
    }

    #[test]
    fn test_in_between_and_alias() {
        let table = people();
        let (sql, params) = FilterCompiler::new(&table, Some("T"))
            .compile(&Condition::and(vec![
                Condition::is_in("age", [1, 2]),
                Condition::property(
                    "id",
                    Comparison::IsNotBetween(JsonValue::from(3), JsonValue::from(4)),
                ),
            ]))
            .unwrap();
        assert_eq!(
            sql,
            "T.age IN (:age, :age_1) AND T.id NOT BETWEEN :id AND :id_1"
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_column_name_differs_from_property() {
        let (sql, _) = compile(Condition::eq("order", 1));
        assert_eq!(sql, "sort_order = :order");
    }

    #[test]
    fn test_unknown_property() {
        let table = people();
        let err = FilterCompiler::new(&table, None)
            .compile(&Condition::eq("missing", 1))
            .unwrap_err();
        assert!(matches!(err, MapError::UnknownProperty { .. }));
    }

    #[test]
    fn test_raw_sql_params_and_collisions() {
        let table = people();
        let mut params = Params::new();
        params.bind("age", SqlValue::Integer(1));
        let sql = FilterCompiler::new(&table, None)
            .compile_into(
                &Condition::and(vec![
                    Condition::eq("age", 2),
                    Condition::sql_with_params(
                        "length(name) > :len",
                        vec![("len".to_string(), JsonValue::from(3))],
                    ),
                ]),
                &mut params,
            )
            .unwrap();
        assert_eq!(sql, "age = :age_1 AND (length(name) > :len)");
        assert_eq!(params.get("len"), Some(&SqlValue::Integer(3)));

        let dup = FilterCompiler::new(&table, None).compile_into(
            &Condition::sql_with_params("x = :len", vec![("len".into(), JsonValue::from(1))]),
            &mut params,
        );
        assert!(dup.is_err());
    }
}
