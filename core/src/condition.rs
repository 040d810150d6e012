//! Typed filter conditions.
//!
//! A [`Condition`] is a closed tree of property comparisons combined with
//! `And`, `Or` and `Not`. Values are given in model form (the same JSON
//! shape the model serializes to) and are converted through the field's
//! mapping when the condition is compiled.
//!
//! Conditions can also be parsed from the plain-object JSON form:
//!
//! ```
//! use serde_json::json;
//! use tablemap_core::Condition;
//!
//! let cond = Condition::from_json(&json!({
//!     "age": 5,
//!     "name": {"isLike": "d%"},
//!     "not": {"active": true}
//! }))
//! .unwrap();
//! assert!(matches!(cond, Condition::And(ref parts) if parts.len() == 3));
//! ```

use serde_json::Value as JsonValue;

use crate::error::{MapError, Result};

/// Comparison operator of a leaf condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Eq(JsonValue),
    Ne(JsonValue),
    Lt(JsonValue),
    Lte(JsonValue),
    Gt(JsonValue),
    Gte(JsonValue),
    IsLike(JsonValue),
    IsNotLike(JsonValue),
    IsNull,
    IsNotNull,
    In(Vec<JsonValue>),
    NotIn(Vec<JsonValue>),
    IsBetween(JsonValue, JsonValue),
    IsNotBetween(JsonValue, JsonValue),
}

/// A filter condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `property <op> value`.
    Property { property: String, comparison: Comparison },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    /// Raw SQL fragment with its own named parameters (names without `:`).
    Sql {
        sql: String,
        params: Vec<(String, JsonValue)>,
    },
}

impl Condition {
    pub fn property(property: impl Into<String>, comparison: Comparison) -> Self {
        Self::Property {
            property: property.into(),
            comparison,
        }
    }

    pub fn eq(property: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::property(property, Comparison::Eq(value.into()))
    }

    pub fn ne(property: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::property(property, Comparison::Ne(value.into()))
    }

    pub fn lt(property: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::property(property, Comparison::Lt(value.into()))
    }

    pub fn lte(property: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::property(property, Comparison::Lte(value.into()))
    }

    pub fn gt(property: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::property(property, Comparison::Gt(value.into()))
    }

    pub fn gte(property: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::property(property, Comparison::Gte(value.into()))
    }

    pub fn is_like(property: impl Into<String>, pattern: impl Into<JsonValue>) -> Self {
        Self::property(property, Comparison::IsLike(pattern.into()))
    }

    pub fn is_null(property: impl Into<String>) -> Self {
        Self::property(property, Comparison::IsNull)
    }

    pub fn is_not_null(property: impl Into<String>) -> Self {
        Self::property(property, Comparison::IsNotNull)
    }

    pub fn is_in<I, V>(property: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<JsonValue>,
    {
        Self::property(
            property,
            Comparison::In(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn sql(sql: impl Into<String>) -> Self {
        Self::Sql {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn sql_with_params(sql: impl Into<String>, params: Vec<(String, JsonValue)>) -> Self {
        Self::Sql {
            sql: sql.into(),
            params,
        }
    }

    pub fn and(conditions: Vec<Condition>) -> Self {
        Self::And(conditions)
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Self::Or(conditions)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(condition: Condition) -> Self {
        Self::Not(Box::new(condition))
    }

    /// Parses the plain-object form.
    ///
    /// Each key of an object is one condition and sibling keys are AND-ed.
    /// `and`/`or` take an array, `not` takes an object, `sql` takes a string.
    /// Any other key is a property: a bare literal means `eq`, an object
    /// lists operators (`eq`, `neq`/`ne`, `lt`, `lte`, `gt`, `gte`,
    /// `isLike`, `isNotLike`, `isNull`, `isNotNull`, `isIn`/`in`,
    /// `isNotIn`/`notIn`, `isBetween`, `isNotBetween`).
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let JsonValue::Object(map) = value else {
            return Err(MapError::InvalidFilter(format!(
                "expected an object, got {value}"
            )));
        };
        let mut parts = Vec::with_capacity(map.len());
        for (key, value) in map {
            match key.as_str() {
                "and" | "or" => {
                    let JsonValue::Array(items) = value else {
                        return Err(MapError::InvalidFilter(format!("'{key}' expects an array")));
                    };
                    let children = items
                        .iter()
                        .map(Self::from_json)
                        .collect::<Result<Vec<_>>>()?;
                    parts.push(if key == "and" {
                        Self::And(children)
                    } else {
                        Self::Or(children)
                    });
                }
                "not" => parts.push(Self::not(Self::from_json(value)?)),
                "sql" => {
                    let JsonValue::String(sql) = value else {
                        return Err(MapError::InvalidFilter("'sql' expects a string".into()));
                    };
                    parts.push(Self::sql(sql.clone()));
                }
                property => parts.extend(parse_property(property, value)?),
            }
        }
        Ok(match parts.len() {
            1 => parts.remove(0),
            _ => Self::And(parts),
        })
    }
}

fn parse_property(property: &str, value: &JsonValue) -> Result<Vec<Condition>> {
    let JsonValue::Object(ops) = value else {
        return Ok(vec![Condition::eq(property, value.clone())]);
    };
    let invalid = |op: &str, what: &str| {
        MapError::InvalidFilter(format!("operator '{op}' on '{property}' expects {what}"))
    };
    let mut out = Vec::with_capacity(ops.len());
    for (op, arg) in ops {
        let comparison = match op.as_str() {
            "eq" => Comparison::Eq(arg.clone()),
            "neq" | "ne" => Comparison::Ne(arg.clone()),
            "lt" => Comparison::Lt(arg.clone()),
            "lte" => Comparison::Lte(arg.clone()),
            "gt" => Comparison::Gt(arg.clone()),
            "gte" => Comparison::Gte(arg.clone()),
            "isLike" => Comparison::IsLike(arg.clone()),
            "isNotLike" => Comparison::IsNotLike(arg.clone()),
            "isNull" | "isNotNull" => {
                let flag = arg.as_bool().ok_or_else(|| invalid(op, "a boolean"))?;
                if flag == (op == "isNull") {
                    Comparison::IsNull
                } else {
                    Comparison::IsNotNull
                }
            }
            "isIn" | "in" | "isNotIn" | "notIn" => {
                let items = arg
                    .as_array()
                    .ok_or_else(|| invalid(op, "an array"))?
                    .clone();
                if op == "isIn" || op == "in" {
                    Comparison::In(items)
                } else {
                    Comparison::NotIn(items)
                }
            }
            "isBetween" | "isNotBetween" => {
                let bounds = arg
                    .as_array()
                    .filter(|a| a.len() == 2)
                    .ok_or_else(|| invalid(op, "a two-element array"))?;
                let (lo, hi) = (bounds[0].clone(), bounds[1].clone());
                if op == "isBetween" {
                    Comparison::IsBetween(lo, hi)
                } else {
                    Comparison::IsNotBetween(lo, hi)
                }
            }
            other => {
                return Err(MapError::InvalidFilter(format!(
                    "unknown operator '{other}' on '{property}'"
                )));
            }
        };
        out.push(Condition::property(property, comparison));
    }
    Ok(out)
}
