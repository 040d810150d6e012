//! Declared column type parsing.
//!
//! A field's `dbtype` is the column definition text that follows the column
//! name in `CREATE TABLE`, e.g. `INTEGER NOT NULL DEFAULT 0`. The auto-upgrade
//! diff compares its affinity, nullability and default against the live
//! catalog, so the parsing here has to follow SQLite's own rules.

use std::fmt;

use serde::{Deserialize, Serialize};

/// SQLite column type affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TypeAffinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

impl TypeAffinity {
    /// Determines the affinity of a declared type name using SQLite's rules,
    /// evaluated in order:
    ///
    /// 1. contains `INT` → INTEGER
    /// 2. contains `CHAR`, `CLOB` or `TEXT` → TEXT
    /// 3. contains `BLOB`, or is empty → BLOB
    /// 4. contains `REAL`, `FLOA` or `DOUB` → REAL
    /// 5. otherwise NUMERIC
    ///
    /// ```
    /// use tablemap_core::TypeAffinity;
    ///
    /// assert_eq!(TypeAffinity::from_type_name("BIGINT"), TypeAffinity::Integer);
    /// assert_eq!(TypeAffinity::from_type_name("VARCHAR(20)"), TypeAffinity::Text);
    /// assert_eq!(TypeAffinity::from_type_name(""), TypeAffinity::Blob);
    /// assert_eq!(TypeAffinity::from_type_name("DOUBLE PRECISION"), TypeAffinity::Real);
    /// assert_eq!(TypeAffinity::from_type_name("DATETIME"), TypeAffinity::Numeric);
    /// ```
    pub fn from_type_name(type_name: &str) -> Self {
        let upper = type_name.to_ascii_uppercase();
        if upper.contains("INT") {
            Self::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Self::Text
        } else if upper.contains("BLOB") || upper.trim().is_empty() {
            Self::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Self::Real
        } else {
            Self::Numeric
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
            Self::Real => "REAL",
            Self::Numeric => "NUMERIC",
        }
    }
}

impl fmt::Display for TypeAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keywords that end the type name part of a column definition.
const CONSTRAINT_KEYWORDS: &[&str] = &[
    "CONSTRAINT",
    "PRIMARY",
    "NOT",
    "NULL",
    "UNIQUE",
    "CHECK",
    "DEFAULT",
    "COLLATE",
    "REFERENCES",
    "GENERATED",
    "AS",
];

/// Parsed form of a declared column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbTypeInfo {
    /// Type name as written, e.g. `VARCHAR(20)`.
    pub type_name: String,
    pub type_affinity: TypeAffinity,
    pub not_null: bool,
    /// Normalized `DEFAULT` expression, see [`normalize_default`].
    pub default_value: Option<String>,
}

impl DbTypeInfo {
    /// Parses a column definition such as `TEXT NOT NULL DEFAULT 'x'`.
    ///
    /// ```
    /// use tablemap_core::{DbTypeInfo, TypeAffinity};
    ///
    /// let info = DbTypeInfo::parse("INTEGER NOT NULL DEFAULT (0)");
    /// assert_eq!(info.type_name, "INTEGER");
    /// assert_eq!(info.type_affinity, TypeAffinity::Integer);
    /// assert!(info.not_null);
    /// assert_eq!(info.default_value.as_deref(), Some("0"));
    /// ```
    pub fn parse(dbtype: &str) -> Self {
        let tokens = tokenize(dbtype);

        let mut type_parts: Vec<&str> = Vec::new();
        let mut idx = 0;
        while idx < tokens.len() {
            let upper = tokens[idx].to_ascii_uppercase();
            if CONSTRAINT_KEYWORDS.contains(&upper.as_str()) {
                break;
            }
            type_parts.push(&tokens[idx]);
            idx += 1;
        }
        let type_name = join_type_name(&type_parts);

        let mut not_null = false;
        let mut default_value = None;
        while idx < tokens.len() {
            let upper = tokens[idx].to_ascii_uppercase();
            match upper.as_str() {
                "NOT" if tokens
                    .get(idx + 1)
                    .is_some_and(|t| t.eq_ignore_ascii_case("NULL")) =>
                {
                    not_null = true;
                    idx += 2;
                    continue;
                }
                "DEFAULT" => {
                    if let Some(expr) = tokens.get(idx + 1) {
                        default_value = Some(normalize_default(expr));
                        idx += 2;
                        continue;
                    }
                }
                _ => {}
            }
            idx += 1;
        }

        Self {
            type_affinity: TypeAffinity::from_type_name(&type_name),
            type_name,
            not_null,
            default_value,
        }
    }
}

/// Normalizes a default expression for comparison: trims whitespace and
/// strips balanced outer parentheses, so `(0)` and `0` compare equal.
pub fn normalize_default(expr: &str) -> String {
    let mut current = expr.trim();
    while current.starts_with('(') && current.ends_with(')') && encloses_all(current) {
        current = current[1..current.len() - 1].trim();
    }
    current.to_string()
}

/// Returns true if the opening parenthesis at index 0 closes at the last byte.
fn encloses_all(expr: &str) -> bool {
    let mut depth = 0usize;
    let mut in_quote = false;
    for (i, c) in expr.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == expr.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// Splits a column definition into words, keeping quoted strings and
/// parenthesized groups together.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for c in input.chars() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '(' => {
                // `VARCHAR (20)` belongs to the preceding word
                if depth == 0 && current.is_empty() && !tokens.is_empty() && is_type_word(&tokens) {
                    current = tokens.pop().unwrap_or_default();
                }
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn is_type_word(tokens: &[String]) -> bool {
    tokens.iter().all(|t| {
        !CONSTRAINT_KEYWORDS.contains(&t.to_ascii_uppercase().as_str())
    })
}

fn join_type_name(parts: &[&str]) -> String {
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affinity_rules_order() {
        // INT wins over CHAR ("CHARINT")
        assert_eq!(TypeAffinity::from_type_name("CHARINT"), TypeAffinity::Integer);
        assert_eq!(TypeAffinity::from_type_name("clob"), TypeAffinity::Text);
        assert_eq!(TypeAffinity::from_type_name("FLOAT"), TypeAffinity::Real);
        assert_eq!(TypeAffinity::from_type_name("BOOLEAN"), TypeAffinity::Numeric);
        assert_eq!(TypeAffinity::from_type_name("DECIMAL(10,2)"), TypeAffinity::Numeric);
    }

    #[test]
    fn test_parse_plain_type() {
        let info = DbTypeInfo::parse("TEXT");
        assert_eq!(info.type_name, "TEXT");
        assert!(!info.not_null);
        assert_eq!(info.default_value, None);
    }

    #[test]
    fn test_parse_empty_type_is_blob() {
        let info = DbTypeInfo::parse("");
        assert_eq!(info.type_name, "");
        assert_eq!(info.type_affinity, TypeAffinity::Blob);
    }

    #[test]
    fn test_parse_not_null_and_quoted_default() {
        let info = DbTypeInfo::parse("varchar(20) not null default 'a b'");
        assert_eq!(info.type_name, "varchar(20)");
        assert_eq!(info.type_affinity, TypeAffinity::Text);
        assert!(info.not_null);
        assert_eq!(info.default_value.as_deref(), Some("'a b'"));
    }

    #[test]
    fn test_parse_type_with_spaced_params() {
        let info = DbTypeInfo::parse("DECIMAL (10, 2) DEFAULT 1.5");
        assert_eq!(info.type_name, "DECIMAL(10, 2)");
        assert_eq!(info.default_value.as_deref(), Some("1.5"));
    }

    #[test]
    fn test_parse_expression_default() {
        let info = DbTypeInfo::parse("TEXT DEFAULT (datetime('now')) NOT NULL");
        assert!(info.not_null);
        assert_eq!(info.default_value.as_deref(), Some("datetime('now')"));
    }

    #[test]
    fn test_normalize_default_keeps_inner_parens() {
        assert_eq!(normalize_default("((1))"), "1");
        assert_eq!(normalize_default("(1) + (2)"), "(1) + (2)");
        assert_eq!(normalize_default(" -1 "), "-1");
    }
}
