//! Identifier validation and quoting.
//!
//! Table, column, index and schema names cannot be bound as statement
//! parameters, so every generated statement embeds them as text. Names are
//! validated first and quoted whenever they are not plain words.

use crate::error::{MapError, Result};

/// Maximum identifier length accepted for generated statements.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Keywords that must be quoted even though they look like plain words.
const RESERVED_WORDS: &[&str] = &[
    "ABORT", "ACTION", "ADD", "AFTER", "ALL", "ALTER", "AND", "AS", "ASC", "BEFORE", "BEGIN",
    "BETWEEN", "BY", "CASCADE", "CASE", "CAST", "CHECK", "COLLATE", "COLUMN", "COMMIT",
    "CONFLICT", "CONSTRAINT", "CREATE", "CROSS", "CURRENT", "DEFAULT", "DEFERRABLE", "DELETE",
    "DESC", "DISTINCT", "DROP", "EACH", "ELSE", "END", "ESCAPE", "EXCEPT", "EXISTS", "FILTER",
    "FOREIGN", "FROM", "FULL", "GLOB", "GROUP", "HAVING", "IF", "IN", "INDEX", "INNER",
    "INSERT", "INTERSECT", "INTO", "IS", "ISNULL", "JOIN", "KEY", "LEFT", "LIKE", "LIMIT",
    "MATCH", "NATURAL", "NO", "NOT", "NOTNULL", "NULL", "OF", "OFFSET", "ON", "OR", "ORDER",
    "OUTER", "PRIMARY", "REFERENCES", "REGEXP", "RENAME", "REPLACE", "RIGHT", "ROW", "ROWS",
    "SELECT", "SET", "TABLE", "TEMP", "THEN", "TO", "TRANSACTION", "TRIGGER", "UNION",
    "UNIQUE", "UPDATE", "USING", "VALUES", "VIEW", "WHEN", "WHERE", "WITH", "WITHOUT",
];

/// Validates an identifier for use in generated SQL.
///
/// # Errors
///
/// Returns [`MapError::InvalidIdentifier`] for empty names, names containing
/// NUL bytes, and names longer than 128 bytes.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MapError::InvalidIdentifier(
            "identifier cannot be empty".to_string(),
        ));
    }
    if name.contains('\0') {
        return Err(MapError::InvalidIdentifier(format!(
            "identifier contains a NUL byte: {name:?}"
        )));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MapError::InvalidIdentifier(format!(
            "identifier exceeds {MAX_IDENTIFIER_LENGTH} bytes: {name:?}"
        )));
    }
    Ok(())
}

fn is_plain_word(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED_WORDS.contains(&name.to_ascii_uppercase().as_str())
}

/// Quotes a single identifier part if it is not a plain word.
///
/// ```
/// use tablemap_core::quote_simple_identifier;
///
/// assert_eq!(quote_simple_identifier("users"), "users");
/// assert_eq!(quote_simple_identifier("order"), "\"order\"");
/// assert_eq!(quote_simple_identifier("my col"), "\"my col\"");
/// ```
pub fn quote_simple_identifier(name: &str) -> String {
    if is_plain_word(name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Splits `schema.name` into its optional schema and the object name.
///
/// Only the first dot separates; quoted names are not supported here.
pub fn split_schema_identifier(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((schema, rest)) if !schema.is_empty() => (Some(schema), rest),
        _ => (None, name),
    }
}

/// Quotes a possibly schema-qualified identifier.
///
/// ```
/// use tablemap_core::quote_identifier;
///
/// assert_eq!(quote_identifier("main.users"), "main.users");
/// assert_eq!(quote_identifier("temp.group"), "temp.\"group\"");
/// ```
pub fn quote_identifier(name: &str) -> String {
    match split_schema_identifier(name) {
        (Some(schema), table) => format!(
            "{}.{}",
            quote_simple_identifier(schema),
            quote_simple_identifier(table)
        ),
        (None, table) => quote_simple_identifier(table),
    }
}

/// Turns an arbitrary property name into a bindable parameter name.
pub(crate) fn sanitize_param_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, 'p');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("bad\0name").is_err());
        assert!(validate_identifier(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_quote_only_when_needed() {
        assert_eq!(quote_simple_identifier("content2"), "content2");
        assert_eq!(quote_simple_identifier("2col"), "\"2col\"");
        assert_eq!(quote_simple_identifier("select"), "\"select\"");
        assert_eq!(quote_simple_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_split_schema_identifier() {
        assert_eq!(split_schema_identifier("main.users"), (Some("main"), "users"));
        assert_eq!(split_schema_identifier("users"), (None, "users"));
        assert_eq!(split_schema_identifier(".users"), (None, ".users"));
    }

    #[test]
    fn test_sanitize_param_name() {
        assert_eq!(sanitize_param_name("age"), "age");
        assert_eq!(sanitize_param_name("first-name"), "first_name");
        assert_eq!(sanitize_param_name("1st"), "p1st");
    }
}
