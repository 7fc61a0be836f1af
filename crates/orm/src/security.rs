//! Identifier safety for statement construction
//!
//! Table and column names reach a statement only as [`Identifier`] values.
//! An `Identifier` can be built solely through validation, so a raw runtime
//! string can never be spliced into SQL; caller-supplied values travel as
//! bound parameters instead.

use std::fmt;

use crate::error::{OrmError, OrmResult};

/// Characters allowed in SQL identifiers (alphanumeric, underscore, dollar)
const ALLOWED_IDENTIFIER_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_$";

/// PostgreSQL truncates identifiers longer than this
const MAX_IDENTIFIER_LEN: usize = 63;

/// SQL keywords that are never accepted as identifiers
static SQL_KEYWORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "FROM", "WHERE", "JOIN", "UNION", "DROP", "CREATE",
    "ALTER", "GRANT", "REVOKE", "TRUNCATE", "EXEC", "EXECUTE", "DECLARE", "CAST", "TABLE",
    "INTO", "VALUES", "AND", "OR", "NOT", "NULL",
];

/// A table or column name that passed validation
///
/// There is no public way to build one from an arbitrary string other than
/// [`Identifier::parse`], which rejects anything that is not a plain SQL name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Validate `raw` and wrap it
    pub fn parse(raw: &str) -> OrmResult<Self> {
        validate_identifier(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Quoted form for embedding into SQL text
    pub fn quoted(&self, quote: char) -> String {
        escape_identifier(&self.0, quote)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Escape a SQL identifier by doubling the quote character and wrapping it
///
/// # Examples
/// ```
/// use elif_orm_core::security::escape_identifier;
///
/// assert_eq!(escape_identifier("post_tag", '"'), "\"post_tag\"");
/// assert_eq!(escape_identifier("table\"name", '"'), "\"table\"\"name\"");
/// ```
pub fn escape_identifier(identifier: &str, quote: char) -> String {
    let doubled: String = [quote, quote].iter().collect();
    let escaped = identifier.replace(quote, &doubled);
    format!("{quote}{escaped}{quote}")
}

/// Validate that an identifier is safe for use in SQL
///
/// Failures are reported as [`OrmError::InjectionRisk`].
pub fn validate_identifier(identifier: &str) -> OrmResult<()> {
    let Some(first) = identifier.chars().next() else {
        return Err(OrmError::injection_risk(identifier, "identifier cannot be empty"));
    };

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(OrmError::injection_risk(
            identifier,
            format!("identifier is too long (max {} characters)", MAX_IDENTIFIER_LEN),
        ));
    }

    if let Some(c) = identifier.chars().find(|c| !ALLOWED_IDENTIFIER_CHARS.contains(*c)) {
        return Err(OrmError::injection_risk(
            identifier,
            format!("contains invalid character '{}'", c),
        ));
    }

    if first.is_ascii_digit() || first == '$' {
        return Err(OrmError::injection_risk(
            identifier,
            "identifier must start with a letter or underscore",
        ));
    }

    let upper_identifier = identifier.to_uppercase();
    if SQL_KEYWORDS.contains(&upper_identifier.as_str()) {
        return Err(OrmError::injection_risk(identifier, "reserved SQL keyword"));
    }

    Ok(())
}

/// Validate a bound parameter's size
///
/// Parameters are never interpolated, so content is not inspected; only
/// oversized payloads are refused.
pub fn validate_parameter(value: &str) -> OrmResult<()> {
    if value.len() > 65536 {
        return Err(OrmError::Database(
            "Parameter value too large (max 64KB)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_identifier() {
        assert_eq!(escape_identifier("user_table", '"'), "\"user_table\"");
        assert_eq!(escape_identifier("table\"name", '"'), "\"table\"\"name\"");
        assert_eq!(escape_identifier("simple", '`'), "`simple`");
        assert_eq!(escape_identifier("we`ird", '`'), "`we``ird`");
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("post_tag").is_ok());
        assert!(validate_identifier("table1").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier("users").is_ok());

        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1table").is_err());
        assert!(validate_identifier("$col").is_err());
        assert!(validate_identifier("table-name").is_err());
        assert!(validate_identifier("table name").is_err());
        assert!(validate_identifier("tag_id; DROP TABLE tag").is_err());
        assert!(validate_identifier("SELECT").is_err());
        assert!(validate_identifier("select").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_rejection_is_injection_risk() {
        match Identifier::parse("id) OR 1=1 --") {
            Err(OrmError::InjectionRisk { identifier, .. }) => {
                assert_eq!(identifier, "id) OR 1=1 --");
            }
            other => panic!("expected InjectionRisk, got {:?}", other),
        }
    }

    #[test]
    fn test_identifier_quoting() {
        let ident = Identifier::parse("tag_id").unwrap();
        assert_eq!(ident.as_str(), "tag_id");
        assert_eq!(ident.quoted('"'), "\"tag_id\"");
        assert_eq!(ident.to_string(), "tag_id");
    }

    #[test]
    fn test_validate_parameter() {
        assert!(validate_parameter("'; DROP TABLE users; --").is_ok());
        assert!(validate_parameter(&"x".repeat(70_000)).is_err());
    }
}
