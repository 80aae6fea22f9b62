//! SQL identifier validation for mapped table and column names.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)?$").ok())
        .as_ref()
}

/// Check that `name` is a plain (optionally schema-qualified) SQL identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_some_and(|re| re.is_match(name))
}

/// Validate a table or column name declared by the entity model.
pub fn validate_identifier(entity: &str, name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(Error::mapping(
            entity,
            format!("'{}' is not a valid SQL identifier", name),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_qualified_names() {
        assert!(is_valid_identifier("books"));
        assert!(is_valid_identifier("_tmp$1"));
        assert!(is_valid_identifier("library.books"));
    }

    #[test]
    fn rejects_injection_shapes() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1books"));
        assert!(!is_valid_identifier("books; DROP TABLE x"));
        assert!(!is_valid_identifier("a.b.c"));
        assert!(validate_identifier("Book", "bad name").is_err());
    }
}
