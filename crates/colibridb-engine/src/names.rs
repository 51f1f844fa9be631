//! Collection name validation.
//!
//! Names become file stems in the storage directory, so the grammar is
//! deliberately narrow: 1-64 characters of `[A-Za-z0-9_-]`, first character
//! a letter. Everything path-like (dots, separators, whitespace, shell
//! metacharacters) falls outside the whitelist.

use colibridb_common::{ColibriError, Result};

/// Validate a collection name.
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }

    let mut chars = name.chars();

    // First char must be a letter
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }

    // Rest must be alphanumeric, underscore, or dash
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Reject invalid collection names at the public boundary.
pub fn check_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(ColibriError::Validation(format!(
            "invalid collection name '{}': 1-64 chars of [A-Za-z0-9_-], starting with a letter",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_collection_names() {
        assert!(is_valid_name("users"));
        assert!(is_valid_name("Users2"));
        assert!(is_valid_name("audit-log"));
        assert!(is_valid_name("a"));
        assert!(is_valid_name(&("a".repeat(64))));
    }

    #[test]
    fn invalid_collection_names() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("1users"));
        assert!(!is_valid_name("_users"));
        assert!(!is_valid_name("-users"));
        assert!(!is_valid_name("users.backup"));
        assert!(!is_valid_name("users/2024"));
        assert!(!is_valid_name("users\\2024"));
        assert!(!is_valid_name("users 2024"));
        assert!(!is_valid_name("users<>"));
        assert!(!is_valid_name(&("a".repeat(65))));
    }
}
