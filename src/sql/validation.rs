use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{Error, Result};

static FORBIDDEN_FRAGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i);|--|\b(drop|delete|insert|update)\b")
        .expect("Forbidden fragment pattern must compile")
});

/// Whether `candidate` matches `^[A-Za-z_][A-Za-z0-9_]*$`.
pub fn validate_identifier(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {
            chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

/// Whether a raw WHERE fragment is free of statement separators, comments and mutating keywords.
pub fn validate_search_fragment(candidate: &str) -> bool {
    !FORBIDDEN_FRAGMENT.is_match(candidate)
}

/// Whether `candidate` has the textual shape of a surrogate row identifier (hyphenated UUID).
pub fn validate_row_id(candidate: &str) -> bool {
    candidate.len() == 36 && uuid::Uuid::parse_str(candidate).is_ok()
}

/// `validate_identifier` as a `Result`. `kind` names the identifier in the error, e.g. "table name".
pub fn ensure_identifier(kind: &str, candidate: &str) -> Result<()> {
    if validate_identifier(candidate) {
        Ok(())
    } else {
        Err(Error::Validation(format!("Invalid {} `{}`", kind, candidate)))
    }
}

pub fn ensure_search_fragment(candidate: &str) -> Result<()> {
    if validate_search_fragment(candidate) {
        Ok(())
    } else {
        Err(Error::Validation("Invalid search query".to_string()))
    }
}

pub fn ensure_row_id(candidate: &str) -> Result<()> {
    if validate_row_id(candidate) {
        Ok(())
    } else {
        Err(Error::Validation(format!("Invalid UUID format `{}`", candidate)))
    }
}
