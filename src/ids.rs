//! Entity id validation
//!
//! Entity ids travel in URLs, JSON map keys and the action audit log, so
//! they are restricted to a conservative alphabet:
//! - 1-64 characters
//! - ASCII alphanumeric, hyphen and underscore
//! - Must start with an alphanumeric character
//!
//! Case is preserved ("P1" and "p1" are different tokens).

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Maximum entity id length
pub const MAX_ID_LEN: usize = 64;

/// Validation errors for entity ids
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("id must be 1-{MAX_ID_LEN} characters")]
    Length,

    #[error("id must be alphanumeric, '-' or '_', starting with an alphanumeric")]
    InvalidFormat,
}

static ENTITY_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap_or_else(|e| panic!("bad id regex: {e}"))
});

/// Validate an entity id, returning it trimmed.
///
/// # Examples
/// ```
/// use skirmishd::ids::validate_entity_id;
///
/// assert!(validate_entity_id("turret-2").is_ok());
/// assert!(validate_entity_id("P1").is_ok());
/// assert!(validate_entity_id("_hidden").is_err());
/// assert!(validate_entity_id("").is_err());
/// ```
pub fn validate_entity_id(id: &str) -> Result<String, IdError> {
    let trimmed = id.trim();

    if trimmed.is_empty() || trimmed.len() > MAX_ID_LEN {
        return Err(IdError::Length);
    }

    if !ENTITY_ID_REGEX.is_match(trimmed) {
        return Err(IdError::InvalidFormat);
    }

    Ok(trimmed.to_string())
}
