//! Combat error taxonomy

use thiserror::Error;

/// Errors raised by combat-core operations
///
/// Conflicting writes from racing clients are not errors: a confirm whose
/// target is already gone resolves as `target_missing` instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CombatError {
    /// Referenced entity, action or zone is absent (usually dead or pruned)
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Operation not permitted in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Ability cannot be paid for (cooldown running or already spent)
    #[error("insufficient resource: {0}")]
    InsufficientResource(String),
}

impl CombatError {
    pub fn entity(id: &str) -> Self {
        CombatError::NotFound {
            kind: "entity",
            id: id.to_string(),
        }
    }

    pub fn action(id: &str) -> Self {
        CombatError::NotFound {
            kind: "action",
            id: id.to_string(),
        }
    }

    pub fn zone(id: &str) -> Self {
        CombatError::NotFound {
            kind: "zone",
            id: id.to_string(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        CombatError::InvalidState(msg.into())
    }
}

/// Result alias for combat operations
pub type CombatResult<T> = Result<T, CombatError>;
