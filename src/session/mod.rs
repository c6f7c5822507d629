//! Combat sessions
//!
//! A session is one encounter shared by a moderator, player clients and the
//! opposing-side controller. The manager owns every live session, applies
//! mutations one at a time, persists snapshots and broadcasts changes.

mod manager;
mod mutation;
mod state;

use thiserror::Error;

use crate::combat::CombatError;

pub use manager::{Applied, SessionEvent, SessionManager, SessionSettings};
pub use mutation::{Mutation, MutationContext, MutationOutcome};
pub use state::{
    CardOutcome, CombatEnd, ConfirmOutcome, InitiativeSlot, RitualResolution, Session,
    SessionSummary, StormOutcome, TurnStart, VanishedEntity, VANISH_ROUNDS,
};

/// Session-level errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Combat(#[from] CombatError),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;
