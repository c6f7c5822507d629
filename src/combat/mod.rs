//! Combat core
//!
//! Pure state machines for one encounter:
//! - Entity registry (presence is liveness)
//! - Cooldown and status ledger
//! - Protection links
//! - Area effect zones
//! - Turn order
//! - Pending action queue (propose/confirm)
//! - Ritual puzzle and recurring storm
//!
//! Nothing here does IO; the session layer wires these together.

mod actions;
mod entity;
mod error;
mod ledger;
mod protection;
mod ritual;
mod storm;
mod turn;
mod zones;

pub use actions::{
    ActionBody, ActionKind, CardTag, ConfirmReport, PendingAction, PendingActionQueue, Polarity,
    Proposal, Resolution,
};
pub use entity::{
    Category, DamageApplied, Entity, EntityRegistry, EntitySeed, Position, DEFAULT_ARMOR,
};
pub use error::{CombatError, CombatResult};
pub use ledger::{Cooldown, StatusEffect, StatusKind, StatusTick, TimerReport};
pub use protection::{ProtectionLink, ProtectionTable, Redirect};
pub use ritual::{
    draw_sequence, AttemptOutcome, RitualPhase, RitualPuzzle, REDUCTION_STEP, SEQUENCE_LEN,
    SLOT_COUNT,
};
pub use storm::{StormEffect, StormTick, STORM_TURNS};
pub use turn::{InitiativeEntry, Phase, TurnAdvance, TurnOrder};
pub use zones::{AreaEffectZone, ZoneKind, ZoneRegistry, ZoneRequest, ZoneShape, MAX_BURST_RADIUS};
