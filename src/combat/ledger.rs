//! Status & cooldown ledger
//!
//! Per-entity timed effects, stamped with the round they were applied in:
//! - Cooldowns block an ability for N of the owner's turns
//! - Status effects (burn, freeze, blind, ...) with optional damage per turn
//!
//! Both are decremented only at the start of the owning entity's own turn,
//! and never during the round they were applied in.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::entity::Entity;
use super::error::{CombatError, CombatResult};

/// Status effect keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// Fire damage each turn
    Burn,
    /// Cannot move or act
    Freeze,
    /// Reduced accuracy
    Blind,
    /// Poison damage each turn
    Poison,
    /// Cannot act
    Stun,
    /// Reduced movement
    Slow,
    /// Reduced damage dealt
    Weaken,
    /// Increased damage dealt
    Empower,
    /// Reduced damage taken
    Shield,
}

impl FromStr for StatusKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "burn" | "burning" => Ok(StatusKind::Burn),
            "freeze" | "frozen" => Ok(StatusKind::Freeze),
            "blind" | "blinded" => Ok(StatusKind::Blind),
            "poison" | "poisoned" => Ok(StatusKind::Poison),
            "stun" | "stunned" => Ok(StatusKind::Stun),
            "slow" | "slowed" => Ok(StatusKind::Slow),
            "weaken" | "weakened" => Ok(StatusKind::Weaken),
            "empower" | "empowered" => Ok(StatusKind::Empower),
            "shield" | "shielded" => Ok(StatusKind::Shield),
            _ => Err(()),
        }
    }
}

impl StatusKind {
    /// Whether this effect prevents the entity from acting
    pub fn prevents_action(&self) -> bool {
        matches!(self, StatusKind::Freeze | StatusKind::Stun)
    }

    /// Whether this effect is negative (a debuff)
    pub fn is_debuff(&self) -> bool {
        !matches!(self, StatusKind::Empower | StatusKind::Shield)
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StatusKind::Burn => "burn",
            StatusKind::Freeze => "freeze",
            StatusKind::Blind => "blind",
            StatusKind::Poison => "poison",
            StatusKind::Stun => "stun",
            StatusKind::Slow => "slow",
            StatusKind::Weaken => "weaken",
            StatusKind::Empower => "empower",
            StatusKind::Shield => "shield",
        };
        write!(f, "{}", s)
    }
}

/// Per-ability reuse timer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cooldown {
    pub ability_id: String,
    pub name: String,
    pub turns_remaining: u32,
    /// Round the cooldown was applied in (grace round)
    pub applied_round: u32,
    /// Original duration in turns
    pub duration: u32,
}

impl Cooldown {
    pub fn new(ability_id: &str, name: &str, duration: u32, round: u32) -> Self {
        Self {
            ability_id: ability_id.to_string(),
            name: name.to_string(),
            turns_remaining: duration,
            applied_round: round,
            duration,
        }
    }

    /// Decrement unless still in its grace round. Returns true if decremented.
    pub fn tick(&mut self, current_round: u32) -> bool {
        if self.applied_round == current_round || self.turns_remaining == 0 {
            return false;
        }
        self.turns_remaining -= 1;
        true
    }

    pub fn is_expired(&self) -> bool {
        self.turns_remaining == 0
    }
}

/// A timed condition on an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEffect {
    pub kind: StatusKind,
    /// Damage the external tick collaborator applies each turn
    #[serde(default)]
    pub damage_per_turn: u32,
    pub turns_remaining: u32,
    pub applied_round: u32,
    /// Who applied it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

impl StatusEffect {
    pub fn new(kind: StatusKind, turns: u32, round: u32) -> Self {
        Self {
            kind,
            damage_per_turn: 0,
            turns_remaining: turns,
            applied_round: round,
            source_id: None,
        }
    }

    /// Create a damage-over-time effect
    pub fn dot(kind: StatusKind, turns: u32, damage_per_turn: u32, round: u32) -> Self {
        Self {
            damage_per_turn,
            ..Self::new(kind, turns, round)
        }
    }

    pub fn with_source(mut self, source_id: &str) -> Self {
        self.source_id = Some(source_id.to_string());
        self
    }

    /// Same grace-round contract as [`Cooldown::tick`]
    pub fn tick(&mut self, current_round: u32) -> bool {
        if self.applied_round == current_round || self.turns_remaining == 0 {
            return false;
        }
        self.turns_remaining -= 1;
        true
    }

    pub fn is_expired(&self) -> bool {
        self.turns_remaining == 0
    }
}

/// Damage owed by a status effect this turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTick {
    pub kind: StatusKind,
    pub damage: u32,
}

/// What happened when an entity's timers were decremented
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerReport {
    pub entity_id: String,
    /// Cooldowns that ran out and were removed
    pub expired_cooldowns: Vec<String>,
    /// Status effects that ran out and were removed
    pub expired_statuses: Vec<StatusKind>,
    /// Per-turn damage owed, for the damage-tick collaborator
    pub status_ticks: Vec<StatusTick>,
}

impl Entity {
    /// Put an ability on cooldown, stamped with the current round
    pub fn apply_cooldown(
        &mut self,
        ability_id: &str,
        name: &str,
        duration: u32,
        round: u32,
    ) -> CombatResult<&Cooldown> {
        if duration == 0 {
            return Err(CombatError::invalid(format!(
                "cooldown for {} needs a positive duration",
                ability_id
            )));
        }
        let cooldown = Cooldown::new(ability_id, name, duration, round);
        self.cooldowns.insert(ability_id.to_string(), cooldown);
        Ok(&self.cooldowns[ability_id])
    }

    /// Whether an ability is off cooldown
    pub fn is_ready(&self, ability_id: &str) -> bool {
        self.cooldowns
            .get(ability_id)
            .is_none_or(|c| c.is_expired())
    }

    /// Fail with InsufficientResource if the ability is cooling down
    pub fn ensure_ready(&self, ability_id: &str) -> CombatResult<()> {
        match self.cooldowns.get(ability_id) {
            Some(c) if !c.is_expired() => Err(CombatError::InsufficientResource(format!(
                "{} is on cooldown for {} more turn(s)",
                c.name, c.turns_remaining
            ))),
            _ => Ok(()),
        }
    }

    /// Attach a status effect; reapplying refreshes to the longer duration
    pub fn apply_status(&mut self, effect: StatusEffect) -> &StatusEffect {
        let kind = effect.kind;
        self.statuses
            .entry(kind)
            .and_modify(|existing| {
                existing.turns_remaining = existing.turns_remaining.max(effect.turns_remaining);
                existing.damage_per_turn = existing.damage_per_turn.max(effect.damage_per_turn);
                existing.applied_round = effect.applied_round;
            })
            .or_insert(effect)
    }

    pub fn has_status(&self, kind: StatusKind) -> bool {
        self.statuses.get(&kind).is_some_and(|s| !s.is_expired())
    }

    /// Whether the entity can act (not frozen or stunned)
    pub fn can_act(&self) -> bool {
        !self
            .statuses
            .values()
            .any(|s| s.kind.prevents_action() && !s.is_expired())
    }

    /// Turn-start decrement of every cooldown and status effect
    pub fn decrement_timers(&mut self, current_round: u32) -> TimerReport {
        let mut report = TimerReport {
            entity_id: self.id.clone(),
            ..TimerReport::default()
        };

        for cooldown in self.cooldowns.values_mut() {
            cooldown.tick(current_round);
        }
        self.cooldowns.retain(|id, c| {
            if c.is_expired() {
                report.expired_cooldowns.push(id.clone());
                false
            } else {
                true
            }
        });

        for status in self.statuses.values_mut() {
            // Damage is owed only on turns where the effect actually counts down
            if status.tick(current_round) && status.damage_per_turn > 0 {
                report.status_ticks.push(StatusTick {
                    kind: status.kind,
                    damage: status.damage_per_turn,
                });
            }
        }
        self.statuses.retain(|kind, s| {
            if s.is_expired() {
                report.expired_statuses.push(*kind);
                false
            } else {
                true
            }
        });

        report
    }

    /// Drop every cooldown (combat end)
    pub fn clear_cooldowns(&mut self) {
        self.cooldowns.clear();
    }
}
