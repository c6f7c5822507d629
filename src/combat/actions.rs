//! Pending action queue
//!
//! Two-phase resolution of attacks and abilities:
//! 1. propose: a client appends an unresolved action with `hit` precomputed
//! 2. confirm: a moderator supplies the damage amount (or dismisses it)
//!
//! The queue is append-only. An action is resolved exactly once; a second
//! confirm is rejected before anything is applied.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::entity::{DamageApplied, EntityRegistry, Position};
use super::error::{CombatError, CombatResult};
use super::protection::{ProtectionTable, Redirect};

/// Coarse action classification shown to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Attack,
    Ability,
}

/// Special-card follow-up executed after damage is confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardTag {
    /// Swap actor and target positions
    Switch,
    /// Take the target off the field for a few rounds
    Vanish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Buff,
    Debuff,
}

/// Kind-specific part of an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionBody {
    /// Weapon attack on one target
    Attack {
        target_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        card: Option<CardTag>,
    },
    /// Named ability, optionally aimed at one target
    Ability {
        ability: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        card: Option<CardTag>,
    },
    /// Ability hitting a list of targets; always a hit, needs only magnitude
    Area {
        ability: String,
        target_ids: Vec<String>,
    },
    /// Non-damaging buff/debuff notification
    Buff {
        ability: String,
        target_id: String,
        polarity: Polarity,
    },
    /// Pure notification with no target
    Notice { ability: String, message: String },
}

impl ActionBody {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionBody::Attack { .. } => ActionKind::Attack,
            _ => ActionKind::Ability,
        }
    }

    /// The single target, for single-target bodies
    pub fn single_target(&self) -> Option<&str> {
        match self {
            ActionBody::Attack { target_id, .. } | ActionBody::Buff { target_id, .. } => {
                Some(target_id)
            }
            ActionBody::Ability { target_id, .. } => target_id.as_deref(),
            _ => None,
        }
    }

    pub fn area_targets(&self) -> Option<&[String]> {
        match self {
            ActionBody::Area { target_ids, .. } => Some(target_ids),
            _ => None,
        }
    }

    pub fn card(&self) -> Option<CardTag> {
        match self {
            ActionBody::Attack { card, .. } | ActionBody::Ability { card, .. } => *card,
            _ => None,
        }
    }

    /// Whether confirming this body can deal damage
    pub fn is_damaging(&self) -> bool {
        match self {
            ActionBody::Attack { .. } | ActionBody::Area { .. } => true,
            ActionBody::Ability { target_id, .. } => target_id.is_some(),
            ActionBody::Buff { .. } | ActionBody::Notice { .. } => false,
        }
    }
}

/// How an action was resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    /// Damage applied to the listed entities
    Damaged {
        hits: Vec<DamageApplied>,
        /// Area targets already gone at confirm time
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        missing: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        redirected_to: Option<String>,
    },
    /// Closed without side effects
    Dismissed,
    /// Every target was gone before the confirm arrived; nothing applied
    TargetMissing { target_ids: Vec<String> },
}

/// A proposed action and its resolution envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: String,
    pub kind: ActionKind,
    pub actor_id: String,
    pub body: ActionBody,
    pub source: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roll: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub range: u32,
    pub resolved: bool,
    pub hit: bool,
    pub needs_damage_input: bool,
    pub damage_applied: bool,
    pub proposed_round: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl PendingAction {
    /// Ids of every entity this action touches
    pub fn target_ids(&self) -> Vec<&str> {
        match (&self.body.single_target(), self.body.area_targets()) {
            (Some(id), _) => vec![*id],
            (None, Some(ids)) => ids.iter().map(String::as_str).collect(),
            (None, None) => Vec::new(),
        }
    }
}

/// A client's proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub actor_id: String,
    pub body: ActionBody,
    /// Attack roll total (already computed client-side)
    #[serde(default)]
    pub roll: Option<i32>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub range: u32,
    /// Client's own hit verdict; computed from roll vs armor when absent
    #[serde(default)]
    pub hit: Option<bool>,
    /// Defaults to the actor's current position
    #[serde(default)]
    pub source: Option<Position>,
}

/// Result of a successful confirm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmReport {
    pub action_id: String,
    pub resolution: Resolution,
}

impl ConfirmReport {
    /// Entities deleted by this confirm
    pub fn removed(&self) -> Vec<String> {
        match &self.resolution {
            Resolution::Damaged { hits, .. } => hits
                .iter()
                .filter(|h| h.removed)
                .map(|h| h.entity_id.clone())
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingActionQueue {
    actions: Vec<PendingAction>,
}

impl PendingActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase 1: append an unresolved action
    pub fn propose(
        &mut self,
        proposal: Proposal,
        entities: &EntityRegistry,
        round: u32,
    ) -> CombatResult<&PendingAction> {
        let actor = entities.require(&proposal.actor_id)?;

        let (hit, needs_damage_input) = match &proposal.body {
            ActionBody::Attack { target_id, .. } => {
                let target = entities.require(target_id)?;
                let hit = match (proposal.hit, proposal.roll) {
                    (Some(hit), _) => hit,
                    (None, Some(roll)) => roll >= target.armor as i32,
                    (None, None) => {
                        return Err(CombatError::invalid(
                            "attack needs a roll or an explicit hit flag",
                        ))
                    }
                };
                (hit, hit)
            }
            ActionBody::Ability {
                target_id: Some(target_id),
                ..
            } => {
                let target = entities.require(target_id)?;
                let hit = proposal
                    .hit
                    .or(proposal.roll.map(|roll| roll >= target.armor as i32))
                    .unwrap_or(true);
                (hit, hit)
            }
            ActionBody::Ability { target_id: None, .. } => (true, false),
            ActionBody::Area { target_ids, .. } => {
                if target_ids.is_empty() {
                    return Err(CombatError::invalid("area action has no targets"));
                }
                for id in target_ids {
                    entities.require(id)?;
                }
                (true, true)
            }
            ActionBody::Buff { target_id, .. } => {
                entities.require(target_id)?;
                (true, false)
            }
            ActionBody::Notice { .. } => (false, false),
        };

        let action = PendingAction {
            id: uuid::Uuid::new_v4().to_string(),
            kind: proposal.body.kind(),
            actor_id: actor.id.clone(),
            source: proposal.source.unwrap_or(actor.position),
            body: proposal.body,
            roll: proposal.roll,
            label: proposal.label,
            range: proposal.range,
            resolved: false,
            hit,
            needs_damage_input,
            damage_applied: false,
            proposed_round: round,
            resolution: None,
        };

        debug!(
            "Proposed {:?} {} by {} (hit={})",
            action.kind, action.id, action.actor_id, action.hit
        );

        self.actions.push(action);
        let index = self.actions.len() - 1;
        Ok(&self.actions[index])
    }

    /// Append a system-generated notice (ritual canceled, ...)
    pub fn notify(&mut self, actor_id: &str, ability: &str, message: &str, round: u32) -> &PendingAction {
        self.actions.push(PendingAction {
            id: uuid::Uuid::new_v4().to_string(),
            kind: ActionKind::Ability,
            actor_id: actor_id.to_string(),
            body: ActionBody::Notice {
                ability: ability.to_string(),
                message: message.to_string(),
            },
            source: Position::default(),
            roll: None,
            label: None,
            range: 0,
            resolved: false,
            hit: false,
            needs_damage_input: false,
            damage_applied: false,
            proposed_round: round,
            resolution: None,
        });
        let index = self.actions.len() - 1;
        &self.actions[index]
    }

    /// Record an area action and resolve it in one step (ritual payload, storm tick)
    #[allow(clippy::too_many_arguments)]
    pub fn record_area(
        &mut self,
        actor_id: &str,
        ability: &str,
        target_ids: Vec<String>,
        amount: u32,
        source: Position,
        round: u32,
        entities: &mut EntityRegistry,
    ) -> CombatResult<ConfirmReport> {
        let id = uuid::Uuid::new_v4().to_string();
        self.actions.push(PendingAction {
            id: id.clone(),
            kind: ActionKind::Ability,
            actor_id: actor_id.to_string(),
            body: ActionBody::Area {
                ability: ability.to_string(),
                target_ids,
            },
            source,
            roll: None,
            label: None,
            range: 0,
            resolved: false,
            hit: true,
            needs_damage_input: true,
            damage_applied: false,
            proposed_round: round,
            resolution: None,
        });
        self.apply_area_damage(&id, amount, entities)
    }

    pub fn get(&self, action_id: &str) -> Option<&PendingAction> {
        self.actions.iter().find(|a| a.id == action_id)
    }

    pub fn require(&self, action_id: &str) -> CombatResult<&PendingAction> {
        self.get(action_id)
            .ok_or_else(|| CombatError::action(action_id))
    }

    /// Locate an action that may still be resolved
    fn open_index(&self, action_id: &str) -> CombatResult<usize> {
        let index = self
            .actions
            .iter()
            .position(|a| a.id == action_id)
            .ok_or_else(|| CombatError::action(action_id))?;

        if self.actions[index].resolved {
            return Err(CombatError::invalid(format!(
                "action {} is already resolved",
                action_id
            )));
        }
        Ok(index)
    }

    fn close(&mut self, index: usize, resolution: Resolution) -> ConfirmReport {
        let action = &mut self.actions[index];
        action.damage_applied = matches!(resolution, Resolution::Damaged { .. });
        action.resolved = true;
        action.resolution = Some(resolution.clone());
        ConfirmReport {
            action_id: action.id.clone(),
            resolution,
        }
    }

    /// Phase 2 for single-target actions
    pub fn apply_single_target_damage(
        &mut self,
        action_id: &str,
        amount: u32,
        entities: &mut EntityRegistry,
        links: &mut ProtectionTable,
    ) -> CombatResult<ConfirmReport> {
        let index = self.open_index(action_id)?;
        if !self.actions[index].needs_damage_input {
            return Err(CombatError::invalid(format!(
                "action {} missed; dismiss it instead",
                action_id
            )));
        }
        let body = &self.actions[index].body;
        let target = match body {
            ActionBody::Attack { target_id, .. }
            | ActionBody::Ability {
                target_id: Some(target_id),
                ..
            } => target_id.clone(),
            _ => {
                return Err(CombatError::invalid(format!(
                    "action {} has no damageable single target",
                    action_id
                )))
            }
        };

        let (victim, redirected_to) = match links.redirect(&target, entities) {
            Redirect::To { protector_id, .. } => (protector_id.clone(), Some(protector_id)),
            Redirect::None => (target.clone(), None),
        };

        if !entities.contains(&victim) {
            debug!(
                "Confirm for {} found target {} already gone",
                action_id, victim
            );
            return Ok(self.close(
                index,
                Resolution::TargetMissing {
                    target_ids: vec![target],
                },
            ));
        }

        let hit = entities.apply_damage(&victim, amount)?;
        Ok(self.close(
            index,
            Resolution::Damaged {
                hits: vec![hit],
                missing: Vec::new(),
                redirected_to,
            },
        ))
    }

    /// Phase 2 for area actions: the same amount to every listed target
    pub fn apply_area_damage(
        &mut self,
        action_id: &str,
        amount: u32,
        entities: &mut EntityRegistry,
    ) -> CombatResult<ConfirmReport> {
        let index = self.open_index(action_id)?;
        let Some(targets) = self.actions[index].body.area_targets() else {
            return Err(CombatError::invalid(format!(
                "action {} is not an area action",
                action_id
            )));
        };
        let targets = targets.to_vec();

        let mut hits = Vec::new();
        let mut missing = Vec::new();
        for id in targets {
            if entities.contains(&id) {
                hits.push(entities.apply_damage(&id, amount)?);
            } else {
                missing.push(id);
            }
        }

        let resolution = if hits.is_empty() {
            Resolution::TargetMissing {
                target_ids: missing,
            }
        } else {
            Resolution::Damaged {
                hits,
                missing,
                redirected_to: None,
            }
        };
        Ok(self.close(index, resolution))
    }

    /// Phase 2 dispatch by body shape
    pub fn confirm(
        &mut self,
        action_id: &str,
        amount: u32,
        entities: &mut EntityRegistry,
        links: &mut ProtectionTable,
    ) -> CombatResult<ConfirmReport> {
        let body = &self.require(action_id)?.body;
        let (is_area, is_damaging) = (body.area_targets().is_some(), body.is_damaging());

        match (is_area, is_damaging) {
            (true, _) => self.apply_area_damage(action_id, amount, entities),
            (false, true) => self.apply_single_target_damage(action_id, amount, entities, links),
            (false, false) => Err(CombatError::invalid(format!(
                "action {} carries no damage; dismiss it instead",
                action_id
            ))),
        }
    }

    /// Close an action without side effects
    pub fn dismiss(&mut self, action_id: &str) -> CombatResult<ConfirmReport> {
        let index = self.open_index(action_id)?;
        Ok(self.close(index, Resolution::Dismissed))
    }

    /// Unresolved actions in proposal order
    pub fn open(&self) -> impl Iterator<Item = &PendingAction> {
        self.actions.iter().filter(|a| !a.resolved)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingAction> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Drop the whole log (combat end)
    pub fn clear(&mut self) -> usize {
        let count = self.actions.len();
        self.actions.clear();
        count
    }
}
