//! Session aggregate
//!
//! One encounter: the entity registry plus every registry and sub-machine
//! that hangs off it. Operations here are field-scoped and synchronous;
//! the manager serializes calls and handles persistence.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::combat::{
    AreaEffectZone, AttemptOutcome, CardTag, CombatError, CombatResult, ConfirmReport, Cooldown,
    Entity, EntityRegistry, EntitySeed, InitiativeEntry, PendingAction, PendingActionQueue, Phase,
    Proposal, ProtectionLink, ProtectionTable, Redirect, Resolution, RitualPuzzle, StatusEffect,
    StatusKind, StormEffect, StormTick, TimerReport, TurnAdvance, TurnOrder, ZoneRegistry,
    ZoneRequest, SEQUENCE_LEN, SLOT_COUNT, STORM_TURNS,
};

/// Rounds a vanished entity spends off the field
pub const VANISH_ROUNDS: u32 = 2;

/// One requested initiative position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeSlot {
    pub entity_id: String,
    pub initiative: i32,
}

/// An entity taken off the field by a vanish card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VanishedEntity {
    pub entity: Entity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<InitiativeEntry>,
    /// Former initiative index
    pub index: usize,
    pub return_round: u32,
}

/// Everything that happened at the start of a turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnStart {
    pub actor_id: String,
    pub round: u32,
    pub wrapped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timers: Option<TimerReport>,
    pub expired_protection: Vec<ProtectionLink>,
    pub pruned_zones: Vec<String>,
    pub returned: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storm: Option<StormOutcome>,
    /// Entities killed during the turn start (storm)
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "storm", rename_all = "snake_case")]
pub enum StormOutcome {
    /// No active storm, or it already fired this round
    Idle,
    Ticked {
        tick: StormTick,
        report: ConfirmReport,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ritual", rename_all = "snake_case")]
pub enum RitualResolution {
    /// No ritual to resolve
    Idle,
    NotDue { trigger_round: u32 },
    /// Perfect run; a notice was appended instead of damage
    Canceled { action_id: String },
    Landed {
        damage: u32,
        damage_reduction: u32,
        report: ConfirmReport,
    },
}

/// Result of the post-damage card step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "card", rename_all = "snake_case")]
pub enum CardOutcome {
    Switched { actor_id: String, target_id: String },
    Vanished { entity_id: String, return_round: u32 },
    Failed { tag: CardTag, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOutcome {
    pub action_id: String,
    pub resolution: Resolution,
    pub removed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<CardOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatEnd {
    pub round: u32,
    pub cleared_actions: usize,
    /// Vanished entities put back on the field
    pub restored: Vec<String>,
}

/// Listing view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub name: String,
    pub revision: u64,
    pub phase: Phase,
    pub round: u32,
    pub entities: usize,
    pub open_actions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    /// Bumped by every committed mutation
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub entities: EntityRegistry,
    pub turn: TurnOrder,
    pub actions: PendingActionQueue,
    pub protection: ProtectionTable,
    pub zones: ZoneRegistry,
    #[serde(default)]
    pub ritual: Option<RitualPuzzle>,
    #[serde(default)]
    pub storm: Option<StormEffect>,
    #[serde(default)]
    pub vanished: Vec<VanishedEntity>,
    /// Entity id -> one-battle abilities already spent
    #[serde(default)]
    pub battle_locks: BTreeMap<String, BTreeSet<String>>,
}

impl Session {
    /// Create a session in setup with the given roster
    pub fn new(name: &str, seeds: Vec<EntitySeed>, now: DateTime<Utc>) -> CombatResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CombatError::invalid("session name cannot be empty"));
        }

        let mut entities = EntityRegistry::new();
        for seed in seeds {
            entities.insert(seed.into_entity()?)?;
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            revision: 0,
            created_at: now,
            updated_at: now,
            entities,
            turn: TurnOrder::new(),
            actions: PendingActionQueue::new(),
            protection: ProtectionTable::new(),
            zones: ZoneRegistry::new(),
            ritual: None,
            storm: None,
            vanished: Vec::new(),
            battle_locks: BTreeMap::new(),
        })
    }

    pub fn round(&self) -> u32 {
        self.turn.round()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            revision: self.revision,
            phase: self.turn.phase(),
            round: self.round(),
            entities: self.entities.len(),
            open_actions: self.actions.open().count(),
        }
    }

    /// Add an entity mid-session; during combat it joins the end of the order
    pub fn spawn_entity(&mut self, seed: EntitySeed, initiative: Option<i32>) -> CombatResult<Entity> {
        let entity = seed.into_entity()?;
        if self.vanished.iter().any(|v| v.entity.id == entity.id) {
            return Err(CombatError::invalid(format!(
                "entity {} is vanished and will return",
                entity.id
            )));
        }
        self.entities.insert(entity.clone())?;

        if self.turn.phase() == Phase::Active {
            self.turn.append(InitiativeEntry {
                entity_id: entity.id.clone(),
                name: entity.name.clone(),
                initiative: initiative.unwrap_or(0),
                category: entity.category,
                profile_id: entity.profile_id.clone(),
                has_acted: false,
            });
        }

        info!("Spawned {} ({}) in session {}", entity.name, entity.id, self.id);
        Ok(entity)
    }

    /// Returns (healed, new hp)
    pub fn heal(&mut self, entity_id: &str, amount: u32) -> CombatResult<(u32, u32)> {
        let healed = self.entities.heal(entity_id, amount)?;
        Ok((healed, self.entities.require(entity_id)?.hp))
    }

    pub fn start_combat(&mut self, order: Vec<InitiativeSlot>) -> CombatResult<TurnStart> {
        if self.turn.phase() != Phase::Setup {
            return Err(CombatError::invalid(format!(
                "cannot start combat in phase {:?}",
                self.turn.phase()
            )));
        }

        let mut seen = BTreeSet::new();
        let entries = order
            .iter()
            .map(|slot| {
                let entity = self.entities.require(&slot.entity_id)?;
                if !seen.insert(slot.entity_id.as_str()) {
                    return Err(CombatError::invalid(format!(
                        "{} appears twice in the initiative order",
                        slot.entity_id
                    )));
                }
                Ok(InitiativeEntry {
                    entity_id: entity.id.clone(),
                    name: entity.name.clone(),
                    initiative: slot.initiative,
                    category: entity.category,
                    profile_id: entity.profile_id.clone(),
                    has_acted: false,
                })
            })
            .collect::<CombatResult<Vec<_>>>()?;

        self.turn.start(entries)?;
        let first = self
            .turn
            .current()
            .map(|e| e.entity_id.clone())
            .ok_or_else(|| CombatError::invalid("initiative order is empty"))?;

        info!("Combat started in session {} ({} combatants)", self.id, order.len());
        let round = self.round();
        Ok(self.begin_turn(TurnAdvance {
            previous: None,
            current: first,
            round,
            wrapped: false,
        }))
    }

    /// Advance the turn, then run zone pruning, vanish returns and the new
    /// actor's turn-start hooks
    pub fn advance_turn(&mut self) -> CombatResult<TurnStart> {
        let step = self.turn.advance()?;
        debug!(
            "Session {} round {}: {} -> {}",
            self.id,
            step.round,
            step.previous.as_deref().unwrap_or("-"),
            step.current
        );
        Ok(self.begin_turn(step))
    }

    fn begin_turn(&mut self, step: TurnAdvance) -> TurnStart {
        let round = step.round;
        let actor = step.current;

        let pruned_zones = self.zones.prune(round).into_iter().map(|z| z.id).collect();
        let returned = self.return_vanished(round);

        let timers = self
            .entities
            .get_mut(&actor)
            .map(|entity| entity.decrement_timers(round));
        let expired_protection = self.protection.expire_for_protector(&actor);

        let storm_due = self
            .storm
            .as_ref()
            .is_some_and(|s| s.active && s.caster_id == actor);
        let storm = storm_due.then(|| self.fire_storm(round));
        let removed = match &storm {
            Some(StormOutcome::Ticked { report, .. }) => report.removed(),
            _ => Vec::new(),
        };

        TurnStart {
            actor_id: actor,
            round,
            wrapped: step.wrapped,
            previous: step.previous,
            timers,
            expired_protection,
            pruned_zones,
            returned,
            storm,
            removed,
        }
    }

    /// Close combat and clear per-battle state. Zones are kept.
    pub fn end_combat(&mut self) -> CombatResult<CombatEnd> {
        self.turn.end()?;

        let cleared_actions = self.actions.clear();
        for entity in self.entities.iter_mut() {
            entity.clear_cooldowns();
        }
        self.protection.clear();
        self.battle_locks.clear();
        if let Some(storm) = self.storm.as_mut() {
            storm.deactivate();
        }
        self.ritual = None;

        let mut restored = Vec::new();
        for vanished in std::mem::take(&mut self.vanished) {
            let id = vanished.entity.id.clone();
            match self.entities.insert(vanished.entity) {
                Ok(()) => restored.push(id),
                Err(e) => warn!("Vanished entity {} could not be restored: {}", id, e),
            }
        }

        info!(
            "Combat ended in session {} at round {}",
            self.id,
            self.round()
        );
        Ok(CombatEnd {
            round: self.round(),
            cleared_actions,
            restored,
        })
    }

    pub fn propose_action(&mut self, proposal: Proposal) -> CombatResult<PendingAction> {
        if self.turn.phase() != Phase::Active {
            return Err(CombatError::invalid("actions can only be proposed during combat"));
        }
        let round = self.round();
        self.actions
            .propose(proposal, &self.entities, round)
            .cloned()
    }

    /// Phase 2: apply damage, clean up the dead, then run any card follow-up
    pub fn confirm_action(&mut self, action_id: &str, amount: u32) -> CombatResult<ConfirmOutcome> {
        let report = self
            .actions
            .confirm(action_id, amount, &mut self.entities, &mut self.protection)?;

        let removed = report.removed();
        self.settle_deaths(&removed);
        let card = self.apply_card(action_id, &report);

        Ok(ConfirmOutcome {
            action_id: report.action_id,
            resolution: report.resolution,
            removed,
            card,
        })
    }

    pub fn dismiss_action(&mut self, action_id: &str) -> CombatResult<ConfirmReport> {
        self.actions.dismiss(action_id)
    }

    /// Runs after damage is committed; failures are reported, never rolled back.
    /// The card acts on the declared target even when a protector took the damage.
    fn apply_card(&mut self, action_id: &str, report: &ConfirmReport) -> Option<CardOutcome> {
        let action = self.actions.get(action_id)?;
        let tag = action.body.card()?;
        let actor_id = action.actor_id.clone();
        let target_id = action.body.single_target()?.to_string();

        if !matches!(report.resolution, Resolution::Damaged { .. }) {
            return None;
        }

        let result = match tag {
            CardTag::Switch => self
                .entities
                .swap_positions(&actor_id, &target_id)
                .map(|()| CardOutcome::Switched {
                    actor_id: actor_id.clone(),
                    target_id: target_id.clone(),
                }),
            CardTag::Vanish => {
                let return_round = self.round() + VANISH_ROUNDS;
                self.vanish(&target_id, return_round)
                    .map(|()| CardOutcome::Vanished {
                        entity_id: target_id.clone(),
                        return_round,
                    })
            }
        };

        match result {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Card {:?} on action {} failed: {}", tag, action_id, e);
                Some(CardOutcome::Failed {
                    tag,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Take an entity off the field until `return_round`
    pub fn vanish(&mut self, entity_id: &str, return_round: u32) -> CombatResult<()> {
        let entity = self
            .entities
            .remove(entity_id)
            .ok_or_else(|| CombatError::entity(entity_id))?;
        let (index, entry) = match self.turn.remove(entity_id) {
            Some((index, entry)) => (index, Some(entry)),
            None => (0, None),
        };
        self.protection.purge_entity(entity_id);

        info!(
            "{} vanished from session {} until round {}",
            entity_id, self.id, return_round
        );
        self.vanished.push(VanishedEntity {
            entity,
            entry,
            index,
            return_round,
        });
        Ok(())
    }

    /// Put back every vanished entity due by `round`, at its old index
    fn return_vanished(&mut self, round: u32) -> Vec<String> {
        let (mut due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.vanished)
            .into_iter()
            .partition(|v| v.return_round <= round);
        self.vanished = waiting;
        due.sort_by_key(|v| v.index);

        let mut returned = Vec::new();
        for vanished in due {
            let id = vanished.entity.id.clone();
            if let Err(e) = self.entities.insert(vanished.entity) {
                warn!("Vanished entity {} cannot return: {}", id, e);
                continue;
            }
            if let Some(entry) = vanished.entry {
                self.turn.insert(vanished.index, entry);
            }
            debug!("{} returned to session {}", id, self.id);
            returned.push(id);
        }
        returned
    }

    /// Drop every trace of entities that were just deleted
    fn settle_deaths(&mut self, removed: &[String]) {
        for id in removed {
            self.turn.remove(id);
            self.protection.purge_entity(id);
            self.battle_locks.remove(id);
            if let Some(storm) = self.storm.as_mut() {
                if storm.active && storm.caster_id == *id {
                    storm.deactivate();
                    info!("Storm in session {} ended with its caster", self.id);
                }
            }
            info!("{} removed from session {}", id, self.id);
        }
    }

    pub fn apply_cooldown(
        &mut self,
        entity_id: &str,
        ability_id: &str,
        name: &str,
        duration: u32,
    ) -> CombatResult<Cooldown> {
        let round = self.round();
        self.entities
            .require_mut(entity_id)?
            .apply_cooldown(ability_id, name, duration, round)
            .cloned()
    }

    pub fn decrement_cooldowns(&mut self, entity_id: &str) -> CombatResult<TimerReport> {
        let round = self.round();
        Ok(self.entities.require_mut(entity_id)?.decrement_timers(round))
    }

    pub fn apply_status(
        &mut self,
        entity_id: &str,
        kind: StatusKind,
        damage_per_turn: u32,
        turns: u32,
        source_id: Option<&str>,
    ) -> CombatResult<StatusEffect> {
        if turns == 0 {
            return Err(CombatError::invalid(format!(
                "{} needs at least one turn",
                kind
            )));
        }
        let round = self.round();
        let mut effect = StatusEffect::dot(kind, turns, damage_per_turn, round);
        if let Some(source) = source_id {
            effect = effect.with_source(source);
        }
        Ok(self
            .entities
            .require_mut(entity_id)?
            .apply_status(effect)
            .clone())
    }

    /// Mark a one-battle ability as spent
    pub fn spend_ability(&mut self, entity_id: &str, ability_id: &str) -> CombatResult<()> {
        self.entities.require(entity_id)?.ensure_ready(ability_id)?;

        let locks = self.battle_locks.entry(entity_id.to_string()).or_default();
        if !locks.insert(ability_id.to_string()) {
            return Err(CombatError::InsufficientResource(format!(
                "{} already spent {} this battle",
                entity_id, ability_id
            )));
        }
        Ok(())
    }

    pub fn activate_protection(
        &mut self,
        protector_id: &str,
        protected_id: &str,
        ability: &str,
    ) -> CombatResult<ProtectionLink> {
        let round = self.round();
        self.protection
            .activate(&self.entities, protector_id, protected_id, ability, round)
            .cloned()
    }

    /// Who would take damage aimed at `target_id` (drops stale links)
    pub fn query_protection(&mut self, target_id: &str) -> CombatResult<Redirect> {
        self.entities.require(target_id)?;
        Ok(self.protection.redirect(target_id, &self.entities))
    }

    pub fn expire_protection(&mut self, protector_id: &str) -> Vec<ProtectionLink> {
        self.protection.expire_for_protector(protector_id)
    }

    pub fn create_zone(&mut self, request: ZoneRequest) -> CombatResult<AreaEffectZone> {
        let round = self.round();
        self.zones.create(request, round).cloned()
    }

    pub fn prune_zones(&mut self) -> Vec<AreaEffectZone> {
        let round = self.round();
        self.zones.prune(round)
    }

    pub fn remove_zone(&mut self, zone_id: &str) -> CombatResult<AreaEffectZone> {
        self.zones.remove(zone_id)
    }

    pub fn start_ritual(
        &mut self,
        caster_id: &str,
        sequence: [u8; SEQUENCE_LEN],
        now: DateTime<Utc>,
        display_ms: u64,
    ) -> CombatResult<RitualPuzzle> {
        if let Some(ritual) = &self.ritual {
            return Err(CombatError::invalid(format!(
                "a ritual by {} is already in progress",
                ritual.caster_id
            )));
        }
        let caster = self.entities.require(caster_id)?;
        let ritual = RitualPuzzle::new(
            &caster.id,
            caster.category,
            sequence,
            self.round(),
            now,
            display_ms,
        );

        info!(
            "Ritual started by {} in session {} (due round {})",
            caster_id, self.id, ritual.trigger_round
        );
        self.ritual = Some(ritual.clone());
        Ok(ritual)
    }

    pub fn record_ritual_attempt(&mut self, slot: u8, now: DateTime<Utc>) -> CombatResult<AttemptOutcome> {
        if slot >= SLOT_COUNT {
            return Err(CombatError::invalid(format!(
                "ritual slot {} out of range 0..{}",
                slot, SLOT_COUNT
            )));
        }
        Ok(match self.ritual.as_mut() {
            Some(ritual) => ritual.record_attempt(slot, now),
            None => AttemptOutcome::Ignored,
        })
    }

    /// Land the ritual payload on the caster's enemies once due
    pub fn resolve_ritual(&mut self, base_damage: u32) -> CombatResult<RitualResolution> {
        let round = self.round();
        let ritual = match self.ritual.take() {
            Some(ritual) if ritual.is_due(round) => ritual,
            Some(ritual) => {
                let trigger_round = ritual.trigger_round;
                self.ritual = Some(ritual);
                return Ok(RitualResolution::NotDue { trigger_round });
            }
            None => return Ok(RitualResolution::Idle),
        };

        if ritual.is_canceled() {
            let notice = self
                .actions
                .notify(&ritual.caster_id, "ritual", "ritual canceled", round);
            info!("Ritual in session {} canceled", self.id);
            return Ok(RitualResolution::Canceled {
                action_id: notice.id.clone(),
            });
        }

        let damage = ritual.scaled_damage(base_damage);
        let targets = self.entities.hostile_to(ritual.caster_category);
        let source = self
            .entities
            .get(&ritual.caster_id)
            .map(|e| e.position)
            .unwrap_or_default();
        let report = self.actions.record_area(
            &ritual.caster_id,
            "ritual",
            targets,
            damage,
            source,
            round,
            &mut self.entities,
        )?;
        self.settle_deaths(&report.removed());

        info!(
            "Ritual in session {} landed for {} ({}% reduced)",
            self.id, damage, ritual.damage_reduction
        );
        Ok(RitualResolution::Landed {
            damage,
            damage_reduction: ritual.damage_reduction,
            report,
        })
    }

    pub fn activate_storm(&mut self, caster_id: &str, base_magnitude: u32) -> CombatResult<StormEffect> {
        if self.storm.as_ref().is_some_and(|s| s.active) {
            return Err(CombatError::invalid("a storm is already active"));
        }
        let caster = self.entities.require(caster_id)?;
        let storm = StormEffect::new(&caster.id, caster.category, base_magnitude);

        info!("Storm raised by {} in session {}", caster_id, self.id);
        self.storm = Some(storm.clone());
        Ok(storm)
    }

    /// Manual tick; only fires on the caster's own turn, and at most once per round
    pub fn tick_storm(&mut self) -> StormOutcome {
        let caster_acting = self
            .storm
            .as_ref()
            .is_some_and(|s| self.turn.is_current(&s.caster_id));
        if !caster_acting {
            return StormOutcome::Idle;
        }
        let round = self.round();
        self.fire_storm(round)
    }

    /// Caster death is handled by `settle_deaths`; a vanished caster is never current
    fn fire_storm(&mut self, round: u32) -> StormOutcome {
        let Some(storm) = self.storm.as_mut() else {
            return StormOutcome::Idle;
        };
        let Some(tick) = storm.tick(round) else {
            return StormOutcome::Idle;
        };
        let caster_id = storm.caster_id.clone();
        let category = storm.caster_category;

        let targets = self.entities.hostile_to(category);
        let source = self
            .entities
            .get(&caster_id)
            .map(|e| e.position)
            .unwrap_or_default();

        match self.actions.record_area(
            &caster_id,
            "storm",
            targets,
            tick.magnitude,
            source,
            round,
            &mut self.entities,
        ) {
            Ok(report) => {
                self.settle_deaths(&report.removed());
                debug!(
                    "Storm tick {}/{} in session {}",
                    tick.tick_index, STORM_TURNS, self.id
                );
                StormOutcome::Ticked { tick, report }
            }
            Err(e) => {
                warn!("Storm tick in session {} failed: {}", self.id, e);
                StormOutcome::Idle
            }
        }
    }
}
