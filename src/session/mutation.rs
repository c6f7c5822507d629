//! Mutation protocol
//!
//! The request/response vocabulary clients use to change a session.
//! Requests are tagged by `op`, responses by `result`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::{
    CombatEnd, ConfirmOutcome, InitiativeSlot, RitualResolution, Session, StormOutcome, TurnStart,
};
use crate::combat::{
    draw_sequence, AreaEffectZone, AttemptOutcome, CombatResult, Cooldown, Entity, EntitySeed,
    PendingAction, Proposal, ProtectionLink, Redirect, RitualPuzzle, StatusEffect, StatusKind,
    StormEffect, TimerReport, ZoneRequest,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    SpawnEntity {
        entity: EntitySeed,
        #[serde(default)]
        initiative: Option<i32>,
    },
    Heal {
        entity_id: String,
        amount: u32,
    },
    StartCombat {
        order: Vec<InitiativeSlot>,
    },
    AdvanceTurn,
    EndCombat,
    ProposeAction {
        action: Proposal,
    },
    ConfirmAction {
        action_id: String,
        amount: u32,
    },
    DismissAction {
        action_id: String,
    },
    ApplyCooldown {
        entity_id: String,
        ability_id: String,
        #[serde(default)]
        name: Option<String>,
        duration: u32,
    },
    DecrementCooldowns {
        entity_id: String,
    },
    ApplyStatus {
        entity_id: String,
        kind: StatusKind,
        #[serde(default)]
        damage_per_turn: u32,
        turns: u32,
        #[serde(default)]
        source_id: Option<String>,
    },
    SpendAbility {
        entity_id: String,
        ability_id: String,
    },
    ActivateProtection {
        protector_id: String,
        protected_id: String,
        ability: String,
    },
    QueryProtection {
        target_id: String,
    },
    ExpireProtection {
        protector_id: String,
    },
    CreateZone {
        zone: ZoneRequest,
    },
    PruneZones,
    RemoveZone {
        zone_id: String,
    },
    StartRitual {
        caster_id: String,
    },
    RecordRitualAttempt {
        slot: u8,
    },
    ResolveRitual {
        base_damage: u32,
    },
    ActivateStorm {
        caster_id: String,
        base_magnitude: u32,
    },
    TickStorm,
}

impl Mutation {
    /// Wire name of the operation
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::SpawnEntity { .. } => "spawn_entity",
            Mutation::Heal { .. } => "heal",
            Mutation::StartCombat { .. } => "start_combat",
            Mutation::AdvanceTurn => "advance_turn",
            Mutation::EndCombat => "end_combat",
            Mutation::ProposeAction { .. } => "propose_action",
            Mutation::ConfirmAction { .. } => "confirm_action",
            Mutation::DismissAction { .. } => "dismiss_action",
            Mutation::ApplyCooldown { .. } => "apply_cooldown",
            Mutation::DecrementCooldowns { .. } => "decrement_cooldowns",
            Mutation::ApplyStatus { .. } => "apply_status",
            Mutation::SpendAbility { .. } => "spend_ability",
            Mutation::ActivateProtection { .. } => "activate_protection",
            Mutation::QueryProtection { .. } => "query_protection",
            Mutation::ExpireProtection { .. } => "expire_protection",
            Mutation::CreateZone { .. } => "create_zone",
            Mutation::PruneZones => "prune_zones",
            Mutation::RemoveZone { .. } => "remove_zone",
            Mutation::StartRitual { .. } => "start_ritual",
            Mutation::RecordRitualAttempt { .. } => "record_ritual_attempt",
            Mutation::ResolveRitual { .. } => "resolve_ritual",
            Mutation::ActivateStorm { .. } => "activate_storm",
            Mutation::TickStorm => "tick_storm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MutationOutcome {
    EntitySpawned {
        entity: Entity,
    },
    Healed {
        entity_id: String,
        healed: u32,
        hp: u32,
    },
    CombatStarted {
        turn: TurnStart,
    },
    TurnAdvanced {
        turn: TurnStart,
    },
    CombatEnded {
        end: CombatEnd,
    },
    ActionProposed {
        action: PendingAction,
    },
    ActionConfirmed {
        confirm: ConfirmOutcome,
    },
    ActionDismissed {
        action_id: String,
    },
    CooldownApplied {
        entity_id: String,
        cooldown: Cooldown,
    },
    TimersDecremented {
        report: TimerReport,
    },
    StatusApplied {
        entity_id: String,
        status: StatusEffect,
    },
    AbilitySpent {
        entity_id: String,
        ability_id: String,
    },
    ProtectionActivated {
        link: ProtectionLink,
    },
    ProtectionQueried {
        target_id: String,
        redirect: Redirect,
    },
    ProtectionExpired {
        links: Vec<ProtectionLink>,
    },
    ZoneCreated {
        zone: AreaEffectZone,
    },
    ZonesPruned {
        removed: Vec<String>,
    },
    ZoneRemoved {
        zone_id: String,
    },
    RitualStarted {
        ritual: RitualPuzzle,
    },
    RitualAttempt {
        outcome: AttemptOutcome,
    },
    RitualResolved {
        resolution: RitualResolution,
    },
    StormActivated {
        storm: StormEffect,
    },
    StormTicked {
        outcome: StormOutcome,
    },
}

impl MutationOutcome {
    /// Pending action this outcome is about, for the audit log
    pub fn action_id(&self) -> Option<&str> {
        match self {
            MutationOutcome::ActionProposed { action } => Some(&action.id),
            MutationOutcome::ActionConfirmed { confirm } => Some(&confirm.action_id),
            MutationOutcome::ActionDismissed { action_id } => Some(action_id),
            MutationOutcome::RitualResolved { resolution } => match resolution {
                RitualResolution::Canceled { action_id } => Some(action_id),
                RitualResolution::Landed { report, .. } => Some(&report.action_id),
                _ => None,
            },
            MutationOutcome::StormTicked {
                outcome: StormOutcome::Ticked { report, .. },
            } => Some(&report.action_id),
            _ => None,
        }
    }
}

/// Ambient inputs a mutation may need
#[derive(Debug, Clone, Copy)]
pub struct MutationContext {
    pub now: DateTime<Utc>,
    pub ritual_display_ms: u64,
}

impl MutationContext {
    pub fn new(ritual_display_ms: u64) -> Self {
        Self {
            now: Utc::now(),
            ritual_display_ms,
        }
    }
}

impl Session {
    /// Apply one mutation; a committed mutation bumps the revision
    pub fn apply(&mut self, mutation: Mutation, ctx: &MutationContext) -> CombatResult<MutationOutcome> {
        debug!("Session {} applying {}", self.id, mutation.name());

        let outcome = match mutation {
            Mutation::SpawnEntity { entity, initiative } => MutationOutcome::EntitySpawned {
                entity: self.spawn_entity(entity, initiative)?,
            },
            Mutation::Heal { entity_id, amount } => {
                let (healed, hp) = self.heal(&entity_id, amount)?;
                MutationOutcome::Healed {
                    entity_id,
                    healed,
                    hp,
                }
            }
            Mutation::StartCombat { order } => MutationOutcome::CombatStarted {
                turn: self.start_combat(order)?,
            },
            Mutation::AdvanceTurn => MutationOutcome::TurnAdvanced {
                turn: self.advance_turn()?,
            },
            Mutation::EndCombat => MutationOutcome::CombatEnded {
                end: self.end_combat()?,
            },
            Mutation::ProposeAction { action } => MutationOutcome::ActionProposed {
                action: self.propose_action(action)?,
            },
            Mutation::ConfirmAction { action_id, amount } => MutationOutcome::ActionConfirmed {
                confirm: self.confirm_action(&action_id, amount)?,
            },
            Mutation::DismissAction { action_id } => {
                self.dismiss_action(&action_id)?;
                MutationOutcome::ActionDismissed { action_id }
            }
            Mutation::ApplyCooldown {
                entity_id,
                ability_id,
                name,
                duration,
            } => {
                let name = name.unwrap_or_else(|| ability_id.clone());
                let cooldown = self.apply_cooldown(&entity_id, &ability_id, &name, duration)?;
                MutationOutcome::CooldownApplied {
                    entity_id,
                    cooldown,
                }
            }
            Mutation::DecrementCooldowns { entity_id } => MutationOutcome::TimersDecremented {
                report: self.decrement_cooldowns(&entity_id)?,
            },
            Mutation::ApplyStatus {
                entity_id,
                kind,
                damage_per_turn,
                turns,
                source_id,
            } => {
                let status = self.apply_status(
                    &entity_id,
                    kind,
                    damage_per_turn,
                    turns,
                    source_id.as_deref(),
                )?;
                MutationOutcome::StatusApplied { entity_id, status }
            }
            Mutation::SpendAbility {
                entity_id,
                ability_id,
            } => {
                self.spend_ability(&entity_id, &ability_id)?;
                MutationOutcome::AbilitySpent {
                    entity_id,
                    ability_id,
                }
            }
            Mutation::ActivateProtection {
                protector_id,
                protected_id,
                ability,
            } => MutationOutcome::ProtectionActivated {
                link: self.activate_protection(&protector_id, &protected_id, &ability)?,
            },
            Mutation::QueryProtection { target_id } => {
                let redirect = self.query_protection(&target_id)?;
                MutationOutcome::ProtectionQueried {
                    target_id,
                    redirect,
                }
            }
            Mutation::ExpireProtection { protector_id } => MutationOutcome::ProtectionExpired {
                links: self.expire_protection(&protector_id),
            },
            Mutation::CreateZone { zone } => MutationOutcome::ZoneCreated {
                zone: self.create_zone(zone)?,
            },
            Mutation::PruneZones => MutationOutcome::ZonesPruned {
                removed: self.prune_zones().into_iter().map(|z| z.id).collect(),
            },
            Mutation::RemoveZone { zone_id } => {
                self.remove_zone(&zone_id)?;
                MutationOutcome::ZoneRemoved { zone_id }
            }
            Mutation::StartRitual { caster_id } => {
                let sequence = draw_sequence(&mut rand::rng());
                MutationOutcome::RitualStarted {
                    ritual: self.start_ritual(
                        &caster_id,
                        sequence,
                        ctx.now,
                        ctx.ritual_display_ms,
                    )?,
                }
            }
            Mutation::RecordRitualAttempt { slot } => MutationOutcome::RitualAttempt {
                outcome: self.record_ritual_attempt(slot, ctx.now)?,
            },
            Mutation::ResolveRitual { base_damage } => MutationOutcome::RitualResolved {
                resolution: self.resolve_ritual(base_damage)?,
            },
            Mutation::ActivateStorm {
                caster_id,
                base_magnitude,
            } => MutationOutcome::StormActivated {
                storm: self.activate_storm(&caster_id, base_magnitude)?,
            },
            Mutation::TickStorm => MutationOutcome::StormTicked {
                outcome: self.tick_storm(),
            },
        };

        self.revision += 1;
        self.updated_at = ctx.now;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::CombatError;
    use serde_json::json;

    fn session() -> Session {
        let seeds = serde_json::from_value(json!([
            {"id": "hero", "name": "Hero", "category": "player", "max_hp": 20},
            {"id": "ogre", "name": "Ogre", "category": "opposing", "max_hp": 15, "armor": 12}
        ]))
        .unwrap();
        Session::new("Test", seeds, Utc::now()).unwrap()
    }

    fn apply(session: &mut Session, op: serde_json::Value) -> CombatResult<MutationOutcome> {
        let mutation: Mutation = serde_json::from_value(op).unwrap();
        session.apply(mutation, &MutationContext::new(0))
    }

    #[test]
    fn test_revision_bumps_only_on_commit() {
        let mut s = session();
        assert_eq!(s.revision, 0);

        apply(
            &mut s,
            json!({"op": "start_combat", "order": [
                {"entity_id": "hero", "initiative": 14},
                {"entity_id": "ogre", "initiative": 9}
            ]}),
        )
        .unwrap();
        assert_eq!(s.revision, 1);

        let err = apply(&mut s, json!({"op": "heal", "entity_id": "ghost", "amount": 3}))
            .unwrap_err();
        assert_eq!(err, CombatError::entity("ghost"));
        assert_eq!(s.revision, 1);
    }

    #[test]
    fn test_propose_and_confirm_over_the_wire() {
        let mut s = session();
        apply(
            &mut s,
            json!({"op": "start_combat", "order": [{"entity_id": "hero", "initiative": 1}]}),
        )
        .unwrap();

        let outcome = apply(
            &mut s,
            json!({"op": "propose_action", "action": {
                "actor_id": "hero",
                "body": {"type": "attack", "target_id": "ogre"},
                "roll": 15
            }}),
        )
        .unwrap();
        let MutationOutcome::ActionProposed { action } = outcome else {
            panic!("expected proposal");
        };
        assert!(action.hit);

        let outcome = apply(
            &mut s,
            json!({"op": "confirm_action", "action_id": action.id, "amount": 15}),
        )
        .unwrap();
        assert_eq!(outcome.action_id(), Some(action.id.as_str()));

        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["result"], "action_confirmed");
        assert_eq!(value["confirm"]["removed"][0], "ogre");
        assert!(!s.entities.contains("ogre"));
    }

    #[test]
    fn test_names_match_wire_tags() {
        let ops = [
            json!({"op": "advance_turn"}),
            json!({"op": "tick_storm"}),
            json!({"op": "record_ritual_attempt", "slot": 2}),
            json!({"op": "create_zone", "zone": {
                "kind": "fire", "shape": "burst", "center": {"x": 0, "y": 0},
                "radius": 1, "duration": 2
            }}),
        ];
        for op in ops {
            let tag = op["op"].as_str().unwrap().to_string();
            let mutation: Mutation = serde_json::from_value(op).unwrap();
            assert_eq!(mutation.name(), tag);
        }
    }

    #[test]
    fn test_cooldown_name_defaults_to_ability_id() {
        let mut s = session();
        let outcome = apply(
            &mut s,
            json!({"op": "apply_cooldown", "entity_id": "hero", "ability_id": "smite", "duration": 2}),
        )
        .unwrap();
        match outcome {
            MutationOutcome::CooldownApplied { cooldown, .. } => assert_eq!(cooldown.name, "smite"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
