//! Entity registry
//!
//! Canonical map of combat participants (tokens). Presence in the registry
//! is the liveness signal: an entity whose health reaches zero is removed
//! on the spot, never flagged as dead.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{CombatError, CombatResult};
use super::ledger::{Cooldown, StatusEffect, StatusKind};
use crate::ids::validate_entity_id;

/// Default armor value for entities that do not state one
pub const DEFAULT_ARMOR: u32 = 10;

/// Which side of the encounter an entity fights for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Controlled by a player client
    #[serde(alias = "pc")]
    Player,
    /// Controlled by the opposing-side client
    #[serde(alias = "enemy", alias = "npc")]
    Opposing,
    /// Bystanders, objects, terrain props
    Neutral,
}

impl Category {
    /// Whether area effects cast by `self` should hit `other`
    pub fn is_hostile_to(self, other: Category) -> bool {
        matches!(
            (self, other),
            (Category::Player, Category::Opposing) | (Category::Opposing, Category::Player)
        )
    }
}

impl FromStr for Category {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "player" | "pc" => Ok(Category::Player),
            "opposing" | "enemy" | "npc" => Ok(Category::Opposing),
            "neutral" => Ok(Category::Neutral),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Player => "player",
            Category::Opposing => "opposing",
            Category::Neutral => "neutral",
        };
        write!(f, "{}", s)
    }
}

/// Integer grid coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Grid distance allowing diagonal steps
    pub fn distance(&self, other: &Position) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }
}

/// A positioned combat participant and its mutable resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub position: Position,
    /// Current hit points, always within `1..=max_hp` while registered
    pub hp: u32,
    pub max_hp: u32,
    pub armor: u32,
    /// Link to a persistent character profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    /// Ability id -> cooldown
    #[serde(default)]
    pub cooldowns: BTreeMap<String, Cooldown>,
    /// Effect key -> status effect
    #[serde(default)]
    pub statuses: BTreeMap<StatusKind, StatusEffect>,
}

impl Entity {
    /// Create an entity at full health
    pub fn new(id: &str, name: &str, category: Category, max_hp: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            category,
            position: Position::default(),
            hp: max_hp,
            max_hp,
            armor: DEFAULT_ARMOR,
            profile_id: None,
            cooldowns: BTreeMap::new(),
            statuses: BTreeMap::new(),
        }
    }

    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.position = Position::new(x, y);
        self
    }

    pub fn with_armor(mut self, armor: u32) -> Self {
        self.armor = armor;
        self
    }

    pub fn with_profile(mut self, profile_id: &str) -> Self {
        self.profile_id = Some(profile_id.to_string());
        self
    }

    /// Subtract damage, clamping at zero. Returns damage actually dealt.
    pub fn take_damage(&mut self, amount: u32) -> u32 {
        let dealt = amount.min(self.hp);
        self.hp -= dealt;
        dealt
    }

    /// Heal (cannot exceed max_hp). Returns the amount actually healed.
    pub fn heal(&mut self, amount: u32) -> u32 {
        let actual = amount.min(self.max_hp - self.hp);
        self.hp += actual;
        actual
    }

    pub fn is_down(&self) -> bool {
        self.hp == 0
    }
}

/// Client-supplied description of a new entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySeed {
    pub id: String,
    pub name: String,
    pub category: Category,
    #[serde(default)]
    pub position: Position,
    pub max_hp: u32,
    /// Starting health; defaults to `max_hp`
    #[serde(default)]
    pub hp: Option<u32>,
    #[serde(default = "default_armor")]
    pub armor: u32,
    #[serde(default)]
    pub profile_id: Option<String>,
}

fn default_armor() -> u32 {
    DEFAULT_ARMOR
}

impl EntitySeed {
    /// Validate and build the entity
    pub fn into_entity(self) -> CombatResult<Entity> {
        let id = validate_entity_id(&self.id)
            .map_err(|e| CombatError::invalid(format!("bad entity id {:?}: {}", self.id, e)))?;

        if self.max_hp == 0 {
            return Err(CombatError::invalid(format!(
                "entity {} needs a positive max_hp",
                id
            )));
        }

        let hp = match self.hp {
            Some(0) => {
                return Err(CombatError::invalid(format!(
                    "entity {} cannot be created at 0 hp",
                    id
                )))
            }
            Some(hp) => hp.min(self.max_hp),
            None => self.max_hp,
        };

        let mut entity = Entity::new(&id, &self.name, self.category, self.max_hp)
            .with_armor(self.armor);
        entity.position = self.position;
        entity.hp = hp;
        entity.profile_id = self.profile_id;
        Ok(entity)
    }
}

/// Result of applying damage to one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageApplied {
    pub entity_id: String,
    /// Damage actually subtracted (after clamping)
    pub dealt: u32,
    pub remaining_hp: u32,
    /// Entity reached zero and was removed from the registry
    pub removed: bool,
}

/// Registry of live entities, keyed by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRegistry {
    entities: BTreeMap<String, Entity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity; ids must be unique among live entities
    pub fn insert(&mut self, entity: Entity) -> CombatResult<()> {
        if entity.hp == 0 {
            return Err(CombatError::invalid(format!(
                "entity {} has no health left",
                entity.id
            )));
        }
        if self.entities.contains_key(&entity.id) {
            return Err(CombatError::invalid(format!(
                "entity {} already exists",
                entity.id
            )));
        }
        self.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub fn require(&self, id: &str) -> CombatResult<&Entity> {
        self.entities.get(id).ok_or_else(|| CombatError::entity(id))
    }

    pub fn require_mut(&mut self, id: &str) -> CombatResult<&mut Entity> {
        self.entities
            .get_mut(id)
            .ok_or_else(|| CombatError::entity(id))
    }

    /// Whether the entity is alive (registered)
    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Entity> {
        self.entities.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Ids of every entity hostile to `category`
    pub fn hostile_to(&self, category: Category) -> Vec<String> {
        self.entities
            .values()
            .filter(|e| category.is_hostile_to(e.category))
            .map(|e| e.id.clone())
            .collect()
    }

    /// Subtract damage from an entity, deleting it if health reaches zero
    pub fn apply_damage(&mut self, id: &str, amount: u32) -> CombatResult<DamageApplied> {
        let entity = self.require_mut(id)?;
        let dealt = entity.take_damage(amount);
        let remaining_hp = entity.hp;
        let removed = entity.is_down();

        if removed {
            self.entities.remove(id);
        }

        Ok(DamageApplied {
            entity_id: id.to_string(),
            dealt,
            remaining_hp,
            removed,
        })
    }

    pub fn heal(&mut self, id: &str, amount: u32) -> CombatResult<u32> {
        Ok(self.require_mut(id)?.heal(amount))
    }

    /// Exchange the grid positions of two entities
    pub fn swap_positions(&mut self, a: &str, b: &str) -> CombatResult<()> {
        let pos_a = self.require(a)?.position;
        let pos_b = self.require(b)?.position;
        self.require_mut(a)?.position = pos_b;
        self.require_mut(b)?.position = pos_a;
        Ok(())
    }
}
