//! Protection links
//!
//! A protector guards one entity until the start of the protector's next
//! turn. Damage aimed at a guarded entity lands on a live protector instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::entity::EntityRegistry;
use super::error::{CombatError, CombatResult};

/// An active guard relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionLink {
    pub protector_id: String,
    pub protector_name: String,
    pub protected_id: String,
    pub protected_name: String,
    /// Ability that created the link
    pub ability: String,
    pub activated_round: u32,
}

/// Outcome of a redirect lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "redirect", rename_all = "snake_case")]
pub enum Redirect {
    /// Damage stays on the original target
    None,
    /// Damage goes to the protector instead
    To {
        protector_id: String,
        protector_name: String,
    },
}

/// Links keyed by protected entity id (at most one each)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtectionTable {
    links: BTreeMap<String, ProtectionLink>,
}

impl ProtectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or overwrite) the link guarding `protected_id`
    pub fn activate(
        &mut self,
        entities: &EntityRegistry,
        protector_id: &str,
        protected_id: &str,
        ability: &str,
        round: u32,
    ) -> CombatResult<&ProtectionLink> {
        let protected = entities.require(protected_id)?;
        let protector = entities.require(protector_id)?;
        if protector_id == protected_id {
            return Err(CombatError::invalid(format!(
                "{} cannot protect itself",
                protector_id
            )));
        }

        let link = ProtectionLink {
            protector_id: protector.id.clone(),
            protector_name: protector.name.clone(),
            protected_id: protected.id.clone(),
            protected_name: protected.name.clone(),
            ability: ability.to_string(),
            activated_round: round,
        };

        if let Some(previous) = self.links.insert(protected_id.to_string(), link) {
            debug!(
                "Protection on {} moved from {} to {}",
                protected_id, previous.protector_id, protector_id
            );
        }

        Ok(&self.links[protected_id])
    }

    /// Find who should take damage aimed at `target_id`.
    ///
    /// A link whose protector is gone is deleted on the way.
    pub fn redirect(&mut self, target_id: &str, entities: &EntityRegistry) -> Redirect {
        let Some(link) = self.links.get(target_id) else {
            return Redirect::None;
        };

        match entities.get(&link.protector_id) {
            Some(protector) => Redirect::To {
                protector_id: protector.id.clone(),
                protector_name: protector.name.clone(),
            },
            None => {
                debug!(
                    "Dropping stale protection on {} (protector {} gone)",
                    target_id, link.protector_id
                );
                self.links.remove(target_id);
                Redirect::None
            }
        }
    }

    /// Remove every link held by `protector_id` (start of its turn)
    pub fn expire_for_protector(&mut self, protector_id: &str) -> Vec<ProtectionLink> {
        let expired: Vec<String> = self
            .links
            .iter()
            .filter(|(_, link)| link.protector_id == protector_id)
            .map(|(protected, _)| protected.clone())
            .collect();

        expired
            .iter()
            .filter_map(|protected| self.links.remove(protected))
            .collect()
    }

    /// Link guarding `protected_id`, if any
    pub fn link_for(&self, protected_id: &str) -> Option<&ProtectionLink> {
        self.links.get(protected_id)
    }

    /// Remove links in which the entity takes part on either side
    pub fn purge_entity(&mut self, entity_id: &str) -> usize {
        let before = self.links.len();
        self.links
            .retain(|_, link| link.protector_id != entity_id && link.protected_id != entity_id);
        before - self.links.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProtectionLink> {
        self.links.values()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn clear(&mut self) {
        self.links.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{Category, Entity};

    fn entities() -> EntityRegistry {
        let mut reg = EntityRegistry::new();
        reg.insert(Entity::new("knight", "Knight", Category::Player, 40))
            .unwrap();
        reg.insert(Entity::new("mage", "Mage", Category::Player, 15))
            .unwrap();
        reg.insert(Entity::new("bard", "Bard", Category::Player, 18))
            .unwrap();
        reg
    }

    #[test]
    fn test_redirect_to_live_protector() {
        let reg = entities();
        let mut table = ProtectionTable::new();
        table.activate(&reg, "knight", "mage", "Guard", 1).unwrap();

        assert_eq!(
            table.redirect("mage", &reg),
            Redirect::To {
                protector_id: "knight".to_string(),
                protector_name: "Knight".to_string(),
            }
        );
        assert_eq!(table.redirect("bard", &reg), Redirect::None);
    }

    #[test]
    fn test_dead_protector_link_is_cleaned_up() {
        let mut reg = entities();
        let mut table = ProtectionTable::new();
        table.activate(&reg, "knight", "mage", "Guard", 1).unwrap();

        reg.remove("knight");
        assert_eq!(table.redirect("mage", &reg), Redirect::None);
        assert!(table.link_for("mage").is_none());
    }

    #[test]
    fn test_one_link_per_protected() {
        let reg = entities();
        let mut table = ProtectionTable::new();
        table.activate(&reg, "knight", "mage", "Guard", 1).unwrap();
        table.activate(&reg, "bard", "mage", "Ward", 2).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.link_for("mage").unwrap().protector_id, "bard");
    }

    #[test]
    fn test_activate_requires_entities() {
        let reg = entities();
        let mut table = ProtectionTable::new();
        assert_eq!(
            table.activate(&reg, "knight", "ghost", "Guard", 1).unwrap_err(),
            CombatError::entity("ghost")
        );
        assert!(table.activate(&reg, "knight", "knight", "Guard", 1).is_err());
    }

    #[test]
    fn test_expire_for_protector() {
        let reg = entities();
        let mut table = ProtectionTable::new();
        table.activate(&reg, "knight", "mage", "Guard", 1).unwrap();
        table.activate(&reg, "knight", "bard", "Guard", 1).unwrap();
        table.activate(&reg, "bard", "knight", "Ward", 1).unwrap();

        let expired = table.expire_for_protector("knight");
        assert_eq!(expired.len(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.link_for("knight").is_some());
    }

    #[test]
    fn test_purge_entity() {
        let reg = entities();
        let mut table = ProtectionTable::new();
        table.activate(&reg, "knight", "mage", "Guard", 1).unwrap();
        table.activate(&reg, "bard", "knight", "Ward", 1).unwrap();

        assert_eq!(table.purge_entity("knight"), 2);
        assert!(table.is_empty());
    }
}
