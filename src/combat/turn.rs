//! Turn order state machine
//!
//! `setup -> active -> ended`. While active, a cursor walks a fixed cyclic
//! initiative sequence; wrapping past the end starts a new round.
//!
//! Entries are never re-sorted. Removing an entry (death, vanish) keeps the
//! relative order of the rest; if the removed entry was the current actor
//! the turn is *vacated* and the next `advance()` hands it to whoever now
//! sits at the cursor.

use serde::{Deserialize, Serialize};

use super::entity::Category;
use super::error::{CombatError, CombatResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Setup,
    Active,
    Ended,
}

/// One slot in the initiative sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeEntry {
    pub entity_id: String,
    pub name: String,
    pub initiative: i32,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    /// Has taken its turn this round
    #[serde(default)]
    pub has_acted: bool,
}

/// Result of a cursor move
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnAdvance {
    /// Actor whose turn just ended (none if the turn was vacated)
    pub previous: Option<String>,
    pub current: String,
    pub round: u32,
    /// The move wrapped past the last entry
    pub wrapped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOrder {
    phase: Phase,
    entries: Vec<InitiativeEntry>,
    cursor: usize,
    /// Round counter; 0 during setup, 1 on start
    round: u32,
    /// Current actor was removed mid-turn
    #[serde(default)]
    vacated: bool,
}

impl TurnOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// setup -> active with the given fixed order
    pub fn start(&mut self, entries: Vec<InitiativeEntry>) -> CombatResult<()> {
        if self.phase != Phase::Setup {
            return Err(CombatError::invalid(format!(
                "cannot start combat in phase {:?}",
                self.phase
            )));
        }
        if entries.is_empty() {
            return Err(CombatError::invalid("initiative order is empty"));
        }

        self.entries = entries;
        for entry in &mut self.entries {
            entry.has_acted = false;
        }
        self.cursor = 0;
        self.round = 1;
        self.vacated = false;
        self.phase = Phase::Active;
        Ok(())
    }

    /// Hand the turn to the next entry, wrapping into a new round
    pub fn advance(&mut self) -> CombatResult<TurnAdvance> {
        if self.phase != Phase::Active {
            return Err(CombatError::invalid(format!(
                "cannot advance turn in phase {:?}",
                self.phase
            )));
        }
        if self.entries.is_empty() {
            return Err(CombatError::invalid("no combatants left in initiative"));
        }

        let previous = if self.vacated {
            self.vacated = false;
            None
        } else {
            let outgoing = &mut self.entries[self.cursor];
            outgoing.has_acted = true;
            let id = outgoing.entity_id.clone();
            self.cursor += 1;
            Some(id)
        };

        let wrapped = self.cursor >= self.entries.len();
        if wrapped {
            self.cursor = 0;
            self.round += 1;
            for entry in &mut self.entries {
                entry.has_acted = false;
            }
        }

        Ok(TurnAdvance {
            previous,
            current: self.entries[self.cursor].entity_id.clone(),
            round: self.round,
            wrapped,
        })
    }

    /// Move to `ended`; fails if already ended
    pub fn end(&mut self) -> CombatResult<()> {
        if self.phase == Phase::Ended {
            return Err(CombatError::invalid("combat already ended"));
        }
        self.phase = Phase::Ended;
        self.vacated = false;
        Ok(())
    }

    /// Current actor, if combat is active and the turn is occupied
    pub fn current(&self) -> Option<&InitiativeEntry> {
        if self.phase != Phase::Active || self.vacated {
            return None;
        }
        self.entries.get(self.cursor)
    }

    pub fn is_current(&self, entity_id: &str) -> bool {
        self.current().is_some_and(|e| e.entity_id == entity_id)
    }

    /// Remove an entity's entry, preserving the order of the rest
    pub fn remove(&mut self, entity_id: &str) -> Option<(usize, InitiativeEntry)> {
        let index = self.position_of(entity_id)?;
        let entry = self.entries.remove(index);

        if self.phase == Phase::Active {
            if index < self.cursor {
                self.cursor -= 1;
            } else if index == self.cursor && !self.vacated {
                self.vacated = true;
            }
        }

        Some((index, entry))
    }

    /// Insert an entry at `index` (clamped) without disturbing the current turn
    pub fn insert(&mut self, index: usize, entry: InitiativeEntry) {
        let index = index.min(self.entries.len());

        if self.phase == Phase::Active {
            if self.entries.is_empty() {
                self.cursor = 0;
                self.vacated = true;
            } else if index < self.cursor || (index == self.cursor && !self.vacated) {
                self.cursor += 1;
            }
        }

        self.entries.insert(index, entry);
    }

    /// Append to the end of the sequence (summons)
    pub fn append(&mut self, entry: InitiativeEntry) {
        self.insert(self.entries.len(), entry);
    }

    pub fn position_of(&self, entity_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.entity_id == entity_id)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn entries(&self) -> &[InitiativeEntry] {
        &self.entries
    }

    pub fn is_vacated(&self) -> bool {
        self.vacated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, initiative: i32) -> InitiativeEntry {
        InitiativeEntry {
            entity_id: id.to_string(),
            name: id.to_uppercase(),
            initiative,
            category: Category::Player,
            profile_id: None,
            has_acted: false,
        }
    }

    fn started(ids: &[&str]) -> TurnOrder {
        let mut turn = TurnOrder::new();
        turn.start(ids.iter().map(|id| entry(id, 10)).collect())
            .unwrap();
        turn
    }

    #[test]
    fn test_start_requires_entries() {
        let mut turn = TurnOrder::new();
        assert!(turn.start(vec![]).is_err());
        assert_eq!(turn.phase(), Phase::Setup);
    }

    #[test]
    fn test_advance_before_start_fails() {
        let mut turn = TurnOrder::new();
        assert!(matches!(turn.advance(), Err(CombatError::InvalidState(_))));
    }

    #[test]
    fn test_wraparound_increments_round_and_resets_flags() {
        let mut turn = started(&["a", "b", "c"]);
        assert_eq!(turn.round(), 1);
        assert_eq!(turn.current().unwrap().entity_id, "a");

        let step = turn.advance().unwrap();
        assert_eq!(step.previous.as_deref(), Some("a"));
        assert_eq!(step.current, "b");
        assert!(!step.wrapped);
        assert!(turn.entries()[0].has_acted);

        turn.advance().unwrap();
        assert!(turn.entries()[1].has_acted);

        let step = turn.advance().unwrap();
        assert!(step.wrapped);
        assert_eq!(step.round, 2);
        assert_eq!(step.current, "a");
        assert!(turn.entries().iter().all(|e| !e.has_acted));
    }

    #[test]
    fn test_remove_before_cursor_keeps_current() {
        let mut turn = started(&["a", "b", "c"]);
        turn.advance().unwrap(); // b
        turn.remove("a");
        assert_eq!(turn.current().unwrap().entity_id, "b");
        assert_eq!(turn.advance().unwrap().current, "c");
    }

    #[test]
    fn test_removing_current_actor_vacates_turn() {
        let mut turn = started(&["a", "b", "c"]);
        turn.advance().unwrap(); // b
        turn.remove("b");
        assert!(turn.current().is_none());
        assert!(turn.is_vacated());

        let step = turn.advance().unwrap();
        assert_eq!(step.previous, None);
        assert_eq!(step.current, "c");
        assert_eq!(step.round, 1);
    }

    #[test]
    fn test_removing_last_current_actor_wraps() {
        let mut turn = started(&["a", "b"]);
        turn.advance().unwrap(); // b
        turn.remove("b");

        let step = turn.advance().unwrap();
        assert!(step.wrapped);
        assert_eq!(step.current, "a");
        assert_eq!(step.round, 2);
    }

    #[test]
    fn test_insert_keeps_current_actor() {
        let mut turn = started(&["a", "b", "c"]);
        turn.advance().unwrap(); // b
        turn.insert(0, entry("z", 20));
        assert_eq!(turn.current().unwrap().entity_id, "b");

        // At the cursor: goes in front of b, so it waits for next round
        turn.insert(2, entry("x", 7));
        assert_eq!(turn.current().unwrap().entity_id, "b");

        turn.insert(4, entry("y", 5)); // right after b
        assert_eq!(turn.advance().unwrap().current, "y");
    }

    #[test]
    fn test_insert_into_vacated_slot_becomes_next() {
        let mut turn = started(&["a", "b", "c"]);
        turn.advance().unwrap(); // b
        turn.remove("b");
        turn.insert(1, entry("b", 10));
        assert_eq!(turn.advance().unwrap().current, "b");
    }

    #[test]
    fn test_end() {
        let mut turn = started(&["a"]);
        turn.end().unwrap();
        assert_eq!(turn.phase(), Phase::Ended);
        assert!(turn.current().is_none());
        assert!(turn.advance().is_err());
        assert!(turn.end().is_err());
    }
}
