//! Recurring storm
//!
//! Area damage that fires at the start of each of the caster's own turns
//! for a fixed number of turns.

use serde::{Deserialize, Serialize};

use super::entity::Category;

pub const STORM_TURNS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StormEffect {
    pub caster_id: String,
    pub caster_category: Category,
    pub active: bool,
    /// Ticks fired so far
    pub tick_index: u32,
    pub total_turns: u32,
    pub turns_remaining: u32,
    pub base_magnitude: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tick_round: Option<u32>,
}

/// One firing of the storm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StormTick {
    /// 1-based
    pub tick_index: u32,
    pub magnitude: u32,
    pub turns_remaining: u32,
    /// This was the last tick
    pub finished: bool,
}

impl StormEffect {
    pub fn new(caster_id: &str, caster_category: Category, base_magnitude: u32) -> Self {
        Self {
            caster_id: caster_id.to_string(),
            caster_category,
            active: true,
            tick_index: 0,
            total_turns: STORM_TURNS,
            turns_remaining: STORM_TURNS,
            base_magnitude,
            last_tick_round: None,
        }
    }

    /// Fire once for `round`. Returns `None` if inactive or already fired this round.
    pub fn tick(&mut self, round: u32) -> Option<StormTick> {
        if !self.active || self.turns_remaining == 0 || self.last_tick_round == Some(round) {
            return None;
        }

        self.tick_index += 1;
        self.turns_remaining -= 1;
        self.last_tick_round = Some(round);
        if self.turns_remaining == 0 {
            self.active = false;
        }

        Some(StormTick {
            tick_index: self.tick_index,
            magnitude: self.base_magnitude,
            turns_remaining: self.turns_remaining,
            finished: !self.active,
        })
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }
}
