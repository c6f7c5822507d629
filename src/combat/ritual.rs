//! Ritual puzzle
//!
//! A one-shot sequence-matching mini-game. The caster's side is shown a
//! secret sequence of four slots for a short window, then has to repeat
//! it. Each correct guess shaves 25% off the payload that lands on the
//! caster's enemies one round later.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::entity::Category;

/// Length of the secret sequence
pub const SEQUENCE_LEN: usize = 4;

/// Number of selectable slots (indices `0..SLOT_COUNT`)
pub const SLOT_COUNT: u8 = 4;

/// Damage reduction per correct guess, in percent
pub const REDUCTION_STEP: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RitualPhase {
    /// Sequence drawn and on display
    SequenceCommitted,
    CollectingAttempts,
    /// No more attempts accepted; payload still pending
    Resolved,
}

/// What happened to a submitted guess
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "attempt", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Not collecting (display window still open, or already closed)
    Ignored,
    Correct { damage_reduction: u32 },
    /// Fourth correct guess
    Completed { damage_reduction: u32 },
    /// Mismatch; collection stops
    Failed { damage_reduction: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RitualPuzzle {
    pub caster_id: String,
    pub caster_category: Category,
    pub phase: RitualPhase,
    pub sequence: [u8; SEQUENCE_LEN],
    pub attempts: Vec<u8>,
    /// Percent, 0..=100
    pub damage_reduction: u32,
    pub round_created: u32,
    pub trigger_round: u32,
    /// End of the display window
    pub display_until: DateTime<Utc>,
}

/// Four independent draws, repeats allowed
pub fn draw_sequence<R: Rng + ?Sized>(rng: &mut R) -> [u8; SEQUENCE_LEN] {
    let mut sequence = [0; SEQUENCE_LEN];
    for slot in sequence.iter_mut() {
        *slot = rng.random_range(0..SLOT_COUNT);
    }
    sequence
}

impl RitualPuzzle {
    pub fn new(
        caster_id: &str,
        caster_category: Category,
        sequence: [u8; SEQUENCE_LEN],
        round: u32,
        now: DateTime<Utc>,
        display_ms: u64,
    ) -> Self {
        Self {
            caster_id: caster_id.to_string(),
            caster_category,
            phase: RitualPhase::SequenceCommitted,
            sequence,
            attempts: Vec::new(),
            damage_reduction: 0,
            round_created: round,
            trigger_round: round + 1,
            display_until: now + Duration::milliseconds(display_ms as i64),
        }
    }

    /// Phase as of `now`; the display window closes lazily
    pub fn phase_at(&self, now: DateTime<Utc>) -> RitualPhase {
        match self.phase {
            RitualPhase::SequenceCommitted if now >= self.display_until => {
                RitualPhase::CollectingAttempts
            }
            phase => phase,
        }
    }

    /// Commit the lazily computed phase
    pub fn refresh(&mut self, now: DateTime<Utc>) -> RitualPhase {
        self.phase = self.phase_at(now);
        self.phase
    }

    fn correct_so_far(&self) -> u32 {
        self.attempts
            .iter()
            .zip(self.sequence.iter())
            .take_while(|(guess, secret)| guess == secret)
            .count() as u32
    }

    /// Submit the next guess
    pub fn record_attempt(&mut self, slot: u8, now: DateTime<Utc>) -> AttemptOutcome {
        if self.refresh(now) != RitualPhase::CollectingAttempts
            || self.attempts.len() >= SEQUENCE_LEN
        {
            return AttemptOutcome::Ignored;
        }

        let expected = self.sequence[self.attempts.len()];
        self.attempts.push(slot);
        self.damage_reduction = self.correct_so_far() * REDUCTION_STEP;

        if slot != expected {
            self.phase = RitualPhase::Resolved;
            return AttemptOutcome::Failed {
                damage_reduction: self.damage_reduction,
            };
        }

        if self.attempts.len() == SEQUENCE_LEN {
            self.phase = RitualPhase::Resolved;
            AttemptOutcome::Completed {
                damage_reduction: self.damage_reduction,
            }
        } else {
            AttemptOutcome::Correct {
                damage_reduction: self.damage_reduction,
            }
        }
    }

    pub fn is_due(&self, round: u32) -> bool {
        round >= self.trigger_round
    }

    /// Payload after reduction, rounded down
    pub fn scaled_damage(&self, base: u32) -> u32 {
        let keep = 100 - self.damage_reduction.min(100);
        (base as u64 * keep as u64 / 100) as u32
    }

    /// Whether the payload is fully negated
    pub fn is_canceled(&self) -> bool {
        self.damage_reduction >= 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn collecting(sequence: [u8; 4]) -> (RitualPuzzle, DateTime<Utc>) {
        let start = Utc::now();
        let ritual = RitualPuzzle::new("shaman", Category::Opposing, sequence, 2, start, 3000);
        (ritual, start + Duration::milliseconds(3000))
    }

    #[test]
    fn test_draw_sequence_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert!(draw_sequence(&mut rng).iter().all(|&s| s < SLOT_COUNT));
        }
    }

    #[test]
    fn test_attempts_ignored_during_display() {
        let (mut ritual, later) = collecting([2, 0, 3, 1]);
        let early = later - Duration::milliseconds(1);
        assert_eq!(ritual.record_attempt(2, early), AttemptOutcome::Ignored);
        assert!(ritual.attempts.is_empty());
        assert_eq!(ritual.phase, RitualPhase::SequenceCommitted);
        assert_eq!(ritual.phase_at(later), RitualPhase::CollectingAttempts);
    }

    #[test]
    fn test_perfect_run_cancels_payload() {
        let (mut ritual, now) = collecting([2, 0, 3, 1]);
        for slot in [2, 0, 3] {
            assert!(matches!(
                ritual.record_attempt(slot, now),
                AttemptOutcome::Correct { .. }
            ));
        }
        assert_eq!(
            ritual.record_attempt(1, now),
            AttemptOutcome::Completed {
                damage_reduction: 100
            }
        );
        assert_eq!(ritual.phase, RitualPhase::Resolved);
        assert!(ritual.is_canceled());
        assert_eq!(ritual.scaled_damage(40), 0);

        assert_eq!(ritual.record_attempt(1, now), AttemptOutcome::Ignored);
    }

    #[test]
    fn test_mismatch_stops_collection() {
        let (mut ritual, now) = collecting([2, 0, 3, 1]);
        ritual.record_attempt(2, now);
        assert_eq!(
            ritual.record_attempt(1, now),
            AttemptOutcome::Failed {
                damage_reduction: 25
            }
        );
        assert_eq!(ritual.record_attempt(3, now), AttemptOutcome::Ignored);
        assert_eq!(ritual.attempts, vec![2, 1]);
        assert_eq!(ritual.scaled_damage(30), 22);
    }

    #[test]
    fn test_trigger_round() {
        let (ritual, _) = collecting([0, 0, 0, 0]);
        assert!(!ritual.is_due(2));
        assert!(ritual.is_due(3));
        assert!(ritual.is_due(5));
    }
}
