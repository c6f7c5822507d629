//! Area effect zones
//!
//! Timed terrain regions (fire, ice, light). Expiry is evaluated lazily on
//! every turn advance: a zone created on round R with duration D is live
//! while `current - R < D`, i.e. through round R+D-1 inclusive.

use serde::{Deserialize, Serialize};

use super::entity::Position;
use super::error::{CombatError, CombatResult};

/// Largest burst radius accepted
pub const MAX_BURST_RADIUS: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    Fire,
    Ice,
    Light,
}

/// Which cells a new zone covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ZoneShape {
    /// Explicit cell list
    Cells { cells: Vec<Position> },
    /// Square burst around a center cell
    Burst { center: Position, radius: u32 },
}

impl ZoneShape {
    /// Expand to a deduplicated cell list
    pub fn cells(&self) -> Vec<Position> {
        let mut cells = match self {
            ZoneShape::Cells { cells } => cells.clone(),
            ZoneShape::Burst { center, radius } => {
                let r = (*radius).min(MAX_BURST_RADIUS) as i32;
                (-r..=r)
                    .flat_map(|dx| (-r..=r).map(move |dy| (dx, dy)))
                    .map(|(dx, dy)| Position::new(center.x + dx, center.y + dy))
                    .collect()
            }
        };
        cells.sort_by_key(|p| (p.x, p.y));
        cells.dedup();
        cells
    }
}

/// A live terrain zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaEffectZone {
    pub id: String,
    pub kind: ZoneKind,
    /// Entity that created the zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
    pub cells: Vec<Position>,
    /// Per-tick magnitude, where the kind has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<u32>,
    /// Lifetime in rounds
    pub duration: u32,
    pub round_created: u32,
}

impl AreaEffectZone {
    pub fn elapsed(&self, current_round: u32) -> u32 {
        current_round.saturating_sub(self.round_created)
    }

    pub fn is_live(&self, current_round: u32) -> bool {
        self.elapsed(current_round) < self.duration
    }

    pub fn covers(&self, cell: &Position) -> bool {
        self.cells.contains(cell)
    }
}

/// Request for a new zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneRequest {
    pub kind: ZoneKind,
    #[serde(default)]
    pub origin_id: Option<String>,
    #[serde(flatten)]
    pub shape: ZoneShape,
    #[serde(default)]
    pub magnitude: Option<u32>,
    pub duration: u32,
}

/// Registry of zones in creation order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneRegistry {
    zones: Vec<AreaEffectZone>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a zone stamped with `round_created`
    pub fn create(&mut self, request: ZoneRequest, round_created: u32) -> CombatResult<&AreaEffectZone> {
        if request.duration == 0 {
            return Err(CombatError::invalid("zone duration must be at least one round"));
        }

        let cells = request.shape.cells();
        if cells.is_empty() {
            return Err(CombatError::invalid("zone covers no cells"));
        }

        self.zones.push(AreaEffectZone {
            id: uuid::Uuid::new_v4().to_string(),
            kind: request.kind,
            origin_id: request.origin_id,
            cells,
            magnitude: request.magnitude,
            duration: request.duration,
            round_created,
        });

        let index = self.zones.len() - 1;
        Ok(&self.zones[index])
    }

    /// Remove every zone whose lifetime has run out; returns the removed ones
    pub fn prune(&mut self, current_round: u32) -> Vec<AreaEffectZone> {
        let (live, expired): (Vec<_>, Vec<_>) = std::mem::take(&mut self.zones)
            .into_iter()
            .partition(|z| z.is_live(current_round));
        self.zones = live;
        expired
    }

    pub fn remove(&mut self, zone_id: &str) -> CombatResult<AreaEffectZone> {
        let index = self
            .zones
            .iter()
            .position(|z| z.id == zone_id)
            .ok_or_else(|| CombatError::zone(zone_id))?;
        Ok(self.zones.remove(index))
    }

    pub fn get(&self, zone_id: &str) -> Option<&AreaEffectZone> {
        self.zones.iter().find(|z| z.id == zone_id)
    }

    /// Zones covering a cell
    pub fn zones_at(&self, cell: &Position) -> Vec<&AreaEffectZone> {
        self.zones.iter().filter(|z| z.covers(cell)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AreaEffectZone> {
        self.zones.iter()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
