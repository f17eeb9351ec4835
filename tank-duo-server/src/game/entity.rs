//! Networked Entity Model
//!
//! The closed set of entity kinds that cross the wire, with only the fields
//! each kind needs. Host and guest both speak this vocabulary; the server
//! only relays it.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;

// =============================================================================
// NETWORK IDS
// =============================================================================

/// Host-assigned identifier that correlates an entity across snapshots.
///
/// Opaque on the wire. The two player tanks use fixed ids; every other entity
/// gets `ent_<n>` from a per-run counter on the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    /// Prefix for counter-assigned ids.
    const ENTITY_PREFIX: &'static str = "ent_";

    /// Id of the tank driven by the host.
    pub fn host_player() -> Self {
        Self("player_1".to_string())
    }

    /// Id of the tank driven by the guest.
    pub fn guest_player() -> Self {
        Self("player_2".to_string())
    }

    /// Id for the `seq`-th entity assigned during a host run.
    pub fn entity(seq: u64) -> Self {
        Self(format!("{}{}", Self::ENTITY_PREFIX, seq))
    }

    /// Counter value for `ent_<n>` ids.
    pub fn sequence(&self) -> Option<u64> {
        self.0.strip_prefix(Self::ENTITY_PREFIX)?.parse().ok()
    }

    /// True for either player tank.
    pub fn is_player(&self) -> bool {
        *self == Self::host_player() || *self == Self::guest_player()
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// Direction a tank is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facing {
    /// Towards -Y.
    Up,
    /// Towards +Y.
    Down,
    /// Towards -X.
    Left,
    /// Towards +X.
    Right,
}

impl Facing {
    fn as_str(self) -> &'static str {
        match self {
            Facing::Up => "up",
            Facing::Down => "down",
            Facing::Left => "left",
            Facing::Right => "right",
        }
    }
}

/// Animation status of a tank: facing plus whether it is moving.
///
/// Serialized as `"right"` when moving and `"right_idle"` when not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Status {
    /// Facing direction.
    pub facing: Facing,
    /// Moving (true) or idle (false).
    pub moving: bool,
}

impl Status {
    /// Moving towards `facing`.
    pub const fn moving(facing: Facing) -> Self {
        Self { facing, moving: true }
    }

    /// Idle, facing `facing`.
    pub const fn idle(facing: Facing) -> Self {
        Self { facing, moving: false }
    }

    /// Status implied by a movement direction.
    ///
    /// A dominant vertical component faces up/down, otherwise left/right
    /// (ties go horizontal). A zero direction keeps the current facing and
    /// goes idle.
    pub fn from_direction(current: Status, direction: Vec2) -> Self {
        if direction.is_zero() {
            return Self::idle(current.facing);
        }
        let facing = if direction.y.abs() > direction.x.abs() {
            if direction.y < 0.0 { Facing::Up } else { Facing::Down }
        } else if direction.x < 0.0 {
            Facing::Left
        } else {
            Facing::Right
        };
        Self::moving(facing)
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::idle(Facing::Up)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.moving {
            f.write_str(self.facing.as_str())
        } else {
            write!(f, "{}_idle", self.facing.as_str())
        }
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for Status {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let (name, moving) = match raw.strip_suffix("_idle") {
            Some(name) => (name, false),
            None => (raw.as_str(), true),
        };
        let facing = match name {
            "up" => Facing::Up,
            "down" => Facing::Down,
            "left" => Facing::Left,
            "right" => Facing::Right,
            _ => return Err(format!("unknown status '{}'", raw)),
        };
        Ok(Self { facing, moving })
    }
}

// =============================================================================
// TILES
// =============================================================================

/// Grid coordinate of a map tile. Serialized as `[row, col]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct TileCoord {
    /// Grid row.
    pub row: i32,
    /// Grid column.
    pub col: i32,
}

impl TileCoord {
    /// Create a coordinate.
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }
}

impl From<[i32; 2]> for TileCoord {
    fn from([row, col]: [i32; 2]) -> Self {
        Self { row, col }
    }
}

impl From<TileCoord> for [i32; 2] {
    fn from(tile: TileCoord) -> Self {
        [tile.row, tile.col]
    }
}

// =============================================================================
// ENTITY KINDS
// =============================================================================

/// Kind-specific state of a networked entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityKind {
    /// A player tank.
    Player {
        /// Remaining health.
        health: i32,
        /// Animation status.
        status: Status,
    },
    /// An AI tank.
    Enemy {
        /// Enemy type name (e.g. `enemyTankType1`).
        name: String,
        /// Remaining health.
        health: i32,
        /// Animation status.
        status: Status,
    },
    /// A projectile in flight.
    Bullet,
    /// A short-lived explosion effect.
    Explosion,
    /// A collectible pickup.
    PowerUp {
        /// Pickup type (e.g. `shield`, `wrench`).
        power_type: String,
    },
    /// The base structure the players defend.
    Structure {
        /// Remaining health.
        health: i32,
    },
    /// A wall tile that can be shot down.
    DestructibleTile {
        /// Remaining health.
        health: i32,
    },
}

impl EntityKind {
    /// Wire name of the kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            EntityKind::Player { .. } => "player",
            EntityKind::Enemy { .. } => "enemy",
            EntityKind::Bullet => "bullet",
            EntityKind::Explosion => "explosion",
            EntityKind::PowerUp { .. } => "power_up",
            EntityKind::Structure { .. } => "structure",
            EntityKind::DestructibleTile { .. } => "destructible_tile",
        }
    }

    /// Health, for kinds that have it.
    pub fn health(&self) -> Option<i32> {
        match self {
            EntityKind::Player { health, .. }
            | EntityKind::Enemy { health, .. }
            | EntityKind::Structure { health }
            | EntityKind::DestructibleTile { health } => Some(*health),
            _ => None,
        }
    }

    /// Status, for kinds that have it.
    pub fn status(&self) -> Option<Status> {
        match self {
            EntityKind::Player { status, .. } | EntityKind::Enemy { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Overwrite health, if this kind has it.
    pub fn set_health(&mut self, value: i32) {
        match self {
            EntityKind::Player { health, .. }
            | EntityKind::Enemy { health, .. }
            | EntityKind::Structure { health }
            | EntityKind::DestructibleTile { health } => *health = value,
            _ => {}
        }
    }

    /// Overwrite status, if this kind has it.
    pub fn set_status(&mut self, value: Status) {
        if let EntityKind::Player { status, .. } | EntityKind::Enemy { status, .. } = self {
            *status = value;
        }
    }
}

/// Visible state of one entity in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// World position (center).
    pub pos: Vec2,
    /// Kind and kind-specific fields.
    #[serde(flatten)]
    pub kind: EntityKind,
}

impl EntityState {
    /// Create an entity state.
    pub fn new(pos: Vec2, kind: EntityKind) -> Self {
        Self { pos, kind }
    }
}
