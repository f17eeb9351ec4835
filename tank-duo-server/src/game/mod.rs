//! Game Model
//!
//! The part of the game that crosses the network. The server never simulates;
//! it relays these types between host and guest.
//!
//! ## Module Structure
//!
//! - `entity`: Network ids, entity kinds, statuses, tile coordinates
//! - `snapshot`: Per-tick entity snapshot plus tile diff
//! - `difficulty`: Difficulty presets and the seeded spawn queue

pub mod entity;
pub mod snapshot;
pub mod difficulty;

// Re-export key types
pub use entity::{EntityKind, EntityState, Facing, NetworkId, Status, TileCoord};
pub use snapshot::Snapshot;
pub use difficulty::{DifficultyConfig, EnemySpawn, SpawnQueue};
