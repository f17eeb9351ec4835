//! Per-tick snapshot of the host's networked entities.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use super::entity::{EntityState, NetworkId, TileCoord};

/// Full description of every networked entity on one host tick, plus the
/// tile destructions accumulated since the previous snapshot.
///
/// Entities are keyed by [`NetworkId`]; an id missing from a snapshot means
/// the entity no longer exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Visible state keyed by network id.
    pub entities: BTreeMap<NetworkId, EntityState>,
    /// Tiles destroyed since the last snapshot, in destruction order.
    #[serde(default)]
    pub destroyed_tiles: Vec<TileCoord>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entity.
    pub fn insert(&mut self, id: NetworkId, state: EntityState) {
        self.entities.insert(id, state);
    }

    /// Look up an entity.
    pub fn get(&self, id: &NetworkId) -> Option<&EntityState> {
        self.entities.get(id)
    }

    /// Whether `id` is present.
    pub fn contains(&self, id: &NetworkId) -> bool {
        self.entities.contains_key(id)
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True when the snapshot carries no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
