//! Difficulty Presets and Spawn Queue
//!
//! A difficulty is a name plus a count per enemy type. Both peers derive the
//! enemy spawn queue from the difficulty and the session seed alone, so the
//! host and the guest agree on spawn order without exchanging it.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::core::rng::DeterministicRng;

/// Enemy counts for one run.
///
/// Wire form is flat: `{"name": "Multiplayer", "enemyTankType1": 15, ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyConfig {
    /// Display name.
    pub name: String,
    /// Count per enemy type name.
    #[serde(flatten)]
    pub enemies: BTreeMap<String, u32>,
}

impl DifficultyConfig {
    /// Build a difficulty from `(enemy type, count)` pairs.
    pub fn new<'a>(name: &str, enemies: impl IntoIterator<Item = (&'a str, u32)>) -> Self {
        Self {
            name: name.to_string(),
            enemies: enemies
                .into_iter()
                .map(|(kind, count)| (kind.to_string(), count))
                .collect(),
        }
    }

    /// Preset used when a two-player session starts without an explicit choice.
    pub fn multiplayer() -> Self {
        Self::new("Multiplayer", [
            ("enemyTankType1", 15),
            ("enemyTankType2", 15),
            ("enemyTankType3", 10),
            ("enemyTankType4", 5),
        ])
    }

    /// Easy preset.
    pub fn easy() -> Self {
        Self::new("Easy", [
            ("enemyTankType1", 20),
            ("enemyTankType2", 20),
            ("enemyTankType3", 10),
            ("enemyTankType4", 5),
        ])
    }

    /// Medium preset.
    pub fn medium() -> Self {
        Self::new("Medium", [
            ("enemyTankType1", 10),
            ("enemyTankType2", 10),
            ("enemyTankType3", 15),
            ("enemyTankType4", 10),
        ])
    }

    /// Hard preset.
    pub fn hard() -> Self {
        Self::new("Hard", [
            ("enemyTankType1", 10),
            ("enemyTankType2", 10),
            ("enemyTankType3", 20),
            ("enemyTankType4", 20),
        ])
    }

    /// Nightmare preset.
    pub fn nightmare() -> Self {
        Self::new("Nightmare", [("enemyTankType4", 40), ("enemyTankType5", 10)])
    }

    /// Look up a preset by case-insensitive name.
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "easy" => Some(Self::easy()),
            "medium" => Some(Self::medium()),
            "hard" => Some(Self::hard()),
            "nightmare" => Some(Self::nightmare()),
            "multiplayer" => Some(Self::multiplayer()),
            _ => None,
        }
    }

    /// Total enemies across all types.
    pub fn total_enemies(&self) -> u32 {
        self.enemies.values().sum()
    }
}

impl Default for DifficultyConfig {
    fn default() -> Self {
        Self::multiplayer()
    }
}

/// One entry of the spawn queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnemySpawn {
    /// Enemy type name.
    pub enemy_type: String,
    /// Index into the level's enemy spawn points.
    pub spawn_point: u32,
}

/// Ordered enemy spawns for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnQueue {
    spawns: Vec<EnemySpawn>,
}

impl SpawnQueue {
    /// Derive the queue from a session seed.
    ///
    /// Enemy types are expanded in name order, shuffled, then each spawn is
    /// given one of `spawn_points` locations. Identical inputs always give
    /// identical queues.
    pub fn from_seed(seed: u32, difficulty: &DifficultyConfig, spawn_points: u32) -> Self {
        let mut rng = DeterministicRng::from_session_seed(seed);

        let mut types: Vec<&str> = difficulty
            .enemies
            .iter()
            .flat_map(|(kind, count)| std::iter::repeat(kind.as_str()).take(*count as usize))
            .collect();
        rng.shuffle(&mut types);

        let spawns = types
            .into_iter()
            .map(|kind| EnemySpawn {
                enemy_type: kind.to_string(),
                spawn_point: rng.next_int(spawn_points),
            })
            .collect();

        Self { spawns }
    }

    /// Spawns in order.
    pub fn spawns(&self) -> &[EnemySpawn] {
        &self.spawns
    }

    /// Number of spawns.
    pub fn len(&self) -> usize {
        self.spawns.len()
    }

    /// True when there is nothing to spawn.
    pub fn is_empty(&self) -> bool {
        self.spawns.is_empty()
    }
}

impl IntoIterator for SpawnQueue {
    type Item = EnemySpawn;
    type IntoIter = std::vec::IntoIter<EnemySpawn>;

    fn into_iter(self) -> Self::IntoIter {
        self.spawns.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_multiplayer_preset() {
        let preset = DifficultyConfig::multiplayer();
        assert_eq!(preset.name, "Multiplayer");
        assert_eq!(preset.enemies["enemyTankType1"], 15);
        assert_eq!(preset.enemies["enemyTankType4"], 5);
        assert_eq!(preset.total_enemies(), 45);
        assert_eq!(DifficultyConfig::default(), preset);
    }

    #[test]
    fn test_flat_wire_shape() {
        let json = serde_json::to_value(DifficultyConfig::nightmare()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "Nightmare", "enemyTankType4": 40, "enemyTankType5": 10})
        );

        let parsed: DifficultyConfig =
            serde_json::from_str(r#"{"name":"Custom","enemyTankType2":3}"#).unwrap();
        assert_eq!(parsed.total_enemies(), 3);
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(DifficultyConfig::preset("HARD"), Some(DifficultyConfig::hard()));
        assert_eq!(DifficultyConfig::preset("impossible"), None);
    }

    #[test]
    fn test_spawn_queue_counts() {
        let difficulty = DifficultyConfig::medium();
        let queue = SpawnQueue::from_seed(77, &difficulty, 12);
        assert_eq!(queue.len() as u32, difficulty.total_enemies());

        let type3 = queue.spawns().iter().filter(|s| s.enemy_type == "enemyTankType3").count();
        assert_eq!(type3, 15);
        assert!(queue.spawns().iter().all(|s| s.spawn_point < 12));
    }

    #[test]
    fn test_spawn_queue_seed_sensitivity() {
        let difficulty = DifficultyConfig::hard();
        let a = SpawnQueue::from_seed(1, &difficulty, 8);
        let b = SpawnQueue::from_seed(2, &difficulty, 8);
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn prop_same_seed_same_queue(seed in 0u32..=999_999, points in 1u32..32) {
            let difficulty = DifficultyConfig::multiplayer();
            let host = SpawnQueue::from_seed(seed, &difficulty, points);
            let guest = SpawnQueue::from_seed(seed, &difficulty, points);
            prop_assert_eq!(host, guest);
        }
    }
}
