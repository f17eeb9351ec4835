//! Guest Reconciliation Adapter
//!
//! The guest runs no simulation of its own. It mirrors the host's entities
//! from snapshots and streams its own input upstream every tick.
//!
//! Reconciliation of one snapshot:
//! 1. Known ids blend toward the new position and take the new health/status
//!    (the local tank keeps the status set by local input).
//! 2. Unknown ids are created from the snapshot's fields.
//! 3. Known ids missing from the snapshot are destroyed, except the two
//!    player tanks.
//! 4. Destroyed tiles are removed if still present.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace, warn};

use tank_duo::game::{EntityKind, EntityState, NetworkId, Snapshot, Status, TileCoord};
use tank_duo::network::protocol::{ActionData, ActionType, EventKind, ServerMessage};
use tank_duo::Vec2;

use crate::network::{ClientTransport, Inbox, TransportError};

/// Share of the remaining distance covered per snapshot.
pub const INTERPOLATION_FACTOR: f32 = 0.35;

/// Starting health of a player tank.
pub const PLAYER_HEALTH: i32 = 3;

/// Host tank spawn point.
pub const HOST_SPAWN: Vec2 = Vec2::new(2020.0, 2700.0);

/// Guest tank spawn point.
pub const GUEST_SPAWN: Vec2 = Vec2::new(2120.0, 2700.0);

/// Guest-side copy of a host entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MirroredEntity {
    /// Host-assigned id.
    pub id: NetworkId,
    /// Displayed position.
    pub pos: Vec2,
    /// Last authoritative position.
    pub target: Vec2,
    /// Kind and kind-specific fields.
    pub kind: EntityKind,
}

impl MirroredEntity {
    fn from_state(id: NetworkId, state: &EntityState) -> Self {
        Self {
            id,
            pos: state.pos,
            target: state.pos,
            kind: state.kind.clone(),
        }
    }
}

/// What one snapshot changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Entities already known.
    pub updated: usize,
    /// Entities seen for the first time.
    pub created: Vec<NetworkId>,
    /// Entities removed because the host no longer lists them.
    pub destroyed: Vec<NetworkId>,
    /// Tiles removed from the local map.
    pub tiles_removed: Vec<TileCoord>,
}

/// The guest's mirror of the host world.
#[derive(Debug, Clone)]
pub struct GuestMirror {
    entities: BTreeMap<NetworkId, MirroredEntity>,
    tiles: BTreeSet<TileCoord>,
    interpolation: f32,
}

impl GuestMirror {
    /// Mirror a fresh level: both tanks at their spawns plus the level's
    /// destructible tiles.
    pub fn new(tiles: impl IntoIterator<Item = TileCoord>) -> Self {
        let mut mirror = Self {
            entities: BTreeMap::new(),
            tiles: tiles.into_iter().collect(),
            interpolation: INTERPOLATION_FACTOR,
        };
        mirror.spawn_player(NetworkId::host_player(), HOST_SPAWN);
        mirror.spawn_player(NetworkId::guest_player(), GUEST_SPAWN);
        mirror
    }

    /// Use a different interpolation factor, clamped to `(0, 1]`.
    pub fn with_interpolation(mut self, factor: f32) -> Self {
        self.interpolation = if factor.is_finite() && factor > 0.0 { factor.min(1.0) } else { INTERPOLATION_FACTOR };
        self
    }

    /// Place (or reset) a player tank.
    pub fn spawn_player(&mut self, id: NetworkId, pos: Vec2) {
        let state = EntityState::new(
            pos,
            EntityKind::Player { health: PLAYER_HEALTH, status: Status::default() },
        );
        self.entities.insert(id.clone(), MirroredEntity::from_state(id, &state));
    }

    /// Reconcile against one snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let local_id = NetworkId::guest_player();

        for (id, state) in &snapshot.entities {
            match self.entities.get_mut(id) {
                Some(entity) => {
                    entity.target = state.pos;
                    entity.pos = entity.pos.lerp(state.pos, self.interpolation);

                    if entity.kind.type_name() != state.kind.type_name() {
                        warn!("Entity {} changed kind {} -> {}", id, entity.kind.type_name(), state.kind.type_name());
                        let local_status = entity.kind.status().filter(|_| *id == local_id);
                        entity.kind = state.kind.clone();
                        if let Some(status) = local_status {
                            entity.kind.set_status(status);
                        }
                        report.updated += 1;
                        continue;
                    }
                    if let Some(health) = state.kind.health() {
                        entity.kind.set_health(health);
                    }
                    if *id != local_id {
                        if let Some(status) = state.kind.status() {
                            entity.kind.set_status(status);
                        }
                    }
                    report.updated += 1;
                }
                None => {
                    trace!("Mirroring new {} {}", state.kind.type_name(), id);
                    self.entities.insert(id.clone(), MirroredEntity::from_state(id.clone(), state));
                    report.created.push(id.clone());
                }
            }
        }

        self.entities.retain(|id, _| {
            let keep = id.is_player() || snapshot.contains(id);
            if !keep {
                report.destroyed.push(id.clone());
            }
            keep
        });

        for tile in &snapshot.destroyed_tiles {
            if self.tiles.remove(tile) {
                report.tiles_removed.push(*tile);
            }
        }

        report
    }

    /// Set the local tank's status from local input.
    pub fn set_local_status(&mut self, status: Status) {
        if let Some(entity) = self.entities.get_mut(&NetworkId::guest_player()) {
            entity.kind.set_status(status);
        }
    }

    /// The guest's own tank.
    pub fn local_player(&self) -> Option<&MirroredEntity> {
        self.entities.get(&NetworkId::guest_player())
    }

    /// Look up a mirrored entity.
    pub fn entity(&self, id: &NetworkId) -> Option<&MirroredEntity> {
        self.entities.get(id)
    }

    /// All mirrored entities, by id.
    pub fn entities(&self) -> impl Iterator<Item = &MirroredEntity> {
        self.entities.values()
    }

    /// Number of mirrored entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether nothing is mirrored.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Whether a destructible tile is still standing.
    pub fn has_tile(&self, tile: TileCoord) -> bool {
        self.tiles.contains(&tile)
    }

    /// Destructible tiles still standing.
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }
}

/// [`GuestMirror`] wired to a transport.
pub struct GuestSession {
    mirror: GuestMirror,
    inbox: Inbox,
}

impl GuestSession {
    /// Start buffering snapshots from `transport`.
    pub fn attach(transport: &ClientTransport, mirror: GuestMirror) -> Self {
        Self {
            mirror,
            inbox: Inbox::attach(transport, &[EventKind::SnapshotUpdate]),
        }
    }

    /// Apply every snapshot received since the last call, oldest first.
    pub fn pump(&mut self) -> Vec<ReconcileReport> {
        self.inbox
            .drain()
            .into_iter()
            .filter_map(|msg| match msg {
                ServerMessage::SnapshotUpdate { snapshot } => Some(self.mirror.apply_snapshot(&snapshot)),
                other => {
                    warn!("Ignoring {:?} on guest inbox", other.kind());
                    None
                }
            })
            .collect()
    }

    /// Snapshots waiting for [`GuestSession::pump`].
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    /// Send this tick's input. Fire-and-forget: a full queue drops it.
    pub fn send_input(
        &mut self,
        transport: &ClientTransport,
        direction: Vec2,
        attack: bool,
    ) -> Result<(), TransportError> {
        let current = self
            .mirror
            .local_player()
            .and_then(|p| p.kind.status())
            .unwrap_or_default();
        self.mirror.set_local_status(Status::from_direction(current, direction));

        match transport.send_action(ActionType::Input, ActionData::new(direction, attack)) {
            Err(TransportError::QueueFull) => {
                debug!("Input dropped, outbound queue full");
                Ok(())
            }
            other => other,
        }
    }

    /// The mirror.
    pub fn mirror(&self) -> &GuestMirror {
        &self.mirror
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tank_duo::game::Facing;

    fn snapshot(entries: Vec<(NetworkId, EntityState)>) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for (id, state) in entries {
            snapshot.insert(id, state);
        }
        snapshot
    }

    fn enemy(x: f32, y: f32, health: i32) -> EntityState {
        EntityState::new(
            Vec2::new(x, y),
            EntityKind::Enemy {
                name: "enemyTankType1".to_string(),
                health,
                status: Status::moving(Facing::Left),
            },
        )
    }

    #[test]
    fn test_new_mirror_has_both_players() {
        let mirror = GuestMirror::new([TileCoord::new(3, 7)]);
        assert_eq!(mirror.len(), 2);
        assert_eq!(mirror.entity(&NetworkId::host_player()).unwrap().pos, HOST_SPAWN);
        assert_eq!(mirror.local_player().unwrap().pos, GUEST_SPAWN);
        assert!(mirror.has_tile(TileCoord::new(3, 7)));
    }

    #[test]
    fn test_unknown_id_created_with_fields() {
        let mut mirror = GuestMirror::new([]);
        let report = mirror.apply_snapshot(&snapshot(vec![(NetworkId::entity(1), enemy(100.0, 50.0, 2))]));

        assert_eq!(report.created, vec![NetworkId::entity(1)]);
        let entity = mirror.entity(&NetworkId::entity(1)).unwrap();
        assert_eq!(entity.pos, Vec2::new(100.0, 50.0));
        assert_eq!(entity.kind.health(), Some(2));
    }

    #[test]
    fn test_known_id_blends_and_overwrites() {
        let mut mirror = GuestMirror::new([]);
        mirror.apply_snapshot(&snapshot(vec![(NetworkId::entity(1), enemy(0.0, 0.0, 2))]));
        let report = mirror.apply_snapshot(&snapshot(vec![(NetworkId::entity(1), enemy(100.0, 0.0, 1))]));

        assert_eq!(report.updated, 1);
        let entity = mirror.entity(&NetworkId::entity(1)).unwrap();
        assert!((entity.pos.x - 100.0 * INTERPOLATION_FACTOR).abs() < 1e-4);
        assert_eq!(entity.target, Vec2::new(100.0, 0.0));
        assert_eq!(entity.kind.health(), Some(1));
    }

    #[test]
    fn test_missing_id_destroyed_players_kept() {
        let mut mirror = GuestMirror::new([]);
        mirror.apply_snapshot(&snapshot(vec![(NetworkId::entity(1), enemy(0.0, 0.0, 2))]));
        let report = mirror.apply_snapshot(&Snapshot::new());

        assert_eq!(report.destroyed, vec![NetworkId::entity(1)]);
        assert!(mirror.entity(&NetworkId::host_player()).is_some());
        assert!(mirror.local_player().is_some());
    }

    #[test]
    fn test_local_status_not_overwritten() {
        let mut mirror = GuestMirror::new([]);
        mirror.set_local_status(Status::moving(Facing::Left));

        let remote = EntityState::new(
            GUEST_SPAWN,
            EntityKind::Player { health: 2, status: Status::idle(Facing::Up) },
        );
        mirror.apply_snapshot(&snapshot(vec![(NetworkId::guest_player(), remote)]));

        let local = mirror.local_player().unwrap();
        assert_eq!(local.kind.status(), Some(Status::moving(Facing::Left)));
        assert_eq!(local.kind.health(), Some(2));
    }

    #[test]
    fn test_local_status_survives_kind_change() {
        let mut mirror = GuestMirror::new([]);
        mirror.set_local_status(Status::moving(Facing::Right));

        let remote = EntityState::new(
            GUEST_SPAWN,
            EntityKind::Enemy {
                name: "enemyTankType1".to_string(),
                health: 1,
                status: Status::idle(Facing::Down),
            },
        );
        mirror.apply_snapshot(&snapshot(vec![(NetworkId::guest_player(), remote)]));

        let local = mirror.local_player().unwrap();
        assert_eq!(local.kind.type_name(), "enemy");
        assert_eq!(local.kind.status(), Some(Status::moving(Facing::Right)));
        assert_eq!(local.kind.health(), Some(1));
    }

    #[test]
    fn test_remote_player_status_overwritten() {
        let mut mirror = GuestMirror::new([]);
        let remote = EntityState::new(
            HOST_SPAWN,
            EntityKind::Player { health: 3, status: Status::moving(Facing::Down) },
        );
        mirror.apply_snapshot(&snapshot(vec![(NetworkId::host_player(), remote)]));
        assert_eq!(
            mirror.entity(&NetworkId::host_player()).unwrap().kind.status(),
            Some(Status::moving(Facing::Down))
        );
    }

    #[test]
    fn test_destroyed_tile_removed_once() {
        let mut mirror = GuestMirror::new([TileCoord::new(3, 7), TileCoord::new(4, 7)]);
        let mut diff = Snapshot::new();
        diff.destroyed_tiles = vec![TileCoord::new(3, 7), TileCoord::new(9, 9)];

        let report = mirror.apply_snapshot(&diff);
        assert_eq!(report.tiles_removed, vec![TileCoord::new(3, 7)]);
        assert!(!mirror.has_tile(TileCoord::new(3, 7)));
        assert_eq!(mirror.tile_count(), 1);

        assert!(mirror.apply_snapshot(&diff).tiles_removed.is_empty());
    }

    #[test]
    fn test_with_interpolation_clamps() {
        let mirror = GuestMirror::new([]).with_interpolation(4.0);
        assert_eq!(mirror.interpolation, 1.0);
        let mirror = GuestMirror::new([]).with_interpolation(-1.0);
        assert_eq!(mirror.interpolation, INTERPOLATION_FACTOR);
    }

    #[test]
    fn test_send_input_sets_local_status_offline() {
        let transport = ClientTransport::default();
        let mut guest = GuestSession::attach(&transport, GuestMirror::new([]));

        let err = guest.send_input(&transport, Vec2::new(0.0, -1.0), false).unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
        assert_eq!(
            guest.mirror().local_player().unwrap().kind.status(),
            Some(Status::moving(Facing::Up))
        );
    }

    proptest! {
        #[test]
        fn prop_position_converges_without_overshoot(
            tx in -5000.0f32..5000.0,
            ty in -5000.0f32..5000.0,
            steps in 1usize..30,
        ) {
            let mut mirror = GuestMirror::new([]);
            mirror.apply_snapshot(&snapshot(vec![(NetworkId::entity(1), enemy(0.0, 0.0, 2))]));

            let target = Vec2::new(tx, ty);
            let mut last = target.length();
            for _ in 0..steps {
                mirror.apply_snapshot(&snapshot(vec![(NetworkId::entity(1), enemy(tx, ty, 2))]));
                let pos = mirror.entity(&NetworkId::entity(1)).unwrap().pos;
                let dist = pos.distance(target);
                prop_assert!(dist <= last + 1e-2);
                // Stays on the segment from the start to the target.
                prop_assert!(pos.length() <= target.length() + 1e-2);
                last = dist;
            }
        }
    }
}
