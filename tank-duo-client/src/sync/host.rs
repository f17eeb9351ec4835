//! Host Sync Adapter
//!
//! Runs on the authoritative peer. Each tick it applies the guest's buffered
//! input to the guest tank, steps the simulation, labels any new entity with a
//! network id and ships a full snapshot plus the tiles destroyed since the
//! last one.

use tracing::{debug, warn};

use tank_duo::game::{EntityState, NetworkId, Snapshot, Status, TileCoord};
use tank_duo::network::protocol::{ActionData, ActionType, EventKind, ServerMessage, Slot};
use tank_duo::Vec2;

use crate::network::{ClientTransport, Inbox, TransportError};

// =============================================================================
// GUEST CONTROL
// =============================================================================

/// Input-driven state of the guest's tank as simulated on the host.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerControl {
    /// Last movement direction received.
    pub direction: Vec2,
    /// Status implied by that direction.
    pub status: Status,
    attack_requested: bool,
}

impl PlayerControl {
    /// Apply one input message. Attack requests latch until taken.
    pub fn apply_input(&mut self, input: &ActionData) {
        self.direction = input.direction;
        self.status = Status::from_direction(self.status, input.direction);
        self.attack_requested |= input.attack;
    }

    /// Consume a pending attack request.
    pub fn take_attack(&mut self) -> bool {
        std::mem::take(&mut self.attack_requested)
    }
}

/// Merge the inputs that arrived during one tick: latest direction wins, and
/// an attack in any of them counts.
pub fn coalesce_inputs<'a>(inputs: impl IntoIterator<Item = &'a ActionData>) -> Option<ActionData> {
    inputs.into_iter().fold(None, |acc: Option<ActionData>, input| {
        Some(ActionData {
            direction: input.direction,
            attack: input.attack || acc.is_some_and(|a| a.attack),
        })
    })
}

// =============================================================================
// SIMULATION SEAM
// =============================================================================

/// An entity the guest should see.
pub trait NetworkVisible {
    /// Id assigned so far, if any.
    fn network_id(&self) -> Option<&NetworkId>;

    /// Label the entity. Called once, the first tick it is seen without an id.
    fn assign_network_id(&mut self, id: NetworkId);

    /// Position and kind-specific fields for the snapshot.
    fn net_state(&self) -> EntityState;
}

/// The host's game simulation, as seen by the sync adapter.
pub trait HostSimulation {
    /// Tank driven by the guest's input.
    fn guest_player_mut(&mut self) -> &mut PlayerControl;

    /// Advance one tick, recording any tile destroyed into `destroyed`.
    fn step(&mut self, destroyed: &mut TileDiff);

    /// Visit every live, network-visible entity.
    fn for_each_visible(&mut self, visit: &mut dyn FnMut(&mut dyn NetworkVisible));
}

/// Tiles destroyed since the last snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileDiff {
    tiles: Vec<TileCoord>,
}

impl TileDiff {
    /// Create an empty diff.
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a destroyed tile.
    pub fn record(&mut self, tile: TileCoord) {
        self.tiles.push(tile);
    }

    /// Take the accumulated tiles and clear the buffer.
    pub fn take(&mut self) -> Vec<TileCoord> {
        std::mem::take(&mut self.tiles)
    }

    /// Put back tiles that could not be sent, ahead of anything newer.
    pub fn restore(&mut self, mut tiles: Vec<TileCoord>) {
        tiles.append(&mut self.tiles);
        self.tiles = tiles;
    }

    /// Pending tiles.
    pub fn pending(&self) -> &[TileCoord] {
        &self.tiles
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Hands out `ent_N` ids, strictly increasing, never reused within a run.
#[derive(Debug, Clone)]
pub struct NetworkIdAllocator {
    next_id: u64,
}

impl NetworkIdAllocator {
    /// Start a run.
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    /// Allocate the next id.
    pub fn allocate(&mut self) -> NetworkId {
        let id = NetworkId::entity(self.next_id);
        self.next_id += 1;
        id
    }

    /// Number of ids handed out.
    pub fn allocated(&self) -> u64 {
        self.next_id - 1
    }
}

impl Default for NetworkIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// HOST SYNC
// =============================================================================

/// Per-run host state: id allocation and the pending tile diff.
#[derive(Debug, Default)]
pub struct HostSync {
    ids: NetworkIdAllocator,
    tiles: TileDiff,
    tick: u64,
}

impl HostSync {
    /// Start a run.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one tick and build the snapshot to send.
    pub fn tick<S: HostSimulation>(&mut self, sim: &mut S, inputs: &[ActionData]) -> Snapshot {
        if let Some(input) = coalesce_inputs(inputs) {
            sim.guest_player_mut().apply_input(&input);
        }

        sim.step(&mut self.tiles);

        let mut snapshot = Snapshot::new();
        let ids = &mut self.ids;
        sim.for_each_visible(&mut |entity: &mut dyn NetworkVisible| {
            let id = match entity.network_id() {
                Some(id) => id.clone(),
                None => {
                    let id = ids.allocate();
                    entity.assign_network_id(id.clone());
                    id
                }
            };
            snapshot.insert(id, entity.net_state());
        });
        snapshot.destroyed_tiles = self.tiles.take();

        self.tick += 1;
        snapshot
    }

    /// Tiles waiting for the next snapshot.
    pub fn tiles(&self) -> &TileDiff {
        &self.tiles
    }

    /// Ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Ids handed out so far.
    pub fn ids(&self) -> &NetworkIdAllocator {
        &self.ids
    }
}

/// [`HostSync`] wired to a transport.
pub struct HostSession {
    sync: HostSync,
    inbox: Inbox,
}

impl HostSession {
    /// Start buffering the guest's actions from `transport`.
    pub fn attach(transport: &ClientTransport) -> Self {
        Self {
            sync: HostSync::new(),
            inbox: Inbox::attach(transport, &[EventKind::Action]),
        }
    }

    /// Messages buffered since the last tick.
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    /// Apply buffered input, step, and send the snapshot.
    ///
    /// A snapshot dropped on a full queue keeps its tiles for the next one.
    pub fn run_tick<S: HostSimulation>(
        &mut self,
        sim: &mut S,
        transport: &ClientTransport,
    ) -> Result<Snapshot, TransportError> {
        let inputs = guest_inputs(self.inbox.drain());
        let snapshot = self.sync.tick(sim, &inputs);

        match transport.send_snapshot(snapshot.clone()) {
            Ok(()) => Ok(snapshot),
            Err(e) => {
                if !snapshot.destroyed_tiles.is_empty() {
                    debug!("Keeping {} tiles for the next snapshot", snapshot.destroyed_tiles.len());
                    self.sync.tiles.restore(snapshot.destroyed_tiles);
                }
                Err(e)
            }
        }
    }

    /// Underlying sync state.
    pub fn sync(&self) -> &HostSync {
        &self.sync
    }
}

fn guest_inputs(messages: Vec<ServerMessage>) -> Vec<ActionData> {
    messages
        .into_iter()
        .filter_map(|msg| match msg {
            ServerMessage::Action { slot: Slot::Guest, action_type: ActionType::Input, action_data } => {
                Some(action_data)
            }
            other => {
                warn!("Ignoring {:?} on host inbox", other.kind());
                None
            }
        })
        .collect()
}
