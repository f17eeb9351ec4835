//! Session Registry
//!
//! Tracks open two-slot sessions and which connection sits where.
//! All bookkeeping lives in [`SessionTable`], a plain synchronous structure;
//! [`SessionRegistry`] wraps it in a single `tokio::sync::Mutex` shared by
//! every connection task.
//!
//! Outbound messages go through each connection's bounded queue with
//! `try_send`, so holding the lock never waits on a slow socket. A full
//! queue may drop a snapshot, action or ping, since the next one supersedes
//! it. Any other message hitting a full queue counts as a failed write: the
//! connection is signalled as stalled and its handler tears it down, which
//! notifies the peer.

use std::collections::BTreeMap;
use std::sync::Arc;
use chrono::Utc;
use rand::Rng;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::difficulty::DifficultyConfig;
use crate::game::snapshot::Snapshot;
use crate::network::protocol::{
    ActionData, ActionType, JoinFailure, ServerMessage, SessionCode, SessionSummary, Slot,
};
use crate::network::summary::{FinishedSession, SummaryStore, TracingSummaryStore};

/// Unique connection identifier, assigned on accept.
pub type ConnectionId = Uuid;

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::Sender<ServerMessage>;

/// Length of generated session codes.
pub const CODE_LENGTH: usize = 6;

/// Characters used in session codes (no 0/O or 1/I).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Attempts before code allocation gives up.
const MAX_CODE_ATTEMPTS: usize = 64;

/// Largest simulation seed handed out.
pub const MAX_SEED: u32 = 999_999;

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Not started yet; `occupied` of 2 slots filled.
    Waiting {
        /// Occupied slots (1 or 2).
        occupied: u8,
    },
    /// Run in progress.
    Active,
    /// A peer reported the run over.
    Finished,
}

/// A connection sitting in a session slot.
#[derive(Debug, Clone)]
pub struct SlotOccupant {
    /// Connection in the slot.
    pub conn: ConnectionId,
    /// Display name.
    pub name: String,
    /// Marked ready.
    pub ready: bool,
}

/// One two-peer match instance.
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique code among open sessions.
    pub code: SessionCode,
    slots: [Option<SlotOccupant>; 2],
    started: bool,
    finished: bool,
    difficulty: Option<DifficultyConfig>,
    seed: Option<u32>,
}

impl Session {
    fn new(code: SessionCode, host: ConnectionId, name: String) -> Self {
        Self {
            code,
            slots: [Some(SlotOccupant { conn: host, name, ready: false }), None],
            started: false,
            finished: false,
            difficulty: None,
            seed: None,
        }
    }

    /// Occupant of `slot`.
    pub fn occupant(&self, slot: Slot) -> Option<&SlotOccupant> {
        self.slots[slot.index()].as_ref()
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Number of ready slots.
    pub fn ready_count(&self) -> u8 {
        self.slots.iter().flatten().filter(|s| s.ready).count() as u8
    }

    /// Slot held by `conn`.
    pub fn slot_of(&self, conn: ConnectionId) -> Option<Slot> {
        Slot::ALL
            .into_iter()
            .find(|slot| self.occupant(*slot).map(|o| o.conn) == Some(conn))
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        if self.finished {
            SessionPhase::Finished
        } else if self.started {
            SessionPhase::Active
        } else {
            SessionPhase::Waiting { occupied: self.occupied() as u8 }
        }
    }

    /// Whether the run has started.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Difficulty stored on the session.
    pub fn difficulty(&self) -> Option<&DifficultyConfig> {
        self.difficulty.as_ref()
    }

    /// Seed, once started.
    pub fn seed(&self) -> Option<u32> {
        self.seed
    }

    /// Display names of occupied slots, host first.
    pub fn participants(&self) -> Vec<String> {
        self.slots.iter().flatten().map(|o| o.name.clone()).collect()
    }

    fn connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.slots.iter().flatten().map(|o| o.conn)
    }

    fn reset_ready(&mut self) {
        for occupant in self.slots.iter_mut().flatten() {
            occupant.ready = false;
        }
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Connection was never registered.
    #[error("Unknown connection")]
    UnknownConnection,

    /// Join rejected.
    #[error("Join failed: {0}")]
    Join(#[from] JoinFailure),

    /// No open session has that code.
    #[error("Session not found")]
    UnknownSession,

    /// Connection is not in the session it addressed.
    #[error("Not in a session")]
    NotInSession,

    /// Only slot 0 may start the session.
    #[error("Only the host can start the session")]
    NotHost,

    /// Start needs both slots filled.
    #[error("Waiting for a second player")]
    PeerMissing,

    /// Session was already started.
    #[error("Session already started")]
    AlreadyStarted,

    /// Could not find a free code.
    #[error("Could not allocate a session code")]
    CodeSpaceExhausted,
}

/// Counters reported by [`SessionTable::status`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStatus {
    /// Registered connections.
    pub connections: usize,
    /// Open sessions.
    pub open_sessions: usize,
    /// Sessions whose run is in progress.
    pub active_sessions: usize,
    /// Occupied slots across open sessions.
    pub occupied_slots: usize,
    /// Sessions created since startup.
    pub sessions_created: u64,
}

struct ConnectionEntry {
    outbox: Outbox,
    stalled: Arc<Notify>,
    session: Option<SessionCode>,
}

// =============================================================================
// SESSION TABLE
// =============================================================================

/// Sessions and connections, without locking.
#[derive(Default)]
pub struct SessionTable {
    sessions: BTreeMap<SessionCode, Session>,
    connections: BTreeMap<ConnectionId, ConnectionEntry>,
    sessions_created: u64,
}

impl SessionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and its outbound queue.
    ///
    /// The returned signal fires when a message that must not be dropped
    /// finds the queue full; the connection should then be closed.
    pub fn register_connection(&mut self, conn: ConnectionId, outbox: Outbox) -> Arc<Notify> {
        let stalled = Arc::new(Notify::new());
        self.connections.insert(
            conn,
            ConnectionEntry { outbox, stalled: stalled.clone(), session: None },
        );
        debug!("Connection {} registered", conn);
        stalled
    }

    /// Open a session with `conn` in slot 0.
    ///
    /// A connection already in a session leaves it first.
    pub fn create_session(&mut self, conn: ConnectionId, name: String) -> Result<SessionCode, SessionError> {
        if !self.connections.contains_key(&conn) {
            return Err(SessionError::UnknownConnection);
        }
        self.leave_session(conn);

        let code = self.allocate_code()?;
        self.sessions.insert(code.clone(), Session::new(code.clone(), conn, name.clone()));
        if let Some(entry) = self.connections.get_mut(&conn) {
            entry.session = Some(code.clone());
        }
        self.sessions_created += 1;

        info!("Session {} created by {} ({})", code, name, conn);
        self.send(conn, ServerMessage::SessionCreated { session_code: code.clone(), slot: Slot::Host });
        Ok(code)
    }

    /// Take slot 1 of `code`.
    ///
    /// On failure the requester gets `join_failed` and stays where it was.
    pub fn join_session(&mut self, conn: ConnectionId, code: &SessionCode, name: String) -> Result<Slot, SessionError> {
        if !self.connections.contains_key(&conn) {
            return Err(SessionError::UnknownConnection);
        }
        if let Err(reason) = self.check_joinable(conn, code) {
            info!("Join of {} by {} failed: {}", code, conn, reason);
            self.send(conn, ServerMessage::JoinFailed { reason });
            return Err(reason.into());
        }
        self.leave_session(conn);

        let host = match self.sessions.get_mut(code) {
            Some(session) => {
                session.slots[Slot::Guest.index()] = Some(SlotOccupant {
                    conn,
                    name: name.clone(),
                    ready: false,
                });
                session.occupant(Slot::Host).map(|o| o.conn)
            }
            None => return Err(JoinFailure::UnknownSession.into()),
        };
        if let Some(entry) = self.connections.get_mut(&conn) {
            entry.session = Some(code.clone());
        }

        info!("{} ({}) joined session {}", name, conn, code);
        if let Some(host) = host {
            self.send(host, ServerMessage::PeerJoined { name });
        }
        self.send(conn, ServerMessage::SessionJoined { session_code: code.clone(), slot: Slot::Guest });
        Ok(Slot::Guest)
    }

    fn check_joinable(&self, conn: ConnectionId, code: &SessionCode) -> Result<(), JoinFailure> {
        let session = self.sessions.get(code).ok_or(JoinFailure::UnknownSession)?;
        if session.slot_of(conn).is_some() {
            return Err(JoinFailure::AlreadyInSession);
        }
        if session.occupant(Slot::Guest).is_some() {
            return Err(JoinFailure::SessionFull);
        }
        Ok(())
    }

    /// Mark `conn`'s slot ready and report the count to both slots.
    ///
    /// Readying twice counts once. When both slots are ready the session
    /// starts with its stored difficulty.
    pub fn mark_ready(&mut self, code: &SessionCode, conn: ConnectionId) -> Result<u8, SessionError> {
        let session = self.sessions.get_mut(code).ok_or(SessionError::UnknownSession)?;
        let slot = session.slot_of(conn).ok_or(SessionError::NotInSession)?;
        if let Some(occupant) = session.slots[slot.index()].as_mut() {
            occupant.ready = true;
        }
        let n = session.ready_count();
        let started = session.started;

        debug!("Session {}: {} ready", code, n);
        self.broadcast(code, &ServerMessage::ReadyCount { n }, None);

        if n == 2 && !started {
            self.start_session(code, None)?;
        }
        Ok(n)
    }

    /// Start the run: pick a seed and tell both slots.
    ///
    /// Falls back to the stored difficulty, then the multiplayer preset.
    /// A second start is ignored.
    pub fn start_session(&mut self, code: &SessionCode, difficulty: Option<DifficultyConfig>) -> Result<u32, SessionError> {
        let session = self.sessions.get_mut(code).ok_or(SessionError::UnknownSession)?;
        if session.started {
            debug!("Session {} already started, ignoring start", code);
            return Err(SessionError::AlreadyStarted);
        }

        let difficulty = difficulty
            .or_else(|| session.difficulty.clone())
            .unwrap_or_else(DifficultyConfig::multiplayer);
        let seed = rand::thread_rng().gen_range(0..=MAX_SEED);

        session.started = true;
        session.seed = Some(seed);
        session.difficulty = Some(difficulty.clone());

        info!("Session {} started ({}, seed {})", code, difficulty.name, seed);
        self.broadcast(code, &ServerMessage::SessionStarted { difficulty, seed }, None);
        Ok(seed)
    }

    /// Start requested by a client. Only the host may start, and only with a
    /// guest present; an early request keeps its difficulty for later.
    pub fn request_start(
        &mut self,
        conn: ConnectionId,
        claimed: Option<&SessionCode>,
        difficulty: Option<DifficultyConfig>,
    ) -> Result<u32, SessionError> {
        let (code, slot) = self.resolve(conn, claimed)?;
        if slot != Slot::Host {
            return Err(SessionError::NotHost);
        }
        let session = self.sessions.get_mut(&code).ok_or(SessionError::UnknownSession)?;
        if session.occupant(Slot::Guest).is_none() {
            if difficulty.is_some() && !session.started {
                session.difficulty = difficulty;
            }
            return Err(SessionError::PeerMissing);
        }
        self.start_session(&code, difficulty)
    }

    /// Relay a host snapshot to the other slot.
    pub fn relay_snapshot(
        &mut self,
        conn: ConnectionId,
        claimed: Option<&SessionCode>,
        snapshot: Snapshot,
    ) -> Result<usize, SessionError> {
        let (code, _) = self.resolve(conn, claimed)?;
        Ok(self.broadcast(&code, &ServerMessage::SnapshotUpdate { snapshot }, Some(conn)))
    }

    /// Relay an action to the other slot, tagged with the sender's slot.
    pub fn relay_action(
        &mut self,
        conn: ConnectionId,
        claimed: Option<&SessionCode>,
        action_type: ActionType,
        action_data: ActionData,
    ) -> Result<usize, SessionError> {
        let (code, slot) = self.resolve(conn, claimed)?;
        let message = ServerMessage::Action { slot, action_type, action_data };
        Ok(self.broadcast(&code, &message, Some(conn)))
    }

    /// Mark the session finished and build the report for the store.
    pub fn finish_session(
        &mut self,
        conn: ConnectionId,
        claimed: Option<&SessionCode>,
        summary: SessionSummary,
    ) -> Result<FinishedSession, SessionError> {
        let (code, slot) = self.resolve(conn, claimed)?;
        let session = self.sessions.get_mut(&code).ok_or(SessionError::UnknownSession)?;
        session.finished = true;

        info!("Session {} finished ({:?}, reported by slot {})", code, summary.outcome, slot.index());
        Ok(FinishedSession {
            code,
            participants: session.participants(),
            difficulty: session.difficulty.clone(),
            seed: session.seed,
            summary,
            recorded_at: Utc::now(),
        })
    }

    /// Deliver `message` to every occupied slot of `code` except `exclude`.
    /// Returns how many queues accepted it.
    pub fn broadcast(&self, code: &SessionCode, message: &ServerMessage, exclude: Option<ConnectionId>) -> usize {
        let Some(session) = self.sessions.get(code) else {
            return 0;
        };
        session
            .connections()
            .filter(|conn| Some(*conn) != exclude)
            .filter(|conn| self.send(*conn, message.clone()))
            .count()
    }

    /// Deliver `message` to every registered connection.
    pub fn broadcast_all(&self, message: &ServerMessage) -> usize {
        self.connections
            .iter()
            .filter(|(conn, entry)| deliver(**conn, entry, message.clone()))
            .count()
    }

    /// Queue `message` for one connection.
    pub fn send(&self, conn: ConnectionId, message: ServerMessage) -> bool {
        match self.connections.get(&conn) {
            Some(entry) => deliver(conn, entry, message),
            None => {
                debug!("No connection {} for {:?}", conn, message.kind());
                false
            }
        }
    }

    /// Drop a connection: free its slot, tell the peer, and remove the
    /// session once both slots are empty. Safe to call twice.
    pub fn on_disconnect(&mut self, conn: ConnectionId) -> bool {
        self.leave_session(conn);
        let removed = self.connections.remove(&conn).is_some();
        if removed {
            debug!("Connection {} unregistered", conn);
        }
        removed
    }

    fn leave_session(&mut self, conn: ConnectionId) {
        let Some(code) = self.connections.get_mut(&conn).and_then(|e| e.session.take()) else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&code) else {
            return;
        };
        let Some(slot) = session.slot_of(conn) else {
            return;
        };
        let Some(leaving) = session.slots[slot.index()].take() else {
            return;
        };

        let peer = session.occupant(slot.other()).map(|o| o.conn);
        match peer {
            Some(peer) => {
                session.reset_ready();
                info!("{} left session {}, peer notified", leaving.name, code);
                self.send(peer, ServerMessage::PeerDisconnected { name: leaving.name });
            }
            None => {
                self.sessions.remove(&code);
                info!("Session {} removed", code);
            }
        }
    }

    /// Resolve the session and slot of `conn`, checking any claimed code.
    fn resolve(&self, conn: ConnectionId, claimed: Option<&SessionCode>) -> Result<(SessionCode, Slot), SessionError> {
        let code = self
            .connections
            .get(&conn)
            .ok_or(SessionError::UnknownConnection)?
            .session
            .clone()
            .ok_or(SessionError::NotInSession)?;
        if claimed.is_some_and(|claimed| *claimed != code) {
            return Err(SessionError::NotInSession);
        }
        let slot = self
            .sessions
            .get(&code)
            .and_then(|s| s.slot_of(conn))
            .ok_or(SessionError::NotInSession)?;
        Ok((code, slot))
    }

    fn allocate_code(&self) -> Result<SessionCode, SessionError> {
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_CODE_ATTEMPTS {
            let raw: String = (0..CODE_LENGTH)
                .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
                .collect();
            let code = SessionCode::new(raw);
            if !self.sessions.contains_key(&code) {
                return Ok(code);
            }
        }
        Err(SessionError::CodeSpaceExhausted)
    }

    /// Look up a session.
    pub fn session(&self, code: &SessionCode) -> Option<&Session> {
        self.sessions.get(code)
    }

    /// Session `conn` belongs to.
    pub fn session_of(&self, conn: ConnectionId) -> Option<&SessionCode> {
        self.connections.get(&conn)?.session.as_ref()
    }

    /// Open session codes.
    pub fn codes(&self) -> impl Iterator<Item = &SessionCode> {
        self.sessions.keys()
    }

    /// Registry counters.
    pub fn status(&self) -> RegistryStatus {
        RegistryStatus {
            connections: self.connections.len(),
            open_sessions: self.sessions.len(),
            active_sessions: self
                .sessions
                .values()
                .filter(|s| s.phase() == SessionPhase::Active)
                .count(),
            occupied_slots: self.sessions.values().map(Session::occupied).sum(),
            sessions_created: self.sessions_created,
        }
    }
}

fn deliver(conn: ConnectionId, entry: &ConnectionEntry, message: ServerMessage) -> bool {
    match entry.outbox.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(message)) if message.is_droppable() => {
            warn!("Outbound queue full for {}, dropping {:?}", conn, message.kind());
            false
        }
        Err(TrySendError::Full(message)) => {
            warn!("Outbound queue full for {} on {:?}, closing connection", conn, message.kind());
            entry.stalled.notify_one();
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("Outbound queue closed for {}", conn);
            false
        }
    }
}

// =============================================================================
// SESSION REGISTRY
// =============================================================================

/// Shared registry used by every connection task.
pub struct SessionRegistry {
    table: Mutex<SessionTable>,
    summaries: Arc<dyn SummaryStore>,
}

impl SessionRegistry {
    /// Create a registry that reports finished sessions to `summaries`.
    pub fn new(summaries: Arc<dyn SummaryStore>) -> Self {
        Self {
            table: Mutex::new(SessionTable::new()),
            summaries,
        }
    }

    /// See [`SessionTable::register_connection`].
    pub async fn register_connection(&self, conn: ConnectionId, outbox: Outbox) -> Arc<Notify> {
        self.table.lock().await.register_connection(conn, outbox)
    }

    /// See [`SessionTable::create_session`].
    pub async fn create_session(&self, conn: ConnectionId, name: String) -> Result<SessionCode, SessionError> {
        self.table.lock().await.create_session(conn, name)
    }

    /// Join `code`; false when the join was rejected.
    pub async fn join_session(&self, conn: ConnectionId, code: &SessionCode, name: String) -> bool {
        self.table.lock().await.join_session(conn, code, name).is_ok()
    }

    /// Mark ready in `code`, or in `conn`'s current session when `None`.
    pub async fn mark_ready(&self, code: Option<SessionCode>, conn: ConnectionId) -> Result<u8, SessionError> {
        let mut table = self.table.lock().await;
        let code = match code.or_else(|| table.session_of(conn).cloned()) {
            Some(code) => code,
            None => return Err(SessionError::NotInSession),
        };
        table.mark_ready(&code, conn)
    }

    /// See [`SessionTable::start_session`].
    pub async fn start_session(&self, code: &SessionCode, difficulty: Option<DifficultyConfig>) -> Result<u32, SessionError> {
        self.table.lock().await.start_session(code, difficulty)
    }

    /// See [`SessionTable::request_start`].
    pub async fn request_start(
        &self,
        conn: ConnectionId,
        claimed: Option<SessionCode>,
        difficulty: Option<DifficultyConfig>,
    ) -> Result<u32, SessionError> {
        self.table.lock().await.request_start(conn, claimed.as_ref(), difficulty)
    }

    /// See [`SessionTable::relay_snapshot`].
    pub async fn relay_snapshot(
        &self,
        conn: ConnectionId,
        claimed: Option<SessionCode>,
        snapshot: Snapshot,
    ) -> Result<usize, SessionError> {
        self.table.lock().await.relay_snapshot(conn, claimed.as_ref(), snapshot)
    }

    /// See [`SessionTable::relay_action`].
    pub async fn relay_action(
        &self,
        conn: ConnectionId,
        claimed: Option<SessionCode>,
        action_type: ActionType,
        action_data: ActionData,
    ) -> Result<usize, SessionError> {
        self.table.lock().await.relay_action(conn, claimed.as_ref(), action_type, action_data)
    }

    /// Mark the session finished and hand the report to the summary store.
    /// A store failure is logged and otherwise ignored.
    pub async fn record_summary(
        &self,
        conn: ConnectionId,
        claimed: Option<SessionCode>,
        summary: SessionSummary,
    ) -> Result<FinishedSession, SessionError> {
        let finished = self.table.lock().await.finish_session(conn, claimed.as_ref(), summary)?;
        if let Err(e) = self.summaries.record(&finished) {
            warn!("Failed to record summary for {}: {}", finished.code, e);
        }
        Ok(finished)
    }

    /// See [`SessionTable::broadcast`].
    pub async fn broadcast(&self, code: &SessionCode, message: &ServerMessage, exclude: Option<ConnectionId>) -> usize {
        self.table.lock().await.broadcast(code, message, exclude)
    }

    /// See [`SessionTable::broadcast_all`].
    pub async fn broadcast_all(&self, message: &ServerMessage) -> usize {
        self.table.lock().await.broadcast_all(message)
    }

    /// See [`SessionTable::send`].
    pub async fn send(&self, conn: ConnectionId, message: ServerMessage) -> bool {
        self.table.lock().await.send(conn, message)
    }

    /// See [`SessionTable::on_disconnect`].
    pub async fn on_disconnect(&self, conn: ConnectionId) -> bool {
        self.table.lock().await.on_disconnect(conn)
    }

    /// Session `conn` belongs to.
    pub async fn session_of(&self, conn: ConnectionId) -> Option<SessionCode> {
        self.table.lock().await.session_of(conn).cloned()
    }

    /// Copy of a session's current state.
    pub async fn session(&self, code: &SessionCode) -> Option<Session> {
        self.table.lock().await.session(code).cloned()
    }

    /// Registry counters.
    pub async fn status(&self) -> RegistryStatus {
        self.table.lock().await.status()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Arc::new(TracingSummaryStore))
    }
}
