//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is one JSON text message of the form
//! `{"v": 1, "kind": "<discriminator>", ...payload}`.
//! A frame with another version, an unknown kind, or a payload that does not
//! fit its kind is a [`ProtocolError`].

use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::vec2::Vec2;
use crate::game::difficulty::DifficultyConfig;
use crate::game::snapshot::Snapshot;

/// Version carried in the `v` field of every frame.
pub const PROTOCOL_VERSION: u16 = 1;

// =============================================================================
// SHARED WIRE TYPES
// =============================================================================

/// Short code that identifies an open session.
///
/// Unique among open sessions only; a code may be reused once its session
/// has been removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCode(String);

impl SessionCode {
    /// Normalize user-entered text into a code (trimmed, uppercase).
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_uppercase())
    }

    /// Borrow the code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Seat in a session. The creator is always the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Slot {
    /// Slot 0, authoritative simulation.
    Host,
    /// Slot 1, mirrors the host.
    Guest,
}

impl Slot {
    /// Both slots in index order.
    pub const ALL: [Slot; 2] = [Slot::Host, Slot::Guest];

    /// Wire index (0 or 1).
    pub const fn index(self) -> usize {
        match self {
            Slot::Host => 0,
            Slot::Guest => 1,
        }
    }

    /// The other slot.
    pub const fn other(self) -> Slot {
        match self {
            Slot::Host => Slot::Guest,
            Slot::Guest => Slot::Host,
        }
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> Self {
        slot.index() as u8
    }
}

impl TryFrom<u8> for Slot {
    type Error = String;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Slot::Host),
            1 => Ok(Slot::Guest),
            other => Err(format!("slot {} out of range", other)),
        }
    }
}

/// Discriminator for relayed actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Per-tick guest input.
    Input,
}

/// Payload of an `input` action.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionData {
    /// Movement direction, zero when idle.
    pub direction: Vec2,
    /// Fire requested this tick.
    #[serde(default)]
    pub attack: bool,
}

impl ActionData {
    /// Create an input payload.
    pub fn new(direction: Vec2, attack: bool) -> Self {
        Self { direction, attack }
    }
}

/// Why a join attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinFailure {
    /// No open session has that code.
    UnknownSession,
    /// Both slots are occupied.
    SessionFull,
    /// The requester already sits in that session.
    AlreadyInSession,
}

impl fmt::Display for JoinFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinFailure::UnknownSession => f.write_str("session not found"),
            JoinFailure::SessionFull => f.write_str("session is full"),
            JoinFailure::AlreadyInSession => f.write_str("already in this session"),
        }
    }
}

impl std::error::Error for JoinFailure {}

/// Outcome of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every enemy destroyed.
    Win,
    /// Players or structure destroyed.
    Lose,
}

/// Per-player counters reported at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    /// Display name.
    pub name: String,
    /// Health when the run ended.
    pub final_health: i32,
    /// Enemies destroyed.
    pub kills: u32,
    /// Damage dealt to enemies.
    pub damage_dealt: u32,
    /// Damage taken.
    pub damage_received: u32,
    /// Seconds survived.
    pub survival_secs: u32,
    /// Whether this player finished on the winning side.
    pub won: bool,
}

/// End-of-run report sent by a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// How the run ended.
    pub outcome: Outcome,
    /// Counters per participant.
    pub players: Vec<PlayerStats>,
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
///
/// `session_code` is optional on in-session messages; the server resolves the
/// sender's session from its connection and rejects a mismatching code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a new session with the sender as host.
    CreateSession {
        /// Host display name.
        name: String,
    },

    /// Take the guest slot of an existing session.
    JoinSession {
        /// Code shared by the host.
        session_code: SessionCode,
        /// Guest display name.
        name: String,
    },

    /// Sender is ready to start.
    MarkReady {
        /// Session the sender believes it is in.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_code: Option<SessionCode>,
    },

    /// Host snapshot, relayed to the guest.
    SnapshotUpdate {
        /// Session the sender believes it is in.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_code: Option<SessionCode>,
        /// Entity state for this tick.
        snapshot: Snapshot,
    },

    /// Player action, relayed to the other slot.
    Action {
        /// Session the sender believes it is in.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_code: Option<SessionCode>,
        /// Action discriminator.
        action_type: ActionType,
        /// Action payload.
        action_data: ActionData,
    },

    /// Host asks to start the run.
    StartSession {
        /// Session the sender believes it is in.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_code: Option<SessionCode>,
        /// Difficulty; the multiplayer preset when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        difficulty: Option<DifficultyConfig>,
    },

    /// End-of-run report.
    SessionSummary {
        /// Session the sender believes it is in.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_code: Option<SessionCode>,
        /// Outcome and counters.
        summary: SessionSummary,
    },

    /// Keepalive probe.
    Ping,

    /// Keepalive answer.
    Pong,
}

impl ClientMessage {
    /// Wire discriminator, for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ClientMessage::CreateSession { .. } => "create_session",
            ClientMessage::JoinSession { .. } => "join_session",
            ClientMessage::MarkReady { .. } => "mark_ready",
            ClientMessage::SnapshotUpdate { .. } => "snapshot_update",
            ClientMessage::Action { .. } => "action",
            ClientMessage::StartSession { .. } => "start_session",
            ClientMessage::SessionSummary { .. } => "session_summary",
            ClientMessage::Ping => "ping",
            ClientMessage::Pong => "pong",
        }
    }

    /// Serialize to a versioned JSON frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        encode(self)
    }

    /// Deserialize from a versioned JSON frame.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        decode(s)
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session opened; the receiver is the host.
    SessionCreated {
        /// Code to share with the guest.
        session_code: SessionCode,
        /// Always slot 0.
        slot: Slot,
    },

    /// Join accepted; the receiver is the guest.
    SessionJoined {
        /// Joined session.
        session_code: SessionCode,
        /// Always slot 1.
        slot: Slot,
    },

    /// A guest took the other slot.
    PeerJoined {
        /// Guest display name.
        name: String,
    },

    /// The other slot's connection closed.
    PeerDisconnected {
        /// Display name of the peer that left.
        name: String,
    },

    /// Run started; both peers seed their generators with `seed`.
    SessionStarted {
        /// Enemy counts for the run.
        difficulty: DifficultyConfig,
        /// Simulation seed.
        seed: u32,
    },

    /// Number of ready slots.
    ReadyCount {
        /// 0, 1 or 2.
        n: u8,
    },

    /// Join rejected; the connection stays usable.
    JoinFailed {
        /// Rejection reason.
        reason: JoinFailure,
    },

    /// Host snapshot relayed to the guest.
    SnapshotUpdate {
        /// Entity state for one host tick.
        snapshot: Snapshot,
    },

    /// Action relayed from the other slot.
    Action {
        /// Sender's slot.
        slot: Slot,
        /// Action discriminator.
        action_type: ActionType,
        /// Action payload.
        action_data: ActionData,
    },

    /// A request could not be honored.
    Error {
        /// Human-readable reason.
        reason: String,
    },

    /// Keepalive probe.
    Ping,

    /// Keepalive answer.
    Pong,

    /// Server is going away.
    Shutdown {
        /// Human-readable reason.
        reason: String,
    },
}

/// Server message discriminators, used to route inbound messages to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// `session_created`
    SessionCreated,
    /// `session_joined`
    SessionJoined,
    /// `peer_joined`
    PeerJoined,
    /// `peer_disconnected`
    PeerDisconnected,
    /// `session_started`
    SessionStarted,
    /// `ready_count`
    ReadyCount,
    /// `join_failed`
    JoinFailed,
    /// `snapshot_update`
    SnapshotUpdate,
    /// `action`
    Action,
    /// `error`
    Error,
    /// `ping`
    Ping,
    /// `pong`
    Pong,
    /// `shutdown`
    Shutdown,
}

impl ServerMessage {
    /// Whether losing this message on a full queue is harmless because the
    /// next one of its kind supersedes it.
    pub fn is_droppable(&self) -> bool {
        matches!(
            self,
            ServerMessage::SnapshotUpdate { .. } | ServerMessage::Action { .. } | ServerMessage::Ping | ServerMessage::Pong
        )
    }

    /// Discriminator of this message.
    pub fn kind(&self) -> EventKind {
        match self {
            ServerMessage::SessionCreated { .. } => EventKind::SessionCreated,
            ServerMessage::SessionJoined { .. } => EventKind::SessionJoined,
            ServerMessage::PeerJoined { .. } => EventKind::PeerJoined,
            ServerMessage::PeerDisconnected { .. } => EventKind::PeerDisconnected,
            ServerMessage::SessionStarted { .. } => EventKind::SessionStarted,
            ServerMessage::ReadyCount { .. } => EventKind::ReadyCount,
            ServerMessage::JoinFailed { .. } => EventKind::JoinFailed,
            ServerMessage::SnapshotUpdate { .. } => EventKind::SnapshotUpdate,
            ServerMessage::Action { .. } => EventKind::Action,
            ServerMessage::Error { .. } => EventKind::Error,
            ServerMessage::Ping => EventKind::Ping,
            ServerMessage::Pong => EventKind::Pong,
            ServerMessage::Shutdown { .. } => EventKind::Shutdown,
        }
    }

    /// Serialize to a versioned JSON frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        encode(self)
    }

    /// Deserialize from a versioned JSON frame.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        decode(s)
    }
}

// =============================================================================
// FRAMING
// =============================================================================

/// Errors decoding or encoding a frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not JSON, unknown kind, or payload does not match the kind.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame carries another protocol version.
    #[error("protocol version mismatch: expected {expected}, got {found}")]
    VersionMismatch {
        /// Version this build speaks.
        expected: u16,
        /// Version in the frame.
        found: u16,
    },
}

#[derive(Serialize)]
struct OutgoingFrame<'a, T> {
    v: u16,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Deserialize)]
struct IncomingFrame<T> {
    v: u16,
    #[serde(flatten)]
    body: T,
}

#[derive(Deserialize)]
struct VersionProbe {
    v: u16,
}

fn encode<T: Serialize>(body: &T) -> Result<String, ProtocolError> {
    let frame = OutgoingFrame { v: PROTOCOL_VERSION, body };
    Ok(serde_json::to_string(&frame)?)
}

fn decode<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, ProtocolError> {
    match serde_json::from_str::<IncomingFrame<T>>(s) {
        Ok(frame) if frame.v == PROTOCOL_VERSION => Ok(frame.body),
        Ok(frame) => Err(ProtocolError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            found: frame.v,
        }),
        Err(e) => {
            // A payload from another version may not parse at all; report the
            // version rather than the shape when we can read it.
            if let Ok(probe) = serde_json::from_str::<VersionProbe>(s) {
                if probe.v != PROTOCOL_VERSION {
                    return Err(ProtocolError::VersionMismatch {
                        expected: PROTOCOL_VERSION,
                        found: probe.v,
                    });
                }
            }
            Err(ProtocolError::Malformed(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::{EntityKind, EntityState, NetworkId, TileCoord};

    #[test]
    fn test_client_message_frame() {
        let msg = ClientMessage::JoinSession {
            session_code: SessionCode::new("abc123"),
            name: "guest".to_string(),
        };
        let json = msg.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["v"], 1);
        assert_eq!(value["kind"], "join_session");
        assert_eq!(value["session_code"], "ABC123");

        assert_eq!(ClientMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_unit_kinds() {
        assert_eq!(ClientMessage::Ping.to_json().unwrap(), r#"{"v":1,"kind":"ping"}"#);
        assert_eq!(ServerMessage::from_json(r#"{"v":1,"kind":"pong"}"#).unwrap(), ServerMessage::Pong);
    }

    #[test]
    fn test_optional_session_code_omitted() {
        let json = ClientMessage::MarkReady { session_code: None }.to_json().unwrap();
        assert_eq!(json, r#"{"v":1,"kind":"mark_ready"}"#);

        let parsed = ClientMessage::from_json(r#"{"v":1,"kind":"start_session"}"#).unwrap();
        assert_eq!(parsed, ClientMessage::StartSession { session_code: None, difficulty: None });
    }

    #[test]
    fn test_action_payload() {
        let parsed = ClientMessage::from_json(
            r#"{"v":1,"kind":"action","action_type":"input","action_data":{"direction":[1,0],"attack":false}}"#,
        )
        .unwrap();
        match parsed {
            ClientMessage::Action { action_type, action_data, session_code } => {
                assert_eq!(action_type, ActionType::Input);
                assert_eq!(action_data.direction, Vec2::new(1.0, 0.0));
                assert!(!action_data.attack);
                assert!(session_code.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_server_message_shapes() {
        let created = ServerMessage::SessionCreated {
            session_code: SessionCode::new("QWERTY"),
            slot: Slot::Host,
        };
        let value: serde_json::Value = serde_json::from_str(&created.to_json().unwrap()).unwrap();
        assert_eq!(value["slot"], 0);
        assert_eq!(created.kind(), EventKind::SessionCreated);

        let failed = ServerMessage::JoinFailed { reason: JoinFailure::SessionFull };
        let value: serde_json::Value = serde_json::from_str(&failed.to_json().unwrap()).unwrap();
        assert_eq!(value["reason"], "session_full");
    }

    #[test]
    fn test_snapshot_relay_frame() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(NetworkId::entity(3), EntityState::new(Vec2::new(1.0, 2.0), EntityKind::Explosion));
        snapshot.destroyed_tiles.push(TileCoord::new(3, 7));

        let msg = ServerMessage::SnapshotUpdate { snapshot: snapshot.clone() };
        let back = ServerMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(back, ServerMessage::SnapshotUpdate { snapshot });
    }

    #[test]
    fn test_non_finite_position_fails_to_encode() {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            NetworkId::entity(1),
            EntityState::new(Vec2::new(f32::NAN, 0.0), EntityKind::Bullet),
        );
        let msg = ClientMessage::SnapshotUpdate { session_code: None, snapshot };
        assert!(matches!(msg.to_json(), Err(ProtocolError::Malformed(_))));

        let input = ClientMessage::Action {
            session_code: None,
            action_type: ActionType::Input,
            action_data: ActionData::new(Vec2::new(f32::INFINITY, 0.0), false),
        };
        assert!(input.to_json().is_err());
    }

    #[test]
    fn test_droppable_kinds() {
        assert!(ServerMessage::Ping.is_droppable());
        assert!(ServerMessage::SnapshotUpdate { snapshot: Snapshot::new() }.is_droppable());
        assert!(!ServerMessage::PeerDisconnected { name: "guest".to_string() }.is_droppable());
        assert!(!ServerMessage::SessionStarted { difficulty: DifficultyConfig::easy(), seed: 1 }.is_droppable());
    }

    #[test]
    fn test_session_started_carries_difficulty() {
        let msg = ServerMessage::SessionStarted {
            difficulty: DifficultyConfig::multiplayer(),
            seed: 999_999,
        };
        let back = ServerMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_version_mismatch() {
        let err = ClientMessage::from_json(r#"{"v":2,"kind":"ping"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::VersionMismatch { expected: 1, found: 2 }));

        let err = ClientMessage::from_json(r#"{"v":7,"kind":"teleport"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::VersionMismatch { found: 7, .. }));
    }

    #[test]
    fn test_malformed_frames() {
        for raw in [
            "not json",
            r#"{"kind":"ping"}"#,
            r#"{"v":1,"kind":"teleport"}"#,
            r#"{"v":1,"kind":"join_session","name":"x"}"#,
        ] {
            let err = ClientMessage::from_json(raw).unwrap_err();
            assert!(matches!(err, ProtocolError::Malformed(_)), "{raw}");
        }
    }

    #[test]
    fn test_slot_out_of_range() {
        let err = ServerMessage::from_json(r#"{"v":1,"kind":"session_joined","session_code":"A","slot":2}"#);
        assert!(err.is_err());
    }
}
