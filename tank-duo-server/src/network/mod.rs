//! Network Layer
//!
//! WebSocket server, wire protocol and session registry.
//! The server never simulates; it pairs peers and relays their traffic.

pub mod protocol;
pub mod session;
pub mod summary;
pub mod server;

pub use protocol::{
    ActionData, ActionType, ClientMessage, EventKind, JoinFailure, Outcome, PlayerStats,
    ProtocolError, ServerMessage, SessionCode, SessionSummary, Slot, PROTOCOL_VERSION,
};
pub use session::{
    ConnectionId, RegistryStatus, Session, SessionError, SessionPhase, SessionRegistry, SessionTable,
};
pub use summary::{FinishedSession, MemorySummaryStore, SummaryError, SummaryStore, TracingSummaryStore};
pub use server::{DisconnectReason, GameServer, GameServerError, ServerConfig};
