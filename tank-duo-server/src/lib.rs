//! # Tank Duo Server
//!
//! Session layer for two-player Tank Duo matches: pairs a host and a guest,
//! relays the host's snapshots and the guest's input, and hands end-of-run
//! reports to a summary store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TANK DUO SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  ├── vec2.rs     - 2D vector, [x, y] on the wire             │
//! │  └── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │                                                              │
//! │  game/           - Networked game model                      │
//! │  ├── entity.rs   - Network ids, entity kinds, statuses       │
//! │  ├── snapshot.rs - Per-tick snapshot + tile diff             │
//! │  └── difficulty.rs - Presets and seeded spawn queue          │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── protocol.rs - Versioned JSON message types              │
//! │  ├── session.rs  - Session registry                          │
//! │  ├── summary.rs  - Finished-session store                    │
//! │  └── server.rs   - WebSocket server + connection handler     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! The host's simulation is authoritative. The server only routes messages
//! between the two slots of a session; it never inspects snapshots. Both
//! peers seed [`DeterministicRng`] with the seed from `session_started`, so
//! seeded decisions such as the [`SpawnQueue`] agree without being sent.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use self::core::rng::DeterministicRng;
pub use self::core::vec2::Vec2;
pub use game::{DifficultyConfig, EntityKind, EntityState, NetworkId, Snapshot, SpawnQueue, Status, TileCoord};
pub use network::{ClientMessage, GameServer, ServerConfig, ServerMessage, SessionCode, Slot};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default listen port
pub const DEFAULT_PORT: u16 = 5555;
