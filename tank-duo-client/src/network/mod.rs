//! Network Module
//!
//! WebSocket transport to the session server and the per-frame inbox that
//! hands received messages to the game loop.

pub mod client;
pub mod inbox;

pub use client::{ClientTransport, ConnectError, Handler, TransportConfig, TransportError};
pub use inbox::Inbox;
