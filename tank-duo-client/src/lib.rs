//! # Tank Duo Client
//!
//! Peer side of a Tank Duo session: the transport to the session server and
//! the adapters that keep host and guest in step.
//!
//! ```text
//! ┌──────────────┐          ┌──────────────┐          ┌──────────────┐
//! │  Host peer   │          │    Server    │          │  Guest peer  │
//! │              │ snapshot │              │ snapshot │              │
//! │  HostSync  ──┼─────────►│    relay   ──┼─────────►│  GuestMirror │
//! │              │  action  │              │  action  │              │
//! │  Inbox    ◄──┼──────────┼──  relay   ◄─┼──────────┼── send_input │
//! └──────────────┘          └──────────────┘          └──────────────┘
//! ```
//!
//! The host simulates; the guest only mirrors. Neither adapter touches game
//! state from the network task: received messages wait in an [`Inbox`] until
//! the game loop drains it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod network;
pub mod sync;

pub use network::{ClientTransport, ConnectError, Inbox, TransportConfig, TransportError};
pub use sync::{GuestMirror, GuestSession, HostSession, HostSimulation, HostSync, NetworkVisible, PlayerControl};
