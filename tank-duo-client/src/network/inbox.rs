//! Hand-off queue between the receive task and the simulation loop.
//!
//! Handlers only push; the simulation drains once per frame, so session state
//! is never touched from the network task.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tank_duo::network::protocol::{EventKind, ServerMessage};

use super::client::ClientTransport;

/// Shared queue of server messages waiting for the next frame.
#[derive(Clone, Default)]
pub struct Inbox {
    queue: Arc<Mutex<VecDeque<ServerMessage>>>,
}

impl Inbox {
    /// Create an empty inbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an inbox fed by `transport` for each kind in `kinds`.
    pub fn attach(transport: &ClientTransport, kinds: &[EventKind]) -> Self {
        let inbox = Self::new();
        for kind in kinds {
            inbox.subscribe(transport, *kind);
        }
        inbox
    }

    /// Route one more message kind into this inbox.
    pub fn subscribe(&self, transport: &ClientTransport, kind: EventKind) {
        let inbox = self.clone();
        transport.register_handler(kind, move |msg| inbox.push(msg));
    }

    /// Queue a message.
    pub fn push(&self, msg: ServerMessage) {
        let mut queue = match self.queue.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.push_back(msg);
    }

    /// Take every queued message, oldest first.
    pub fn drain(&self) -> Vec<ServerMessage> {
        let mut queue = match self.queue.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.drain(..).collect()
    }

    /// Take the oldest queued message.
    pub fn pop(&self) -> Option<ServerMessage> {
        let mut queue = match self.queue.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.pop_front()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
