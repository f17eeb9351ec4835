//! WebSocket client transport for one peer.
//!
//! Sends are non-blocking (`try_send` into the writer task's queue) so the
//! simulation loop never waits on the socket. A background receive loop
//! answers server pings itself and hands every other message to the handler
//! registered for its kind.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::{self, Message}};
use futures_util::{SinkExt, Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use tank_duo::game::{DifficultyConfig, Snapshot};
use tank_duo::network::protocol::{
    ActionData, ActionType, ClientMessage, EventKind, ServerMessage, SessionCode, SessionSummary, Slot,
};

/// Client transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Give up connecting after this long.
    pub connect_timeout: Duration,
    /// Capacity of the outbound queue.
    pub outbound_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            outbound_queue: 256,
        }
    }
}

/// Why `connect` failed. Never retried automatically.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// No answer within the connect timeout.
    #[error("timed out connecting to {0}")]
    Timeout(String),

    /// Nothing listening at the address.
    #[error("connection refused by {0}")]
    Refused(String),

    /// Handshake or other I/O failure.
    #[error("failed to connect to {url}: {source}")]
    Other {
        /// Address attempted.
        url: String,
        /// Underlying error.
        #[source]
        source: tungstenite::Error,
    },
}

/// Why a send was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// `connect` has not succeeded, or `disconnect` was called.
    #[error("not connected")]
    NotConnected,

    /// Outbound queue is full; the message was dropped.
    #[error("outbound queue full")]
    QueueFull,

    /// The connection has gone away.
    #[error("connection closed")]
    Closed,

    /// The message could not be encoded (e.g. a non-finite coordinate).
    #[error("message not encodable")]
    Unencodable,
}

/// Callback for one server message kind.
pub type Handler = Arc<dyn Fn(ServerMessage) + Send + Sync>;

type HandlerMap = Arc<Mutex<HashMap<EventKind, Handler>>>;

#[derive(Debug, Default)]
struct SessionInfo {
    code: Option<SessionCode>,
    slot: Option<Slot>,
}

/// A message already encoded for the wire.
struct Frame {
    kind: &'static str,
    text: String,
}

impl Frame {
    fn encode(msg: &ClientMessage) -> Result<Self, TransportError> {
        match msg.to_json() {
            Ok(text) => Ok(Self { kind: msg.kind_name(), text }),
            Err(e) => {
                warn!("Refusing to send {}: {}", msg.kind_name(), e);
                Err(TransportError::Unencodable)
            }
        }
    }
}

/// A live connection's tasks and queue.
struct Link {
    outgoing: mpsc::Sender<Frame>,
    running: Arc<AtomicBool>,
    stop: watch::Sender<bool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// One peer's connection to the server.
pub struct ClientTransport {
    config: TransportConfig,
    handlers: HandlerMap,
    session: Arc<Mutex<SessionInfo>>,
    name: Option<String>,
    link: Option<Link>,
}

impl ClientTransport {
    /// Create a disconnected transport.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            handlers: Arc::new(Mutex::new(HashMap::new())),
            session: Arc::new(Mutex::new(SessionInfo::default())),
            name: None,
            link: None,
        }
    }

    /// Connect to `ws://host:port`. Any previous connection is closed first.
    pub async fn connect(&mut self, host: &str, port: u16, name: &str) -> Result<(), ConnectError> {
        self.disconnect();

        let url = format!("ws://{}:{}", host, port);
        info!("Connecting to {}...", url);

        let ws_stream = match timeout(self.config.connect_timeout, connect_async(url.as_str())).await {
            Err(_) => return Err(ConnectError::Timeout(url)),
            Ok(Err(tungstenite::Error::Io(e))) if e.kind() == io::ErrorKind::ConnectionRefused => {
                return Err(ConnectError::Refused(url));
            }
            Ok(Err(source)) => return Err(ConnectError::Other { url, source }),
            Ok(Ok((ws_stream, _))) => ws_stream,
        };
        info!("Connected to {} as {}", url, name);

        let (mut write, read) = ws_stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::channel::<Frame>(self.config.outbound_queue.max(1));
        let running = Arc::new(AtomicBool::new(true));
        let (stop, stop_rx) = watch::channel(false);

        // Writer loop - send messages from channel, close once every sender is gone
        let writer_running = running.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                if let Err(e) = write.send(Message::Text(frame.text)).await {
                    warn!("Failed to send {}: {}", frame.kind, e);
                    writer_running.store(false, Ordering::SeqCst);
                    break;
                }
            }
            let _ = write.close().await;
            debug!("Writer loop ended");
        });

        let reader = tokio::spawn(run_receive_loop(
            read,
            outgoing.clone(),
            self.handlers.clone(),
            self.session.clone(),
            running.clone(),
            stop_rx,
        ));

        self.name = Some(name.to_string());
        self.link = Some(Link { outgoing, running, stop, reader, writer });
        Ok(())
    }

    /// Whether the connection is up.
    pub fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.running.load(Ordering::SeqCst))
    }

    /// Name given to `connect`.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Session this peer created or joined.
    pub fn session_code(&self) -> Option<SessionCode> {
        self.session.lock().ok().and_then(|info| info.code.clone())
    }

    /// Slot this peer holds.
    pub fn slot(&self) -> Option<Slot> {
        self.session.lock().ok().and_then(|info| info.slot)
    }

    /// Route messages of `kind` to `handler`, replacing any earlier handler.
    ///
    /// Handlers run on the receive task; they should queue work for the
    /// simulation loop rather than touch its state.
    pub fn register_handler<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(ServerMessage) + Send + Sync + 'static,
    {
        match self.handlers.lock() {
            Ok(mut handlers) => {
                handlers.insert(kind, Arc::new(handler));
            }
            Err(_) => error!("Handler table poisoned, dropping handler for {:?}", kind),
        }
    }

    /// Open a session as host.
    pub fn create_session(&self, name: &str) -> Result<(), TransportError> {
        self.send(ClientMessage::CreateSession { name: name.to_string() })
    }

    /// Join a session as guest.
    pub fn join_session(&self, code: &SessionCode, name: &str) -> Result<(), TransportError> {
        self.send(ClientMessage::JoinSession {
            session_code: code.clone(),
            name: name.to_string(),
        })
    }

    /// Mark this peer ready.
    pub fn send_ready(&self) -> Result<(), TransportError> {
        self.send(ClientMessage::MarkReady { session_code: self.session_code() })
    }

    /// Send an action for the other peer.
    pub fn send_action(&self, action_type: ActionType, action_data: ActionData) -> Result<(), TransportError> {
        self.send(ClientMessage::Action {
            session_code: self.session_code(),
            action_type,
            action_data,
        })
    }

    /// Send a host snapshot for the guest.
    pub fn send_snapshot(&self, snapshot: Snapshot) -> Result<(), TransportError> {
        self.send(ClientMessage::SnapshotUpdate {
            session_code: self.session_code(),
            snapshot,
        })
    }

    /// Ask the server to start the run (host only).
    pub fn send_start(&self, difficulty: Option<DifficultyConfig>) -> Result<(), TransportError> {
        self.send(ClientMessage::StartSession {
            session_code: self.session_code(),
            difficulty,
        })
    }

    /// Report the end of the run.
    pub fn send_summary(&self, summary: SessionSummary) -> Result<(), TransportError> {
        self.send(ClientMessage::SessionSummary {
            session_code: self.session_code(),
            summary,
        })
    }

    fn send(&self, msg: ClientMessage) -> Result<(), TransportError> {
        let frame = Frame::encode(&msg)?;
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        if !link.running.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        link.outgoing.try_send(frame).map_err(|e| match e {
            TrySendError::Full(frame) => {
                warn!("Outbound queue full, dropping {}", frame.kind);
                TransportError::QueueFull
            }
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Stop the receive loop and close the stream. Safe to call repeatedly
    /// or when never connected.
    pub fn disconnect(&mut self) {
        // Tasks finish on their own once signalled.
        drop(self.take_link());
    }

    /// Like [`ClientTransport::disconnect`], then wait for the socket to close.
    pub async fn close(&mut self) {
        if let Some(Link { outgoing, stop, reader, writer, .. }) = self.take_link() {
            drop(outgoing);
            let _ = reader.await;
            let _ = writer.await;
            drop(stop);
        }
    }

    fn take_link(&mut self) -> Option<Link> {
        let link = self.link.take()?;
        link.running.store(false, Ordering::SeqCst);
        let _ = link.stop.send(true);
        if let Ok(mut info) = self.session.lock() {
            *info = SessionInfo::default();
        }
        info!("Disconnected");
        Some(link)
    }
}

impl Default for ClientTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl Drop for ClientTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Read frames until the server closes, a read fails, or `stop` fires.
async fn run_receive_loop<S>(
    mut read: S,
    outgoing: mpsc::Sender<Frame>,
    handlers: HandlerMap,
    session: Arc<Mutex<SessionInfo>>,
    running: Arc<AtomicBool>,
    mut stop: watch::Receiver<bool>,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            frame = read.next() => frame,
            _ = stop.changed() => break,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text) {
                Ok(ServerMessage::Ping) => {
                    let answered = Frame::encode(&ClientMessage::Pong)
                        .map(|pong| outgoing.try_send(pong).is_ok())
                        .unwrap_or(false);
                    if !answered {
                        debug!("Could not answer ping");
                    }
                }
                Ok(msg) => dispatch(&handlers, &session, msg),
                Err(e) => {
                    warn!("Protocol error from server: {}", e);
                    break;
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                info!("Server closed connection");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("WebSocket read error: {}", e);
                break;
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    debug!("Reader task ended");
}

fn dispatch(handlers: &HandlerMap, session: &Mutex<SessionInfo>, msg: ServerMessage) {
    if let ServerMessage::SessionCreated { session_code, slot }
    | ServerMessage::SessionJoined { session_code, slot } = &msg
    {
        if let Ok(mut info) = session.lock() {
            info.code = Some(session_code.clone());
            info.slot = Some(*slot);
        }
    }

    let kind = msg.kind();
    let handler = handlers.lock().ok().and_then(|h| h.get(&kind).cloned());
    match handler {
        Some(handler) => handler(msg),
        None => debug!("No handler for {:?}, dropping", kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_transport_config_default() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.outbound_queue, 256);
    }

    #[test]
    fn test_send_before_connect() {
        let transport = ClientTransport::default();
        assert!(!transport.is_connected());
        assert_eq!(transport.send_ready(), Err(TransportError::NotConnected));
        assert_eq!(transport.create_session("host"), Err(TransportError::NotConnected));
    }

    #[test]
    fn test_non_finite_snapshot_rejected_before_queueing() {
        use tank_duo::game::{EntityKind, EntityState, NetworkId};
        use tank_duo::Vec2;

        let transport = ClientTransport::default();
        let mut snapshot = Snapshot::new();
        snapshot.insert(NetworkId::entity(1), EntityState::new(Vec2::new(f32::NAN, 0.0), EntityKind::Bullet));
        assert_eq!(transport.send_snapshot(snapshot), Err(TransportError::Unencodable));

        let input = ActionData::new(Vec2::new(0.0, f32::INFINITY), false);
        assert_eq!(transport.send_action(ActionType::Input, input), Err(TransportError::Unencodable));
    }

    #[test]
    fn test_disconnect_when_never_connected() {
        let mut transport = ClientTransport::default();
        transport.disconnect();
        transport.disconnect();
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_later_handler_replaces_earlier() {
        let transport = ClientTransport::default();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let first = hits.clone();
        transport.register_handler(EventKind::PeerJoined, move |_| first.lock().unwrap().push("first"));
        let second = hits.clone();
        transport.register_handler(EventKind::PeerJoined, move |_| second.lock().unwrap().push("second"));

        dispatch(
            &transport.handlers,
            &transport.session,
            ServerMessage::PeerJoined { name: "guest".to_string() },
        );
        assert_eq!(*hits.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn test_dispatch_records_session() {
        let transport = ClientTransport::default();
        dispatch(
            &transport.handlers,
            &transport.session,
            ServerMessage::SessionJoined { session_code: SessionCode::new("ABCDEF"), slot: Slot::Guest },
        );
        assert_eq!(transport.session_code(), Some(SessionCode::new("ABCDEF")));
        assert_eq!(transport.slot(), Some(Slot::Guest));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Grab a free port, then release it so nothing is listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut transport = ClientTransport::default();
        let err = transport.connect("127.0.0.1", port, "nobody").await.unwrap_err();
        assert!(matches!(err, ConnectError::Refused(_)), "{err}");
        assert!(!transport.is_connected());
    }
}
