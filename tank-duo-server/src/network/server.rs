//! WebSocket Game Server
//!
//! Accepts peer connections and routes their messages to the session
//! registry. Each connection runs its own read loop; a writer task drains the
//! connection's outbound queue into the socket.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, broadcast};
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval, timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};
use uuid::Uuid;

use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::session::{ConnectionId, RegistryStatus, SessionRegistry};
use crate::network::summary::SummaryStore;
use crate::DEFAULT_PORT;

/// How long a closing connection may spend flushing its queue.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Silence on a connection before the server sends a ping.
    pub keepalive: Duration,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue: usize,
    /// Interval between status log lines.
    pub status_interval: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            keepalive: Duration::from_secs(60),
            outbound_queue: 256,
            status_interval: Duration::from_secs(60),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `TANK_DUO_BIND`, `TANK_DUO_KEEPALIVE_SECS`,
    /// `TANK_DUO_OUTBOUND_QUEUE` and `TANK_DUO_STATUS_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with a custom variable source.
    /// Malformed values keep the default and log a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: parse_var(&lookup, "TANK_DUO_BIND", defaults.bind_addr),
            keepalive: Duration::from_secs(parse_var(
                &lookup,
                "TANK_DUO_KEEPALIVE_SECS",
                defaults.keepalive.as_secs(),
            )),
            outbound_queue: parse_var(&lookup, "TANK_DUO_OUTBOUND_QUEUE", defaults.outbound_queue).max(1),
            status_interval: Duration::from_secs(parse_var(
                &lookup,
                "TANK_DUO_STATUS_SECS",
                defaults.status_interval.as_secs(),
            )),
            version: defaults.version,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring malformed {}={:?}", key, raw);
                default
            }
        },
        None => default,
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Why a connection's read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer closed the stream.
    Closed,
    /// Peer sent something that is not a valid frame.
    Protocol,
    /// Read failed.
    Io,
    /// Write failed or the writer stopped.
    WriteFailed,
    /// Server is shutting down.
    Shutdown,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Session registry shared with every connection.
    registry: Arc<SessionRegistry>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server that logs finished sessions.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry(config, SessionRegistry::default())
    }

    /// Create a server that hands finished sessions to `store`.
    pub fn with_summary_store(config: ServerConfig, store: Arc<dyn SummaryStore>) -> Self {
        Self::with_registry(config, SessionRegistry::new(store))
    }

    fn with_registry(config: ServerConfig, registry: SessionRegistry) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            registry: Arc::new(registry),
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind and serve until [`GameServer::shutdown`].
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until [`GameServer::shutdown`].
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let status_handle = tokio::spawn(Self::run_status_loop(
            self.registry.clone(),
            self.config.status_interval,
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            self.spawn_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        let _ = status_handle.await;
        let status = self.status().await;
        info!(
            "Server stopped: {} connections, {} open sessions, {} created",
            status.connections, status.open_sessions, status.sessions_created
        );
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let registry = self.registry.clone();
        let config = self.config.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            match handle_connection(registry, config, stream, addr, shutdown_rx).await {
                Ok(reason) => debug!("Connection from {} ended: {:?}", addr, reason),
                Err(e) => warn!("Connection from {} failed: {}", addr, e),
            }
        });
    }

    /// Log registry counters every `period` until shutdown.
    async fn run_status_loop(
        registry: Arc<SessionRegistry>,
        period: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = interval(period.max(Duration::from_millis(100)));
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let status = registry.status().await;
                    info!(
                        "Status: {} connections, {} sessions ({} active, {} slots), {} created",
                        status.connections,
                        status.open_sessions,
                        status.active_sessions,
                        status.occupied_slots,
                        status.sessions_created
                    );
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    /// Shutdown the server. Every connection gets a shutdown notice.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Current registry counters.
    pub async fn status(&self) -> RegistryStatus {
        self.registry.status().await
    }
}

/// Run one connection from handshake to cleanup.
async fn handle_connection(
    registry: Arc<SessionRegistry>,
    config: ServerConfig,
    stream: TcpStream,
    addr: SocketAddr,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<DisconnectReason, GameServerError> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(config.outbound_queue);

    let conn: ConnectionId = Uuid::new_v4();
    let stalled = registry.register_connection(conn, msg_tx.clone()).await;
    info!("Connection {} from {}", conn, addr);

    // Writer: drains the queue, then closes the socket once every sender is gone.
    let mut writer = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to serialize {:?}: {}", msg.kind(), e);
                    continue;
                }
            };
            ws_sender.send(Message::Text(text)).await?;
        }
        ws_sender.close().await
    });
    let mut writer_done = false;
    let mut last_activity = Instant::now();

    let reason = loop {
        tokio::select! {
            inbound = timeout(config.keepalive, ws_receiver.next()) => {
                match inbound {
                    Err(_) => {
                        debug!("Connection {} quiet for {:?}, sending ping", conn, last_activity.elapsed());
                        if let Err(TrySendError::Closed(_)) = msg_tx.try_send(ServerMessage::Ping) {
                            break DisconnectReason::WriteFailed;
                        }
                    }
                    Ok(Some(Ok(Message::Text(text)))) => {
                        last_activity = Instant::now();
                        match ClientMessage::from_json(&text) {
                            Ok(msg) => handle_client_message(&registry, conn, msg, &msg_tx).await,
                            Err(e) => {
                                warn!("Protocol error from {}: {}", conn, e);
                                break DisconnectReason::Protocol;
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Binary(_)))) => {
                        warn!("Protocol error from {}: binary frames are not supported", conn);
                        break DisconnectReason::Protocol;
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                        break DisconnectReason::Closed;
                    }
                    Ok(Some(Ok(_))) => {
                        last_activity = Instant::now();
                    }
                    Ok(Some(Err(e))) => {
                        warn!("WebSocket error for {}: {}", conn, e);
                        break DisconnectReason::Io;
                    }
                }
            }
            result = &mut writer => {
                writer_done = true;
                match result {
                    Ok(Ok(())) => debug!("Writer for {} finished", conn),
                    Ok(Err(e)) => warn!("Write to {} failed: {}", conn, e),
                    Err(e) => error!("Writer task for {} failed: {}", conn, e),
                }
                break DisconnectReason::WriteFailed;
            }
            _ = stalled.notified() => {
                warn!("Connection {} cannot keep up, closing", conn);
                break DisconnectReason::WriteFailed;
            }
            _ = shutdown_rx.recv() => {
                let _ = msg_tx.try_send(ServerMessage::Shutdown {
                    reason: "Server shutting down".to_string(),
                });
                break DisconnectReason::Shutdown;
            }
        }
    };

    registry.on_disconnect(conn).await;

    // The registry's copy of the sender is gone; dropping ours lets the writer
    // flush what is queued and close the socket.
    drop(msg_tx);
    if !writer_done && timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!("Writer for {} did not finish in time", conn);
    }

    info!("Connection {} closed ({:?})", conn, reason);
    Ok(reason)
}

/// Route one client message to the registry.
async fn handle_client_message(
    registry: &SessionRegistry,
    conn: ConnectionId,
    msg: ClientMessage,
    outbox: &mpsc::Sender<ServerMessage>,
) {
    let kind = msg.kind_name();
    let result = match msg {
        ClientMessage::CreateSession { name } => {
            registry.create_session(conn, name).await.map(|_| ())
        }
        ClientMessage::JoinSession { session_code, name } => {
            // Failures already answered with join_failed.
            registry.join_session(conn, &session_code, name).await;
            Ok(())
        }
        ClientMessage::MarkReady { session_code } => {
            registry.mark_ready(session_code, conn).await.map(|_| ())
        }
        ClientMessage::StartSession { session_code, difficulty } => {
            registry.request_start(conn, session_code, difficulty).await.map(|_| ())
        }
        ClientMessage::SessionSummary { session_code, summary } => {
            registry.record_summary(conn, session_code, summary).await.map(|_| ())
        }
        ClientMessage::SnapshotUpdate { session_code, snapshot } => {
            if let Err(e) = registry.relay_snapshot(conn, session_code, snapshot).await {
                debug!("Dropping snapshot from {}: {}", conn, e);
            }
            Ok(())
        }
        ClientMessage::Action { session_code, action_type, action_data } => {
            if let Err(e) = registry.relay_action(conn, session_code, action_type, action_data).await {
                debug!("Dropping action from {}: {}", conn, e);
            }
            Ok(())
        }
        ClientMessage::Ping => {
            reply(outbox, conn, ServerMessage::Pong);
            Ok(())
        }
        ClientMessage::Pong => {
            debug!("Pong from {}", conn);
            Ok(())
        }
    };

    if let Err(e) = result {
        debug!("Rejected {} from {}: {}", kind, conn, e);
        reply(outbox, conn, ServerMessage::Error { reason: e.to_string() });
    }
}

fn reply(outbox: &mpsc::Sender<ServerMessage>, conn: ConnectionId, message: ServerMessage) {
    if let Err(e) = outbox.try_send(message) {
        debug!("Could not reply to {}: {}", conn, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::{SessionCode, Slot};
    use tokio_tungstenite::connect_async;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    async fn start(config: ServerConfig) -> (Arc<GameServer>, SocketAddr) {
        let server = Arc::new(GameServer::new(config));
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });
        (server, addr)
    }

    async fn next_server_message<S>(ws: &mut S) -> Option<ServerMessage>
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match timeout(Duration::from_secs(5), ws.next()).await.ok()?? {
                Ok(Message::Text(text)) => return ServerMessage::from_json(&text).ok(),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 5555);
        assert_eq!(config.keepalive, Duration::from_secs(60));
        assert_eq!(config.outbound_queue, 256);
    }

    #[test]
    fn test_config_from_lookup() {
        let config = ServerConfig::from_lookup(|key| match key {
            "TANK_DUO_BIND" => Some("127.0.0.1:6000".to_string()),
            "TANK_DUO_KEEPALIVE_SECS" => Some("5".to_string()),
            "TANK_DUO_OUTBOUND_QUEUE" => Some("lots".to_string()),
            _ => None,
        });
        assert_eq!(config.bind_addr, "127.0.0.1:6000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.keepalive, Duration::from_secs(5));
        assert_eq!(config.outbound_queue, 256);
        assert_eq!(config.status_interval, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(test_config());
        let status = server.status().await;
        assert_eq!(status.connections, 0);
        assert_eq!(status.open_sessions, 0);
    }

    #[tokio::test]
    async fn test_create_session_over_websocket() {
        let (server, addr) = start(test_config()).await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        let create = ClientMessage::CreateSession { name: "host".to_string() };
        ws.send(Message::Text(create.to_json().unwrap())).await.unwrap();

        match next_server_message(&mut ws).await {
            Some(ServerMessage::SessionCreated { session_code, slot }) => {
                assert_eq!(slot, Slot::Host);
                assert!(server.registry().session(&session_code).await.is_some());
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        ws.send(Message::Text(ClientMessage::Ping.to_json().unwrap())).await.unwrap();
        assert_eq!(next_server_message(&mut ws).await, Some(ServerMessage::Pong));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_malformed_frame_drops_connection_and_notifies_peer() {
        let (server, addr) = start(test_config()).await;
        let (mut host, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let (mut guest, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        let create = ClientMessage::CreateSession { name: "host".to_string() };
        host.send(Message::Text(create.to_json().unwrap())).await.unwrap();
        let code = match next_server_message(&mut host).await {
            Some(ServerMessage::SessionCreated { session_code, .. }) => session_code,
            other => panic!("unexpected reply: {:?}", other),
        };

        let join = ClientMessage::JoinSession { session_code: code.clone(), name: "guest".to_string() };
        guest.send(Message::Text(join.to_json().unwrap())).await.unwrap();
        assert_eq!(next_server_message(&mut host).await, Some(ServerMessage::PeerJoined { name: "guest".to_string() }));

        guest.send(Message::Text("{\"v\":1,\"kind\":\"teleport\"}".to_string())).await.unwrap();
        assert_eq!(
            next_server_message(&mut host).await,
            Some(ServerMessage::PeerDisconnected { name: "guest".to_string() })
        );

        let session = server.registry().session(&code).await.unwrap();
        assert_eq!(session.occupied(), 1);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_keepalive_ping_does_not_close() {
        let config = ServerConfig {
            keepalive: Duration::from_millis(100),
            ..test_config()
        };
        let (server, addr) = start(config).await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        assert_eq!(next_server_message(&mut ws).await, Some(ServerMessage::Ping));
        ws.send(Message::Text(ClientMessage::Pong.to_json().unwrap())).await.unwrap();

        let create = ClientMessage::CreateSession { name: "late".to_string() };
        ws.send(Message::Text(create.to_json().unwrap())).await.unwrap();
        loop {
            match next_server_message(&mut ws).await {
                Some(ServerMessage::Ping) => continue,
                Some(ServerMessage::SessionCreated { .. }) => break,
                other => panic!("unexpected reply: {:?}", other),
            }
        }
        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_notifies_connections() {
        let (server, addr) = start(test_config()).await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        // Make sure the connection is registered before shutting down.
        ws.send(Message::Text(ClientMessage::Ping.to_json().unwrap())).await.unwrap();
        assert_eq!(next_server_message(&mut ws).await, Some(ServerMessage::Pong));

        server.shutdown();
        match next_server_message(&mut ws).await {
            Some(ServerMessage::Shutdown { .. }) => {}
            other => panic!("expected shutdown notice, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_from_guest_is_rejected() {
        let (server, addr) = start(test_config()).await;
        let (mut host, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let (mut guest, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        host.send(Message::Text(ClientMessage::CreateSession { name: "h".to_string() }.to_json().unwrap()))
            .await
            .unwrap();
        let code: SessionCode = match next_server_message(&mut host).await {
            Some(ServerMessage::SessionCreated { session_code, .. }) => session_code,
            other => panic!("unexpected reply: {:?}", other),
        };
        guest
            .send(Message::Text(
                ClientMessage::JoinSession { session_code: code, name: "g".to_string() }.to_json().unwrap(),
            ))
            .await
            .unwrap();
        assert!(matches!(next_server_message(&mut guest).await, Some(ServerMessage::SessionJoined { .. })));

        let start = ClientMessage::StartSession { session_code: None, difficulty: None };
        guest.send(Message::Text(start.to_json().unwrap())).await.unwrap();
        match next_server_message(&mut guest).await {
            Some(ServerMessage::Error { reason }) => assert!(reason.contains("host")),
            other => panic!("unexpected reply: {:?}", other),
        }
        server.shutdown();
    }
}
