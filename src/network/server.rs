//! WebSocket Game Server
//!
//! Accepts peer connections, authenticates `hello`, pairs queued players and
//! routes intents to their match session. Each live session gets its own
//! timer task that runs the turn clock and the reconnect window.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::core::clock::{system_clock, SharedClock};
use crate::game::card::{CardCatalog, CatalogError, InMemoryCatalog};
use crate::network::auth::HelloGate;
use crate::network::protocol::{
    match_id_string, parse_match_id, ClientMessage, ErrorCode, PlayerId, ServerMessage,
};
use crate::network::session::{MatchSession, SessionConfig, SessionError, SessionId, SessionManager, SessionState};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections silent for this long are dropped.
    pub idle_timeout: Duration,
    /// How often the queue is paired.
    pub matchmaking_interval: Duration,
    /// Server version string.
    pub version: String,
    /// Who may say hello; open when no verifier key is configured.
    pub auth: HelloGate,
    /// Card catalog JSON; the built-in starter set when unset.
    pub catalog_path: Option<PathBuf>,
    /// Per-match settings.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            matchmaking_interval: Duration::from_secs(1),
            version: env!("CARGO_PKG_VERSION").to_string(),
            auth: HelloGate::Open,
            catalog_path: None,
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read `CRYPTID_BIND_ADDR`, `CRYPTID_MAX_CONNECTIONS`,
    /// `CRYPTID_TURN_SECONDS`, `CRYPTID_CATALOG_PATH` and the auth variables.
    pub fn from_env() -> Result<Self, GameServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GameServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(addr) = lookup("CRYPTID_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .map_err(|_| GameServerError::Config(format!("bad CRYPTID_BIND_ADDR: {addr}")))?;
        }
        if let Some(max) = lookup("CRYPTID_MAX_CONNECTIONS") {
            config.max_connections = max
                .parse()
                .map_err(|_| GameServerError::Config(format!("bad CRYPTID_MAX_CONNECTIONS: {max}")))?;
        }
        if let Some(secs) = lookup("CRYPTID_TURN_SECONDS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| GameServerError::Config(format!("bad CRYPTID_TURN_SECONDS: {secs}")))?;
            config.session.turn_time_limit = Duration::from_secs(secs);
        }
        config.catalog_path = lookup("CRYPTID_CATALOG_PATH").map(PathBuf::from);
        config.auth = HelloGate::from_lookup(&lookup).map_err(|e| GameServerError::Config(e.to_string()))?;
        Ok(config)
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

    /// Bad configuration value.
    #[error("Config error: {0}")]
    Config(String),

    /// Card catalog failed to load.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Connected client state.
struct ConnectedClient {
    /// Player identifier (after hello).
    player_id: Option<PlayerId>,
    /// Last activity.
    last_activity: Instant,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// Shared handles passed to per-connection tasks.
#[derive(Clone)]
struct Shared {
    config: ServerConfig,
    clients: Clients,
    sessions: Arc<SessionManager>,
    clock: SharedClock,
}

/// The game server.
pub struct GameServer {
    shared: Shared,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server, loading the catalog named in the config.
    pub fn new(config: ServerConfig) -> Result<Self, GameServerError> {
        let catalog: Arc<dyn CardCatalog> = match &config.catalog_path {
            Some(path) => Arc::new(InMemoryCatalog::from_path(path)?),
            None => Arc::new(InMemoryCatalog::starter()),
        };
        Ok(Self::with_catalog(config, catalog, system_clock()))
    }

    /// Create a server with an explicit catalog and clock.
    pub fn with_catalog(config: ServerConfig, catalog: Arc<dyn CardCatalog>, clock: SharedClock) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let sessions = Arc::new(SessionManager::new(config.session.clone(), catalog, clock.clone()));
        Self {
            shared: Shared {
                config,
                clients: Arc::new(RwLock::new(BTreeMap::new())),
                sessions,
                clock,
            },
            shutdown_tx,
        }
    }

    /// Session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.shared.sessions
    }

    /// Bind the configured address and serve.
    #[instrument(skip(self), fields(addr = %self.shared.config.bind_addr))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);

        let matchmaking = {
            let shared = self.shared.clone();
            let shutdown_tx = self.shutdown_tx.clone();
            tokio::spawn(async move { run_matchmaking_loop(shared, shutdown_tx).await })
        };
        let cleanup = {
            let shared = self.shared.clone();
            tokio::spawn(async move { run_cleanup_loop(shared).await })
        };

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let count = self.shared.clients.read().await.len();
                            if count >= self.shared.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        matchmaking.abort();
        cleanup.abort();
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let shared = self.shared.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            shared.clients.write().await.insert(addr, ConnectedClient {
                player_id: None,
                last_activity: Instant::now(),
            });

            let writer = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx
                                            .send(ServerMessage::error(ErrorCode::InvalidMessage, "Invalid message format"))
                                            .await;
                                        continue;
                                    }
                                };
                                if let Some(client) = shared.clients.write().await.get_mut(&addr) {
                                    client.last_activity = Instant::now();
                                }
                                handle_client_message(addr, client_msg, &shared, &msg_tx).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            writer.abort();

            let client = shared.clients.write().await.remove(&addr);
            if let Some(player_id) = client.and_then(|c| c.player_id) {
                shared.sessions.dequeue(&player_id).await;
                if let Some(session) = player_session(&shared, &player_id).await {
                    if let Err(e) = session.write().await.mark_disconnected(&player_id, &msg_tx).await {
                        debug!("Disconnect bookkeeping failed: {}", e);
                    }
                }
            }
            info!("Client {} cleaned up", addr);
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.shared.clients.read().await.len()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.shared.sessions.session_count().await
    }

    /// Get matchmaking queue size.
    pub async fn queue_size(&self) -> usize {
        self.shared.sessions.queue_len().await
    }
}

async fn player_session(shared: &Shared, player_id: &PlayerId) -> Option<Arc<RwLock<MatchSession>>> {
    let id = shared.sessions.get_player_session(player_id).await?;
    shared.sessions.get_session(&id).await
}

async fn authenticated(
    addr: SocketAddr,
    shared: &Shared,
    sender: &mpsc::Sender<ServerMessage>,
) -> Option<PlayerId> {
    let id = shared.clients.read().await.get(&addr).and_then(|c| c.player_id);
    if id.is_none() {
        let _ = sender
            .send(ServerMessage::error(ErrorCode::NotAuthenticated, "Send hello first"))
            .await;
    }
    id
}

fn session_error_message(e: &SessionError) -> Option<ServerMessage> {
    let code = match e {
        // Already reported to the peer as actionError.
        SessionError::Rejected(_) => return None,
        SessionError::MatchNotFound | SessionError::Closed => ErrorCode::MatchNotFound,
        SessionError::AlreadyQueued | SessionError::AlreadyInMatch => ErrorCode::AlreadyInMatch,
        SessionError::NotInMatch | SessionError::ReconnectExpired => ErrorCode::NotInMatch,
        SessionError::MissingManifest | SessionError::NotFinished | SessionError::NoRematchPending => {
            ErrorCode::InvalidMessage
        }
    };
    Some(ServerMessage::error(code, e.to_string()))
}

async fn report(sender: &mpsc::Sender<ServerMessage>, result: Result<(), SessionError>) {
    if let Err(e) = result {
        debug!("Request failed: {}", e);
        if let Some(msg) = session_error_message(&e) {
            let _ = sender.send(msg).await;
        }
    }
}

async fn handle_client_message(
    addr: SocketAddr,
    msg: ClientMessage,
    shared: &Shared,
    sender: &mpsc::Sender<ServerMessage>,
) {
    match msg {
        ClientMessage::Hello { player_id, token, client_version } => {
            handle_hello(addr, &player_id, &token, &client_version, shared, sender).await;
        }
        ClientMessage::Ping { client_time, rtt_ms } => {
            let player_id = shared.clients.read().await.get(&addr).and_then(|c| c.player_id);
            if let (Some(rtt), Some(player_id)) = (rtt_ms, player_id) {
                if let Some(session) = player_session(shared, &player_id).await {
                    session.write().await.record_rtt(&player_id, rtt);
                }
            }
            let _ = sender
                .send(ServerMessage::Pong { client_time, server_time: shared.clock.now_ms() })
                .await;
        }
        ClientMessage::FindMatch { manifest } => {
            let Some(player_id) = authenticated(addr, shared, sender).await else { return };
            match shared.sessions.enqueue(player_id, manifest, sender.clone()).await {
                Ok(position) => {
                    let _ = sender.send(ServerMessage::Queued { position: position as u32 }).await;
                }
                Err(e) => report(sender, Err(e)).await,
            }
        }
        ClientMessage::CancelFind => {
            let Some(player_id) = authenticated(addr, shared, sender).await else { return };
            shared.sessions.dequeue(&player_id).await;
        }
        ClientMessage::Action { match_id, player_id: claimed, action, manifest } => {
            let Some(player_id) = authenticated(addr, shared, sender).await else { return };
            if PlayerId::from_uuid_str(&claimed) != Some(player_id) {
                let _ = sender
                    .send(ServerMessage::error(ErrorCode::InvalidMessage, "playerId does not match hello"))
                    .await;
                return;
            }
            let result = match lookup_match(shared, &match_id).await {
                Ok(session) => session
                    .write()
                    .await
                    .handle_action(&player_id, action, manifest)
                    .await
                    .map(|_| ()),
                Err(e) => Err(e),
            };
            report(sender, result).await;
        }
        ClientMessage::Rejoin { match_id } => {
            let Some(player_id) = authenticated(addr, shared, sender).await else { return };
            let result = match lookup_match(shared, &match_id).await {
                Ok(session) => {
                    let id = session.read().await.id;
                    let resumed = session.write().await.reconnect_player(&player_id, sender.clone()).await;
                    if resumed.is_ok() {
                        shared.sessions.register_player(player_id, id).await;
                    }
                    resumed.map(|_| ())
                }
                Err(e) => Err(e),
            };
            report(sender, result).await;
        }
        ClientMessage::RematchRequest | ClientMessage::RematchAccept | ClientMessage::Leave => {
            let Some(player_id) = authenticated(addr, shared, sender).await else { return };
            if matches!(msg, ClientMessage::Leave) {
                shared.sessions.dequeue(&player_id).await;
            }
            let Some(session) = player_session(shared, &player_id).await else {
                report(sender, Err(SessionError::NotInMatch)).await;
                return;
            };
            let mut session = session.write().await;
            let result = match msg {
                ClientMessage::RematchRequest => session.request_rematch(&player_id).await,
                ClientMessage::RematchAccept => session.accept_rematch(&player_id).await,
                _ => session.leave(&player_id).await,
            };
            report(sender, result).await;
        }
    }
}

async fn lookup_match(shared: &Shared, match_id: &str) -> Result<Arc<RwLock<MatchSession>>, SessionError> {
    let id: SessionId = parse_match_id(match_id).ok_or(SessionError::MatchNotFound)?;
    shared.sessions.get_session(&id).await.ok_or(SessionError::MatchNotFound)
}

async fn handle_hello(
    addr: SocketAddr,
    claimed_id: &str,
    token: &str,
    client_version: &str,
    shared: &Shared,
    sender: &mpsc::Sender<ServerMessage>,
) {
    let player_id = match shared.config.auth.admit(claimed_id, token) {
        Ok(id) => id,
        Err(e) => {
            warn!("Hello from {} refused: {}", addr, e);
            let _ = sender.send(ServerMessage::error(e.code(), e.to_string())).await;
            return;
        }
    };

    if let Some(client) = shared.clients.write().await.get_mut(&addr) {
        client.player_id = Some(player_id);
    }
    let _ = sender
        .send(ServerMessage::Welcome {
            player_id: player_id.to_uuid_string(),
            server_version: shared.config.version.clone(),
            server_time: shared.clock.now_ms(),
        })
        .await;
    debug!("Client {} is {} ({})", addr, player_id.to_uuid_string(), client_version);
}

async fn run_matchmaking_loop(shared: Shared, shutdown_tx: broadcast::Sender<()>) {
    let mut ticker = interval(shared.config.matchmaking_interval);
    loop {
        ticker.tick().await;
        for id in shared.sessions.pair_queued().await {
            if let Some(session) = shared.sessions.get_session(&id).await {
                let sessions = Arc::clone(&shared.sessions);
                let shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(async move { run_session_timer(id, session, sessions, shutdown_rx).await });
            }
        }
    }
}

/// Turn clock and reconnect window for one match.
#[instrument(skip_all, fields(match_id = %match_id_string(&id)))]
async fn run_session_timer(
    id: SessionId,
    session: Arc<RwLock<MatchSession>>,
    sessions: Arc<SessionManager>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let period = session.read().await.config.timer_interval;
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut s = session.write().await;
                if let Err(e) = s.tick().await {
                    warn!("Timer step failed: {}", e);
                }
                if s.get_state() == SessionState::Closed {
                    break;
                }
            }
            _ = shutdown_rx.recv() => {
                session.write().await.close().await;
                break;
            }
        }
    }
    sessions.remove_session(&id).await;
    debug!("Session timer stopped");
}

async fn run_cleanup_loop(shared: Shared) {
    let mut ticker = interval(Duration::from_secs(60));
    loop {
        ticker.tick().await;

        let now = Instant::now();
        let idle: Vec<_> = shared
            .clients
            .read()
            .await
            .iter()
            .filter(|(_, c)| now.duration_since(c.last_activity) > shared.config.idle_timeout)
            .map(|(addr, _)| *addr)
            .collect();

        for addr in idle {
            if let Some(client) = shared.clients.write().await.remove(&addr) {
                if let Some(player_id) = client.player_id {
                    shared.sessions.dequeue(&player_id).await;
                }
                info!("Removed idle client {}", addr);
            }
        }

        shared.sessions.cleanup().await;
    }
}
