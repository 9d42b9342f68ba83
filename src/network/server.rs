//! WebSocket Game Server
//!
//! Accepts connections, runs the version handshake and then serves each
//! client's request/reply loop: the client sends its event batch, the
//! server applies it through the simulation task and answers with a
//! snapshot. The world itself lives in the simulation task (`session`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async_with_config, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::core::codec::CodecError;
use crate::core::constants::{EVENT_LIFESPAN_SECS, RECV_BUFFER_SIZE};
use crate::game::entity::EntityId;
use crate::game::mode::{GameMode, ModeKind};
use crate::game::world::World;
use crate::network::protocol::{read_text, ClientMessage, Inbound, ServerMessage};
use crate::network::session::{spawn_simulation, SessionError, SimHandle, Simulation};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum simultaneous clients; `None` for no limit.
    pub max_clients: Option<usize>,
    /// Version string exchanged in the handshake.
    pub version: String,
    /// Server tick rate (Hz).
    pub tick_rate: u32,
    /// Time allowed for the WebSocket upgrade and version exchange.
    pub handshake_timeout: Duration,
    /// Time allowed between client messages.
    pub recv_timeout: Duration,
    /// Largest accepted message (bytes).
    pub recv_buffer_size: usize,
    /// How long logged events stay deliverable.
    pub event_lifespan: Duration,
    /// Map file; an empty map is used when unset or unreadable.
    pub map_path: Option<PathBuf>,
    /// Game mode rules.
    pub mode: ModeKind,
    /// Seconds of grace before damage is enabled.
    pub grace_period: f64,
    /// Match length in seconds; `None` for no time limit.
    pub match_length: Option<f64>,
    /// Spawn point RNG seed.
    pub seed: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7777)),
            max_clients: None,
            version: crate::VERSION.to_string(),
            tick_rate: crate::TICK_RATE,
            handshake_timeout: Duration::from_secs(5),
            recv_timeout: Duration::from_secs(30),
            recv_buffer_size: RECV_BUFFER_SIZE,
            event_lifespan: Duration::from_secs_f64(EVENT_LIFESPAN_SECS),
            map_path: None,
            mode: ModeKind::Solo,
            grace_period: 0.0,
            match_length: None,
            seed: 0x5eed,
        }
    }
}

impl ServerConfig {
    /// Load configuration from `GRIDFIRE_*` environment variables.
    ///
    /// Unset variables keep their defaults; unparseable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            bind_addr: env_parse("GRIDFIRE_BIND").unwrap_or(d.bind_addr),
            max_clients: env_parse("GRIDFIRE_MAX_CLIENTS").or(d.max_clients),
            version: std::env::var("GRIDFIRE_VERSION").unwrap_or(d.version),
            tick_rate: env_parse("GRIDFIRE_TICK_RATE").unwrap_or(d.tick_rate),
            handshake_timeout: env_parse("GRIDFIRE_HANDSHAKE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.handshake_timeout),
            recv_timeout: env_parse("GRIDFIRE_RECV_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.recv_timeout),
            recv_buffer_size: d.recv_buffer_size,
            event_lifespan: env_parse("GRIDFIRE_EVENT_LIFESPAN_SECS")
                .map(Duration::from_secs_f64)
                .unwrap_or(d.event_lifespan),
            map_path: std::env::var_os("GRIDFIRE_MAP").map(PathBuf::from).or(d.map_path),
            mode: std::env::var("GRIDFIRE_MODE")
                .ok()
                .and_then(|v| ModeKind::parse(&v))
                .unwrap_or(d.mode),
            grace_period: env_parse("GRIDFIRE_GRACE_SECS").unwrap_or(d.grace_period),
            match_length: env_parse("GRIDFIRE_MATCH_SECS").or(d.match_length),
            seed: env_parse("GRIDFIRE_SEED").unwrap_or(d.seed),
        }
    }

    /// Game mode built from the configured rules.
    pub fn game_mode(&self) -> GameMode {
        let grace_end = self.grace_period.max(0.0);
        GameMode::new(self.mode, grace_end, self.match_length.map(|len| grace_end + len))
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {}={:?}", key, raw);
            None
        }
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

    /// Client speaks another version.
    #[error("Version mismatch: client {client:?}, server {server:?}")]
    VersionMismatch {
        /// Client's version string
        client: String,
        /// Our version string
        server: String,
    },

    /// Peer did not answer in time.
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// Peer closed before the session started.
    #[error("Connection closed during {0}")]
    Closed(&'static str),

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Reply could not be encoded.
    #[error("Encode error: {0}")]
    Encode(#[from] CodecError),
}

/// Decrements the live connection count when a connection task ends.
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    listener: TcpListener,
    sim: SimHandle,
    sim_task: JoinHandle<()>,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
    // Subscribed at bind so a signal sent before `run` is not lost
    shutdown_rx: Option<broadcast::Receiver<()>>,
}

impl GameServer {
    /// Bind the listener and start the simulation task for `world`.
    pub async fn bind(config: ServerConfig, world: World) -> Result<Self, GameServerError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let sim = Simulation::new(world, config.tick_rate, config.event_lifespan);
        let (sim, sim_task) = spawn_simulation(sim, config.tick_rate, shutdown_tx.subscribe());

        Ok(Self {
            config,
            listener,
            sim,
            sim_task,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, GameServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Sender that stops the server when signalled.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Live connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Run the accept loop until shutdown.
    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<(), GameServerError> {
        info!("Game server listening on {}", self.listener.local_addr()?);
        let mut shutdown_rx = match self.shutdown_rx.take() {
            Some(rx) => rx,
            None => self.shutdown_tx.subscribe(),
        };

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let live = self.connections.load(Ordering::SeqCst);
                            if self.config.max_clients.map_or(false, |max| live >= max) {
                                warn!("Connection limit reached, rejecting {}", addr);
                                drop(stream);
                                continue;
                            }
                            self.connections.fetch_add(1, Ordering::SeqCst);
                            let slot = ConnectionSlot(self.connections.clone());
                            self.handle_connection(stream, addr, slot);
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

        if let Err(e) = self.sim_task.await {
            error!("Simulation task failed: {}", e);
        }
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, slot: ConnectionSlot) {
        let config = self.config.clone();
        let sim = self.sim.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _slot = slot;
            let conn = Uuid::new_v4();
            info!("New connection {} from {}", conn, addr);

            match serve_connection(stream, conn, &config, &sim, shutdown_rx).await {
                Ok(()) => info!("Connection {} closed", conn),
                Err(e @ GameServerError::VersionMismatch { .. }) => warn!("Connection {} rejected: {}", conn, e),
                Err(e) => debug!("Connection {} ended: {}", conn, e),
            }
        });
    }
}

/// Upgrade, handshake, join, then serve the request/reply loop.
#[instrument(skip_all, fields(conn = %conn))]
async fn serve_connection(
    stream: TcpStream,
    conn: Uuid,
    config: &ServerConfig,
    sim: &SimHandle,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), GameServerError> {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.recv_buffer_size);
    ws_config.max_frame_size = Some(config.recv_buffer_size);

    let mut ws = tokio::time::timeout(
        config.handshake_timeout,
        accept_async_with_config(stream, Some(ws_config)),
    )
    .await
    .map_err(|_| GameServerError::Timeout("upgrade"))??;

    // Version handshake: read theirs, always answer with ours
    let client_version = match read_text(&mut ws, config.handshake_timeout).await {
        Inbound::Text(text) => text,
        Inbound::TimedOut => return Err(GameServerError::Timeout("handshake")),
        Inbound::Closed => return Err(GameServerError::Closed("handshake")),
        Inbound::Failed(e) => return Err(e.into()),
    };
    ws.send(Message::Text(config.version.clone())).await?;
    if client_version.trim() != config.version {
        let _ = ws.close(None).await;
        return Err(GameServerError::VersionMismatch {
            client: client_version,
            server: config.version.clone(),
        });
    }

    let player = sim.join("player").await?;
    info!("Connection {} controls player {}", conn, player);

    let result = exchange_loop(&mut ws, player, config, sim, &mut shutdown_rx).await;
    let _ = sim.leave(player).await;
    let _ = ws.close(None).await;
    result
}

async fn exchange_loop(
    ws: &mut WebSocketStream<TcpStream>,
    player: EntityId,
    config: &ServerConfig,
    sim: &SimHandle,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<(), GameServerError> {
    loop {
        let inbound = tokio::select! {
            inbound = read_text(ws, config.recv_timeout) => inbound,
            _ = shutdown_rx.recv() => return Ok(()),
        };

        let text = match inbound {
            Inbound::Text(text) => text,
            Inbound::Closed => return Ok(()),
            Inbound::TimedOut => return Err(GameServerError::Timeout("receive")),
            Inbound::Failed(e) => return Err(e.into()),
        };

        // A bad message is ignored; the client still gets a snapshot
        let events = match ClientMessage::decode(&text) {
            Ok(message) => message.into_events(),
            Err(e) => {
                debug!("Ignoring message from player {}: {}", player, e);
                Vec::new()
            }
        };

        let snapshot = sim.apply(player, events).await?;
        debug!("Snapshot for {}: hash {}", player, &snapshot.state_hash[..16.min(snapshot.state_hash.len())]);
        match ServerMessage::encode_snapshot(snapshot) {
            Ok(reply) => ws.send(Message::Text(reply)).await?,
            Err(e) => {
                error!("Cannot fit a snapshot for {} into one frame: {}", player, e);
                return Err(e.into());
            }
        }
    }
}
