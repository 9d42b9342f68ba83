//! Client Session
//!
//! A background task connects to the server, performs the version
//! handshake and then loops: send the queued outbound events, sleep one
//! frame, wait for the next snapshot and queue it for the caller's
//! simulation loop. The caller talks to the task only through the two
//! queues and the connection-state watch, so it never blocks on the socket.
//!
//! There is no automatic reconnect; a failed or closed session ends in
//! `ConnectionState::Disconnected` and the caller decides what to do.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::SinkExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::core::codec::CodecError;
use crate::game::events::EventInstance;
use crate::network::protocol::{read_text, ClientMessage, Inbound, ServerMessage, WorldSnapshot};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server URL, e.g. `ws://127.0.0.1:7777`.
    pub server_url: String,
    /// Version string sent in the handshake.
    pub version: String,
    /// Target frame rate; one exchange per frame.
    pub frame_rate: u32,
    /// Time allowed to connect and handshake.
    pub connect_timeout: Duration,
    /// Time allowed for each snapshot.
    pub recv_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:7777".to_string(),
            version: crate::VERSION.to_string(),
            frame_rate: crate::TICK_RATE,
            connect_timeout: Duration::from_secs(3),
            recv_timeout: Duration::from_secs(10),
        }
    }
}

/// Session state as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connecting or handshaking
    Connecting,
    /// Exchanging messages
    Connected,
    /// Session over, with the reason
    Disconnected(String),
}

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Could not reach the server.
    #[error("Could not connect: {0}")]
    Connect(#[source] tungstenite::Error),

    /// Server answered with another version.
    #[error("Server version {server:?} does not match ours ({client:?})")]
    Rejected {
        /// Our version string
        client: String,
        /// Server's version string
        server: String,
    },

    /// Peer did not answer in time.
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// Server closed the connection.
    #[error("Server closed the connection")]
    Closed,

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Outbound batch could not be encoded.
    #[error("Encode error: {0}")]
    Codec(#[from] CodecError),
}

type Queue<T> = Arc<Mutex<Vec<T>>>;

fn lock<T>(queue: &Queue<T>) -> MutexGuard<'_, Vec<T>> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Game client entry point.
pub struct GameClient;

impl GameClient {
    /// Start a session in the background. Must be called inside a Tokio
    /// runtime.
    pub fn spawn(config: ClientConfig) -> ClientHandle {
        let outbound: Queue<EventInstance> = Arc::default();
        let inbound: Queue<WorldSnapshot> = Arc::default();
        let stop = Arc::new(AtomicBool::new(false));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let task = {
            let outbound = outbound.clone();
            let inbound = inbound.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                let reason = match run_session(&config, &outbound, &inbound, &state_tx, &stop).await {
                    Ok(()) => "closed".to_string(),
                    Err(e) => {
                        warn!("Session with {} ended: {}", config.server_url, e);
                        e.to_string()
                    }
                };
                state_tx.send_replace(ConnectionState::Disconnected(reason));
            })
        };

        ClientHandle {
            outbound,
            inbound,
            state: state_rx,
            stop,
            started: Instant::now(),
            task,
        }
    }
}

/// Caller's side of a client session.
pub struct ClientHandle {
    outbound: Queue<EventInstance>,
    inbound: Queue<WorldSnapshot>,
    state: watch::Receiver<ConnectionState>,
    stop: Arc<AtomicBool>,
    started: Instant,
    task: JoinHandle<()>,
}

impl ClientHandle {
    /// Queue events for the next exchange. Local-only events are dropped.
    pub fn queue_events(&self, events: &[EventInstance]) {
        let mut queue = lock(&self.outbound);
        queue.extend(events.iter().filter(|e| !e.is_local()).cloned());
    }

    /// Take every snapshot received since the last call, oldest first.
    pub fn drain_snapshots(&self) -> Vec<WorldSnapshot> {
        std::mem::take(&mut *lock(&self.inbound))
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Seconds since the session started; use as event timestamps.
    pub fn clock(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Ask the session to close after its current exchange.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop and wait for the session task to finish.
    pub async fn close(self) {
        self.stop();
        let _ = self.task.await;
    }
}

async fn run_session(
    config: &ClientConfig,
    outbound: &Queue<EventInstance>,
    inbound: &Queue<WorldSnapshot>,
    state: &watch::Sender<ConnectionState>,
    stop: &AtomicBool,
) -> Result<(), ClientError> {
    let (mut ws, _) = tokio::time::timeout(config.connect_timeout, connect_async(config.server_url.as_str()))
        .await
        .map_err(|_| ClientError::Timeout("connect"))?
        .map_err(ClientError::Connect)?;

    ws.send(Message::Text(config.version.clone())).await?;
    let server_version = match read_text(&mut ws, config.connect_timeout).await {
        Inbound::Text(text) => text,
        Inbound::TimedOut => return Err(ClientError::Timeout("handshake")),
        Inbound::Closed => return Err(ClientError::Closed),
        Inbound::Failed(e) => return Err(e.into()),
    };
    if server_version.trim() != config.version {
        let _ = ws.close(None).await;
        return Err(ClientError::Rejected {
            client: config.version.clone(),
            server: server_version,
        });
    }

    info!("Connected to {} (version {})", config.server_url, server_version);
    state.send_replace(ConnectionState::Connected);

    let frame = Duration::from_secs_f64(1.0 / f64::from(config.frame_rate.max(1)));
    while !stop.load(Ordering::SeqCst) {
        let batch = std::mem::take(&mut *lock(outbound));
        ws.send(Message::Text(ClientMessage::batch(&batch).encode()?)).await?;

        tokio::time::sleep(frame).await;

        let text = match read_text(&mut ws, config.recv_timeout).await {
            Inbound::Text(text) => text,
            Inbound::TimedOut => return Err(ClientError::Timeout("receive")),
            Inbound::Closed => return Err(ClientError::Closed),
            Inbound::Failed(e) => return Err(e.into()),
        };
        match ServerMessage::decode(&text) {
            Ok(ServerMessage::Snapshot(snapshot)) => lock(inbound).push(snapshot),
            Err(e) => debug!("Ignoring server message: {}", e),
        }
    }

    let _ = ws.close(None).await;
    Ok(())
}
