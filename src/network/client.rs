//! Framelink Client
//!
//! Connects to a server, sends frames and dispatches received frames to
//! registered handlers on a background receive task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use super::connection::{
    ConnectionState, ConnectionStats, DisconnectReason, ReceiveLoop, SharedState,
};
use super::{resolve_host, NetworkConfig};
use crate::dispatch::{CommandTable, DispatchError};
use crate::protocol::{CodecError, FrameCodec, SET_ID_COMMAND, UNASSIGNED_ID};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Handlers must be registered while disconnected")]
    RegistrationClosed,

    #[error("Could not resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connect to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Events emitted by the client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Socket open, receive task started
    Connected { server_addr: SocketAddr },
    /// The server assigned this client an id
    IdAssigned { id: i32 },
    /// The receive task has ended and the socket is closed
    Disconnected {
        reason: DisconnectReason,
        stats: ConnectionStats,
    },
}

/// Receive task of the current connection
struct Session {
    server_addr: SocketAddr,
    shutdown_tx: Arc<watch::Sender<Option<DisconnectReason>>>,
    task: JoinHandle<()>,
}

/// Framelink Client
///
/// Handlers must be registered before `connect`; the receive task works
/// on a snapshot of the command table taken when the connection opens.
pub struct Client {
    /// Client configuration
    config: NetworkConfig,
    /// Frame codec for both directions
    codec: FrameCodec,
    /// Registered command handlers
    commands: CommandTable,
    /// Current state
    state: SharedState,
    /// Id assigned by the server, or `UNASSIGNED_ID`
    id: Arc<AtomicI32>,
    /// Write half of the socket
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    /// Running receive task
    session: Mutex<Option<Session>>,
    /// Why the last connection ended
    last_disconnect: Arc<std::sync::Mutex<Option<DisconnectReason>>>,
    /// Event sender
    event_tx: mpsc::Sender<ClientEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
}

impl Client {
    /// Create a new client
    pub fn new(config: NetworkConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let id = Arc::new(AtomicI32::new(UNASSIGNED_ID));

        let commands =
            CommandTable::with_handler(SET_ID_COMMAND, set_id_handler(id.clone(), event_tx.clone()));

        Self {
            codec: config.codec(),
            config,
            commands,
            state: SharedState::new(),
            id,
            writer: Arc::new(Mutex::new(None)),
            session: Mutex::new(None),
            last_disconnect: Arc::new(std::sync::Mutex::new(None)),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Register a handler for a command received from the server
    pub fn register<F>(&mut self, command: impl Into<String>, handler: F) -> ClientResult<()>
    where
        F: Fn(&[u8], i32) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if self.state.get() != ConnectionState::Disconnected {
            return Err(ClientError::RegistrationClosed);
        }

        self.commands.register(command, handler)?;
        Ok(())
    }

    /// Connect to a server by hostname
    pub async fn connect(&self, host: &str, port: u16) -> ClientResult<()> {
        self.begin_connect()?;

        tracing::info!("Resolving {}:{}", host, port);
        let addrs = match resolve_host(host, port).await {
            Ok(addrs) => addrs,
            Err(source) => {
                self.state.set(ConnectionState::Disconnected);
                return Err(ClientError::Resolve {
                    host: host.to_string(),
                    source,
                });
            }
        };

        self.establish(&addrs).await
    }

    /// Connect to a server by address
    pub async fn connect_addr(&self, server_addr: SocketAddr) -> ClientResult<()> {
        self.begin_connect()?;
        self.establish(&[server_addr]).await
    }

    /// Disconnect from the server and wait for the receive task to end
    pub async fn disconnect(&self) -> ClientResult<()> {
        if self.teardown(DisconnectReason::Requested).await {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    /// Send one frame to the server
    pub async fn send(&self, command: &str, payload: &[u8]) -> ClientResult<()> {
        if self.state.get() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }

        let frame = self.codec.encode(command, self.id(), payload)?;

        let mut closing = match self.session.lock().await.as_ref() {
            Some(session) => session.shutdown_tx.subscribe(),
            None => return Err(ClientError::NotConnected),
        };
        if closing.borrow().is_some() {
            return Err(ClientError::NotConnected);
        }

        let written = {
            let mut writer = self.writer.lock().await;
            let Some(stream) = writer.as_mut() else {
                return Err(ClientError::NotConnected);
            };

            // The write half must be free for the session to close it.
            tokio::select! {
                result = write_frame(stream, &frame, self.config.send_timeout()) => result,
                _ = closing.changed() => {
                    tracing::debug!("Send of {} interrupted by disconnect", command);
                    return Err(ClientError::SendFailed(
                        "connection closed during write".to_string(),
                    ));
                }
            }
        };

        if let Err(reason) = written {
            tracing::error!("Send of {} failed: {}", command, reason);
            self.teardown(DisconnectReason::SendFailed(reason.clone()))
                .await;
            return Err(ClientError::SendFailed(reason));
        }

        tracing::trace!(command, len = frame.len(), "Sent frame");
        Ok(())
    }

    /// Send a frame whose payload is this client's id
    pub async fn send_with_id(&self, command: &str) -> ClientResult<()> {
        self.send(command, &self.id().to_le_bytes()).await
    }

    /// Id assigned by the server, or `UNASSIGNED_ID`
    pub fn id(&self) -> i32 {
        self.id.load(Ordering::SeqCst)
    }

    /// Get the current state
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.state.get() == ConnectionState::Connected
    }

    /// Why the most recent connection ended
    pub fn last_disconnect(&self) -> Option<DisconnectReason> {
        self.last_disconnect
            .lock()
            .ok()
            .and_then(|reason| reason.clone())
    }

    /// Address of the current server, if a receive task exists
    pub async fn server_addr(&self) -> Option<SocketAddr> {
        self.session.lock().await.as_ref().map(|s| s.server_addr)
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    fn begin_connect(&self) -> ClientResult<()> {
        if self
            .state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            Ok(())
        } else {
            Err(ClientError::AlreadyConnected)
        }
    }

    /// Open the socket and start the receive task. State is `Connecting`.
    async fn establish(&self, addrs: &[SocketAddr]) -> ClientResult<()> {
        // A task that ended on its own may still sit in the slot.
        self.reap().await;

        let mut failure = None;
        let mut opened = None;
        for &addr in addrs {
            tracing::info!("Connecting to {}", addr);
            match self.open(addr).await {
                Ok(stream) => {
                    opened = Some((stream, addr));
                    break;
                }
                Err(reason) => {
                    tracing::warn!("Connect to {} failed: {}", addr, reason);
                    failure = Some((addr, reason));
                }
            }
        }

        let Some((stream, server_addr)) = opened else {
            self.state.set(ConnectionState::Disconnected);
            let (addr, reason) = failure
                .map(|(addr, reason)| (addr.to_string(), reason))
                .unwrap_or_else(|| ("<none>".to_string(), "no addresses".to_string()));
            return Err(ClientError::ConnectFailed { addr, reason });
        };

        if self.config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!("Could not set TCP_NODELAY: {}", e);
            }
        }

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        self.id.store(UNASSIGNED_ID, Ordering::SeqCst);

        let (shutdown_tx, shutdown_rx) = watch::channel(None);
        let receive = ReceiveLoop::new(
            read_half,
            self.codec,
            Arc::new(self.commands.clone()),
            self.config.read_buffer_size,
            shutdown_rx,
        );

        let shutdown_tx = Arc::new(shutdown_tx);

        // Held until the session is stored, so `disconnect` and `send`
        // never see `Connected` with an empty slot.
        let mut slot = self.session.lock().await;

        self.state.set(ConnectionState::Connected);
        tracing::info!("Connected to {}", server_addr);
        emit(&self.event_tx, ClientEvent::Connected { server_addr });

        let task = tokio::spawn(run_session(
            receive,
            shutdown_tx.clone(),
            self.writer.clone(),
            self.state.clone(),
            self.last_disconnect.clone(),
            self.event_tx.clone(),
        ));

        *slot = Some(Session {
            server_addr,
            shutdown_tx,
            task,
        });

        Ok(())
    }

    async fn open(&self, addr: SocketAddr) -> Result<TcpStream, String> {
        let connect = TcpStream::connect(addr);
        match self.config.connect_timeout() {
            Some(limit) => match tokio::time::timeout(limit, connect).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("timed out after {:?}", limit)),
            },
            None => connect.await.map_err(|e| e.to_string()),
        }
    }

    /// Stop the receive task with `reason` and wait for its cleanup.
    /// Returns false if no connection was live; a task that already
    /// ended on its own is still collected.
    async fn teardown(&self, reason: DisconnectReason) -> bool {
        let Some(session) = self.session.lock().await.take() else {
            return false;
        };

        let live = self
            .state
            .transition(ConnectionState::Connected, ConnectionState::Closing);
        signal_close(&session.shutdown_tx, reason);
        self.join(session.task).await;
        live
    }

    /// Collect a receive task that stopped by itself
    async fn reap(&self) {
        let finished = self.session.lock().await.take();
        if let Some(session) = finished {
            self.join(session.task).await;
        }
    }

    async fn join(&self, task: JoinHandle<()>) {
        if let Err(e) = task.await {
            tracing::error!("Receive task failed: {}", e);
            self.writer.lock().await.take();
            self.state.set(ConnectionState::Disconnected);
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            signal_close(&session.shutdown_tx, DisconnectReason::Requested);
        }
    }
}

/// Publish why the session is closing; the first reason sticks
fn signal_close(shutdown: &watch::Sender<Option<DisconnectReason>>, reason: DisconnectReason) {
    shutdown.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        true
    });
}

async fn write_frame(
    stream: &mut OwnedWriteHalf,
    frame: &[u8],
    limit: Option<Duration>,
) -> Result<(), String> {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, stream.write_all(frame)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", limit)),
        },
        None => stream.write_all(frame).await.map_err(|e| e.to_string()),
    }
}

/// Receive task body: run the loop, then close the socket and report
async fn run_session(
    receive: ReceiveLoop<tokio::net::tcp::OwnedReadHalf>,
    shutdown: Arc<watch::Sender<Option<DisconnectReason>>>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    state: SharedState,
    last_disconnect: Arc<std::sync::Mutex<Option<DisconnectReason>>>,
    events: mpsc::Sender<ClientEvent>,
) {
    let outcome = receive.run().await;

    state.set(ConnectionState::Closing);
    // Wakes any send blocked on the write half.
    signal_close(&shutdown, outcome.reason.clone());
    if let Some(mut stream) = writer.lock().await.take() {
        if let Err(e) = stream.shutdown().await {
            tracing::debug!("Socket shutdown: {}", e);
        }
    }

    tracing::info!(
        frames = outcome.stats.frames_received,
        bytes = outcome.stats.bytes_received,
        "Disconnected: {}",
        outcome.reason
    );

    if let Ok(mut last) = last_disconnect.lock() {
        *last = Some(outcome.reason.clone());
    }
    state.set(ConnectionState::Disconnected);

    emit(
        &events,
        ClientEvent::Disconnected {
            reason: outcome.reason,
            stats: outcome.stats,
        },
    );
}

/// Built-in handler storing the id the server assigns
fn set_id_handler(
    id: Arc<AtomicI32>,
    events: mpsc::Sender<ClientEvent>,
) -> impl Fn(&[u8], i32) -> anyhow::Result<()> + Send + Sync + 'static {
    move |payload, _sender| {
        let bytes: [u8; 4] = payload.try_into().map_err(|_| {
            anyhow::anyhow!("expected a 4-byte id, got {} bytes", payload.len())
        })?;

        let assigned = i32::from_le_bytes(bytes);
        id.store(assigned, Ordering::SeqCst);
        tracing::info!("Server assigned client id {}", assigned);
        emit(&events, ClientEvent::IdAssigned { id: assigned });

        Ok(())
    }
}

fn emit(events: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    if let Err(e) = events.try_send(event) {
        tracing::debug!("Dropping client event: {}", e);
    }
}
