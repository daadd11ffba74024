//! Connection handling for framelink
//!
//! Holds the pieces shared between the client facade and its
//! background receive loop:
//! - Connection state, readable from any thread
//! - Disconnect reasons reported when the loop ends
//! - The receive loop itself (reassembly + dispatch)

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;

use crate::dispatch::{CommandTable, DispatchError};
use crate::protocol::{CodecResult, FrameCodec, Packet, Reassembler};

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No socket, no receive loop
    Disconnected = 0,
    /// Resolving and connecting
    Connecting = 1,
    /// Socket open, receive loop running
    Connected = 2,
    /// Tearing down socket and receive loop
    Closing = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Connection state shared between the facade and the receive loop
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<AtomicU8>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)),
        }
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: ConnectionState) {
        let previous = self.inner.swap(state as u8, Ordering::SeqCst);
        if previous != state as u8 {
            tracing::debug!(
                "Connection state {} -> {}",
                ConnectionState::from_u8(previous),
                state
            );
        }
    }

    /// Move from `from` to `to`; false if the state was something else
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let moved = self
            .inner
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if moved {
            tracing::debug!("Connection state {} -> {}", from, to);
        }
        moved
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called or the client was dropped
    Requested,
    /// The server closed the connection (zero-length read)
    PeerClosed,
    /// Reading from the socket failed
    ReadFailed(String),
    /// A length prefix the stream cannot recover from
    ProtocolViolation(String),
    /// Writing a frame failed
    SendFailed(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "disconnect requested"),
            DisconnectReason::PeerClosed => write!(f, "connection closed by peer"),
            DisconnectReason::ReadFailed(e) => write!(f, "read failed: {}", e),
            DisconnectReason::ProtocolViolation(e) => write!(f, "protocol violation: {}", e),
            DisconnectReason::SendFailed(e) => write!(f, "send failed: {}", e),
        }
    }
}

/// Receive-side statistics for one connection
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Bytes read from the socket
    pub bytes_received: u64,
    /// Complete frames taken off the stream
    pub frames_received: u64,
    /// Frames a handler accepted
    pub frames_dispatched: u64,
    /// Frames with no registered handler
    pub unknown_commands: u64,
    /// Frames whose handler failed
    pub handler_failures: u64,
    /// Frames that could not be decoded
    pub malformed_frames: u64,
}

/// How a receive loop ended
#[derive(Debug, Clone)]
pub struct ReceiveOutcome {
    pub reason: DisconnectReason,
    pub stats: ConnectionStats,
}

/// Background loop that reads, reassembles and dispatches frames
pub struct ReceiveLoop<R> {
    reader: R,
    reassembler: Reassembler,
    codec: FrameCodec,
    commands: Arc<CommandTable>,
    read_buffer_size: usize,
    shutdown: watch::Receiver<Option<DisconnectReason>>,
    stats: ConnectionStats,
}

impl<R> ReceiveLoop<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(
        reader: R,
        codec: FrameCodec,
        commands: Arc<CommandTable>,
        read_buffer_size: usize,
        shutdown: watch::Receiver<Option<DisconnectReason>>,
    ) -> Self {
        Self {
            reader,
            reassembler: Reassembler::new(&codec),
            codec,
            commands,
            read_buffer_size: read_buffer_size.max(1),
            shutdown,
            stats: ConnectionStats::default(),
        }
    }

    /// Run until the peer closes, a read fails, the stream breaks
    /// framing, or a reason arrives on the shutdown channel.
    pub async fn run(mut self) -> ReceiveOutcome {
        let mut chunk = vec![0u8; self.read_buffer_size];

        let reason = loop {
            tokio::select! {
                result = self.reader.read(&mut chunk) => match result {
                    Ok(0) => {
                        if !self.reassembler.is_empty() {
                            tracing::debug!(
                                "Discarding {} bytes of incomplete frame",
                                self.reassembler.len()
                            );
                        }
                        break DisconnectReason::PeerClosed;
                    }
                    Ok(n) => {
                        self.stats.bytes_received += n as u64;
                        if let Err(e) = self.process(&chunk[..n]) {
                            break DisconnectReason::ProtocolViolation(e.to_string());
                        }
                    }
                    Err(e) => break DisconnectReason::ReadFailed(e.to_string()),
                },
                _ = self.shutdown.changed() => {
                    break self
                        .shutdown
                        .borrow()
                        .clone()
                        .unwrap_or(DisconnectReason::Requested);
                }
            }
        };

        self.reassembler.clear();
        tracing::debug!("Receive loop finished: {}", reason);

        ReceiveOutcome {
            reason,
            stats: self.stats,
        }
    }

    /// Feed one chunk and dispatch every frame it completes
    fn process(&mut self, chunk: &[u8]) -> CodecResult<()> {
        self.reassembler.extend(chunk);

        while let Some(frame) = self.reassembler.next_frame()? {
            self.stats.frames_received += 1;
            match self.codec.decode(&frame) {
                Ok(packet) => self.route(&packet),
                Err(e) => {
                    self.stats.malformed_frames += 1;
                    tracing::warn!("Dropping malformed frame: {}", e);
                }
            }
        }

        Ok(())
    }

    fn route(&mut self, packet: &Packet) {
        tracing::trace!(
            command = %packet.command,
            sender = packet.sender_id,
            len = packet.payload.len(),
            "Dispatching frame"
        );

        match self.commands.dispatch(packet) {
            Ok(()) => self.stats.frames_dispatched += 1,
            Err(DispatchError::UnknownCommand(command)) => {
                self.stats.unknown_commands += 1;
                tracing::warn!("Unknown client command: {}", command);
            }
            Err(e) => {
                self.stats.handler_failures += 1;
                tracing::error!("{}", e);
            }
        }
    }
}
