//! Network module - Handles the TCP connection to the server
//!
//! Provides:
//! - Client facade for connecting, sending and registering handlers
//! - Connection state and the background receive loop

mod client;
mod connection;

pub use client::*;
pub use connection::*;

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::{FrameCodec, DEFAULT_MAX_FRAME_SIZE};

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Connection timeout in milliseconds (`None` waits for the OS)
    pub connect_timeout_ms: Option<u64>,
    /// Timeout for writing one whole frame (`None` blocks until written)
    pub send_timeout_ms: Option<u64>,
    /// Largest frame accepted or produced, in bytes
    pub max_frame_size: usize,
    /// Size of a single socket read
    pub read_buffer_size: usize,
    /// Carry the sender id field in every frame
    pub include_sender_id: bool,
    /// Disable Nagle's algorithm
    pub nodelay: bool,
    /// Capacity of the event channel
    pub event_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: Some(5000),
            send_timeout_ms: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buffer_size: 4096,
            include_sender_id: false,
            nodelay: true,
            event_capacity: 256,
        }
    }
}

impl NetworkConfig {
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_sender_id(mut self, include: bool) -> Self {
        self.include_sender_id = include;
        self
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        self.send_timeout_ms.map(Duration::from_millis)
    }

    /// Codec matching this configuration
    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new()
            .with_max_frame_size(self.max_frame_size)
            .with_sender_id(self.include_sender_id)
    }
}

/// Resolve a hostname to every socket address it maps to
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
    use tokio::net::lookup_host;

    let addrs: Vec<SocketAddr> = lookup_host((host, port)).await?.collect();

    if addrs.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        ));
    }

    Ok(addrs)
}
