//! Framelink - client transport for command-tagged TCP frames
//!
//! Keeps one TCP connection to a server, reassembles length-prefixed
//! frames from the byte stream and hands each one to the handler
//! registered for its command.

pub mod config;
pub mod dispatch;
pub mod network;
pub mod protocol;

pub use dispatch::{CommandHandler, CommandTable, DispatchError};
pub use network::{
    Client, ClientError, ClientEvent, ClientResult, ConnectionState, DisconnectReason,
    NetworkConfig,
};
pub use protocol::{CodecError, FrameCodec, Packet, Reassembler};
