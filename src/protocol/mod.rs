//! Protocol module - Defines the wire format for framelink frames
//!
//! Every frame is laid out as (all integers little-endian):
//! - 4 bytes total frame length, counting itself
//! - 54 bytes command name, null-padded
//! - optional 4 bytes sender id (only when the codec enables it)
//! - Variable length payload

mod codec;
mod packet;
mod reassembler;

pub use codec::*;
pub use packet::*;
pub use reassembler::*;

/// Size of the little-endian length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Width of the null-padded command field
pub const COMMAND_FIELD_SIZE: usize = 54;

/// Size of the optional sender id field
pub const SENDER_ID_SIZE: usize = 4;

/// Fixed header size: length(4) + command(54) = 58 bytes
pub const HEADER_SIZE: usize = LENGTH_PREFIX_SIZE + COMMAND_FIELD_SIZE;

/// Sender id used before the server has assigned one
pub const UNASSIGNED_ID: i32 = -1;

/// Default upper bound for a single frame (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default server port
pub const DEFAULT_PORT: u16 = 23001;

/// Command the server uses to hand out the client id
pub const SET_ID_COMMAND: &str = "set_id";
