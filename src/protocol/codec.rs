//! Protocol codec for encoding/decoding frames
//!
//! Turns a (command, sender id, payload) triple into a length-prefixed
//! frame and back. Both directions are pure.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{
    Packet, COMMAND_FIELD_SIZE, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE, LENGTH_PREFIX_SIZE,
    SENDER_ID_SIZE, UNASSIGNED_ID,
};

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Command too long: {len} bytes (max: {max})")]
    CommandTooLong { len: usize, max: usize },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Payload too large: frame would be {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Truncated frame: length prefix says {declared} bytes, got {actual}")]
    TruncatedFrame { declared: usize, actual: usize },

    #[error("Frame too short: declared {declared} bytes (min: {min})")]
    FrameTooShort { declared: usize, min: usize },

    #[error("Oversized frame: declared {declared} bytes (max: {max})")]
    OversizedFrame { declared: usize, max: usize },
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Read the length prefix at the start of `bytes` without consuming it
pub fn peek_frame_length(bytes: &[u8]) -> Option<usize> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = bytes.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_le_bytes(prefix) as usize)
}

/// Encodes and decodes frames for one wire layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_frame_size: usize,
    include_sender_id: bool,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            include_sender_id: false,
        }
    }

    /// Cap the total frame size. Never exceeds what the prefix can express.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size.min(u32::MAX as usize);
        self
    }

    /// Carry the sender id in a 4-byte field after the command
    pub fn with_sender_id(mut self, include: bool) -> Self {
        self.include_sender_id = include;
        self
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn includes_sender_id(&self) -> bool {
        self.include_sender_id
    }

    /// Bytes in front of the payload for this layout
    pub fn header_size(&self) -> usize {
        if self.include_sender_id {
            HEADER_SIZE + SENDER_ID_SIZE
        } else {
            HEADER_SIZE
        }
    }

    /// Encode one frame
    pub fn encode(&self, command: &str, sender_id: i32, payload: &[u8]) -> CodecResult<Bytes> {
        let mut buf = BytesMut::new();
        self.encode_into(command, sender_id, payload, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Encode one frame, appending to `buf`. Nothing is appended on error.
    pub fn encode_into(
        &self,
        command: &str,
        sender_id: i32,
        payload: &[u8],
        buf: &mut BytesMut,
    ) -> CodecResult<()> {
        validate_command(command)?;

        let total = self.header_size().saturating_add(payload.len());
        if total > self.max_frame_size {
            return Err(CodecError::PayloadTooLarge {
                size: total,
                max: self.max_frame_size,
            });
        }

        buf.reserve(total);
        buf.put_u32_le(total as u32);
        buf.put_slice(command.as_bytes());
        buf.put_bytes(0, COMMAND_FIELD_SIZE - command.len());
        if self.include_sender_id {
            buf.put_i32_le(sender_id);
        }
        buf.put_slice(payload);

        Ok(())
    }

    /// Decode exactly one complete frame
    pub fn decode(&self, frame: &[u8]) -> CodecResult<Packet> {
        let declared = peek_frame_length(frame).ok_or(CodecError::TruncatedFrame {
            declared: LENGTH_PREFIX_SIZE,
            actual: frame.len(),
        })?;

        if declared != frame.len() {
            return Err(CodecError::TruncatedFrame {
                declared,
                actual: frame.len(),
            });
        }

        let header_size = self.header_size();
        if declared < header_size {
            return Err(CodecError::FrameTooShort {
                declared,
                min: header_size,
            });
        }

        let field = &frame[LENGTH_PREFIX_SIZE..HEADER_SIZE];
        let end = field.iter().position(|&b| b == 0).unwrap_or(COMMAND_FIELD_SIZE);
        let command = std::str::from_utf8(&field[..end])
            .map_err(|e| CodecError::InvalidCommand(format!("not UTF-8: {}", e)))?
            .to_string();

        let sender_id = if self.include_sender_id {
            let mut id = [0u8; SENDER_ID_SIZE];
            id.copy_from_slice(&frame[HEADER_SIZE..header_size]);
            i32::from_le_bytes(id)
        } else {
            UNASSIGNED_ID
        };

        Ok(Packet {
            command,
            sender_id,
            payload: Bytes::copy_from_slice(&frame[header_size..]),
        })
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that a command fits the null-padded field
pub fn validate_command(command: &str) -> CodecResult<()> {
    if command.is_empty() {
        return Err(CodecError::InvalidCommand("empty command".to_string()));
    }
    if command.len() > COMMAND_FIELD_SIZE {
        return Err(CodecError::CommandTooLong {
            len: command.len(),
            max: COMMAND_FIELD_SIZE,
        });
    }
    if command.as_bytes().contains(&0) {
        return Err(CodecError::InvalidCommand(format!(
            "{:?} contains a NUL byte",
            command
        )));
    }
    Ok(())
}
