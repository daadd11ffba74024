//! Decoded packet representation

use bytes::Bytes;

use super::UNASSIGNED_ID;

/// One decoded frame: who sent it, what it asks for, and its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Command name, without null padding
    pub command: String,
    /// Originating client, or `UNASSIGNED_ID`
    pub sender_id: i32,
    /// Application-defined payload
    pub payload: Bytes,
}

impl Packet {
    pub fn new(command: impl Into<String>, sender_id: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            command: command.into(),
            sender_id,
            payload: payload.into(),
        }
    }

    /// Create a packet that has no sender attached
    pub fn anonymous(command: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(command, UNASSIGNED_ID, payload)
    }

    /// Whether the sender id has been assigned by the server
    pub fn has_sender(&self) -> bool {
        self.sender_id != UNASSIGNED_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_packet() {
        let packet = Packet::anonymous("ping", vec![1, 2, 3]);
        assert_eq!(packet.sender_id, UNASSIGNED_ID);
        assert!(!packet.has_sender());
        assert_eq!(&packet.payload[..], &[1, 2, 3]);
    }
}
