//! Stream reassembly
//!
//! Socket reads arrive in arbitrary chunk sizes. The reassembler keeps
//! the carry-over of an incomplete frame and hands out every complete
//! frame as soon as its last byte has arrived.

use bytes::{Bytes, BytesMut};

use super::{peek_frame_length, CodecError, CodecResult, FrameCodec};

/// Accumulates raw bytes and splits them into complete frames
#[derive(Debug)]
pub struct Reassembler {
    buffer: BytesMut,
    min_frame_size: usize,
    max_frame_size: usize,
}

impl Reassembler {
    /// Create a reassembler that accepts the frames `codec` can decode
    pub fn new(codec: &FrameCodec) -> Self {
        Self::with_limits(codec.header_size(), codec.max_frame_size())
    }

    pub fn with_limits(min_frame_size: usize, max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            min_frame_size,
            max_frame_size,
        }
    }

    /// Append a chunk read from the socket
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Take the next complete frame off the front of the buffer.
    ///
    /// Returns `Ok(None)` while the frame at the front is still incomplete.
    /// A length prefix outside the accepted range is an error; the stream
    /// cannot be resynchronised after that.
    pub fn next_frame(&mut self) -> CodecResult<Option<Bytes>> {
        let Some(declared) = peek_frame_length(&self.buffer) else {
            return Ok(None);
        };

        if declared < self.min_frame_size {
            return Err(CodecError::FrameTooShort {
                declared,
                min: self.min_frame_size,
            });
        }
        if declared > self.max_frame_size {
            return Err(CodecError::OversizedFrame {
                declared,
                max: self.max_frame_size,
            });
        }

        if self.buffer.len() < declared {
            self.buffer.reserve(declared - self.buffer.len());
            return Ok(None);
        }

        Ok(Some(self.buffer.split_to(declared).freeze()))
    }

    /// Append a chunk and drain every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> CodecResult<Vec<Bytes>> {
        self.extend(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Number of carried-over bytes
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop any carry-over
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Packet, HEADER_SIZE};

    fn sample_stream(codec: &FrameCodec) -> (Vec<Packet>, Vec<u8>) {
        let packets = vec![
            Packet::anonymous("set_id", vec![0x2A, 0, 0, 0]),
            Packet::anonymous("empty", Vec::new()),
            Packet::anonymous("spawn_entity", (0u8..=200).collect::<Vec<_>>()),
            Packet::anonymous("chat", b"hello there".to_vec()),
        ];

        let mut stream = Vec::new();
        for packet in &packets {
            let frame = codec
                .encode(&packet.command, packet.sender_id, &packet.payload)
                .unwrap();
            stream.extend_from_slice(&frame);
        }

        (packets, stream)
    }

    fn decode_all(codec: &FrameCodec, frames: &[Bytes]) -> Vec<Packet> {
        frames.iter().map(|f| codec.decode(f).unwrap()).collect()
    }

    #[test]
    fn test_many_frames_in_one_chunk() {
        let codec = FrameCodec::new();
        let (packets, stream) = sample_stream(&codec);
        let mut reassembler = Reassembler::new(&codec);

        let frames = reassembler.push(&stream).unwrap();

        assert_eq!(decode_all(&codec, &frames), packets);
        assert!(reassembler.is_empty());
    }

    #[test]
    fn test_every_split_offset_yields_same_frames() {
        let codec = FrameCodec::new();
        let (packets, stream) = sample_stream(&codec);

        for split in 0..=stream.len() {
            let mut reassembler = Reassembler::new(&codec);
            let mut frames = reassembler.push(&stream[..split]).unwrap();
            frames.extend(reassembler.push(&stream[split..]).unwrap());

            assert_eq!(decode_all(&codec, &frames), packets, "split at {}", split);
            assert!(reassembler.is_empty());
        }
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let codec = FrameCodec::new().with_max_frame_size(512);
        let (packets, stream) = sample_stream(&codec);
        let mut reassembler = Reassembler::new(&codec);

        let mut frames = Vec::new();
        for byte in &stream {
            frames.extend(reassembler.push(std::slice::from_ref(byte)).unwrap());
            assert!(reassembler.len() < codec.max_frame_size());
        }

        assert_eq!(decode_all(&codec, &frames), packets);
    }

    #[test]
    fn test_carry_over_kept_between_reads() {
        let codec = FrameCodec::new();
        let frame = codec.encode("partial", 0, b"abcdef").unwrap();
        let mut reassembler = Reassembler::new(&codec);

        assert!(reassembler.push(&frame[..3]).unwrap().is_empty());
        assert_eq!(reassembler.len(), 3);

        assert!(reassembler.push(&frame[3..HEADER_SIZE]).unwrap().is_empty());
        assert_eq!(reassembler.len(), HEADER_SIZE);

        let frames = reassembler.push(&frame[HEADER_SIZE..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &frame[..]);
        assert!(reassembler.is_empty());
    }

    #[test]
    fn test_trailing_partial_frame_stays_buffered() {
        let codec = FrameCodec::new();
        let first = codec.encode("first", 0, b"1").unwrap();
        let second = codec.encode("second", 0, b"22").unwrap();

        let mut chunk = first.to_vec();
        chunk.extend_from_slice(&second[..10]);

        let mut reassembler = Reassembler::new(&codec);
        let frames = reassembler.push(&chunk).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(reassembler.len(), 10);

        let frames = reassembler.push(&second[10..]).unwrap();
        assert_eq!(codec.decode(&frames[0]).unwrap().command, "second");
    }

    #[test]
    fn test_rejects_oversized_length_prefix() {
        let codec = FrameCodec::new().with_max_frame_size(256);
        let mut reassembler = Reassembler::new(&codec);

        let result = reassembler.push(&1000u32.to_le_bytes());

        assert_eq!(
            result,
            Err(CodecError::OversizedFrame {
                declared: 1000,
                max: 256
            })
        );
    }

    #[test]
    fn test_rejects_length_prefix_below_header() {
        let codec = FrameCodec::new();
        let mut reassembler = Reassembler::new(&codec);

        let result = reassembler.push(&0u32.to_le_bytes());

        assert_eq!(
            result,
            Err(CodecError::FrameTooShort {
                declared: 0,
                min: HEADER_SIZE
            })
        );
    }

    #[test]
    fn test_clear_drops_carry_over() {
        let codec = FrameCodec::new();
        let mut reassembler = Reassembler::new(&codec);
        reassembler.extend(&[1, 2]);
        reassembler.clear();
        assert!(reassembler.is_empty());
    }
}
