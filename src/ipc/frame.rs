//! Length-prefixed opcode frames.
//!
//! Wire layout is `u32 opcode || u32 length || length bytes`, both integers
//! little-endian. Decoding works against an accumulation buffer and never
//! consumes bytes until a complete frame is present, which is what lets the
//! transport expose non-blocking "no full frame yet" reads.

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{Buf, BytesMut};
use serde::Serialize;

use crate::error::{DiscordRpcError, Result};
use crate::ipc::protocol::{constants, Opcode};

/// A single IPC frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self { opcode, payload }
    }

    /// Build a frame whose payload is the JSON serialization of `value`.
    pub fn json<T: Serialize>(opcode: Opcode, value: &T) -> Result<Self> {
        Ok(Self {
            opcode,
            payload: serde_json::to_vec(value)?,
        })
    }

    /// Serialize header and payload into a single write-ready buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(constants::FRAME_HEADER_SIZE + self.payload.len());
        buffer.extend_from_slice(&u32::from(self.opcode).to_le_bytes());
        buffer.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buffer.extend_from_slice(&self.payload);
        buffer
    }

    /// Try to extract one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` while the buffer holds less than a full frame,
    /// leaving it untouched. Consumes the frame's bytes only on success.
    /// An unknown opcode or a length above `max_payload` is a
    /// [`DiscordRpcError::Protocol`] error; the caller is expected to drop
    /// the connection, since the stream can no longer be re-synchronized.
    pub fn parse(buf: &mut BytesMut, max_payload: u32) -> Result<Option<Frame>> {
        if buf.len() < constants::FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = &buf[..constants::FRAME_HEADER_SIZE];
        let opcode_raw = header.read_u32::<LittleEndian>()?;
        let length = header.read_u32::<LittleEndian>()?;

        if length > max_payload {
            return Err(DiscordRpcError::Protocol(format!(
                "frame length {length} exceeds the {max_payload} byte limit"
            )));
        }
        let opcode = Opcode::try_from(opcode_raw)?;

        if buf.len() < constants::FRAME_HEADER_SIZE + length as usize {
            return Ok(None);
        }

        buf.advance(constants::FRAME_HEADER_SIZE);
        let payload = buf.split_to(length as usize).to_vec();
        Ok(Some(Frame { opcode, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_decode_round_trip() {
        let frame = Frame::json(Opcode::Frame, &json!({"cmd": "DISPATCH"})).unwrap();
        let mut buf = BytesMut::from(&frame.encode()[..]);

        let decoded = Frame::parse(&mut buf, constants::MAX_INBOUND_PAYLOAD)
            .unwrap()
            .expect("complete frame");

        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn header_is_little_endian() {
        let frame = Frame::new(Opcode::Pong, b"{}".to_vec());
        let bytes = frame.encode();
        assert_eq!(&bytes[..4], &[4, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[2, 0, 0, 0]);
        assert_eq!(&bytes[8..], b"{}");
    }

    #[test]
    fn partial_frames_are_left_in_the_buffer() {
        let frame = Frame::new(Opcode::Frame, vec![b'x'; 32]);
        let encoded = frame.encode();

        // Header only.
        let mut buf = BytesMut::from(&encoded[..8]);
        assert!(Frame::parse(&mut buf, 1024).unwrap().is_none());
        assert_eq!(buf.len(), 8);

        // Header plus half the payload.
        let mut buf = BytesMut::from(&encoded[..24]);
        assert!(Frame::parse(&mut buf, 1024).unwrap().is_none());
        assert_eq!(buf.len(), 24);

        // Whole frame plus the start of the next one.
        let mut buf = BytesMut::from(&encoded[..]);
        buf.extend_from_slice(&encoded[..10]);
        let decoded = Frame::parse(&mut buf, 1024).unwrap().expect("first frame");
        assert_eq!(decoded.payload.len(), 32);
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn oversized_length_is_a_protocol_error() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&(constants::MAX_INBOUND_PAYLOAD + 1).to_le_bytes());

        let err = Frame::parse(&mut buf, constants::MAX_INBOUND_PAYLOAD).unwrap_err();
        assert!(matches!(err, DiscordRpcError::Protocol(_)));
    }

    #[test]
    fn unknown_opcode_is_a_protocol_error() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&77u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());

        let err = Frame::parse(&mut buf, 1024).unwrap_err();
        assert!(matches!(err, DiscordRpcError::Protocol(_)));
    }
}
