//! MySQL packet header definitions.
//!
//! Every MySQL packet starts with a 4-byte header: a 3-byte little-endian
//! payload length followed by a 1-byte sequence id. Payloads of exactly
//! [`MAX_PAYLOAD_SIZE`] bytes are continued by the next packet.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 4;

/// Largest payload a single packet can carry (2^24 - 1).
pub const MAX_PAYLOAD_SIZE: usize = 0xFF_FFFF;

/// Default `max_allowed_packet` announced in the handshake response.
pub const DEFAULT_MAX_ALLOWED_PACKET: u32 = 16 * 1024 * 1024;

/// MySQL packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length, excluding the header.
    pub length: u32,
    /// Sequence id; wraps at 255 and restarts at 0 for each command.
    pub sequence: u8,
}

impl PacketHeader {
    /// Create a new packet header.
    #[must_use]
    pub const fn new(length: u32, sequence: u8) -> Self {
        Self { length, sequence }
    }

    /// Parse a packet header.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::UnexpectedEof {
                expected: PACKET_HEADER_SIZE,
                actual: src.remaining(),
            });
        }
        let length = src.get_uint_le(3) as u32;
        let sequence = src.get_u8();
        Ok(Self { length, sequence })
    }

    /// Encode the packet header.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_uint_le(u64::from(self.length), 3);
        dst.put_u8(self.sequence);
    }

    /// Encode the header into a new buffer.
    #[must_use]
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Payload length as `usize`.
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        self.length as usize
    }

    /// Whether the payload continues in the following packet.
    #[must_use]
    pub const fn is_continued(&self) -> bool {
        self.length as usize == MAX_PAYLOAD_SIZE
    }
}
