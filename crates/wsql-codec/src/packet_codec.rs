//! MySQL packet codec implementation.

use bytes::{BufMut, Bytes, BytesMut};
use mysql_protocol::packet::{MAX_PAYLOAD_SIZE, PACKET_HEADER_SIZE, PacketHeader};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Largest reassembled payload accepted by default (1 GiB, the server's
/// `max_allowed_packet` ceiling).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1 << 30;

/// A single wire packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header.
    pub header: PacketHeader,
    /// Packet payload (excluding header).
    pub payload: Bytes,
}

impl Packet {
    /// Create a new packet.
    #[must_use]
    pub fn new(header: PacketHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Total size including header.
    #[must_use]
    pub fn total_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Whether the payload continues in the next packet.
    #[must_use]
    pub fn is_continued(&self) -> bool {
        self.header.is_continued()
    }
}

/// MySQL packet codec for tokio-util framing.
///
/// The codec owns the sequence id shared by both directions: every packet
/// read or written must carry the next id, and the id restarts at zero when
/// the client issues a new command ([`MySqlCodec::reset_sequence`]).
#[derive(Debug)]
pub struct MySqlCodec {
    sequence: u8,
    max_message_size: usize,
}

impl MySqlCodec {
    /// Create a codec expecting sequence id 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sequence: 0,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Limit the size of a single payload.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Restart the sequence at zero for a new command.
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    /// Sequence id the next packet must carry.
    #[must_use]
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    fn next_sequence(&mut self) -> u8 {
        let id = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        id
    }
}

impl Default for MySqlCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MySqlCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        let length = usize::from(src[0]) | usize::from(src[1]) << 8 | usize::from(src[2]) << 16;
        let total = PACKET_HEADER_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        let header = PacketHeader::decode(&mut frame)?;
        if header.sequence != self.sequence {
            return Err(CodecError::OutOfOrder {
                expected: self.sequence,
                actual: header.sequence,
            });
        }
        self.next_sequence();

        tracing::trace!(
            length = length,
            sequence = header.sequence,
            continued = header.is_continued(),
            "decoded MySQL packet"
        );

        Ok(Some(Packet::new(header, frame.freeze())))
    }
}

impl Encoder<Bytes> for MySqlCodec {
    type Error = CodecError;

    /// Encode one logical payload, splitting it into as many packets as
    /// needed. A payload that is an exact multiple of the maximum packet
    /// size is terminated by an empty packet.
    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_message_size {
            return Err(CodecError::PacketTooLarge {
                size: item.len(),
                max: self.max_message_size,
            });
        }

        let chunks = item.len() / MAX_PAYLOAD_SIZE + 1;
        dst.reserve(item.len() + chunks * PACKET_HEADER_SIZE);

        let mut rest = item;
        loop {
            let take = rest.len().min(MAX_PAYLOAD_SIZE);
            let chunk = rest.split_to(take);
            let header = PacketHeader::new(take as u32, self.next_sequence());
            header.encode(dst);
            dst.put_slice(&chunk);

            tracing::trace!(length = take, sequence = header.sequence, "encoded MySQL packet");

            if take < MAX_PAYLOAD_SIZE {
                break;
            }
        }
        Ok(())
    }
}
