//! Payload reassembly.
//!
//! A payload of 2^24 - 1 bytes or more is split across packets; every packet
//! but the last carries exactly [`MAX_PAYLOAD_SIZE`] bytes. This module joins
//! them back together.
//!
//! [`MAX_PAYLOAD_SIZE`]: mysql_protocol::MAX_PAYLOAD_SIZE

use bytes::{Bytes, BytesMut};

use crate::packet_codec::Packet;

/// Reassembles continued packets into complete payloads.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: BytesMut,
    packet_count: usize,
}

impl MessageAssembler {
    /// Create a new assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a packet.
    ///
    /// Returns the complete payload once the final packet arrives. Single
    /// packet payloads are returned without copying.
    pub fn push(&mut self, packet: Packet) -> Option<Bytes> {
        let continued = packet.is_continued();
        if self.packet_count == 0 && !continued {
            return Some(packet.payload);
        }

        self.buffer.extend_from_slice(&packet.payload);
        self.packet_count += 1;

        tracing::trace!(
            packet_count = self.packet_count,
            buffer_len = self.buffer.len(),
            continued,
            "assembling payload"
        );

        if continued {
            None
        } else {
            self.packet_count = 0;
            Some(self.buffer.split().freeze())
        }
    }

    /// Whether a partial payload is buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.packet_count > 0
    }

    /// Discard any partial payload.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.packet_count = 0;
    }
}
