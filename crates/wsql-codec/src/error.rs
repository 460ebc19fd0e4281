//! Codec error types.

use std::io;

use mysql_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by framing and socket I/O.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Underlying socket error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A blocking read or write hit its timeout.
    #[error("operation timed out")]
    TimedOut,

    /// The host name did not resolve.
    #[error("unknown host '{0}'")]
    UnknownHost(String),

    /// A reassembled payload exceeded the configured maximum.
    #[error("packet of {size} bytes exceeds maximum of {max}")]
    PacketTooLarge {
        /// Size of the payload.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A packet arrived with an unexpected sequence id.
    #[error("packets out of order: expected sequence {expected}, got {actual}")]
    OutOfOrder {
        /// Expected sequence id.
        expected: u8,
        /// Received sequence id.
        actual: u8,
    },

    /// Malformed header.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl CodecError {
    /// Whether the failure means the connection can no longer be used.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::PacketTooLarge { .. } | Self::UnknownHost(_))
    }
}
