//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding or encoding MySQL protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The buffer ended before a complete field could be read.
    #[error("unexpected end of packet: needed {expected} bytes, {actual} available")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        expected: usize,
        /// Bytes left in the buffer.
        actual: usize,
    },

    /// A packet was structurally invalid.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    /// The packet began with a marker byte that is not valid here.
    #[error("unexpected packet marker 0x{0:02x}")]
    UnexpectedMarker(u8),

    /// The server greeting announced a protocol other than 10.
    #[error("unsupported protocol version {0}")]
    UnsupportedProtocolVersion(u8),

    /// The server does not speak the 4.1 protocol.
    #[error("server does not support the 4.1 protocol")]
    Protocol41Required,

    /// The server requested an authentication plugin this client cannot answer.
    #[error("unsupported authentication plugin: {0}")]
    UnsupportedAuthPlugin(String),

    /// A payload exceeded the maximum the encoder supports.
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

impl ProtocolError {
    pub(crate) fn eof(expected: usize, actual: usize) -> Self {
        Self::UnexpectedEof { expected, actual }
    }
}
