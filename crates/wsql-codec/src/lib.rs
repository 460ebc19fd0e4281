//! # wsql-codec
//!
//! Framing layer for MySQL packets.
//!
//! This crate turns raw socket bytes into complete MySQL payloads, handling
//! packet reassembly across TCP segment boundaries, continuation packets for
//! payloads of 16 MiB or more, and sequence-id bookkeeping.
//!
//! ## Architecture
//!
//! ```text
//! Socket → Channel buffers → MySqlCodec (packet framing) → MessageAssembler → Client
//! ```
//!
//! [`Channel`] drives plain std sockets in either blocking or non-blocking
//! mode. In non-blocking mode every call returns `Poll::Pending` instead of
//! waiting and reports which [`Interest`] the caller should wait on; bytes
//! already transferred stay in the channel's buffers, so the next call
//! resumes where the previous one stopped.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod channel;
pub mod error;
pub mod message;
pub mod packet_codec;
pub mod transport;

pub use channel::{Channel, Interest};
pub use error::CodecError;
pub use message::MessageAssembler;
pub use packet_codec::{MySqlCodec, Packet};
pub use transport::Transport;
