//! # mysql-protocol
//!
//! Pure implementation of the MySQL client/server protocol (protocol
//! version 10, 4.1 authentication, text result sets).
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic;
//! it turns payload bytes into typed messages and back. Framing lives in
//! `wsql-codec` and connection management in `wsql-client`.
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use mysql_protocol::response::QueryResponse;
//!
//! let response = QueryResponse::decode(Bytes::from_static(&[0x02])).unwrap();
//! assert!(matches!(response, QueryResponse::ResultSet(2)));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod capabilities;
pub mod charset;
pub mod codec;
pub mod codes;
pub mod column;
pub mod command;
pub mod error;
pub mod escape;
pub mod handshake;
pub mod packet;
pub mod response;
pub mod row;

pub use capabilities::{CapabilityFlags, StatusFlags};
pub use charset::Charset;
pub use column::{ColumnDefinition, ColumnFlags, FieldType};
pub use command::{Command, ServerOption};
pub use error::ProtocolError;
pub use handshake::{AuthSwitchRequest, Handshake, HandshakeResponse, scramble_native_password};
pub use packet::{MAX_PAYLOAD_SIZE, PACKET_HEADER_SIZE, PacketHeader};
pub use response::{CommandResponse, EofPacket, ErrPacket, OkPacket, QueryResponse};
