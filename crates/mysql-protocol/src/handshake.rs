//! Connection phase messages.
//!
//! The server opens with [`Handshake`] (protocol version 10); the client
//! answers with [`HandshakeResponse`]. The server may then ask for a
//! different authentication method with an [`AuthSwitchRequest`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::capabilities::{CapabilityFlags, StatusFlags};
use crate::codec::{
    read_bytes, read_null_terminated, read_null_terminated_string, read_u8, read_u16, read_u32,
    write_lenenc_bytes, write_null_terminated,
};
use crate::error::ProtocolError;
use crate::packet::DEFAULT_MAX_ALLOWED_PACKET;

/// The only handshake protocol version this crate speaks.
pub const PROTOCOL_VERSION: u8 = 10;

/// Name of the native password authentication plugin.
pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";

/// Marker byte of an auth switch request.
pub const AUTH_SWITCH_MARKER: u8 = 0xFE;

/// Initial handshake packet sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Protocol version (always 10).
    pub protocol_version: u8,
    /// Human-readable server version.
    pub server_version: String,
    /// Connection (thread) id.
    pub connection_id: u32,
    /// Authentication nonce (both parts, without the trailing NUL).
    pub auth_plugin_data: Bytes,
    /// Capabilities offered by the server.
    pub capabilities: CapabilityFlags,
    /// Server default collation id.
    pub character_set: u8,
    /// Server status.
    pub status: StatusFlags,
    /// Authentication plugin the server expects first.
    pub auth_plugin_name: String,
}

impl Handshake {
    /// Decode a handshake payload.
    pub fn decode(mut src: Bytes) -> Result<Self, ProtocolError> {
        let protocol_version = read_u8(&mut src)?;
        if protocol_version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedProtocolVersion(protocol_version));
        }
        let server_version = read_null_terminated_string(&mut src)?;
        let connection_id = read_u32(&mut src)?;
        let part1 = read_bytes(&mut src, 8)?;
        read_u8(&mut src)?;
        let caps_lower = read_u16(&mut src)?;

        let mut handshake = Self {
            protocol_version,
            server_version,
            connection_id,
            auth_plugin_data: part1.clone(),
            capabilities: CapabilityFlags::from_bits_retain(u32::from(caps_lower)),
            character_set: 0,
            status: StatusFlags::empty(),
            auth_plugin_name: NATIVE_PASSWORD_PLUGIN.to_string(),
        };
        if !src.has_remaining() {
            return Ok(handshake);
        }

        handshake.character_set = read_u8(&mut src)?;
        handshake.status = StatusFlags::from_bits_retain(read_u16(&mut src)?);
        let caps_upper = read_u16(&mut src)?;
        let capabilities =
            CapabilityFlags::from_bits_retain(u32::from(caps_lower) | (u32::from(caps_upper) << 16));
        handshake.capabilities = capabilities;
        let auth_data_len = read_u8(&mut src)?;
        read_bytes(&mut src, 10)?;

        if capabilities.contains(CapabilityFlags::SECURE_CONNECTION) {
            let part2_len = usize::from(auth_data_len.saturating_sub(8)).max(13).min(src.remaining());
            let part2 = read_bytes(&mut src, part2_len)?;
            let trimmed = part2.iter().position(|&b| b == 0).unwrap_or(part2.len());
            let mut nonce = BytesMut::with_capacity(8 + trimmed);
            nonce.extend_from_slice(&part1);
            nonce.extend_from_slice(&part2[..trimmed]);
            handshake.auth_plugin_data = nonce.freeze();
        }

        if capabilities.contains(CapabilityFlags::PLUGIN_AUTH) && src.has_remaining() {
            // Some servers omit the terminator on the plugin name.
            handshake.auth_plugin_name = match read_null_terminated_string(&mut src.clone()) {
                Ok(name) => name,
                Err(_) => String::from_utf8_lossy(&src).into_owned(),
            };
        }

        Ok(handshake)
    }
}

/// Handshake response (protocol 4.1) sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Negotiated client capabilities.
    pub capabilities: CapabilityFlags,
    /// Max packet size the client will accept.
    pub max_packet_size: u32,
    /// Requested connection collation id.
    pub character_set: u8,
    /// Login user.
    pub user: String,
    /// Scrambled password.
    pub auth_response: Vec<u8>,
    /// Initial default database.
    pub database: Option<String>,
    /// Authentication plugin the response was computed for.
    pub auth_plugin_name: String,
}

impl HandshakeResponse {
    /// Build a native-password response to `handshake`.
    #[must_use]
    pub fn new(
        capabilities: CapabilityFlags,
        character_set: u8,
        user: &str,
        password: &str,
        database: Option<&str>,
        handshake: &Handshake,
    ) -> Self {
        let mut capabilities = capabilities;
        if database.is_some() {
            capabilities |= CapabilityFlags::CONNECT_WITH_DB;
        } else {
            capabilities -= CapabilityFlags::CONNECT_WITH_DB;
        }
        Self {
            capabilities,
            max_packet_size: DEFAULT_MAX_ALLOWED_PACKET,
            character_set,
            user: user.to_string(),
            auth_response: scramble_native_password(password, &handshake.auth_plugin_data),
            database: database.map(str::to_string),
            auth_plugin_name: NATIVE_PASSWORD_PLUGIN.to_string(),
        }
    }

    /// Encode the response payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(64 + self.user.len() + self.auth_response.len());
        dst.put_u32_le(self.capabilities.bits());
        dst.put_u32_le(self.max_packet_size);
        dst.put_u8(self.character_set);
        dst.put_bytes(0, 23);
        write_null_terminated(&mut dst, self.user.as_bytes());
        if self
            .capabilities
            .contains(CapabilityFlags::PLUGIN_AUTH_LENENC_CLIENT_DATA)
        {
            write_lenenc_bytes(&mut dst, &self.auth_response);
        } else {
            dst.put_u8(self.auth_response.len() as u8);
            dst.put_slice(&self.auth_response);
        }
        if self.capabilities.contains(CapabilityFlags::CONNECT_WITH_DB) {
            if let Some(db) = &self.database {
                write_null_terminated(&mut dst, db.as_bytes());
            }
        }
        if self.capabilities.contains(CapabilityFlags::PLUGIN_AUTH) {
            write_null_terminated(&mut dst, self.auth_plugin_name.as_bytes());
        }
        dst.freeze()
    }
}

/// Request from the server to restart authentication with another plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequest {
    /// Requested plugin.
    pub plugin_name: String,
    /// Fresh nonce for the plugin.
    pub auth_plugin_data: Bytes,
}

impl AuthSwitchRequest {
    /// Decode an auth switch request, including its `0xFE` marker.
    pub fn decode(mut src: Bytes) -> Result<Self, ProtocolError> {
        let marker = read_u8(&mut src)?;
        if marker != AUTH_SWITCH_MARKER {
            return Err(ProtocolError::UnexpectedMarker(marker));
        }
        let plugin_name = read_null_terminated_string(&mut src)?;
        let data = match src.iter().position(|&b| b == 0) {
            Some(_) => read_null_terminated(&mut src)?,
            None => src,
        };
        Ok(Self {
            plugin_name,
            auth_plugin_data: data,
        })
    }

    /// Whether this client can answer the request.
    #[must_use]
    pub fn is_native_password(&self) -> bool {
        self.plugin_name == NATIVE_PASSWORD_PLUGIN
    }
}

fn sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the `mysql_native_password` auth response.
///
/// `SHA1(password) XOR SHA1(nonce + SHA1(SHA1(password)))`; an empty
/// password yields an empty response.
#[must_use]
pub fn scramble_native_password(password: &str, nonce: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1 = sha1(password.as_bytes());
    let stage2 = sha1(&stage1);
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(stage2);
    let mix: [u8; 20] = hasher.finalize().into();
    stage1.iter().zip(mix.iter()).map(|(a, b)| a ^ b).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_handshake() -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(10);
        write_null_terminated(&mut buf, b"8.0.36");
        buf.put_u32_le(42);
        buf.put_slice(b"abcdefgh");
        buf.put_u8(0);
        let caps = CapabilityFlags::client_default() | CapabilityFlags::CONNECT_WITH_DB;
        buf.put_u16_le(caps.bits() as u16);
        buf.put_u8(45);
        buf.put_u16_le(StatusFlags::AUTOCOMMIT.bits());
        buf.put_u16_le((caps.bits() >> 16) as u16);
        buf.put_u8(21);
        buf.put_bytes(0, 10);
        buf.put_slice(b"ijklmnopqrst\0");
        write_null_terminated(&mut buf, NATIVE_PASSWORD_PLUGIN.as_bytes());
        buf.freeze()
    }

    #[test]
    fn test_decode_handshake() {
        let handshake = Handshake::decode(sample_handshake()).unwrap();
        assert_eq!(handshake.server_version, "8.0.36");
        assert_eq!(handshake.connection_id, 42);
        assert_eq!(&handshake.auth_plugin_data[..], b"abcdefghijklmnopqrst");
        assert_eq!(handshake.character_set, 45);
        assert!(handshake.capabilities.contains(CapabilityFlags::TRANSACTIONS));
        assert!(handshake.status.contains(StatusFlags::AUTOCOMMIT));
        assert_eq!(handshake.auth_plugin_name, NATIVE_PASSWORD_PLUGIN);
    }

    #[test]
    fn test_reject_old_protocol() {
        let payload = Bytes::from_static(&[9, b'x', 0]);
        assert_eq!(
            Handshake::decode(payload),
            Err(ProtocolError::UnsupportedProtocolVersion(9))
        );
    }

    #[test]
    fn test_truncated_handshake() {
        let full = sample_handshake();
        let truncated = full.slice(..12);
        assert!(Handshake::decode(truncated).is_err());
    }

    #[test]
    fn test_scramble_shape() {
        let nonce = b"abcdefghijklmnopqrst";
        let response = scramble_native_password("secret", nonce);
        let expected: [u8; 20] = [
            0x88, 0x17, 0xc5, 0x0f, 0xa7, 0x79, 0xda, 0xef, 0x01, 0x0e, 0xe7, 0x57, 0x78, 0x25,
            0xb0, 0x84, 0x7d, 0xf9, 0x84, 0x2e,
        ];
        assert_eq!(response, expected);
        assert_ne!(response, scramble_native_password("Secret", nonce));
        assert!(scramble_native_password("", nonce).is_empty());
    }

    #[test]
    fn test_response_layout() {
        let handshake = Handshake::decode(sample_handshake()).unwrap();
        let response = HandshakeResponse::new(
            CapabilityFlags::client_default(),
            45,
            "app",
            "pw",
            Some("shop"),
            &handshake,
        );
        let payload = response.encode();
        let caps = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        assert!(CapabilityFlags::from_bits_retain(caps).contains(CapabilityFlags::CONNECT_WITH_DB));
        assert_eq!(payload[8], 45);
        assert_eq!(&payload[32..36], b"app\0");
        assert_eq!(payload[36], 20);
        assert!(payload.ends_with(b"shop\0mysql_native_password\0"));
    }

    #[test]
    fn test_auth_switch() {
        let mut buf = BytesMut::new();
        buf.put_u8(AUTH_SWITCH_MARKER);
        write_null_terminated(&mut buf, b"mysql_native_password");
        buf.put_slice(b"01234567890123456789\0");
        let request = AuthSwitchRequest::decode(buf.freeze()).unwrap();
        assert!(request.is_native_password());
        assert_eq!(&request.auth_plugin_data[..], b"01234567890123456789");
    }
}
