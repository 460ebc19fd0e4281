//! Command phase requests.
//!
//! Each request is a single payload whose first byte is the [`Command`]
//! code. Sequence ids restart at zero for every command; framing is the
//! codec's job, so these helpers only build payloads.

use bytes::{BufMut, Bytes, BytesMut};

use crate::capabilities::CapabilityFlags;
use crate::codec::write_null_terminated;
use crate::handshake::{NATIVE_PASSWORD_PLUGIN, scramble_native_password};

/// Command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Close the connection.
    Quit = 0x01,
    /// Change the default database.
    InitDb = 0x02,
    /// Text protocol query.
    Query = 0x03,
    /// List the columns of a table.
    FieldList = 0x04,
    /// Ask the server to shut down.
    Shutdown = 0x08,
    /// Human-readable server statistics.
    Statistics = 0x09,
    /// Kill a connection.
    ProcessKill = 0x0C,
    /// Dump debug information to the server log.
    Debug = 0x0D,
    /// Liveness check.
    Ping = 0x0E,
    /// Re-authenticate as another user.
    ChangeUser = 0x11,
    /// Toggle a connection option.
    SetOption = 0x1B,
}

impl Command {
    /// Command name for logging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Quit => "COM_QUIT",
            Self::InitDb => "COM_INIT_DB",
            Self::Query => "COM_QUERY",
            Self::FieldList => "COM_FIELD_LIST",
            Self::Shutdown => "COM_SHUTDOWN",
            Self::Statistics => "COM_STATISTICS",
            Self::ProcessKill => "COM_PROCESS_KILL",
            Self::Debug => "COM_DEBUG",
            Self::Ping => "COM_PING",
            Self::ChangeUser => "COM_CHANGE_USER",
            Self::SetOption => "COM_SET_OPTION",
        }
    }
}

/// Options accepted by `COM_SET_OPTION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ServerOption {
    /// Allow several statements per query.
    MultiStatementsOn = 0,
    /// Allow a single statement per query.
    MultiStatementsOff = 1,
}

/// Encode a command that carries no arguments.
#[must_use]
pub fn encode_simple(command: Command) -> Bytes {
    Bytes::copy_from_slice(&[command as u8])
}

/// Encode a command followed by a raw argument.
#[must_use]
pub fn encode_with_argument(command: Command, argument: &[u8]) -> Bytes {
    let mut dst = BytesMut::with_capacity(1 + argument.len());
    dst.put_u8(command as u8);
    dst.put_slice(argument);
    dst.freeze()
}

/// Encode `COM_QUERY`.
#[must_use]
pub fn encode_query(sql: &[u8]) -> Bytes {
    encode_with_argument(Command::Query, sql)
}

/// Encode `COM_INIT_DB`.
#[must_use]
pub fn encode_init_db(database: &str) -> Bytes {
    encode_with_argument(Command::InitDb, database.as_bytes())
}

/// Encode `COM_PROCESS_KILL`.
#[must_use]
pub fn encode_process_kill(thread_id: u32) -> Bytes {
    encode_with_argument(Command::ProcessKill, &thread_id.to_le_bytes())
}

/// Encode `COM_SET_OPTION`.
#[must_use]
pub fn encode_set_option(option: ServerOption) -> Bytes {
    encode_with_argument(Command::SetOption, &(option as u16).to_le_bytes())
}

/// Encode `COM_SHUTDOWN` with the default shutdown level.
#[must_use]
pub fn encode_shutdown() -> Bytes {
    encode_with_argument(Command::Shutdown, &[0])
}

/// Encode `COM_CHANGE_USER` with a native-password scramble.
#[must_use]
pub fn encode_change_user(
    capabilities: CapabilityFlags,
    user: &str,
    password: &str,
    database: Option<&str>,
    character_set: u8,
    nonce: &[u8],
) -> Bytes {
    let auth = scramble_native_password(password, nonce);
    let mut dst = BytesMut::with_capacity(64 + user.len() + auth.len());
    dst.put_u8(Command::ChangeUser as u8);
    write_null_terminated(&mut dst, user.as_bytes());
    if capabilities.contains(CapabilityFlags::SECURE_CONNECTION) {
        dst.put_u8(auth.len() as u8);
        dst.put_slice(&auth);
    } else {
        write_null_terminated(&mut dst, &auth);
    }
    write_null_terminated(&mut dst, database.unwrap_or_default().as_bytes());
    if capabilities.contains(CapabilityFlags::PROTOCOL_41) {
        dst.put_u16_le(u16::from(character_set));
    }
    if capabilities.contains(CapabilityFlags::PLUGIN_AUTH) {
        write_null_terminated(&mut dst, NATIVE_PASSWORD_PLUGIN.as_bytes());
    }
    dst.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_payload() {
        let payload = encode_query(b"SELECT 1");
        assert_eq!(payload[0], 0x03);
        assert_eq!(&payload[1..], b"SELECT 1");
    }

    #[test]
    fn test_process_kill_is_little_endian() {
        assert_eq!(&encode_process_kill(0x0102_0304)[..], &[0x0C, 4, 3, 2, 1]);
    }

    #[test]
    fn test_set_option() {
        assert_eq!(
            &encode_set_option(ServerOption::MultiStatementsOff)[..],
            &[0x1B, 1, 0]
        );
    }

    #[test]
    fn test_change_user_layout() {
        let payload = encode_change_user(
            CapabilityFlags::client_default(),
            "bob",
            "",
            Some("db1"),
            45,
            b"nonce",
        );
        assert_eq!(payload[0], Command::ChangeUser as u8);
        assert_eq!(&payload[1..5], b"bob\0");
        assert_eq!(payload[5], 0);
        assert_eq!(&payload[6..10], b"db1\0");
        assert_eq!(&payload[10..12], &[45, 0]);
        assert!(payload.ends_with(b"mysql_native_password\0"));
    }
}
