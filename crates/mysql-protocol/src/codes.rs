//! Well-known error codes.
//!
//! Client error codes (`CR_*`) are raised locally by the client library and
//! live in `CR_MIN_ERROR..=CR_MAX_ERROR`; server error codes (`ER_*`) start
//! at [`ER_ERROR_FIRST`].

#![allow(missing_docs)]

/// File not found, raised by the local infile reader.
pub const EE_FILENOTFOUND: u16 = 29;

/// First server error code.
pub const ER_ERROR_FIRST: u16 = 1000;

pub const ER_DB_CREATE_EXISTS: u16 = 1007;
pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
pub const ER_UNKNOWN_COM_ERROR: u16 = 1047;
pub const ER_BAD_DB_ERROR: u16 = 1049;
pub const ER_BAD_TABLE_ERROR: u16 = 1051;
pub const ER_DUP_FIELDNAME: u16 = 1060;
pub const ER_DUP_ENTRY: u16 = 1062;
pub const ER_PARSE_ERROR: u16 = 1064;
pub const ER_NO_SUCH_THREAD: u16 = 1094;
pub const ER_WRONG_DB_NAME: u16 = 1102;
pub const ER_WRONG_TABLE_NAME: u16 = 1103;
pub const ER_FIELD_SPECIFIED_TWICE: u16 = 1110;
pub const ER_INVALID_GROUP_FUNC_USE: u16 = 1111;
pub const ER_UNSUPPORTED_EXTENSION: u16 = 1112;
pub const ER_TABLE_MUST_HAVE_COLUMNS: u16 = 1113;
pub const ER_NO_SUCH_TABLE: u16 = 1146;
pub const ER_SYNTAX_ERROR: u16 = 1149;
pub const ER_NOT_ALLOWED_COMMAND: u16 = 1148;
pub const ER_PRIMARY_CANT_HAVE_NULL: u16 = 1171;
pub const ER_CANT_DO_THIS_DURING_AN_TRANSACTION: u16 = 1179;
pub const ER_WARNING_NOT_COMPLETE_ROLLBACK: u16 = 1196;
pub const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
pub const ER_LOCK_DEADLOCK: u16 = 1213;
pub const ER_CANNOT_ADD_FOREIGN: u16 = 1215;
pub const ER_NO_REFERENCED_ROW: u16 = 1216;
pub const ER_ROW_IS_REFERENCED: u16 = 1217;
pub const ER_NO_DEFAULT: u16 = 1230;
pub const ER_NOT_SUPPORTED_YET: u16 = 1235;
pub const ER_WARN_NULL_TO_NOTNULL: u16 = 1263;
pub const ER_WARN_DATA_OUT_OF_RANGE: u16 = 1264;
pub const ER_WARN_DATA_TRUNCATED: u16 = 1265;
pub const ER_UNKNOWN_STORAGE_ENGINE: u16 = 1286;
pub const ER_FEATURE_DISABLED: u16 = 1289;
pub const ER_DATA_TOO_LONG: u16 = 1406;
pub const ER_DATETIME_FUNCTION_OVERFLOW: u16 = 1441;
pub const ER_ROW_IS_REFERENCED_2: u16 = 1451;
pub const ER_NO_REFERENCED_ROW_2: u16 = 1452;

/// First client error code.
pub const CR_MIN_ERROR: u16 = 2000;
/// Last code reserved for client errors.
pub const CR_MAX_ERROR: u16 = 2999;

pub const CR_UNKNOWN_ERROR: u16 = 2000;
pub const CR_SOCKET_CREATE_ERROR: u16 = 2001;
pub const CR_CONNECTION_ERROR: u16 = 2002;
pub const CR_CONN_HOST_ERROR: u16 = 2003;
pub const CR_IPSOCK_ERROR: u16 = 2004;
pub const CR_UNKNOWN_HOST: u16 = 2005;
pub const CR_SERVER_GONE_ERROR: u16 = 2006;
pub const CR_VERSION_ERROR: u16 = 2007;
pub const CR_SERVER_HANDSHAKE_ERR: u16 = 2012;
pub const CR_SERVER_LOST: u16 = 2013;
pub const CR_COMMANDS_OUT_OF_SYNC: u16 = 2014;
pub const CR_CANT_READ_CHARSET: u16 = 2019;
pub const CR_NET_PACKET_TOO_LARGE: u16 = 2020;
pub const CR_SSL_CONNECTION_ERROR: u16 = 2026;
pub const CR_MALFORMED_PACKET: u16 = 2027;
pub const CR_NOT_IMPLEMENTED: u16 = 2054;
pub const CR_AUTH_PLUGIN_CANNOT_LOAD: u16 = 2059;

/// Fixed English message for a client error code.
///
/// Messages that embed runtime details (host names, paths) are formatted by
/// the caller; this returns their static prefix.
#[must_use]
pub const fn client_error_message(code: u16) -> &'static str {
    match code {
        CR_SOCKET_CREATE_ERROR => "Can't create UNIX socket",
        CR_CONNECTION_ERROR => "Can't connect to local MySQL server through socket",
        CR_CONN_HOST_ERROR => "Can't connect to MySQL server",
        CR_IPSOCK_ERROR => "Can't create TCP/IP socket",
        CR_UNKNOWN_HOST => "Unknown MySQL server host",
        CR_SERVER_GONE_ERROR => "MySQL server has gone away",
        CR_VERSION_ERROR => "Protocol mismatch",
        CR_SERVER_HANDSHAKE_ERR => "Error in server handshake",
        CR_SERVER_LOST => "Lost connection to MySQL server during query",
        CR_COMMANDS_OUT_OF_SYNC => "Commands out of sync; you can't run this command now",
        CR_CANT_READ_CHARSET => "Can't initialize character set",
        CR_NET_PACKET_TOO_LARGE => "Got packet bigger than 'max_allowed_packet' bytes",
        CR_SSL_CONNECTION_ERROR => "SSL connection error",
        CR_MALFORMED_PACKET => "Malformed packet",
        CR_NOT_IMPLEMENTED => "This feature is not implemented yet",
        CR_AUTH_PLUGIN_CANNOT_LOAD => "Authentication plugin cannot be loaded",
        _ => "Unknown MySQL error",
    }
}

/// SQLSTATE for a client error code.
#[must_use]
pub const fn client_error_sqlstate(code: u16) -> &'static str {
    match code {
        CR_SERVER_GONE_ERROR | CR_SERVER_LOST => "08S01",
        CR_CONNECTION_ERROR | CR_CONN_HOST_ERROR | CR_UNKNOWN_HOST => "08001",
        _ => "HY000",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages() {
        assert_eq!(client_error_message(CR_SERVER_GONE_ERROR), "MySQL server has gone away");
        assert_eq!(client_error_message(2999), "Unknown MySQL error");
        assert_eq!(client_error_sqlstate(CR_SERVER_LOST), "08S01");
    }
}
