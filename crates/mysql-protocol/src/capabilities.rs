//! Capability and server status flags.

use bitflags::bitflags;

bitflags! {
    /// Client/server capability flags exchanged during the handshake.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CapabilityFlags: u32 {
        /// Use the improved version of the old password hashing.
        const LONG_PASSWORD = 1;
        /// Return found rows instead of affected rows.
        const FOUND_ROWS = 1 << 1;
        /// Get all column flags.
        const LONG_FLAG = 1 << 2;
        /// A database name may be sent in the handshake response.
        const CONNECT_WITH_DB = 1 << 3;
        /// Disallow `db.table.column`.
        const NO_SCHEMA = 1 << 4;
        /// Compression protocol.
        const COMPRESS = 1 << 5;
        /// ODBC client.
        const ODBC = 1 << 6;
        /// `LOAD DATA LOCAL` is permitted.
        const LOCAL_FILES = 1 << 7;
        /// Ignore spaces before '('.
        const IGNORE_SPACE = 1 << 8;
        /// New 4.1 protocol.
        const PROTOCOL_41 = 1 << 9;
        /// Interactive client (uses `interactive_timeout`).
        const INTERACTIVE = 1 << 10;
        /// Switch to SSL after the handshake.
        const SSL = 1 << 11;
        /// Do not issue SIGPIPE on network failures.
        const IGNORE_SIGPIPE = 1 << 12;
        /// Server supports transactions; status flags carry transaction state.
        const TRANSACTIONS = 1 << 13;
        /// Reserved (old 4.1 protocol flag).
        const RESERVED = 1 << 14;
        /// 4.1 authentication.
        const SECURE_CONNECTION = 1 << 15;
        /// Multiple statements per `COM_QUERY`.
        const MULTI_STATEMENTS = 1 << 16;
        /// Multiple result sets per `COM_QUERY`.
        const MULTI_RESULTS = 1 << 17;
        /// Multiple result sets for prepared statements.
        const PS_MULTI_RESULTS = 1 << 18;
        /// Pluggable authentication.
        const PLUGIN_AUTH = 1 << 19;
        /// Connection attributes.
        const CONNECT_ATTRS = 1 << 20;
        /// Length-encoded auth response.
        const PLUGIN_AUTH_LENENC_CLIENT_DATA = 1 << 21;
        /// Client can handle expired passwords.
        const CAN_HANDLE_EXPIRED_PASSWORDS = 1 << 22;
        /// Session state change information in OK packets.
        const SESSION_TRACK = 1 << 23;
        /// OK packets replace EOF packets.
        const DEPRECATE_EOF = 1 << 24;
    }
}

impl CapabilityFlags {
    /// Flags this client always asks for when the server offers them.
    #[must_use]
    pub fn client_default() -> Self {
        Self::LONG_PASSWORD
            | Self::LONG_FLAG
            | Self::PROTOCOL_41
            | Self::TRANSACTIONS
            | Self::SECURE_CONNECTION
            | Self::MULTI_STATEMENTS
            | Self::MULTI_RESULTS
            | Self::PLUGIN_AUTH
    }
}

bitflags! {
    /// Server status flags carried by OK and EOF packets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusFlags: u16 {
        /// A transaction is active.
        const IN_TRANS = 1;
        /// Autocommit mode is on.
        const AUTOCOMMIT = 1 << 1;
        /// More result sets follow.
        const MORE_RESULTS_EXISTS = 1 << 3;
        /// No good index was used.
        const NO_GOOD_INDEX_USED = 1 << 4;
        /// No index was used.
        const NO_INDEX_USED = 1 << 5;
        /// A read-only cursor is open.
        const CURSOR_EXISTS = 1 << 6;
        /// The last row of the cursor has been sent.
        const LAST_ROW_SENT = 1 << 7;
        /// A database was dropped.
        const DB_DROPPED = 1 << 8;
        /// `NO_BACKSLASH_ESCAPES` sql mode is active.
        const NO_BACKSLASH_ESCAPES = 1 << 9;
        /// Metadata changed.
        const METADATA_CHANGED = 1 << 10;
        /// The query was slow.
        const QUERY_WAS_SLOW = 1 << 11;
        /// Prepared statement has OUT parameters.
        const PS_OUT_PARAMS = 1 << 12;
        /// A read-only transaction is active.
        const IN_TRANS_READONLY = 1 << 13;
        /// Session state changed.
        const SESSION_STATE_CHANGED = 1 << 14;
    }
}
