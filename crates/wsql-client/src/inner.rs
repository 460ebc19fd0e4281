//! Shared session state.
//!
//! [`SessionInner`] is owned by a [`Session`](crate::Session) and shared with
//! the results it creates. It holds the socket channel, the diagnostics area
//! the classifier reads from, and the bookkeeping of the last command.
//!
//! Every failure is first recorded as an error number in the diagnostics
//! area and then turned into an [`Error`] by [`classify`]; low-level codec
//! errors never reach callers directly.

use std::task::Poll;

use bytes::Bytes;
use mysql_protocol::codes::{
    CR_CANT_READ_CHARSET, CR_COMMANDS_OUT_OF_SYNC, CR_CONN_HOST_ERROR, CR_CONNECTION_ERROR,
    CR_MALFORMED_PACKET, CR_NET_PACKET_TOO_LARGE, CR_SERVER_GONE_ERROR, CR_SERVER_LOST,
    CR_UNKNOWN_ERROR, CR_UNKNOWN_HOST, client_error_message, client_error_sqlstate,
};
use mysql_protocol::column::ColumnDefinition;
use mysql_protocol::response::{EofPacket, ErrPacket, OkPacket, is_eof_packet, is_err_packet};
use mysql_protocol::{CapabilityFlags, Charset, ProtocolError, StatusFlags};
use wsql_codec::{Channel, CodecError, Interest, Transport};

use crate::classify::{ErrorSource, classify};
use crate::config::ConnectOptions;
use crate::error::{Error, Result};
#[cfg(feature = "nonblocking")]
use crate::nonblocking::AsyncOp;
use crate::state::{SessionState, WireState};

/// Which way data was moving when an I/O error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

/// Values learned from the server greeting.
#[derive(Debug, Clone, Default)]
pub(crate) struct ServerInfo {
    pub(crate) version: String,
    pub(crate) protocol_version: u8,
    pub(crate) thread_id: u32,
    pub(crate) capabilities: CapabilityFlags,
    pub(crate) nonce: Bytes,
}

/// The last error, as reported by `errno()`, `error()` and `sqlstate()`.
#[derive(Debug, Clone)]
pub(crate) struct Diagnostics {
    pub(crate) code: u16,
    pub(crate) sqlstate: String,
    pub(crate) message: String,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            code: 0,
            sqlstate: "00000".to_string(),
            message: String::new(),
        }
    }
}

/// Character set used before a connection negotiates one.
pub(crate) fn initial_charset() -> &'static Charset {
    Charset::by_name("latin1").unwrap_or_else(Charset::default_charset)
}

#[derive(Debug)]
pub(crate) struct SessionInner {
    pub(crate) channel: Option<Channel>,
    pub(crate) open: bool,
    pub(crate) connected: bool,
    pub(crate) closed: bool,
    pub(crate) autocommit: bool,
    pub(crate) reconnect: bool,
    pub(crate) options: ConnectOptions,
    pub(crate) server: ServerInfo,
    pub(crate) host_info: String,
    pub(crate) client_flags: CapabilityFlags,
    pub(crate) charset: &'static Charset,
    pub(crate) status: StatusFlags,
    pub(crate) affected_rows: u64,
    pub(crate) insert_id: u64,
    pub(crate) warnings: u16,
    pub(crate) info: String,
    pub(crate) field_count: u64,
    pub(crate) diag: Diagnostics,
    pub(crate) wire: WireState,
    pub(crate) next_stream_id: u64,
    #[cfg(feature = "nonblocking")]
    pub(crate) async_op: AsyncOp,
}

impl SessionInner {
    pub(crate) fn new() -> Self {
        Self {
            channel: None,
            open: false,
            connected: false,
            closed: false,
            autocommit: false,
            reconnect: false,
            options: ConnectOptions::default(),
            server: ServerInfo::default(),
            host_info: String::new(),
            client_flags: CapabilityFlags::empty(),
            charset: initial_charset(),
            status: StatusFlags::empty(),
            affected_rows: 0,
            insert_id: 0,
            warnings: 0,
            info: String::new(),
            field_count: 0,
            diag: Diagnostics::default(),
            wire: WireState::Ready,
            next_stream_id: 0,
            #[cfg(feature = "nonblocking")]
            async_op: AsyncOp::Idle,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        match (self.closed, self.open, self.connected) {
            (true, _, _) => SessionState::Closed,
            (false, false, _) => SessionState::Unopened,
            (false, true, true) => SessionState::Connected,
            (false, true, false) => SessionState::Disconnected,
        }
    }

    // =========================================================================
    // Usage checks
    // =========================================================================

    /// Fails unless the session is open.
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else if self.closed {
            Err(Error::programming("the connection is closed"))
        } else {
            Err(Error::programming("the connection is not open"))
        }
    }

    /// Fails unless no non-blocking operation is outstanding.
    pub(crate) fn check_idle(&self) -> Result<()> {
        #[cfg(feature = "nonblocking")]
        if let Some(kind) = self.async_op.in_progress() {
            return Err(Error::programming(format!(
                "an asynchronous {} is in progress",
                kind.name()
            )));
        }
        Ok(())
    }

    /// Fails unless a new command may be sent.
    pub(crate) fn check_command(&mut self) -> Result<()> {
        self.check_open()?;
        self.check_idle()?;
        if self.wire.is_busy() {
            return Err(self.fail_client(CR_COMMANDS_OUT_OF_SYNC, None));
        }
        Ok(())
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub(crate) fn clear_error(&mut self) {
        self.diag = Diagnostics::default();
    }

    fn record(&mut self, code: u16, sqlstate: &str, message: String) {
        tracing::debug!(code, sqlstate, message = message.as_str(), "recording error");
        self.diag = Diagnostics {
            code,
            sqlstate: sqlstate.to_string(),
            message,
        };
    }

    /// Record a client error and classify it.
    pub(crate) fn fail_client(&mut self, code: u16, detail: Option<String>) -> Error {
        let base = client_error_message(code);
        let message = match detail {
            Some(detail) => format!("{base} ({detail})"),
            None => base.to_string(),
        };
        self.record(code, client_error_sqlstate(code), message);
        classify(Some(self))
    }

    /// Record an error with a custom message and classify it.
    pub(crate) fn fail_message(&mut self, code: u16, message: String) -> Error {
        self.record(code, client_error_sqlstate(code), message);
        classify(Some(self))
    }

    /// Record a server ERR packet and classify it.
    pub(crate) fn fail_server(&mut self, err: ErrPacket) -> Error {
        if self.open {
            self.connected = true;
        }
        self.record(err.code, &err.sqlstate, err.message);
        classify(Some(self))
    }

    /// Record a codec failure and classify it.
    ///
    /// Fatal failures drop the channel; the next command reports that the
    /// server has gone away.
    pub(crate) fn fail_codec(&mut self, err: CodecError, direction: Direction) -> Error {
        let code = match &err {
            CodecError::Io(_) | CodecError::ConnectionClosed | CodecError::TimedOut => {
                match direction {
                    Direction::Read => CR_SERVER_LOST,
                    Direction::Write => CR_SERVER_GONE_ERROR,
                }
            }
            CodecError::PacketTooLarge { .. } => CR_NET_PACKET_TOO_LARGE,
            CodecError::UnknownHost(_) => CR_UNKNOWN_HOST,
            CodecError::OutOfOrder { .. } | CodecError::Protocol(_) => CR_MALFORMED_PACKET,
            _ => CR_UNKNOWN_ERROR,
        };
        if err.is_fatal() {
            self.drop_channel();
        }
        self.fail_client(code, Some(err.to_string()))
    }

    /// A payload did not parse.
    pub(crate) fn fail_protocol(&mut self, err: ProtocolError) -> Error {
        self.fail_codec(CodecError::Protocol(err), Direction::Read)
    }

    fn fail_timeout(&mut self) -> Error {
        let direction = match self.channel.as_ref().map(Channel::interest) {
            Some(Interest::Write) => Direction::Write,
            _ => Direction::Read,
        };
        self.fail_codec(CodecError::TimedOut, direction)
    }

    /// Mark the session alive after a command completed.
    pub(crate) fn mark_alive(&mut self) {
        if self.open {
            self.connected = true;
        }
    }

    // =========================================================================
    // Channel
    // =========================================================================

    /// Open the socket described by `options`.
    pub(crate) fn dial(&mut self, options: &ConnectOptions) -> Result<()> {
        self.drop_channel();
        let timeout = options.connect_timeout;

        let transport = match options.unix_socket() {
            #[cfg(unix)]
            Some(path) => {
                self.host_info = "Localhost via UNIX socket".to_string();
                Transport::connect_unix(path).map_err(|e| {
                    self.fail_client(
                        CR_CONNECTION_ERROR,
                        Some(format!("'{}': {e}", path.display())),
                    )
                })?
            }
            _ => {
                let host = options.host_or_default();
                let port = options.port_or_default();
                self.host_info = format!("{host} via TCP/IP");
                Transport::connect_tcp(host, port, timeout).map_err(|e| match e {
                    CodecError::UnknownHost(_) => {
                        self.fail_client(CR_UNKNOWN_HOST, Some(format!("'{host}'")))
                    }
                    e => self.fail_client(CR_CONN_HOST_ERROR, Some(format!("'{host}:{port}': {e}"))),
                })?
            }
        };

        let channel = Channel::new(transport);
        if let Err(e) = channel.set_timeouts(timeout) {
            return Err(self.fail_codec(e, Direction::Write));
        }
        tracing::debug!(host_info = self.host_info.as_str(), "socket connected");
        self.channel = Some(channel);
        Ok(())
    }

    pub(crate) fn drop_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.shutdown();
        }
        self.wire = WireState::Ready;
    }

    /// Put the socket into blocking or non-blocking mode.
    pub(crate) fn set_mode(&mut self, nonblocking: bool) -> Result<()> {
        let result = match self.channel.as_mut() {
            Some(channel) => channel.set_nonblocking(nonblocking),
            None => return Err(self.fail_client(CR_SERVER_GONE_ERROR, None)),
        };
        result.map_err(|e| self.fail_codec(e, Direction::Write))
    }

    /// Direction the last pending I/O was waiting on.
    pub(crate) fn interest(&self) -> Interest {
        self.channel
            .as_ref()
            .map_or(Interest::Read, Channel::interest)
    }

    /// Reset packet numbering and queue a command payload.
    pub(crate) fn start_command(&mut self, payload: Bytes) -> Result<()> {
        self.clear_error();
        let Some(channel) = self.channel.as_mut() else {
            return Err(self.fail_client(CR_SERVER_GONE_ERROR, None));
        };
        channel.reset_sequence();
        if let Err(e) = channel.send(payload) {
            return Err(self.fail_codec(e, Direction::Write));
        }
        Ok(())
    }

    /// Queue a payload that continues the current exchange.
    pub(crate) fn send(&mut self, payload: Bytes) -> Result<()> {
        let Some(channel) = self.channel.as_mut() else {
            return Err(self.fail_client(CR_SERVER_GONE_ERROR, None));
        };
        if let Err(e) = channel.send(payload) {
            return Err(self.fail_codec(e, Direction::Write));
        }
        Ok(())
    }

    pub(crate) fn poll_flush(&mut self) -> Result<Poll<()>> {
        let result = match self.channel.as_mut() {
            Some(channel) => channel.poll_flush(),
            None => return Err(self.fail_client(CR_SERVER_GONE_ERROR, None)),
        };
        result.map_err(|e| self.fail_codec(e, Direction::Write))
    }

    pub(crate) fn poll_recv(&mut self) -> Result<Poll<Bytes>> {
        let result = match self.channel.as_mut() {
            Some(channel) => channel.poll_recv(),
            None => return Err(self.fail_client(CR_SERVER_GONE_ERROR, None)),
        };
        result.map_err(|e| self.fail_codec(e, Direction::Read))
    }

    /// Run `step` with the socket in blocking mode.
    ///
    /// A blocking socket only reports `Pending` when its timeout expires.
    pub(crate) fn block_on<T>(
        &mut self,
        mut step: impl FnMut(&mut Self) -> Result<Poll<T>>,
    ) -> Result<T> {
        self.set_mode(false)?;
        match step(self)? {
            Poll::Ready(value) => Ok(value),
            Poll::Pending => Err(self.fail_timeout()),
        }
    }

    pub(crate) fn recv_blocking(&mut self) -> Result<Bytes> {
        self.block_on(Self::poll_recv)
    }

    pub(crate) fn flush_blocking(&mut self) -> Result<()> {
        self.block_on(Self::poll_flush)
    }

    // =========================================================================
    // Responses
    // =========================================================================

    pub(crate) fn apply_ok(&mut self, ok: OkPacket) {
        self.affected_rows = ok.affected_rows;
        self.insert_id = ok.last_insert_id;
        self.status = ok.status;
        self.warnings = ok.warnings;
        self.info = ok.info;
        self.field_count = 0;
        self.wire = WireState::Ready;
    }

    pub(crate) fn apply_eof(&mut self, eof: EofPacket) {
        self.warnings = eof.warnings;
        self.status = eof.status;
    }

    /// A result-set header announcing `columns` columns was read.
    pub(crate) fn begin_result(&mut self, columns: u64) {
        self.field_count = columns;
        self.affected_rows = 0;
        self.insert_id = 0;
        self.info.clear();
        self.wire = WireState::ResultPending { columns };
    }

    /// Handle the EOF or ERR that ends a row sequence.
    ///
    /// Returns `Ok(true)` at EOF and `Ok(false)` when `payload` is a row.
    pub(crate) fn end_of_rows(&mut self, payload: &Bytes) -> Result<bool> {
        if is_eof_packet(payload) {
            let eof = EofPacket::decode(payload.clone()).map_err(|e| self.fail_protocol(e))?;
            self.apply_eof(eof);
            self.wire = WireState::Ready;
            self.mark_alive();
            return Ok(true);
        }
        if is_err_packet(payload) {
            self.wire = WireState::Ready;
            self.status.remove(StatusFlags::MORE_RESULTS_EXISTS);
            let err = ErrPacket::decode(payload.clone()).map_err(|e| self.fail_protocol(e))?;
            return Err(self.fail_server(err));
        }
        Ok(false)
    }

    /// Read the column definitions and the EOF that follows them.
    pub(crate) fn read_columns(&mut self, count: u64) -> Result<Vec<ColumnDefinition>> {
        let mut columns = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        for _ in 0..count {
            let payload = self.recv_blocking()?;
            if is_err_packet(&payload) {
                self.wire = WireState::Ready;
                let err = ErrPacket::decode(payload).map_err(|e| self.fail_protocol(e))?;
                return Err(self.fail_server(err));
            }
            let column = ColumnDefinition::decode(payload).map_err(|e| self.fail_protocol(e))?;
            columns.push(column);
        }

        let payload = self.recv_blocking()?;
        if !is_eof_packet(&payload) {
            return Err(self.fail_protocol(ProtocolError::MalformedPacket(
                "missing EOF after column definitions",
            )));
        }
        let eof = EofPacket::decode(payload).map_err(|e| self.fail_protocol(e))?;
        self.apply_eof(eof);
        Ok(columns)
    }

    /// Read rows until EOF, keeping the raw packets.
    pub(crate) fn read_all_rows(&mut self) -> Result<Vec<Bytes>> {
        let mut rows = Vec::new();
        loop {
            let payload = self.recv_blocking()?;
            if self.end_of_rows(&payload)? {
                return Ok(rows);
            }
            rows.push(payload);
        }
    }

    /// Resolve a character set name for this session.
    pub(crate) fn lookup_charset(&mut self, name: &str) -> Result<&'static Charset> {
        match Charset::by_name(name) {
            Some(charset) => Ok(charset),
            None => Err(self.fail_client(CR_CANT_READ_CHARSET, Some(name.to_string()))),
        }
    }

    pub(crate) fn allocate_stream_id(&mut self) -> u64 {
        self.next_stream_id += 1;
        self.next_stream_id
    }
}

impl ErrorSource for SessionInner {
    fn last_error_code(&self) -> u16 {
        self.diag.code
    }

    fn last_error_message(&self) -> &str {
        &self.diag.message
    }

    fn mark_disconnected(&mut self) {
        if self.connected {
            tracing::debug!("connection marked lost");
        }
        self.connected = false;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Category;
    use crate::runtime;

    #[test]
    fn test_initial_state() {
        let inner = SessionInner::new();
        assert_eq!(inner.state(), SessionState::Unopened);
        assert_eq!(inner.charset.name, "latin1");
        assert_eq!(inner.diag.sqlstate, "00000");
        assert!(inner.check_open().is_err());
    }

    #[test]
    fn test_fail_client_records_and_classifies() {
        runtime::ensure_initialized().unwrap();
        let mut inner = SessionInner::new();
        inner.open = true;
        inner.connected = true;

        let err = inner.fail_client(CR_SERVER_LOST, Some("timed out".into()));
        assert_eq!(err.code(), 2013);
        assert_eq!(
            err.message(),
            "Lost connection to MySQL server during query (timed out)"
        );
        assert_eq!(inner.diag.sqlstate, "08S01");
        assert_eq!(inner.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_server_error_keeps_session_alive() {
        runtime::ensure_initialized().unwrap();
        let mut inner = SessionInner::new();
        inner.open = true;
        inner.connected = false;

        let err = inner.fail_server(ErrPacket {
            code: 1064,
            sqlstate: "42000".into(),
            message: "You have an error in your SQL syntax".into(),
        });
        assert_eq!(err.category(), Category::ProgrammingError);
        assert_eq!(inner.diag.sqlstate, "42000");
        assert_eq!(inner.state(), SessionState::Connected);
    }

    #[test]
    fn test_missing_channel_reports_gone_away() {
        runtime::ensure_initialized().unwrap();
        let mut inner = SessionInner::new();
        inner.open = true;
        inner.connected = true;

        let err = inner.start_command(Bytes::from_static(b"\x0e")).unwrap_err();
        assert_eq!(err.code(), 2006);
        assert!(err.is_connection_lost());
        assert!(!inner.connected);
    }

    #[test]
    fn test_commands_out_of_sync() {
        runtime::ensure_initialized().unwrap();
        let mut inner = SessionInner::new();
        inner.open = true;
        inner.connected = true;
        inner.wire = WireState::ResultPending { columns: 1 };

        let err = inner.check_command().unwrap_err();
        assert_eq!(err.code(), 2014);
        assert_eq!(err.category(), Category::OperationalError);
    }
}
