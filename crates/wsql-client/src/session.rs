//! The connection session.
//!
//! A [`Session`] owns one server connection. Every blocking operation runs
//! the same resumable machines as the non-blocking API, with the socket
//! switched to blocking mode for the duration of the call.

use std::sync::Arc;

use bytes::Bytes;
use mysql_protocol::codes::CR_COMMANDS_OUT_OF_SYNC;
use mysql_protocol::command::{self, Command, ServerOption};
use mysql_protocol::escape::{escape_string, quote_string};
use mysql_protocol::row::{decode_text_row, text_row_lengths};
use mysql_protocol::{CapabilityFlags, Charset, StatusFlags};
use parking_lot::Mutex;

use crate::config::ConnectOptions;
use crate::error::{Error, Result};
use crate::field::Field;
use crate::inner::SessionInner;
use crate::ops::{ChangeUserOp, CommandOp, ConnectOp, DiscardOp, Expect, QueryOp};
use crate::option_file;
use crate::result::ResultStream;
use crate::runtime;
use crate::state::{SessionState, WireState};

/// A connection to a MySQL server.
///
/// Created empty, populated by one [`connect`](Self::connect) (or
/// [`begin_connect`](Self::begin_connect)), and closed by
/// [`close`](Self::close) or drop. A closed session cannot be reopened.
///
/// A session is `Send` but is meant to be driven from one thread at a time.
#[derive(Debug)]
pub struct Session {
    pub(crate) inner: Arc<Mutex<SessionInner>>,
}

/// One row of `SHOW WARNINGS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerWarning {
    /// `Note`, `Warning` or `Error`.
    pub level: String,
    /// Server error code.
    pub code: u16,
    /// Message text.
    pub message: String,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// An unopened session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner::new())),
        }
    }

    /// Create a session and connect it.
    pub fn open(options: &ConnectOptions) -> Result<Self> {
        let mut session = Self::new();
        session.connect(options)?;
        Ok(session)
    }

    /// Connect to the server described by `options`.
    ///
    /// On failure the session stays unopened and may be connected again.
    pub fn connect(&mut self, options: &ConnectOptions) -> Result<()> {
        let mut inner = self.inner.lock();
        let (resolved, charset) = prepare_connect(&mut inner, options)?;
        handshake(&mut inner, resolved, charset)
    }

    // =========================================================================
    // Statements and results
    // =========================================================================

    /// Send a statement and read its first response.
    ///
    /// When the statement produced a result set, fetch it with
    /// [`get_result`](Self::get_result) before issuing another command.
    pub fn query(&mut self, sql: impl AsRef<[u8]>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_command()?;
        let mut op = QueryOp::start(&mut inner, sql.as_ref())?;
        inner.block_on(|inner| op.poll(inner))
    }

    /// Retrieve the result set of the last statement.
    ///
    /// With `use_result == false` every row is read now and the result is
    /// buffered in memory. With `use_result == true` rows stay on the wire
    /// and are read one per fetch; no other command may be sent until the
    /// result is drained or freed.
    ///
    /// Returns `None` when the statement produced no result set.
    pub fn get_result(&mut self, use_result: bool) -> Result<Option<ResultStream>> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        inner.check_idle()?;
        let columns = match inner.wire {
            WireState::Ready if inner.field_count == 0 => return Ok(None),
            WireState::ResultPending { columns } => columns,
            WireState::Ready | WireState::Streaming { .. } => {
                return Err(inner.fail_client(CR_COMMANDS_OUT_OF_SYNC, None));
            }
        };

        let definitions = match inner.read_columns(columns) {
            Ok(definitions) => definitions,
            Err(e) => {
                if inner.wire.is_busy() {
                    inner.drop_channel();
                }
                return Err(e);
            }
        };
        let count = definitions.len();

        if use_result {
            let id = inner.allocate_stream_id();
            inner.wire = WireState::Streaming { id };
            let fields: Arc<[Field]> = definitions.into_iter().map(|d| Field::new(d, 0)).collect();
            tracing::debug!(columns = count, "streaming result");
            return Ok(Some(ResultStream::streamed(Arc::clone(&self.inner), fields, id)));
        }

        let rows = match inner.read_all_rows() {
            Ok(rows) => rows,
            Err(e) => {
                if inner.wire.is_busy() {
                    inner.drop_channel();
                }
                return Err(e);
            }
        };
        let mut max_lengths = vec![0u64; count];
        for row in &rows {
            let lengths = text_row_lengths(row, count).map_err(|e| inner.fail_protocol(e))?;
            for (max, len) in max_lengths.iter_mut().zip(lengths) {
                *max = (*max).max(len.unwrap_or(0) as u64);
            }
        }
        inner.affected_rows = rows.len() as u64;
        let fields: Arc<[Field]> = definitions
            .into_iter()
            .zip(max_lengths)
            .map(|(d, max)| Field::new(d, max))
            .collect();
        tracing::debug!(columns = count, rows = rows.len(), "stored result");
        Ok(Some(ResultStream::buffered(Arc::clone(&self.inner), fields, rows)))
    }

    /// Read the next result of a multi-result query.
    ///
    /// Returns `false` when the server reported no further results.
    pub fn next_result(&mut self) -> Result<bool> {
        let mut inner = self.inner.lock();
        inner.check_command()?;
        if !inner.status.contains(StatusFlags::MORE_RESULTS_EXISTS) {
            return Ok(false);
        }
        let mut op = QueryOp::next_result(&mut inner);
        inner.block_on(|inner| op.poll(inner))?;
        Ok(true)
    }

    /// Run `SHOW WARNINGS` for the last statement.
    pub fn show_warnings(&mut self) -> Result<Vec<ServerWarning>> {
        let mut inner = self.inner.lock();
        inner.check_command()?;
        let mut op = QueryOp::start(&mut inner, b"SHOW WARNINGS")?;
        inner.block_on(|inner| op.poll(inner))?;
        let WireState::ResultPending { columns } = inner.wire else {
            return Ok(Vec::new());
        };
        inner.read_columns(columns)?;
        let rows = inner.read_all_rows()?;
        inner.field_count = 0;

        let mut warnings = Vec::with_capacity(rows.len());
        for row in &rows {
            let values = decode_text_row(row, columns as usize).map_err(|e| inner.fail_protocol(e))?;
            let text = |index: usize| {
                values
                    .get(index)
                    .and_then(Option::as_ref)
                    .map(|v| String::from_utf8_lossy(v).into_owned())
                    .unwrap_or_default()
            };
            warnings.push(ServerWarning {
                level: text(0),
                code: text(1).parse().unwrap_or(0),
                message: text(2),
            });
        }
        Ok(warnings)
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Change the default database (`COM_INIT_DB`).
    pub fn select_db(&mut self, database: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        run_command(
            &mut inner,
            Command::InitDb,
            command::encode_init_db(database),
            Expect::Ok,
        )?;
        inner.options.database = Some(database.to_string());
        Ok(())
    }

    /// Turn autocommit on or off.
    pub fn set_autocommit(&mut self, enabled: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let sql: &[u8] = if enabled {
            b"SET AUTOCOMMIT=1"
        } else {
            b"SET AUTOCOMMIT=0"
        };
        run_discarded(&mut inner, sql)?;
        inner.autocommit = enabled;
        Ok(())
    }

    /// Whether autocommit is believed to be on.
    #[must_use]
    pub fn autocommit(&self) -> bool {
        self.inner.lock().autocommit
    }

    /// Commit the current transaction.
    pub fn commit(&mut self) -> Result<()> {
        run_discarded(&mut self.inner.lock(), b"COMMIT")
    }

    /// Roll back the current transaction.
    pub fn rollback(&mut self) -> Result<()> {
        run_discarded(&mut self.inner.lock(), b"ROLLBACK")
    }

    /// Check that the server is alive.
    ///
    /// `Some(flag)` changes the auto-reconnect policy for this and all later
    /// pings. With the policy on, a ping that finds the connection lost
    /// redials with the stored options and pings again.
    ///
    /// Some server versions roll back an open transaction when the client
    /// reconnects; enable reconnect only with autocommit on.
    pub fn ping(&mut self, reconnect: Option<bool>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        inner.check_idle()?;
        if let Some(flag) = reconnect {
            inner.reconnect = flag;
        }
        match ping_once(&mut inner) {
            Err(e) if e.is_connection_lost() && inner.reconnect => {
                tracing::debug!(code = e.code(), "connection lost; reconnecting");
                let options = inner.options.clone();
                let charset = inner.charset;
                handshake(&mut inner, options, charset)?;
                ping_once(&mut inner)
            }
            result => result,
        }
    }

    /// Re-authenticate as another user (`COM_CHANGE_USER`).
    pub fn change_user(&mut self, user: &str, password: &str, database: Option<&str>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_command()?;
        let mut op = ChangeUserOp::start(&mut inner, user, password, database)?;
        inner.block_on(|inner| op.poll(inner))?;
        inner.options.user = Some(user.to_string());
        inner.options.password = Some(password.to_string());
        inner.options.database = database.map(str::to_string);
        Ok(())
    }

    /// Set the session `sql_mode`.
    pub fn set_sql_mode(&mut self, mode: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let escaped = escape_string(inner.charset, no_backslash_escapes(&inner), mode.as_bytes());
        let mut sql = b"SET SESSION sql_mode='".to_vec();
        sql.extend_from_slice(&escaped);
        sql.push(b'\'');
        run_discarded(&mut inner, &sql)
    }

    /// Toggle a server option (`COM_SET_OPTION`).
    pub fn set_server_option(&mut self, option: ServerOption) -> Result<()> {
        run_command(
            &mut self.inner.lock(),
            Command::SetOption,
            command::encode_set_option(option),
            Expect::Ok,
        )
        .map(drop)
    }

    /// Ask the server to kill connection `thread_id`.
    pub fn kill(&mut self, thread_id: u32) -> Result<()> {
        run_command(
            &mut self.inner.lock(),
            Command::ProcessKill,
            command::encode_process_kill(thread_id),
            Expect::Ok,
        )
        .map(drop)
    }

    /// Ask the server to shut down.
    pub fn shutdown(&mut self) -> Result<()> {
        run_command(
            &mut self.inner.lock(),
            Command::Shutdown,
            command::encode_shutdown(),
            Expect::Ok,
        )
        .map(drop)
    }

    /// Ask the server to write debug information to its log.
    pub fn dump_debug_info(&mut self) -> Result<()> {
        run_command(
            &mut self.inner.lock(),
            Command::Debug,
            command::encode_simple(Command::Debug),
            Expect::Ok,
        )
        .map(drop)
    }

    /// Server statistics string (`COM_STATISTICS`).
    pub fn stat(&mut self) -> Result<String> {
        let payload = run_command(
            &mut self.inner.lock(),
            Command::Statistics,
            command::encode_simple(Command::Statistics),
            Expect::Text,
        )?;
        Ok(payload
            .map(|p| String::from_utf8_lossy(&p).into_owned())
            .unwrap_or_default())
    }

    // =========================================================================
    // Character set and escaping
    // =========================================================================

    /// Name of the connection character set.
    #[must_use]
    pub fn charset(&self) -> &'static str {
        self.inner.lock().charset.name
    }

    /// Details of the connection character set.
    #[must_use]
    pub fn charset_info(&self) -> &'static Charset {
        self.inner.lock().charset
    }

    /// Switch the connection character set with `SET NAMES`.
    pub fn set_charset(&mut self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        let charset = inner.lookup_charset(name)?;
        if charset.name == inner.charset.name {
            return Ok(());
        }
        run_discarded(&mut inner, format!("SET NAMES {}", charset.name).as_bytes())?;
        inner.charset = charset;
        Ok(())
    }

    /// Escape `input` for use inside a quoted SQL string.
    ///
    /// Uses the connection character set, or latin1 before connect.
    #[must_use]
    pub fn escape(&self, input: &[u8]) -> Vec<u8> {
        let inner = self.inner.lock();
        escape_string(inner.charset, no_backslash_escapes(&inner), input)
    }

    /// Escape `input` and wrap it in single quotes.
    #[must_use]
    pub fn quote(&self, input: &[u8]) -> Vec<u8> {
        let inner = self.inner.lock();
        quote_string(inner.charset, no_backslash_escapes(&inner), input)
    }

    // =========================================================================
    // State and accessors
    // =========================================================================

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().state()
    }

    /// Whether the session is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Whether the last operation saw the server alive.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    /// Whether the session is not open.
    #[must_use]
    pub fn closed(&self) -> bool {
        !self.is_open()
    }

    /// Rows changed by the last statement, or rows in the last stored result.
    #[must_use]
    pub fn affected_rows(&self) -> u64 {
        self.inner.lock().affected_rows
    }

    /// `AUTO_INCREMENT` value generated by the last statement.
    #[must_use]
    pub fn insert_id(&self) -> u64 {
        self.inner.lock().insert_id
    }

    /// Warnings raised by the last statement.
    #[must_use]
    pub fn warning_count(&self) -> u16 {
        self.inner.lock().warnings
    }

    /// Human-readable info from the last OK packet.
    #[must_use]
    pub fn info(&self) -> Option<String> {
        let inner = self.inner.lock();
        (!inner.info.is_empty()).then(|| inner.info.clone())
    }

    /// Columns in the result of the last statement.
    #[must_use]
    pub fn field_count(&self) -> u64 {
        self.inner.lock().field_count
    }

    /// Code of the last error, zero after success.
    #[must_use]
    pub fn errno(&self) -> u16 {
        self.inner.lock().diag.code
    }

    /// Message of the last error.
    #[must_use]
    pub fn error(&self) -> String {
        self.inner.lock().diag.message.clone()
    }

    /// SQLSTATE of the last error.
    #[must_use]
    pub fn sqlstate(&self) -> String {
        self.inner.lock().diag.sqlstate.clone()
    }

    /// Server version string.
    pub fn server_info(&self) -> Result<String> {
        let inner = self.inner.lock();
        inner.check_open()?;
        Ok(inner.server.version.clone())
    }

    /// How the session reached the server.
    pub fn host_info(&self) -> Result<String> {
        let inner = self.inner.lock();
        inner.check_open()?;
        Ok(inner.host_info.clone())
    }

    /// Protocol version from the greeting.
    pub fn proto_info(&self) -> Result<u8> {
        let inner = self.inner.lock();
        inner.check_open()?;
        Ok(inner.server.protocol_version)
    }

    /// Server-side connection id.
    pub fn thread_id(&self) -> Result<u32> {
        let inner = self.inner.lock();
        inner.check_open()?;
        Ok(inner.server.thread_id)
    }

    /// Capabilities announced by the server.
    pub fn server_capabilities(&self) -> Result<CapabilityFlags> {
        let inner = self.inner.lock();
        inner.check_open()?;
        Ok(inner.server.capabilities)
    }

    /// Capabilities negotiated for this connection.
    pub fn client_flag(&self) -> Result<CapabilityFlags> {
        let inner = self.inner.lock();
        inner.check_open()?;
        Ok(inner.client_flags)
    }

    /// Server status flags from the last response.
    pub fn server_status(&self) -> Result<StatusFlags> {
        let inner = self.inner.lock();
        inner.check_open()?;
        Ok(inner.status)
    }

    /// TCP port in use; zero over a unix socket.
    pub fn port(&self) -> Result<u16> {
        let inner = self.inner.lock();
        inner.check_open()?;
        if inner.options.unix_socket().is_some() {
            return Ok(0);
        }
        Ok(inner.options.port_or_default())
    }

    /// Raw socket descriptor, for readiness polling.
    #[cfg(unix)]
    #[must_use]
    pub fn fd(&self) -> Option<std::os::fd::RawFd> {
        self.inner.lock().channel.as_ref().map(wsql_codec::Channel::as_raw_fd)
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Close the connection.
    ///
    /// Sends `COM_QUIT` when possible and releases the socket. Results still
    /// alive become unusable. Closing a session that is not open fails.
    pub fn close(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(Error::programming("closing a closed connection"));
        }
        shut(&mut inner);
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if !inner.closed {
            shut(&mut inner);
        }
    }
}

/// Validate a connect request and resolve its options.
pub(crate) fn prepare_connect(
    inner: &mut SessionInner,
    options: &ConnectOptions,
) -> Result<(ConnectOptions, &'static Charset)> {
    runtime::ensure_initialized()?;
    inner.check_idle()?;
    if inner.closed {
        return Err(Error::programming("the connection is closed"));
    }
    if inner.open {
        return Err(Error::programming("the connection is already open"));
    }
    if options.ssl.as_ref().is_some_and(|ssl| !ssl.is_empty()) {
        return Err(Error::not_supported("client library does not have SSL support"));
    }
    if options.compress == Some(true) {
        return Err(Error::not_supported("client library does not support compression"));
    }
    if options.nonblocking && !cfg!(feature = "nonblocking") {
        return Err(Error::not_supported("The asynchronous operations does not supported."));
    }

    let resolved = option_file::resolve(options)?;
    let charset = match resolved.charset.as_deref() {
        Some(name) => inner.lookup_charset(name)?,
        None => Charset::default_charset(),
    };
    Ok((resolved, charset))
}

fn handshake(inner: &mut SessionInner, options: ConnectOptions, charset: &'static Charset) -> Result<()> {
    inner.dial(&options)?;
    let mut op = ConnectOp::new(options, charset);
    inner.block_on(|inner| op.poll(inner))
}

fn run_command(
    inner: &mut SessionInner,
    command: Command,
    payload: Bytes,
    expect: Expect,
) -> Result<Option<Bytes>> {
    inner.check_command()?;
    let mut op = CommandOp::start(inner, command, payload, expect)?;
    inner.block_on(|inner| op.poll(inner))
}

fn run_discarded(inner: &mut SessionInner, sql: &[u8]) -> Result<()> {
    inner.check_command()?;
    let mut op = DiscardOp::start(inner, sql)?;
    inner.block_on(|inner| op.poll(inner))
}

fn ping_once(inner: &mut SessionInner) -> Result<()> {
    run_command(inner, Command::Ping, command::encode_simple(Command::Ping), Expect::Ok).map(drop)
}

fn no_backslash_escapes(inner: &SessionInner) -> bool {
    inner.status.contains(StatusFlags::NO_BACKSLASH_ESCAPES)
}

fn shut(inner: &mut SessionInner) {
    if let Some(channel) = inner.channel.as_mut() {
        if inner.open {
            channel.reset_sequence();
            if let Err(e) = channel.write_payload(command::encode_simple(Command::Quit)) {
                tracing::debug!(error = %e, "COM_QUIT failed");
            }
        }
    }
    inner.drop_channel();
    let was_open = inner.open;
    inner.open = false;
    inner.connected = false;
    inner.closed = true;
    inner.field_count = 0;
    #[cfg(feature = "nonblocking")]
    {
        inner.async_op = crate::nonblocking::AsyncOp::Idle;
    }
    if was_open {
        tracing::info!(host_info = inner.host_info.as_str(), "connection closed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::SslOptions;
    use crate::error::Category;

    #[test]
    fn test_new_session_is_unopened() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::Unopened);
        assert!(session.closed());
        assert!(!session.is_connected());
        assert_eq!(session.charset(), "latin1");
        assert_eq!(session.errno(), 0);
    }

    #[test]
    fn test_operations_require_open() {
        let mut session = Session::new();
        let err = session.query("SELECT 1").unwrap_err();
        assert_eq!(err.category(), Category::ProgrammingError);
        assert_eq!(err.message(), "the connection is not open");
        assert!(session.ping(None).is_err());
        assert!(session.thread_id().is_err());
    }

    #[test]
    fn test_close_unopened() {
        let mut session = Session::new();
        let err = session.close().unwrap_err();
        assert_eq!(err.category(), Category::ProgrammingError);
        assert_eq!(err.message(), "closing a closed connection");
        assert_eq!(session.state(), SessionState::Unopened);

        let err = session.select_db("test").unwrap_err();
        assert_eq!(err.message(), "the connection is not open");
    }

    #[test]
    fn test_close_twice() {
        let mut session = Session::new();
        {
            let mut inner = session.inner.lock();
            inner.open = true;
            inner.connected = true;
        }
        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);

        let err = session.close().unwrap_err();
        assert_eq!(err.category(), Category::ProgrammingError);
        assert_eq!(err.message(), "closing a closed connection");

        let err = session.select_db("test").unwrap_err();
        assert_eq!(err.message(), "the connection is closed");
    }

    #[test]
    fn test_ssl_is_not_supported() {
        let mut session = Session::new();
        let ssl = SslOptions {
            ca: Some("/etc/ssl/ca.pem".into()),
            ..SslOptions::default()
        };
        let err = session.connect(&ConnectOptions::new().ssl(ssl)).unwrap_err();
        assert_eq!(err.category(), Category::NotSupportedError);
        assert_eq!(err.message(), "client library does not have SSL support");
        assert_eq!(session.state(), SessionState::Unopened);
    }

    #[test]
    fn test_compress_is_not_supported() {
        let mut session = Session::new();
        let err = session.connect(&ConnectOptions::new().compress(true)).unwrap_err();
        assert_eq!(err.category(), Category::NotSupportedError);
    }

    #[test]
    fn test_escape_before_connect_uses_latin1() {
        let session = Session::new();
        assert_eq!(session.escape(b"it's"), b"it\\'s".to_vec());
        assert_eq!(session.quote(b"a\nb"), b"'a\\nb'".to_vec());
    }
}
