//! Mock MySQL server for unit and integration testing.
//!
//! Speaks enough of the classic protocol (handshake v10, native-password
//! authentication, text result sets with EOF markers) to drive a client
//! through its whole surface without a real server.
//!
//! The server runs a single-threaded tokio runtime on a dedicated thread,
//! so it can back blocking clients in plain `#[test]` functions.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wsql_testing::mock_server::{MockColumn, MockMySqlServer, MockResponse};
//!
//! let server = MockMySqlServer::builder()
//!     .with_user("app", "secret")
//!     .with_response(
//!         "SELECT 1",
//!         MockResponse::rows(vec![MockColumn::long("1")], vec![vec![Some("1")]]),
//!     )
//!     .build()
//!     .unwrap();
//!
//! // Connect a client to server.host() / server.port() ...
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mysql_protocol::codec::{
    read_bytes, read_lenenc_bytes, read_null_terminated, read_null_terminated_string, read_u8, read_u32,
    write_lenenc_int, write_null_terminated,
};
use mysql_protocol::codes;
use mysql_protocol::handshake::{NATIVE_PASSWORD_PLUGIN, PROTOCOL_VERSION};
use mysql_protocol::row::encode_text_row;
use mysql_protocol::{
    CapabilityFlags, ColumnDefinition, ColumnFlags, Command, FieldType, MAX_PAYLOAD_SIZE, PacketHeader,
    StatusFlags, scramble_native_password,
};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, broadcast};

/// Server version announced in the greeting unless overridden.
pub const DEFAULT_SERVER_VERSION: &str = "8.0.36-wsql-mock";

/// Collation announced in the greeting (`latin1_swedish_ci`).
const GREETING_COLLATION: u8 = 8;

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed client packet.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server stopped.
    #[error("server stopped")]
    Stopped,
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// A canned reply to one `COM_QUERY`.
#[derive(Clone)]
pub enum MockResponse {
    /// OK packet.
    Ok {
        /// Rows affected.
        affected_rows: u64,
        /// Last `AUTO_INCREMENT` value.
        last_insert_id: u64,
        /// Warning count.
        warnings: u16,
        /// Human-readable info string.
        info: String,
    },
    /// ERR packet.
    Error {
        /// Error code.
        code: u16,
        /// Five-character SQLSTATE.
        sqlstate: String,
        /// Message.
        message: String,
    },
    /// Text result set.
    Rows {
        /// Column definitions.
        columns: Vec<MockColumn>,
        /// Row values, `None` is SQL NULL.
        rows: Vec<Vec<Option<Bytes>>>,
        /// Warning count carried by the final EOF.
        warnings: u16,
    },
    /// Result set whose row stream ends in an ERR packet instead of EOF.
    RowsThenError {
        /// Column definitions.
        columns: Vec<MockColumn>,
        /// Rows sent before the error.
        rows: Vec<Vec<Option<Bytes>>>,
        /// Error code.
        code: u16,
        /// Message.
        message: String,
    },
    /// Several results for a multi-statement query.
    Multi(Vec<MockResponse>),
    /// `LOCAL INFILE` request for the named file; answered with OK once
    /// the client has sent the file, or ERR 1148 when it sent nothing.
    LocalInfile(String),
    /// Reply after a pause.
    Delayed(Duration, Box<MockResponse>),
    /// Drop the connection without replying.
    Disconnect,
    /// Compute the reply from the SQL text.
    Custom(Arc<dyn Fn(&str) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok { affected_rows, .. } => f
                .debug_struct("Ok")
                .field("affected_rows", affected_rows)
                .finish_non_exhaustive(),
            Self::Error { code, message, .. } => f
                .debug_struct("Error")
                .field("code", code)
                .field("message", message)
                .finish_non_exhaustive(),
            Self::Rows { columns, rows, .. } => f
                .debug_struct("Rows")
                .field("columns", &columns.len())
                .field("rows", &rows.len())
                .finish_non_exhaustive(),
            Self::RowsThenError { rows, code, .. } => f
                .debug_struct("RowsThenError")
                .field("rows", &rows.len())
                .field("code", code)
                .finish_non_exhaustive(),
            Self::Multi(parts) => f.debug_tuple("Multi").field(&parts.len()).finish(),
            Self::LocalInfile(name) => f.debug_tuple("LocalInfile").field(name).finish(),
            Self::Delayed(delay, inner) => f.debug_tuple("Delayed").field(delay).field(inner).finish(),
            Self::Disconnect => write!(f, "Disconnect"),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

impl MockResponse {
    /// Plain OK with nothing affected.
    #[must_use]
    pub fn ok() -> Self {
        Self::affected(0)
    }

    /// OK reporting `rows` affected rows.
    #[must_use]
    pub fn affected(rows: u64) -> Self {
        Self::Ok {
            affected_rows: rows,
            last_insert_id: 0,
            warnings: 0,
            info: String::new(),
        }
    }

    /// OK reporting one inserted row with the given id.
    #[must_use]
    pub fn inserted(last_insert_id: u64) -> Self {
        Self::Ok {
            affected_rows: 1,
            last_insert_id,
            warnings: 0,
            info: String::new(),
        }
    }

    /// ERR with SQLSTATE `HY000`.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self::error_with_state(code, "HY000", message)
    }

    /// ERR with an explicit SQLSTATE.
    #[must_use]
    pub fn error_with_state(code: u16, sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            sqlstate: sqlstate.into(),
            message: message.into(),
        }
    }

    /// Text result set from string values.
    #[must_use]
    pub fn rows(columns: Vec<MockColumn>, rows: Vec<Vec<Option<&str>>>) -> Self {
        Self::Rows {
            columns,
            rows: owned_rows(rows),
            warnings: 0,
        }
    }

    /// Text result set from raw byte values.
    #[must_use]
    pub fn raw_rows(columns: Vec<MockColumn>, rows: Vec<Vec<Option<Bytes>>>) -> Self {
        Self::Rows {
            columns,
            rows,
            warnings: 0,
        }
    }

    /// Result set that fails after `rows`.
    #[must_use]
    pub fn rows_then_error(
        columns: Vec<MockColumn>,
        rows: Vec<Vec<Option<&str>>>,
        code: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::RowsThenError {
            columns,
            rows: owned_rows(rows),
            code,
            message: message.into(),
        }
    }

    /// Set the warning count of an OK or result set.
    #[must_use]
    pub fn with_warnings(mut self, count: u16) -> Self {
        match &mut self {
            Self::Ok { warnings, .. } | Self::Rows { warnings, .. } => *warnings = count,
            _ => {}
        }
        self
    }

    /// Set the info string of an OK.
    #[must_use]
    pub fn with_info(mut self, text: impl Into<String>) -> Self {
        if let Self::Ok { info, .. } = &mut self {
            *info = text.into();
        }
        self
    }

    /// Delay this reply.
    #[must_use]
    pub fn delayed(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }

    /// Reply computed by `f`.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str) -> MockResponse + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }
}

fn owned_rows(rows: Vec<Vec<Option<&str>>>) -> Vec<Vec<Option<Bytes>>> {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|value| value.map(|v| Bytes::copy_from_slice(v.as_bytes())))
                .collect()
        })
        .collect()
}

/// Mock column definition.
#[derive(Debug, Clone)]
pub struct MockColumn {
    /// Column alias.
    pub name: String,
    /// Table alias.
    pub table: String,
    /// Column type.
    pub field_type: FieldType,
    /// Declared display width.
    pub length: u32,
    /// Definition flags.
    pub flags: ColumnFlags,
    /// Decimal digits.
    pub decimals: u8,
    /// Collation id.
    pub charset: u16,
}

impl MockColumn {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, field_type: FieldType, length: u32) -> Self {
        Self {
            name: name.into(),
            table: String::new(),
            field_type,
            length,
            flags: ColumnFlags::empty(),
            decimals: 0,
            charset: 45,
        }
    }

    /// INT column.
    pub fn long(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Long, 11).binary()
    }

    /// BIGINT column.
    pub fn longlong(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::LongLong, 20).binary()
    }

    /// VARCHAR column of `chars` utf8mb4 characters.
    pub fn varchar(name: impl Into<String>, chars: u32) -> Self {
        Self::new(name, FieldType::VarString, chars * 4)
    }

    /// DECIMAL(precision, scale) column.
    pub fn decimal(name: impl Into<String>, precision: u32, scale: u8) -> Self {
        let mut column = Self::new(name, FieldType::NewDecimal, precision + 2).binary();
        column.decimals = scale;
        column
    }

    /// BLOB column.
    pub fn blob(name: impl Into<String>) -> Self {
        let mut column = Self::new(name, FieldType::Blob, 65_535).binary();
        column.flags |= ColumnFlags::BLOB;
        column
    }

    /// Set the table alias.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Mark the column `NOT NULL`.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.flags |= ColumnFlags::NOT_NULL;
        self
    }

    /// Add definition flags.
    #[must_use]
    pub fn with_flags(mut self, flags: ColumnFlags) -> Self {
        self.flags |= flags;
        self
    }

    fn binary(mut self) -> Self {
        self.charset = 63;
        self.flags |= ColumnFlags::BINARY;
        self
    }

    fn definition(&self) -> ColumnDefinition {
        ColumnDefinition {
            catalog: "def".to_string(),
            schema: String::new(),
            table: self.table.clone(),
            org_table: self.table.clone(),
            name: self.name.clone(),
            org_name: self.name.clone(),
            character_set: self.charset,
            column_length: self.length,
            column_type: self.field_type as u8,
            flags: self.flags,
            decimals: self.decimals,
        }
    }
}

/// Mock server configuration.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Server version string for the greeting.
    pub server_version: String,
    /// Capabilities offered in the greeting.
    pub capabilities: CapabilityFlags,
    /// Accepted accounts; empty accepts any user and password.
    pub users: HashMap<String, String>,
    /// Known databases; empty accepts any name.
    pub databases: HashSet<String>,
    /// Plugin to switch every login to.
    pub auth_switch: Option<String>,
    /// Reply to the connection with this ERR instead of a greeting.
    pub greeting_error: Option<(u16, String)>,
    /// Pause before the greeting.
    pub greeting_delay: Option<Duration>,
    /// Per-statement replies, keyed by trimmed SQL.
    pub responses: HashMap<String, MockResponse>,
    /// Reply for unknown statements.
    pub default_response: MockResponse,
    /// Text returned by `COM_STATISTICS`.
    pub statistics: String,
    /// Reply `SHOW WARNINGS` with these rows: (level, code, message).
    pub warnings: Vec<(String, u16, String)>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            server_version: DEFAULT_SERVER_VERSION.to_string(),
            capabilities: default_capabilities(),
            users: HashMap::new(),
            databases: HashSet::new(),
            auth_switch: None,
            greeting_error: None,
            greeting_delay: None,
            responses: HashMap::new(),
            default_response: MockResponse::ok(),
            statistics: "Uptime: 42  Threads: 1  Questions: 7  Slow queries: 0  Opens: 12  \
                         Flush tables: 3  Open tables: 5  Queries per second avg: 0.166"
                .to_string(),
            warnings: Vec::new(),
        }
    }
}

fn default_capabilities() -> CapabilityFlags {
    CapabilityFlags::LONG_PASSWORD
        | CapabilityFlags::FOUND_ROWS
        | CapabilityFlags::LONG_FLAG
        | CapabilityFlags::CONNECT_WITH_DB
        | CapabilityFlags::LOCAL_FILES
        | CapabilityFlags::PROTOCOL_41
        | CapabilityFlags::TRANSACTIONS
        | CapabilityFlags::SECURE_CONNECTION
        | CapabilityFlags::MULTI_STATEMENTS
        | CapabilityFlags::MULTI_RESULTS
        | CapabilityFlags::PLUGIN_AUTH
        | CapabilityFlags::PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CapabilityFlags::DEPRECATE_EOF
}

/// Builder for a mock server.
#[derive(Debug, Default)]
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to `sql` (compared after trimming) with `response`.
    #[must_use]
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.config
            .responses
            .insert(sql.into().trim().to_string(), response);
        self
    }

    /// Reply to unknown statements with `response`.
    #[must_use]
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = response;
        self
    }

    /// Announce `version` in the greeting.
    #[must_use]
    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.config.server_version = version.into();
        self
    }

    /// Accept `user` with `password`; once any user is added, others are refused.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.users.insert(user.into(), password.into());
        self
    }

    /// Restrict `COM_INIT_DB` and login databases to `names`.
    #[must_use]
    pub fn with_databases<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.databases.extend(names.into_iter().map(Into::into));
        self
    }

    /// Ask every login to switch to `plugin`.
    #[must_use]
    pub fn with_auth_switch(mut self, plugin: impl Into<String>) -> Self {
        self.config.auth_switch = Some(plugin.into());
        self
    }

    /// Replace the offered capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilityFlags) -> Self {
        self.config.capabilities = capabilities;
        self
    }

    /// Refuse every connection with an ERR greeting.
    #[must_use]
    pub fn with_greeting_error(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting_error = Some((code, message.into()));
        self
    }

    /// Pause before sending the greeting.
    #[must_use]
    pub fn with_greeting_delay(mut self, delay: Duration) -> Self {
        self.config.greeting_delay = Some(delay);
        self
    }

    /// Rows returned by `SHOW WARNINGS`.
    #[must_use]
    pub fn with_warning(mut self, level: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        self.config.warnings.push((level.into(), code, message.into()));
        self
    }

    /// Start the server.
    pub fn build(self) -> Result<MockMySqlServer> {
        MockMySqlServer::start(self.config)
    }
}

/// State shared between the server handle and its connections.
#[derive(Debug)]
struct Shared {
    config: MockServerConfig,
    active: AtomicUsize,
    accepted: AtomicUsize,
    next_thread_id: AtomicU32,
    queries: Mutex<Vec<String>>,
    uploads: Mutex<Vec<Bytes>>,
    connections: Mutex<HashMap<u32, Arc<Notify>>>,
}

/// An in-process MySQL server.
///
/// Dropping the handle stops the server and closes its connections.
#[derive(Debug)]
pub struct MockMySqlServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl MockMySqlServer {
    /// Start building a server.
    #[must_use]
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start a server with `config` on an ephemeral localhost port.
    pub fn start(config: MockServerConfig) -> Result<Self> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let shared = Arc::new(Shared {
            config,
            active: AtomicUsize::new(0),
            accepted: AtomicUsize::new(0),
            next_thread_id: AtomicU32::new(0),
            queries: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            connections: Mutex::new(HashMap::new()),
        });

        let mut shutdown_rx = shutdown_tx.subscribe();
        let accept_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("wsql-mock-server".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            tracing::error!(error = %e, "mock server listener setup failed");
                            return;
                        }
                    };
                    loop {
                        tokio::select! {
                            accepted = listener.accept() => {
                                match accepted {
                                    Ok((stream, peer)) => {
                                        tracing::debug!(%peer, "mock server accepted connection");
                                        let shared = Arc::clone(&accept_shared);
                                        tokio::spawn(async move {
                                            if let Err(e) = handle_connection(stream, shared).await {
                                                tracing::debug!(error = %e, "mock connection ended with error");
                                            }
                                        });
                                    }
                                    Err(e) => {
                                        tracing::error!(error = %e, "mock server accept failed");
                                    }
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                tracing::debug!("mock server shutting down");
                                break;
                            }
                        }
                    }
                });
            })?;

        tracing::debug!(%addr, "mock server started");
        Ok(Self {
            addr,
            shutdown_tx,
            shared,
            thread: Some(thread),
        })
    }

    /// Get the server's address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the host to connect to.
    #[must_use]
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port to connect to.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of currently open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Number of connections accepted since start.
    #[must_use]
    pub fn accepted_count(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Every `COM_QUERY` received so far, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.shared.queries.lock().clone()
    }

    /// Contents of every `LOCAL INFILE` upload received so far.
    #[must_use]
    pub fn uploads(&self) -> Vec<Bytes> {
        self.shared.uploads.lock().clone()
    }

    /// Close every open connection, as a server restart would, and wait
    /// until they are gone.
    pub fn disconnect_all(&self) {
        for notify in self.shared.connections.lock().values() {
            notify.notify_one();
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.connection_count() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Stop the server.
    pub fn stop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MockMySqlServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One client connection.
struct Connection {
    stream: TcpStream,
    shared: Arc<Shared>,
    thread_id: u32,
    sequence: u8,
    out: BytesMut,
    status: StatusFlags,
    nonce: Vec<u8>,
    client_flags: CapabilityFlags,
}

/// Tracks a live connection in the shared counters.
struct Registration {
    shared: Arc<Shared>,
    thread_id: u32,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.shared.connections.lock().remove(&self.thread_id);
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// What the command loop should do after a command.
enum Flow {
    Continue,
    Close,
}

async fn handle_connection(stream: TcpStream, shared: Arc<Shared>) -> Result<()> {
    stream.set_nodelay(true)?;
    let thread_id = shared.next_thread_id.fetch_add(1, Ordering::SeqCst) + 1;
    let kill = Arc::new(Notify::new());
    shared.connections.lock().insert(thread_id, Arc::clone(&kill));
    shared.active.fetch_add(1, Ordering::SeqCst);
    shared.accepted.fetch_add(1, Ordering::SeqCst);
    let _registration = Registration {
        shared: Arc::clone(&shared),
        thread_id,
    };

    let mut conn = Connection {
        stream,
        shared,
        thread_id,
        sequence: 0,
        out: BytesMut::new(),
        status: StatusFlags::AUTOCOMMIT,
        nonce: new_nonce(thread_id),
        client_flags: CapabilityFlags::empty(),
    };

    tokio::select! {
        result = conn.serve() => result,
        _ = kill.notified() => {
            tracing::debug!(thread_id, "mock connection killed");
            Ok(())
        }
    }
}

/// A 20-byte scramble without NUL bytes.
fn new_nonce(seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(0x9E37_79B9);
    (0..20)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % 94) as u8 + 33
        })
        .collect()
}

impl Connection {
    async fn serve(&mut self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        if let Some(delay) = shared.config.greeting_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((code, message)) = &shared.config.greeting_error {
            self.queue_err(*code, "HY000", message);
            return self.flush().await;
        }

        let greeting = self.greeting();
        self.queue(&greeting);
        self.flush().await?;

        let response = self.read_packet().await?;
        let login = parse_login(response)?;
        self.client_flags = login.capabilities;
        if !self.authenticate(&login.user, login.auth).await? {
            return Ok(());
        }
        if let Some(db) = &login.database {
            if !self.database_known(db) {
                self.queue_err(codes::ER_BAD_DB_ERROR, "42000", &format!("Unknown database '{db}'"));
                return self.flush().await;
            }
        }
        self.queue_ok(0, 0, 0, "");
        self.flush().await?;
        tracing::debug!(thread_id = self.thread_id, user = login.user.as_str(), "mock login");

        loop {
            let packet = match self.read_packet().await {
                Ok(packet) => packet,
                Err(MockServerError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            match self.dispatch(packet).await? {
                Flow::Continue => self.flush().await?,
                Flow::Close => {
                    self.flush().await?;
                    return Ok(());
                }
            }
        }
    }

    fn greeting(&self) -> Bytes {
        let config = &self.shared.config;
        let caps = config.capabilities.bits();
        let mut dst = BytesMut::with_capacity(96);
        dst.put_u8(PROTOCOL_VERSION);
        write_null_terminated(&mut dst, config.server_version.as_bytes());
        dst.put_u32_le(self.thread_id);
        dst.put_slice(&self.nonce[..8]);
        dst.put_u8(0);
        dst.put_u16_le((caps & 0xFFFF) as u16);
        dst.put_u8(GREETING_COLLATION);
        dst.put_u16_le(self.status.bits());
        dst.put_u16_le((caps >> 16) as u16);
        dst.put_u8(21);
        dst.put_bytes(0, 10);
        dst.put_slice(&self.nonce[8..]);
        dst.put_u8(0);
        write_null_terminated(&mut dst, NATIVE_PASSWORD_PLUGIN.as_bytes());
        dst.freeze()
    }

    /// Run authentication; on refusal the ERR is sent and `false` returned.
    async fn authenticate(&mut self, user: &str, mut auth: Bytes) -> Result<bool> {
        if let Some(plugin) = self.shared.config.auth_switch.clone() {
            self.nonce = new_nonce(self.thread_id.wrapping_add(0x5151));
            let mut dst = BytesMut::new();
            dst.put_u8(0xFE);
            write_null_terminated(&mut dst, plugin.as_bytes());
            write_null_terminated(&mut dst, &self.nonce);
            self.queue(&dst);
            self.flush().await?;
            if plugin != NATIVE_PASSWORD_PLUGIN {
                // The client gives up and closes.
                return Ok(false);
            }
            auth = self.read_packet().await?;
        }

        if self.credentials_valid(user, &auth) {
            return Ok(true);
        }
        let using = if auth.is_empty() { "NO" } else { "YES" };
        self.queue_err(
            codes::ER_ACCESS_DENIED_ERROR,
            "28000",
            &format!("Access denied for user '{user}'@'localhost' (using password: {using})"),
        );
        self.flush().await?;
        Ok(false)
    }

    fn credentials_valid(&self, user: &str, auth: &[u8]) -> bool {
        let users = &self.shared.config.users;
        if users.is_empty() {
            return true;
        }
        users
            .get(user)
            .is_some_and(|password| scramble_native_password(password, &self.nonce) == auth)
    }

    fn database_known(&self, name: &str) -> bool {
        let databases = &self.shared.config.databases;
        databases.is_empty() || databases.contains(name)
    }

    async fn dispatch(&mut self, mut packet: Bytes) -> Result<Flow> {
        let code = read_u8(&mut packet).map_err(|e| MockServerError::Protocol(e.to_string()))?;
        match code {
            c if c == Command::Quit as u8 => return Ok(Flow::Close),
            c if c == Command::Ping as u8 => self.queue_ok(0, 0, 0, ""),
            c if c == Command::InitDb as u8 => {
                let name = String::from_utf8_lossy(&packet).into_owned();
                if self.database_known(&name) {
                    self.queue_ok(0, 0, 0, "");
                } else {
                    self.queue_err(codes::ER_BAD_DB_ERROR, "42000", &format!("Unknown database '{name}'"));
                }
            }
            c if c == Command::Statistics as u8 => {
                let text = self.shared.config.statistics.clone();
                self.queue(text.as_bytes());
            }
            c if c == Command::ProcessKill as u8 => {
                let target = read_u32(&mut packet).map_err(|e| MockServerError::Protocol(e.to_string()))?;
                if target == self.thread_id {
                    return Ok(Flow::Close);
                }
                let notify = self.shared.connections.lock().get(&target).cloned();
                match notify {
                    Some(notify) => {
                        notify.notify_one();
                        self.queue_ok(0, 0, 0, "");
                    }
                    None => self.queue_err(
                        codes::ER_NO_SUCH_THREAD,
                        "HY000",
                        &format!("Unknown thread id: {target}"),
                    ),
                }
            }
            c if c == Command::Debug as u8 || c == Command::Shutdown as u8 || c == Command::SetOption as u8 => {
                self.queue_eof(0);
            }
            c if c == Command::ChangeUser as u8 => return self.change_user(packet).await,
            c if c == Command::Query as u8 => {
                let sql = String::from_utf8_lossy(&packet).into_owned();
                self.shared.queries.lock().push(sql.clone());
                let response = self.respond_to(&sql);
                return self.send_response(&sql, response).await;
            }
            other => self.queue_err(
                codes::ER_UNKNOWN_COM_ERROR,
                "08S01",
                &format!("Unknown command {other:#04x}"),
            ),
        }
        Ok(Flow::Continue)
    }

    async fn change_user(&mut self, mut packet: Bytes) -> Result<Flow> {
        let malformed = |e: mysql_protocol::ProtocolError| MockServerError::Protocol(e.to_string());
        let user = read_null_terminated_string(&mut packet).map_err(malformed)?;
        let auth = if self.client_flags.contains(CapabilityFlags::SECURE_CONNECTION) {
            let len = read_u8(&mut packet).map_err(malformed)?;
            read_bytes(&mut packet, usize::from(len)).map_err(malformed)?
        } else {
            read_null_terminated(&mut packet).map_err(malformed)?
        };
        let database = read_null_terminated_string(&mut packet).map_err(malformed)?;

        if !self.authenticate(&user, auth).await? {
            return Ok(Flow::Close);
        }
        if !database.is_empty() && !self.database_known(&database) {
            self.queue_err(codes::ER_BAD_DB_ERROR, "42000", &format!("Unknown database '{database}'"));
            return Ok(Flow::Continue);
        }
        self.status = StatusFlags::AUTOCOMMIT;
        self.queue_ok(0, 0, 0, "");
        Ok(Flow::Continue)
    }

    /// Pick the reply for `sql` and apply its session-state side effects.
    fn respond_to(&mut self, sql: &str) -> MockResponse {
        let trimmed = sql.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper == "SET AUTOCOMMIT=0" {
            self.status -= StatusFlags::AUTOCOMMIT;
        } else if upper == "SET AUTOCOMMIT=1" {
            self.status |= StatusFlags::AUTOCOMMIT;
        } else if upper.starts_with("SET SQL_MODE") || upper.starts_with("SET SESSION SQL_MODE") {
            self.status.set(StatusFlags::NO_BACKSLASH_ESCAPES, upper.contains("NO_BACKSLASH_ESCAPES"));
        }

        let config = &self.shared.config;
        if let Some(response) = config.responses.get(trimmed) {
            return response.clone();
        }
        if upper == "SHOW WARNINGS" {
            return warnings_response(&config.warnings);
        }
        if upper.starts_with("SET ") || matches!(upper.as_str(), "COMMIT" | "ROLLBACK" | "BEGIN") {
            return MockResponse::ok();
        }
        config.default_response.clone()
    }

    /// Queue the reply for `sql`, expanding multi-results, delays and
    /// computed replies in order.
    async fn send_response(&mut self, sql: &str, response: MockResponse) -> Result<Flow> {
        // (reply, is final result of the statement)
        let mut pending = vec![(response, true)];
        while let Some((response, last)) = pending.pop() {
            let more = if last {
                StatusFlags::empty()
            } else {
                StatusFlags::MORE_RESULTS_EXISTS
            };
            match response {
                MockResponse::Ok {
                    affected_rows,
                    last_insert_id,
                    warnings,
                    info,
                } => {
                    let status = self.status | more;
                    self.queue_ok_with_status(affected_rows, last_insert_id, warnings, &info, status);
                }
                MockResponse::Error {
                    code,
                    sqlstate,
                    message,
                } => {
                    self.queue_err(code, &sqlstate, &message);
                    // An error ends the statement.
                    pending.clear();
                }
                MockResponse::Rows {
                    columns,
                    rows,
                    warnings,
                } => {
                    self.queue_result_header(&columns);
                    for row in &rows {
                        self.queue_row(row);
                    }
                    let status = self.status | more;
                    self.queue_eof_with_status(warnings, status);
                }
                MockResponse::RowsThenError {
                    columns,
                    rows,
                    code,
                    message,
                } => {
                    self.queue_result_header(&columns);
                    for row in &rows {
                        self.queue_row(row);
                    }
                    self.queue_err(code, "HY000", &message);
                    pending.clear();
                }
                MockResponse::Multi(parts) => {
                    let count = parts.len();
                    for (index, part) in parts.into_iter().enumerate().rev() {
                        pending.push((part, last && index + 1 == count));
                    }
                }
                MockResponse::LocalInfile(name) => {
                    let mut dst = BytesMut::with_capacity(name.len() + 1);
                    dst.put_u8(0xFB);
                    dst.put_slice(name.as_bytes());
                    self.queue(&dst);
                    self.flush().await?;
                    let upload = self.receive_upload().await?;
                    if upload.is_empty() {
                        self.queue_err(
                            codes::ER_NOT_ALLOWED_COMMAND,
                            "42000",
                            "The used command is not allowed with this MySQL version",
                        );
                        pending.clear();
                    } else {
                        let lines = count_lines(&upload);
                        self.shared.uploads.lock().push(upload);
                        let info = format!("Records: {lines}  Deleted: 0  Skipped: 0  Warnings: 0");
                        let status = self.status | more;
                        self.queue_ok_with_status(lines, 0, 0, &info, status);
                    }
                }
                MockResponse::Delayed(delay, inner) => {
                    self.flush().await?;
                    tokio::time::sleep(delay).await;
                    pending.push((*inner, last));
                }
                MockResponse::Disconnect => {
                    self.out.clear();
                    return Ok(Flow::Close);
                }
                MockResponse::Custom(f) => pending.push((f(sql), last)),
            }
        }
        Ok(Flow::Continue)
    }

    async fn receive_upload(&mut self) -> Result<Bytes> {
        let mut upload = BytesMut::new();
        loop {
            let chunk = self.read_packet().await?;
            if chunk.is_empty() {
                return Ok(upload.freeze());
            }
            upload.extend_from_slice(&chunk);
        }
    }

    fn queue_result_header(&mut self, columns: &[MockColumn]) {
        let mut count = BytesMut::with_capacity(9);
        write_lenenc_int(&mut count, columns.len() as u64);
        self.queue(&count);
        for column in columns {
            self.queue(&column.definition().encode());
        }
        self.queue_eof(0);
    }

    fn queue_row(&mut self, row: &[Option<Bytes>]) {
        let values: Vec<Option<&[u8]>> = row.iter().map(|v| v.as_deref()).collect();
        self.queue(&encode_text_row(&values));
    }

    fn queue_ok(&mut self, affected_rows: u64, last_insert_id: u64, warnings: u16, info: &str) {
        let status = self.status;
        self.queue_ok_with_status(affected_rows, last_insert_id, warnings, info, status);
    }

    fn queue_ok_with_status(
        &mut self,
        affected_rows: u64,
        last_insert_id: u64,
        warnings: u16,
        info: &str,
        status: StatusFlags,
    ) {
        let mut dst = BytesMut::with_capacity(16 + info.len());
        dst.put_u8(0x00);
        write_lenenc_int(&mut dst, affected_rows);
        write_lenenc_int(&mut dst, last_insert_id);
        dst.put_u16_le(status.bits());
        dst.put_u16_le(warnings);
        dst.put_slice(info.as_bytes());
        self.queue(&dst);
    }

    fn queue_eof(&mut self, warnings: u16) {
        let status = self.status;
        self.queue_eof_with_status(warnings, status);
    }

    fn queue_eof_with_status(&mut self, warnings: u16, status: StatusFlags) {
        let mut dst = BytesMut::with_capacity(5);
        dst.put_u8(0xFE);
        dst.put_u16_le(warnings);
        dst.put_u16_le(status.bits());
        self.queue(&dst);
    }

    fn queue_err(&mut self, code: u16, sqlstate: &str, message: &str) {
        let mut dst = BytesMut::with_capacity(9 + message.len());
        dst.put_u8(0xFF);
        dst.put_u16_le(code);
        dst.put_u8(b'#');
        dst.put_slice(sqlstate.as_bytes());
        dst.put_slice(message.as_bytes());
        self.queue(&dst);
    }

    /// Frame `payload` into the output buffer, splitting at the packet limit.
    fn queue(&mut self, payload: &[u8]) {
        let mut rest = payload;
        loop {
            let len = rest.len().min(MAX_PAYLOAD_SIZE);
            PacketHeader::new(len as u32, self.sequence).encode(&mut self.out);
            self.out.put_slice(&rest[..len]);
            self.sequence = self.sequence.wrapping_add(1);
            rest = &rest[len..];
            if len < MAX_PAYLOAD_SIZE {
                break;
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.out.is_empty() {
            self.stream.write_all(&self.out).await?;
            self.out.clear();
        }
        Ok(())
    }

    /// Read one logical packet, joining continuation frames.
    async fn read_packet(&mut self) -> Result<Bytes> {
        let mut payload = BytesMut::new();
        loop {
            let mut header = [0u8; 4];
            self.stream.read_exact(&mut header).await?;
            let header = PacketHeader::decode(&mut &header[..])
                .map_err(|e| MockServerError::Protocol(e.to_string()))?;
            let start = payload.len();
            payload.resize(start + header.payload_length(), 0);
            self.stream.read_exact(&mut payload[start..]).await?;
            self.sequence = header.sequence.wrapping_add(1);
            if !header.is_continued() {
                return Ok(payload.freeze());
            }
        }
    }
}

/// Parsed handshake response.
struct Login {
    capabilities: CapabilityFlags,
    user: String,
    auth: Bytes,
    database: Option<String>,
}

fn parse_login(mut src: Bytes) -> Result<Login> {
    let malformed = |e: mysql_protocol::ProtocolError| MockServerError::Protocol(e.to_string());
    let capabilities = CapabilityFlags::from_bits_retain(read_u32(&mut src).map_err(malformed)?);
    if !capabilities.contains(CapabilityFlags::PROTOCOL_41) {
        return Err(MockServerError::Protocol("pre-4.1 handshake response".to_string()));
    }
    read_u32(&mut src).map_err(malformed)?;
    read_u8(&mut src).map_err(malformed)?;
    read_bytes(&mut src, 23).map_err(malformed)?;
    let user = read_null_terminated_string(&mut src).map_err(malformed)?;
    let auth = if capabilities.contains(CapabilityFlags::PLUGIN_AUTH_LENENC_CLIENT_DATA) {
        read_lenenc_bytes(&mut src).map_err(malformed)?
    } else {
        let len = read_u8(&mut src).map_err(malformed)?;
        read_bytes(&mut src, usize::from(len)).map_err(malformed)?
    };
    let database = if capabilities.contains(CapabilityFlags::CONNECT_WITH_DB) && src.has_remaining() {
        Some(read_null_terminated_string(&mut src).map_err(malformed)?)
    } else {
        None
    };
    Ok(Login {
        capabilities,
        user,
        auth,
        database,
    })
}

fn warnings_response(warnings: &[(String, u16, String)]) -> MockResponse {
    let columns = vec![
        MockColumn::varchar("Level", 7).not_null(),
        MockColumn::new("Code", FieldType::Long, 4).not_null(),
        MockColumn::varchar("Message", 512).not_null(),
    ];
    let rows = warnings
        .iter()
        .map(|(level, code, message)| {
            vec![
                Some(Bytes::copy_from_slice(level.as_bytes())),
                Some(Bytes::from(code.to_string())),
                Some(Bytes::copy_from_slice(message.as_bytes())),
            ]
        })
        .collect();
    MockResponse::raw_rows(columns, rows).with_warnings(0)
}

fn count_lines(data: &[u8]) -> u64 {
    let newlines = data.iter().filter(|&&b| b == b'\n').count() as u64;
    if data.last() == Some(&b'\n') {
        newlines
    } else {
        newlines + 1
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mysql_protocol::{Handshake, HandshakeResponse};

    #[test]
    fn test_mock_response_builders() {
        let ok = MockResponse::affected(3).with_info("Rows matched: 3").with_warnings(1);
        match ok {
            MockResponse::Ok {
                affected_rows,
                warnings,
                info,
                ..
            } => {
                assert_eq!(affected_rows, 3);
                assert_eq!(warnings, 1);
                assert_eq!(info, "Rows matched: 3");
            }
            other => panic!("unexpected {other:?}"),
        }

        let rows = MockResponse::rows(vec![MockColumn::long("id")], vec![vec![Some("1")], vec![None]]);
        match rows {
            MockResponse::Rows { rows, .. } => {
                assert_eq!(rows[0][0].as_deref(), Some(&b"1"[..]));
                assert!(rows[1][0].is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_mock_column_builders() {
        let column = MockColumn::decimal("price", 10, 2).with_table("items").not_null();
        assert_eq!(column.field_type, FieldType::NewDecimal);
        assert_eq!(column.decimals, 2);
        assert!(column.flags.contains(ColumnFlags::NOT_NULL | ColumnFlags::BINARY));

        let definition = column.definition();
        assert_eq!(definition.table, "items");
        assert_eq!(definition.field_type(), Some(FieldType::NewDecimal));
        assert!(!definition.is_nullable());
    }

    #[test]
    fn test_nonce_has_no_nul() {
        for seed in 0..256 {
            let nonce = new_nonce(seed);
            assert_eq!(nonce.len(), 20);
            assert!(nonce.iter().all(|&b| b != 0));
        }
    }

    #[test]
    fn test_count_lines() {
        assert_eq!(count_lines(b"a\nb\n"), 2);
        assert_eq!(count_lines(b"a\nb"), 2);
        assert_eq!(count_lines(b"single"), 1);
    }

    #[test]
    fn test_parse_login_roundtrips_client_response() {
        let greeting = Handshake {
            protocol_version: 10,
            server_version: DEFAULT_SERVER_VERSION.to_string(),
            connection_id: 1,
            auth_plugin_data: Bytes::from(new_nonce(1)),
            capabilities: default_capabilities(),
            character_set: GREETING_COLLATION,
            status: StatusFlags::AUTOCOMMIT,
            auth_plugin_name: NATIVE_PASSWORD_PLUGIN.to_string(),
        };
        let caps = default_capabilities() - CapabilityFlags::DEPRECATE_EOF;
        let response = HandshakeResponse::new(caps, 45, "app", "secret", Some("shop"), &greeting);
        let login = parse_login(response.encode()).unwrap();
        assert_eq!(login.user, "app");
        assert_eq!(login.database.as_deref(), Some("shop"));
        assert_eq!(&login.auth[..], &scramble_native_password("secret", &new_nonce(1))[..]);
    }

    #[test]
    fn test_server_start_stop() {
        let mut server = MockMySqlServer::builder().build().unwrap();
        assert_ne!(server.port(), 0);
        assert_eq!(server.host(), "127.0.0.1");
        assert_eq!(server.connection_count(), 0);
        server.stop();
        server.stop();
    }

    #[test]
    fn test_greeting_over_tcp() {
        use std::io::Read;

        let server = MockMySqlServer::builder()
            .with_server_version("5.7.44-test")
            .build()
            .unwrap();
        let mut stream = std::net::TcpStream::connect(server.addr()).unwrap();
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).unwrap();
        let header = PacketHeader::decode(&mut &header[..]).unwrap();
        assert_eq!(header.sequence, 0);
        let mut payload = vec![0u8; header.payload_length()];
        stream.read_exact(&mut payload).unwrap();

        let greeting = Handshake::decode(Bytes::from(payload)).unwrap();
        assert_eq!(greeting.server_version, "5.7.44-test");
        assert_eq!(greeting.auth_plugin_data.len(), 20);
        assert!(greeting.capabilities.contains(CapabilityFlags::PROTOCOL_41));
        assert_eq!(greeting.auth_plugin_name, NATIVE_PASSWORD_PLUGIN);
    }
}
