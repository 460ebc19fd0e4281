//! Resumable protocol operations.
//!
//! Each operation is a small state machine whose `poll` method advances as
//! far as the socket allows and returns `Poll::Pending` when it would block.
//! Blocking calls drive the same machines through
//! [`SessionInner::block_on`]; non-blocking calls keep them parked in the
//! session between polls.

use std::fs;
use std::task::Poll;

use bytes::Bytes;
use mysql_protocol::codes::{
    CR_AUTH_PLUGIN_CANNOT_LOAD, CR_MALFORMED_PACKET, CR_SERVER_HANDSHAKE_ERR, CR_VERSION_ERROR,
    EE_FILENOTFOUND,
};
use mysql_protocol::command::{self, Command};
use mysql_protocol::handshake::AUTH_SWITCH_MARKER;
use mysql_protocol::response::{
    CommandResponse, ERR_MARKER, ErrPacket, OK_MARKER, OkPacket, QueryResponse, is_eof_packet,
    is_err_packet,
};
use mysql_protocol::{
    AuthSwitchRequest, CapabilityFlags, Charset, Handshake, HandshakeResponse, ProtocolError,
    StatusFlags, scramble_native_password,
};

use crate::config::ConnectOptions;
use crate::error::{Error, Result};
use crate::inner::{ServerInfo, SessionInner};
use crate::state::WireState;

const INFILE_CHUNK: usize = 64 * 1024;

/// Marker of an "auth more data" packet (caching_sha2 fast path).
const AUTH_MORE_DATA_MARKER: u8 = 0x01;

macro_rules! ready {
    ($e:expr) => {
        match $e {
            Poll::Ready(value) => value,
            Poll::Pending => return Ok(Poll::Pending),
        }
    };
}

// =============================================================================
// Connect
// =============================================================================

#[derive(Debug)]
enum ConnectStage {
    Greeting,
    FlushAuth,
    AuthResult,
    InitCommand(DiscardOp),
    Done,
}

/// Handshake, authentication and init command.
#[derive(Debug)]
pub(crate) struct ConnectOp {
    stage: ConnectStage,
    options: ConnectOptions,
    charset: &'static Charset,
    switched: bool,
}

impl ConnectOp {
    /// Start a handshake on the already dialed socket.
    pub(crate) fn new(options: ConnectOptions, charset: &'static Charset) -> Self {
        Self {
            stage: ConnectStage::Greeting,
            options,
            charset,
            switched: false,
        }
    }

    pub(crate) fn poll(&mut self, inner: &mut SessionInner) -> Result<Poll<()>> {
        let result = self.step(inner);
        if result.is_err() {
            inner.drop_channel();
            // A failed reconnect leaves an opened session without a socket.
            if inner.open {
                inner.connected = false;
            }
        }
        result
    }

    fn step(&mut self, inner: &mut SessionInner) -> Result<Poll<()>> {
        loop {
            match &mut self.stage {
                ConnectStage::Greeting => {
                    let payload = ready!(inner.poll_recv()?);
                    if is_err_packet(&payload) {
                        let err = ErrPacket::decode(payload).map_err(|e| inner.fail_protocol(e))?;
                        return Err(inner.fail_server(err));
                    }
                    let handshake = Handshake::decode(payload).map_err(|e| {
                        let code = match e {
                            ProtocolError::UnsupportedProtocolVersion(_) => CR_VERSION_ERROR,
                            _ => CR_SERVER_HANDSHAKE_ERR,
                        };
                        inner.fail_client(code, Some(e.to_string()))
                    })?;
                    if !handshake.capabilities.contains(CapabilityFlags::PROTOCOL_41) {
                        return Err(inner.fail_client(
                            CR_VERSION_ERROR,
                            Some(ProtocolError::Protocol41Required.to_string()),
                        ));
                    }
                    tracing::debug!(
                        server_version = handshake.server_version.as_str(),
                        thread_id = handshake.connection_id,
                        "received server greeting"
                    );

                    let response = HandshakeResponse::new(
                        self.client_flags(&handshake),
                        self.charset.number,
                        self.options.user.as_deref().unwrap_or_default(),
                        self.options.password.as_deref().unwrap_or_default(),
                        self.options.database.as_deref(),
                        &handshake,
                    );
                    inner.client_flags = response.capabilities;
                    inner.status = handshake.status;
                    inner.server = ServerInfo {
                        version: handshake.server_version,
                        protocol_version: handshake.protocol_version,
                        thread_id: handshake.connection_id,
                        capabilities: handshake.capabilities,
                        nonce: handshake.auth_plugin_data,
                    };
                    inner.send(response.encode())?;
                    self.stage = ConnectStage::FlushAuth;
                }
                ConnectStage::FlushAuth => {
                    ready!(inner.poll_flush()?);
                    self.stage = ConnectStage::AuthResult;
                }
                ConnectStage::AuthResult => {
                    let payload = ready!(inner.poll_recv()?);
                    let password = self.options.password.as_deref().unwrap_or_default();
                    match auth_response(inner, payload, password, &mut self.switched)? {
                        AuthStep::Switched => self.stage = ConnectStage::FlushAuth,
                        AuthStep::Authenticated => {
                            self.stage = match self.options.init_command.as_deref() {
                                Some(sql) => ConnectStage::InitCommand(DiscardOp::start(inner, sql.as_bytes())?),
                                None => ConnectStage::Done,
                            };
                        }
                    }
                }
                ConnectStage::InitCommand(op) => {
                    ready!(op.poll(inner)?);
                    self.stage = ConnectStage::Done;
                }
                ConnectStage::Done => {
                    self.finish(inner)?;
                    return Ok(Poll::Ready(()));
                }
            }
        }
    }

    fn client_flags(&self, handshake: &Handshake) -> CapabilityFlags {
        let mut flags = CapabilityFlags::client_default() | self.options.client_flag;
        if self.options.local_infile == Some(true) {
            flags |= CapabilityFlags::LOCAL_FILES;
        }
        flags -= CapabilityFlags::SSL | CapabilityFlags::COMPRESS | CapabilityFlags::DEPRECATE_EOF;
        flags & handshake.capabilities
    }

    fn finish(&mut self, inner: &mut SessionInner) -> Result<()> {
        inner.autocommit = inner.server.capabilities.contains(CapabilityFlags::TRANSACTIONS);
        inner.charset = self.charset;
        inner.options = self.options.clone();
        inner.open = true;
        inner.connected = true;
        inner.wire = WireState::Ready;
        inner.field_count = 0;
        inner.clear_error();

        if let Some(channel) = inner.channel.as_ref() {
            if let Err(e) = channel.set_timeouts(None) {
                tracing::debug!(error = %e, "failed to clear handshake timeouts");
            }
        }
        if self.options.nonblocking {
            inner.set_mode(true)?;
        }

        tracing::info!(
            host_info = inner.host_info.as_str(),
            server_version = inner.server.version.as_str(),
            thread_id = inner.server.thread_id,
            "connected to MySQL server"
        );
        Ok(())
    }
}

fn unsupported_plugin(inner: &mut SessionInner, plugin: &str) -> Error {
    inner.fail_message(
        CR_AUTH_PLUGIN_CANNOT_LOAD,
        format!("Authentication plugin '{plugin}' is not supported"),
    )
}

enum AuthStep {
    Authenticated,
    Switched,
}

/// Handle the server's answer to an authentication packet.
///
/// A single switch to native password is answered by queueing a new
/// scramble; every other plugin request is refused.
fn auth_response(
    inner: &mut SessionInner,
    payload: Bytes,
    password: &str,
    switched: &mut bool,
) -> Result<AuthStep> {
    match payload.first().copied() {
        Some(OK_MARKER) => {
            let ok = OkPacket::decode(payload).map_err(|e| inner.fail_protocol(e))?;
            inner.apply_ok(ok);
            Ok(AuthStep::Authenticated)
        }
        Some(ERR_MARKER) => {
            let err = ErrPacket::decode(payload).map_err(|e| inner.fail_protocol(e))?;
            Err(inner.fail_server(err))
        }
        Some(AUTH_SWITCH_MARKER) if payload.len() > 1 => {
            let switch = AuthSwitchRequest::decode(payload).map_err(|e| inner.fail_protocol(e))?;
            if !switch.is_native_password() || *switched {
                return Err(unsupported_plugin(inner, &switch.plugin_name));
            }
            tracing::debug!("switching authentication to native password");
            *switched = true;
            let scramble = scramble_native_password(password, &switch.auth_plugin_data);
            inner.server.nonce = switch.auth_plugin_data;
            inner.send(Bytes::from(scramble))?;
            Ok(AuthStep::Switched)
        }
        Some(AUTH_SWITCH_MARKER) => Err(unsupported_plugin(inner, "mysql_old_password")),
        Some(AUTH_MORE_DATA_MARKER) => Err(unsupported_plugin(inner, "caching_sha2_password")),
        Some(marker) => Err(inner.fail_client(
            CR_SERVER_HANDSHAKE_ERR,
            Some(ProtocolError::UnexpectedMarker(marker).to_string()),
        )),
        None => Err(inner.fail_client(CR_MALFORMED_PACKET, None)),
    }
}

// =============================================================================
// Change user
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeUserStage {
    Flush,
    Read,
    Done,
}

/// `COM_CHANGE_USER`, including a switch to native password.
#[derive(Debug)]
pub(crate) struct ChangeUserOp {
    stage: ChangeUserStage,
    password: String,
    switched: bool,
}

impl ChangeUserOp {
    pub(crate) fn start(
        inner: &mut SessionInner,
        user: &str,
        password: &str,
        database: Option<&str>,
    ) -> Result<Self> {
        let payload = command::encode_change_user(
            inner.client_flags,
            user,
            password,
            database,
            inner.charset.number,
            &inner.server.nonce,
        );
        tracing::debug!(command = Command::ChangeUser.name(), user, "sending command");
        inner.start_command(payload)?;
        Ok(Self {
            stage: ChangeUserStage::Flush,
            password: password.to_string(),
            switched: false,
        })
    }

    pub(crate) fn poll(&mut self, inner: &mut SessionInner) -> Result<Poll<()>> {
        loop {
            match self.stage {
                ChangeUserStage::Flush => {
                    ready!(inner.poll_flush()?);
                    self.stage = ChangeUserStage::Read;
                }
                ChangeUserStage::Read => {
                    let payload = ready!(inner.poll_recv()?);
                    match auth_response(inner, payload, &self.password, &mut self.switched)? {
                        AuthStep::Switched => self.stage = ChangeUserStage::Flush,
                        AuthStep::Authenticated => {
                            self.stage = ChangeUserStage::Done;
                            inner.mark_alive();
                            return Ok(Poll::Ready(()));
                        }
                    }
                }
                ChangeUserStage::Done => return Ok(Poll::Ready(())),
            }
        }
    }
}

// =============================================================================
// Query
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryStage {
    Flush,
    ReadResponse,
    FlushInfile,
    Done,
}

/// `COM_QUERY` up to the first response, including a local infile exchange.
///
/// Also reads the header of the next result of a multi-result query.
#[derive(Debug)]
pub(crate) struct QueryOp {
    stage: QueryStage,
    deferred: Option<(u16, String)>,
}

impl QueryOp {
    /// Queue `sql` for sending. The bytes are copied into the write buffer.
    pub(crate) fn start(inner: &mut SessionInner, sql: &[u8]) -> Result<Self> {
        inner.start_command(command::encode_query(sql))?;
        inner.field_count = 0;
        tracing::debug!(command = Command::Query.name(), len = sql.len(), "sending command");
        Ok(Self {
            stage: QueryStage::Flush,
            deferred: None,
        })
    }

    /// Read the header of the next result; nothing is sent.
    pub(crate) fn next_result(inner: &mut SessionInner) -> Self {
        inner.clear_error();
        inner.field_count = 0;
        Self {
            stage: QueryStage::ReadResponse,
            deferred: None,
        }
    }

    pub(crate) fn poll(&mut self, inner: &mut SessionInner) -> Result<Poll<()>> {
        loop {
            match self.stage {
                QueryStage::Flush => {
                    ready!(inner.poll_flush()?);
                    self.stage = QueryStage::ReadResponse;
                }
                QueryStage::ReadResponse => {
                    let payload = ready!(inner.poll_recv()?);
                    let response = QueryResponse::decode(payload).map_err(|e| inner.fail_protocol(e))?;
                    match response {
                        QueryResponse::Ok(ok) => {
                            self.stage = QueryStage::Done;
                            inner.apply_ok(ok);
                            if let Some((code, message)) = self.deferred.take() {
                                return Err(inner.fail_message(code, message));
                            }
                            inner.mark_alive();
                            return Ok(Poll::Ready(()));
                        }
                        QueryResponse::Err(err) => {
                            self.stage = QueryStage::Done;
                            inner.wire = WireState::Ready;
                            // An error ends a multi-result sequence.
                            inner.status.remove(StatusFlags::MORE_RESULTS_EXISTS);
                            if let Some((code, message)) = self.deferred.take() {
                                return Err(inner.fail_message(code, message));
                            }
                            return Err(inner.fail_server(err));
                        }
                        QueryResponse::ResultSet(columns) => {
                            self.stage = QueryStage::Done;
                            inner.begin_result(columns);
                            inner.mark_alive();
                            return Ok(Poll::Ready(()));
                        }
                        QueryResponse::LocalInfile(name) => {
                            self.deferred = send_local_infile(inner, &name)?;
                            self.stage = QueryStage::FlushInfile;
                        }
                    }
                }
                QueryStage::FlushInfile => {
                    ready!(inner.poll_flush()?);
                    self.stage = QueryStage::ReadResponse;
                }
                QueryStage::Done => return Ok(Poll::Ready(())),
            }
        }
    }
}

/// Queue the requested file followed by the empty terminating packet.
///
/// When the file cannot be read, or local infile is disabled, only the
/// terminator is sent. A read failure is returned so it can be raised once
/// the server has answered.
fn send_local_infile(inner: &mut SessionInner, name: &str) -> Result<Option<(u16, String)>> {
    let mut deferred = None;
    if inner.options.local_infile == Some(true) {
        tracing::debug!(file = name, "sending local infile");
        match fs::read(name) {
            Ok(contents) => {
                let contents = Bytes::from(contents);
                let mut offset = 0;
                while offset < contents.len() {
                    let end = (offset + INFILE_CHUNK).min(contents.len());
                    inner.send(contents.slice(offset..end))?;
                    offset = end;
                }
            }
            Err(e) => {
                deferred = Some((EE_FILENOTFOUND, format!("File '{name}' not found ({e})")));
            }
        }
    } else {
        tracing::debug!(file = name, "local infile disabled; refusing upload");
    }
    inner.send(Bytes::new())?;
    Ok(deferred)
}

// =============================================================================
// Simple commands
// =============================================================================

/// What a simple command answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
    /// OK, or EOF for the commands that answer with one.
    Ok,
    /// A plain text payload (`COM_STATISTICS`).
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandStage {
    Flush,
    Read,
    Done,
}

/// A command answered by a single OK, EOF, ERR or text packet.
#[derive(Debug)]
pub(crate) struct CommandOp {
    stage: CommandStage,
    expect: Expect,
}

impl CommandOp {
    pub(crate) fn start(
        inner: &mut SessionInner,
        command: Command,
        payload: Bytes,
        expect: Expect,
    ) -> Result<Self> {
        tracing::debug!(command = command.name(), "sending command");
        inner.start_command(payload)?;
        Ok(Self {
            stage: CommandStage::Flush,
            expect,
        })
    }

    /// Drive the command; the text payload is returned for [`Expect::Text`].
    pub(crate) fn poll(&mut self, inner: &mut SessionInner) -> Result<Poll<Option<Bytes>>> {
        loop {
            match self.stage {
                CommandStage::Flush => {
                    ready!(inner.poll_flush()?);
                    self.stage = CommandStage::Read;
                }
                CommandStage::Read => {
                    let payload = ready!(inner.poll_recv()?);
                    self.stage = CommandStage::Done;
                    if self.expect == Expect::Text && !is_err_packet(&payload) {
                        inner.mark_alive();
                        return Ok(Poll::Ready(Some(payload)));
                    }
                    match CommandResponse::decode(payload).map_err(|e| inner.fail_protocol(e))? {
                        CommandResponse::Ok(ok) => inner.apply_ok(ok),
                        CommandResponse::Eof(eof) => inner.apply_eof(eof),
                        CommandResponse::Err(err) => return Err(inner.fail_server(err)),
                    }
                    inner.mark_alive();
                    return Ok(Poll::Ready(None));
                }
                CommandStage::Done => return Ok(Poll::Ready(None)),
            }
        }
    }
}

// =============================================================================
// Statement with discarded results
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiscardStage {
    Header,
    Columns { remaining: u64 },
    ColumnsEof,
    Rows,
}

/// Run a statement and throw away everything it returns, including any
/// further results of a multi-statement.
#[derive(Debug)]
pub(crate) struct DiscardOp {
    header: QueryOp,
    stage: DiscardStage,
}

impl DiscardOp {
    pub(crate) fn start(inner: &mut SessionInner, sql: &[u8]) -> Result<Self> {
        Ok(Self {
            header: QueryOp::start(inner, sql)?,
            stage: DiscardStage::Header,
        })
    }

    pub(crate) fn poll(&mut self, inner: &mut SessionInner) -> Result<Poll<()>> {
        loop {
            match self.stage {
                DiscardStage::Header => {
                    ready!(self.header.poll(inner)?);
                    if let WireState::ResultPending { columns } = inner.wire {
                        self.stage = DiscardStage::Columns { remaining: columns };
                    } else if !self.next_result(inner) {
                        return Ok(Poll::Ready(()));
                    }
                }
                DiscardStage::Columns { remaining: 0 } => {
                    self.stage = DiscardStage::ColumnsEof;
                }
                DiscardStage::Columns { remaining } => {
                    let payload = ready!(inner.poll_recv()?);
                    if is_err_packet(&payload) {
                        inner.wire = WireState::Ready;
                        let err = ErrPacket::decode(payload).map_err(|e| inner.fail_protocol(e))?;
                        return Err(inner.fail_server(err));
                    }
                    self.stage = DiscardStage::Columns {
                        remaining: remaining - 1,
                    };
                }
                DiscardStage::ColumnsEof => {
                    let payload = ready!(inner.poll_recv()?);
                    if !is_eof_packet(&payload) {
                        return Err(inner.fail_protocol(ProtocolError::MalformedPacket(
                            "missing EOF after column definitions",
                        )));
                    }
                    self.stage = DiscardStage::Rows;
                }
                DiscardStage::Rows => {
                    let payload = ready!(inner.poll_recv()?);
                    if inner.end_of_rows(&payload)? && !self.next_result(inner) {
                        return Ok(Poll::Ready(()));
                    }
                }
            }
        }
    }

    /// Move on to the next result when the server announced one.
    fn next_result(&mut self, inner: &mut SessionInner) -> bool {
        if !inner.status.contains(StatusFlags::MORE_RESULTS_EXISTS) {
            return false;
        }
        self.header = QueryOp::next_result(inner);
        self.stage = DiscardStage::Header;
        true
    }
}
