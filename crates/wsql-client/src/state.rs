//! Session and operation state.
//!
//! ## Session lifecycle
//!
//! ```text
//! Unopened ──connect──▶ Connected ◀──any op without loss──┐
//!                          │                              │
//!                          └──connection-lost code──▶ Disconnected
//! Connected | Disconnected ──close / drop──▶ Closed (terminal)
//! ```
//!
//! A failed connect leaves the session `Unopened`.

pub use wsql_codec::Interest;

/// Observable lifecycle state of a [`Session`](crate::Session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No successful connect yet.
    Unopened,
    /// Open, and the last operation saw no connection loss.
    Connected,
    /// Open, but a connection-lost error was observed.
    Disconnected,
    /// Closed explicitly or by drop.
    Closed,
}

impl SessionState {
    /// Whether the handle is allocated and not closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Connected | Self::Disconnected)
    }

    /// Whether the session believes the server is reachable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Outcome of one step of a non-blocking operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncStatus<T> {
    /// Wait until the descriptor is ready in this direction, then poll again.
    NotReady(Interest),
    /// The operation finished.
    Complete(T),
}

impl<T> AsyncStatus<T> {
    /// Whether the operation finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// The completed value, if any.
    pub fn complete(self) -> Option<T> {
        match self {
            Self::Complete(value) => Some(value),
            Self::NotReady(_) => None,
        }
    }

    /// Map the completed value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AsyncStatus<U> {
        match self {
            Self::Complete(value) => AsyncStatus::Complete(f(value)),
            Self::NotReady(interest) => AsyncStatus::NotReady(interest),
        }
    }
}

/// Kind of an outstanding non-blocking operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// `begin_connect` / `poll_connect`.
    Connect,
    /// `begin_query` / `poll_query`.
    Query,
    /// `begin_select_db` / `poll_select_db`.
    SelectDb,
    /// `begin_next_result` / `poll_next_result`.
    NextResult,
}

impl OpKind {
    /// Operation name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Query => "query",
            Self::SelectDb => "select_db",
            Self::NextResult => "next_result",
        }
    }
}

/// What the wire is doing between commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum WireState {
    /// Ready for a new command.
    #[default]
    Ready,
    /// A result-set header was read; column definitions are still on the wire.
    ResultPending { columns: u64 },
    /// A `use` result owns the wire until its rows are drained.
    Streaming { id: u64 },
}

impl WireState {
    pub(crate) fn is_busy(&self) -> bool {
        !matches!(self, Self::Ready)
    }
}
