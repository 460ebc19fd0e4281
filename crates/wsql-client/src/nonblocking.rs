//! Caller-driven non-blocking operations.
//!
//! A `begin_*` call validates usage, queues the request and parks a
//! resumable operation in the session. The matching `poll_*` call advances
//! it with the socket in non-blocking mode:
//!
//! ```text
//! Idle ──begin_x──▶ InProgress(x) ──poll_x: NotReady──▶ InProgress(x)
//!   ▲                   │
//!   │                   └──poll_x: Complete / error──▶ Idle
//!   │
//!   └──poll_x reports the stored error once── Failed(x) ◀──begin_x setup failure
//! ```
//!
//! Between polls, wait for [`Session::fd`] to become ready in the direction
//! given by [`Session::async_operation`] (or by the returned
//! [`AsyncStatus::NotReady`]).

use std::task::Poll;

use mysql_protocol::StatusFlags;
use mysql_protocol::command::{self, Command};

use crate::config::ConnectOptions;
use crate::error::{Error, Result};
use crate::inner::SessionInner;
use crate::ops::{CommandOp, ConnectOp, Expect, QueryOp};
use crate::session::{Session, prepare_connect};
use crate::state::{AsyncStatus, Interest, OpKind};

/// The resumable machine behind an outstanding operation.
#[derive(Debug)]
pub(crate) enum Machine {
    Connect(Box<ConnectOp>),
    Query(QueryOp),
    SelectDb { op: CommandOp, database: String },
    /// `None` when the server announced no further result.
    NextResult(Option<QueryOp>),
}

impl Machine {
    /// Advance the machine; `Ready(false)` only for an exhausted next_result.
    fn poll(&mut self, inner: &mut SessionInner) -> Result<Poll<bool>> {
        match self {
            Self::Connect(op) => Ok(op.poll(inner)?.map(|()| true)),
            Self::Query(op) | Self::NextResult(Some(op)) => Ok(op.poll(inner)?.map(|()| true)),
            Self::NextResult(None) => Ok(Poll::Ready(false)),
            Self::SelectDb { op, database } => match op.poll(inner)? {
                Poll::Ready(_) => {
                    inner.options.database = Some(database.clone());
                    Ok(Poll::Ready(true))
                }
                Poll::Pending => Ok(Poll::Pending),
            },
        }
    }
}

/// Non-blocking operation slot of a session.
#[derive(Debug, Default)]
pub(crate) enum AsyncOp {
    #[default]
    Idle,
    InProgress {
        kind: OpKind,
        machine: Machine,
        interest: Interest,
    },
    /// Setup failed in `begin_*`; reported by the next poll.
    Failed { kind: OpKind, error: Error },
}

impl AsyncOp {
    /// Kind of the running operation, if any.
    pub(crate) fn in_progress(&self) -> Option<OpKind> {
        match self {
            Self::InProgress { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    fn start(kind: OpKind, interest: Interest, machine: Result<Machine>) -> Self {
        match machine {
            Ok(machine) => Self::InProgress {
                kind,
                machine,
                interest,
            },
            Err(error) => Self::Failed { kind, error },
        }
    }
}

impl Session {
    /// Start connecting without blocking on the handshake.
    ///
    /// Only the socket dial blocks (bounded by the connect timeout). Usage
    /// errors are returned here; dial failures are reported by the first
    /// [`poll_connect`](Self::poll_connect).
    pub fn begin_connect(&mut self, options: &ConnectOptions) -> Result<()> {
        let mut inner = self.inner.lock();
        let (resolved, charset) = prepare_connect(&mut inner, options)?;
        let machine = inner
            .dial(&resolved)
            .map(|()| Machine::Connect(Box::new(ConnectOp::new(resolved, charset))));
        tracing::debug!(op = OpKind::Connect.name(), "asynchronous operation started");
        inner.async_op = AsyncOp::start(OpKind::Connect, Interest::Read, machine);
        Ok(())
    }

    /// Advance a connect started with [`begin_connect`](Self::begin_connect).
    pub fn poll_connect(&mut self) -> Result<AsyncStatus<()>> {
        self.poll_op(OpKind::Connect)
            .map(|status| status.map(|_| ()))
    }

    /// Queue `sql` without waiting for the server.
    ///
    /// The statement is copied, so the caller's buffer may be reused at once.
    pub fn begin_query(&mut self, sql: impl AsRef<[u8]>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_command()?;
        let machine = QueryOp::start(&mut inner, sql.as_ref()).map(Machine::Query);
        tracing::debug!(op = OpKind::Query.name(), "asynchronous operation started");
        inner.async_op = AsyncOp::start(OpKind::Query, Interest::Write, machine);
        Ok(())
    }

    /// Advance a query started with [`begin_query`](Self::begin_query).
    pub fn poll_query(&mut self) -> Result<AsyncStatus<()>> {
        self.poll_op(OpKind::Query).map(|status| status.map(|_| ()))
    }

    /// Queue a default-database change without waiting for the server.
    pub fn begin_select_db(&mut self, database: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_command()?;
        let machine = CommandOp::start(
            &mut inner,
            Command::InitDb,
            command::encode_init_db(database),
            Expect::Ok,
        )
        .map(|op| Machine::SelectDb {
            op,
            database: database.to_string(),
        });
        tracing::debug!(op = OpKind::SelectDb.name(), "asynchronous operation started");
        inner.async_op = AsyncOp::start(OpKind::SelectDb, Interest::Write, machine);
        Ok(())
    }

    /// Advance a change started with [`begin_select_db`](Self::begin_select_db).
    pub fn poll_select_db(&mut self) -> Result<AsyncStatus<()>> {
        self.poll_op(OpKind::SelectDb)
            .map(|status| status.map(|_| ()))
    }

    /// Start reading the next result of a multi-result query.
    pub fn begin_next_result(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_command()?;
        let op = inner
            .status
            .contains(StatusFlags::MORE_RESULTS_EXISTS)
            .then(|| QueryOp::next_result(&mut inner));
        tracing::debug!(op = OpKind::NextResult.name(), "asynchronous operation started");
        inner.async_op = AsyncOp::start(OpKind::NextResult, Interest::Read, Ok(Machine::NextResult(op)));
        Ok(())
    }

    /// Advance [`begin_next_result`](Self::begin_next_result).
    ///
    /// Completes with `true` when another result was read and `false` when
    /// the server has no more results.
    pub fn poll_next_result(&mut self) -> Result<AsyncStatus<bool>> {
        self.poll_op(OpKind::NextResult)
    }

    /// Direction the outstanding operation waits on, or `None` when idle.
    #[must_use]
    pub fn async_operation(&self) -> Option<Interest> {
        match &self.inner.lock().async_op {
            AsyncOp::InProgress { interest, .. } => Some(*interest),
            _ => None,
        }
    }

    fn poll_op(&self, kind: OpKind) -> Result<AsyncStatus<bool>> {
        let mut inner = self.inner.lock();
        match std::mem::take(&mut inner.async_op) {
            AsyncOp::Idle => Err(Error::programming(format!(
                "no asynchronous {} is in progress",
                kind.name()
            ))),
            AsyncOp::Failed { kind: failed, error } if failed == kind => Err(error),
            AsyncOp::InProgress {
                kind: running,
                mut machine,
                ..
            } if running == kind => {
                inner.set_mode(true)?;
                match machine.poll(&mut inner)? {
                    Poll::Ready(value) => {
                        tracing::debug!(op = kind.name(), "asynchronous operation complete");
                        Ok(AsyncStatus::Complete(value))
                    }
                    Poll::Pending => {
                        let interest = inner.interest();
                        inner.async_op = AsyncOp::InProgress {
                            kind,
                            machine,
                            interest,
                        };
                        Ok(AsyncStatus::NotReady(interest))
                    }
                }
            }
            other => {
                let message = match &other {
                    AsyncOp::InProgress { kind: running, .. } | AsyncOp::Failed { kind: running, .. } => {
                        format!(
                            "poll_{} called while an asynchronous {} is outstanding",
                            kind.name(),
                            running.name()
                        )
                    }
                    AsyncOp::Idle => format!("no asynchronous {} is in progress", kind.name()),
                };
                inner.async_op = other;
                Err(Error::programming(message))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Category;

    #[test]
    fn test_in_progress_kind() {
        let failed = AsyncOp::Failed {
            kind: OpKind::Query,
            error: Error::interface("boom"),
        };
        assert_eq!(failed.in_progress(), None);
        assert_eq!(AsyncOp::Idle.in_progress(), None);

        let running = AsyncOp::start(OpKind::NextResult, Interest::Read, Ok(Machine::NextResult(None)));
        assert_eq!(running.in_progress(), Some(OpKind::NextResult));
    }

    #[test]
    fn test_poll_without_begin() {
        let mut session = Session::new();
        let err = session.poll_query().unwrap_err();
        assert_eq!(err.category(), Category::ProgrammingError);
        assert!(session.async_operation().is_none());
    }

    #[test]
    fn test_begin_query_requires_open_session() {
        let mut session = Session::new();
        let err = session.begin_query("SELECT 1").unwrap_err();
        assert_eq!(err.category(), Category::ProgrammingError);
        assert_eq!(err.message(), "the connection is not open");
    }
}
