//! Result sets.
//!
//! A [`ResultStream`] is either buffered (every row packet read at
//! creation) or streamed (rows read from the wire one fetch at a time).
//! In both modes rows are decoded lazily, one per fetch.

use std::io::SeekFrom;
use std::sync::Arc;
use std::task::Poll;

use bytes::Bytes;
use mysql_protocol::codes::{CR_COMMANDS_OUT_OF_SYNC, CR_SERVER_LOST};
use mysql_protocol::row::decode_text_row;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::field::{ColumnDescription, Field};
use crate::inner::SessionInner;
use crate::row::Row;
#[cfg(feature = "nonblocking")]
use crate::state::AsyncStatus;
use crate::state::WireState;

const DESTROYED: &str = "the result has been destroyed already.";

/// Opaque cursor position returned by [`ResultStream::row_tell`] and
/// [`ResultStream::row_seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowOffset(usize);

#[derive(Debug)]
enum Mode {
    Buffered { rows: Vec<Bytes>, cursor: usize },
    Streamed { id: u64, fetched: u64 },
}

/// Rows of one result set.
///
/// Holds a reference to its session; closing the session makes every
/// operation fail with `ProgrammingError`.
#[derive(Debug)]
pub struct ResultStream {
    session: Arc<Mutex<SessionInner>>,
    mode: Mode,
    fields: Arc<[Field]>,
    has_more_rows: bool,
    freed: bool,
    draining: bool,
}

impl ResultStream {
    pub(crate) fn buffered(session: Arc<Mutex<SessionInner>>, fields: Arc<[Field]>, rows: Vec<Bytes>) -> Self {
        Self {
            session,
            mode: Mode::Buffered { rows, cursor: 0 },
            fields,
            has_more_rows: true,
            freed: false,
            draining: false,
        }
    }

    pub(crate) fn streamed(session: Arc<Mutex<SessionInner>>, fields: Arc<[Field]>, id: u64) -> Self {
        Self {
            session,
            mode: Mode::Streamed { id, fetched: 0 },
            fields,
            has_more_rows: true,
            freed: false,
            draining: false,
        }
    }

    /// Column metadata.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of columns.
    #[must_use]
    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Number of columns, as reported by the server.
    #[must_use]
    pub fn field_count(&self) -> u64 {
        self.fields.len() as u64
    }

    /// Whether rows are read from the wire on demand.
    #[must_use]
    pub fn is_use(&self) -> bool {
        matches!(self.mode, Mode::Streamed { .. })
    }

    /// Whether a fetch may still return a row.
    #[must_use]
    pub fn has_more_rows(&self) -> bool {
        self.has_more_rows
    }

    /// Number of rows.
    ///
    /// Exact for buffered results. For streamed results this is the number
    /// of rows fetched so far, which becomes exact once the result is drained.
    #[must_use]
    pub fn num_rows(&self) -> u64 {
        match &self.mode {
            Mode::Buffered { rows, .. } => rows.len() as u64,
            Mode::Streamed { fetched, .. } => *fetched,
        }
    }

    /// DB-API style description of every column.
    #[must_use]
    pub fn description(&self) -> Vec<ColumnDescription> {
        self.fields.iter().map(Field::description).collect()
    }

    /// Fetch the next row; `None` at the end of the result.
    ///
    /// Streamed results read one packet and block until it arrives.
    pub fn fetch_row(&mut self) -> Result<Option<Row>> {
        let session = Arc::clone(&self.session);
        let mut inner = session.lock();
        self.check_live(&inner)?;
        if let Mode::Buffered { rows, cursor } = &mut self.mode {
            let Some(payload) = rows.get(*cursor) else {
                self.has_more_rows = false;
                return Ok(None);
            };
            *cursor += 1;
            let values = decode_text_row(payload, self.fields.len()).map_err(|e| inner.fail_protocol(e))?;
            return Ok(Some(Row::new(values, Arc::clone(&self.fields))));
        }

        match self.fetch_streamed(&mut inner, false)? {
            Poll::Ready(row) => Ok(row),
            Poll::Pending => {
                self.has_more_rows = false;
                Err(inner.fail_client(CR_SERVER_LOST, Some("read timed out".to_string())))
            }
        }
    }

    /// Non-blocking fetch.
    ///
    /// Buffered results complete at once. Streamed results return
    /// `NotReady` when the row has not fully arrived; partial packets stay
    /// buffered, so polling again is safe.
    #[cfg(feature = "nonblocking")]
    pub fn poll_fetch_row(&mut self) -> Result<AsyncStatus<Option<Row>>> {
        if !self.is_use() {
            return self.fetch_row().map(AsyncStatus::Complete);
        }
        let session = Arc::clone(&self.session);
        let mut inner = session.lock();
        self.check_live(&inner)?;
        match self.fetch_streamed(&mut inner, true)? {
            Poll::Ready(row) => Ok(AsyncStatus::Complete(row)),
            Poll::Pending => Ok(AsyncStatus::NotReady(inner.interest())),
        }
    }

    fn fetch_streamed(&mut self, inner: &mut SessionInner, nonblocking: bool) -> Result<Poll<Option<Row>>> {
        let Mode::Streamed { id, fetched } = &mut self.mode else {
            return Ok(Poll::Ready(None));
        };
        if !self.has_more_rows {
            return Ok(Poll::Ready(None));
        }
        match inner.wire {
            WireState::Streaming { id: current } if current == *id => {}
            WireState::Ready if inner.channel.is_none() => {
                self.has_more_rows = false;
                return Err(inner.fail_client(CR_SERVER_LOST, None));
            }
            WireState::Ready => {
                self.has_more_rows = false;
                return Ok(Poll::Ready(None));
            }
            WireState::ResultPending { .. } | WireState::Streaming { .. } => {
                self.has_more_rows = false;
                return Err(inner.fail_client(CR_COMMANDS_OUT_OF_SYNC, None));
            }
        }

        let payload = match inner.set_mode(nonblocking).and_then(|()| inner.poll_recv()) {
            Ok(Poll::Ready(payload)) => payload,
            Ok(Poll::Pending) => return Ok(Poll::Pending),
            Err(e) => {
                self.has_more_rows = false;
                return Err(e);
            }
        };
        match inner.end_of_rows(&payload) {
            Ok(false) => {}
            Ok(true) => {
                self.has_more_rows = false;
                return Ok(Poll::Ready(None));
            }
            Err(e) => {
                self.has_more_rows = false;
                return Err(e);
            }
        }
        let values = match decode_text_row(&payload, self.fields.len()) {
            Ok(values) => values,
            Err(e) => {
                self.has_more_rows = false;
                return Err(inner.fail_protocol(e));
            }
        };
        *fetched += 1;
        Ok(Poll::Ready(Some(Row::new(values, Arc::clone(&self.fields)))))
    }

    /// Move the cursor to row `index`, clamped to the row count.
    pub fn data_seek(&mut self, index: u64) -> Result<()> {
        self.check_live(&self.session.lock())?;
        match &mut self.mode {
            Mode::Buffered { rows, cursor } => {
                *cursor = usize::try_from(index).unwrap_or(usize::MAX).min(rows.len());
                self.has_more_rows = *cursor < rows.len();
                Ok(())
            }
            Mode::Streamed { .. } => Err(Error::programming(
                "data_seek() cannot be used with connection.get_result(use=True)",
            )),
        }
    }

    /// Move the cursor relative to the start or the current row.
    ///
    /// Returns the previous position. `SeekFrom::End` is not supported.
    pub fn row_seek(&mut self, from: SeekFrom) -> Result<RowOffset> {
        self.check_live(&self.session.lock())?;
        let Mode::Buffered { rows, cursor } = &mut self.mode else {
            return Err(Error::programming("row_seek() cannot be used with connection.use_result()"));
        };
        let previous = RowOffset(*cursor);
        let target = match from {
            SeekFrom::Start(n) => usize::try_from(n).unwrap_or(usize::MAX),
            SeekFrom::Current(delta) => {
                let step = usize::try_from(delta.unsigned_abs()).unwrap_or(usize::MAX);
                if delta >= 0 {
                    cursor.saturating_add(step)
                } else {
                    cursor.saturating_sub(step)
                }
            }
            SeekFrom::End(_) => return Err(Error::programming("unsupported origin")),
        };
        *cursor = target.min(rows.len());
        self.has_more_rows = *cursor < rows.len();
        Ok(previous)
    }

    /// Return to a position obtained from [`row_tell`](Self::row_tell).
    pub fn seek_to(&mut self, offset: RowOffset) -> Result<RowOffset> {
        self.row_seek(SeekFrom::Start(offset.0 as u64))
    }

    /// Current cursor position.
    pub fn row_tell(&self) -> Result<RowOffset> {
        self.check_live(&self.session.lock())?;
        match &self.mode {
            Mode::Buffered { cursor, .. } => Ok(RowOffset(*cursor)),
            Mode::Streamed { .. } => Err(Error::programming(
                "row_tell() cannot be used with connection.use_result()",
            )),
        }
    }

    /// Release the result.
    ///
    /// Unread rows of a streamed result are drained from the wire so the
    /// session can send commands again. Freeing twice fails.
    pub fn free(&mut self) -> Result<()> {
        if self.freed {
            return Err(Error::programming(DESTROYED));
        }
        self.freed = true;
        self.has_more_rows = false;
        let id = match &mut self.mode {
            Mode::Buffered { rows, cursor } => {
                rows.clear();
                rows.shrink_to_fit();
                *cursor = 0;
                return Ok(());
            }
            Mode::Streamed { id, .. } => *id,
        };
        let mut inner = self.session.lock();
        if inner.wire != (WireState::Streaming { id }) {
            return Ok(());
        }
        tracing::debug!("draining streamed result");
        inner.block_on(drain)
    }

    /// Non-blocking [`free`](Self::free).
    #[cfg(feature = "nonblocking")]
    pub fn poll_free(&mut self) -> Result<AsyncStatus<()>> {
        if self.freed && !self.draining {
            return Err(Error::programming(DESTROYED));
        }
        let Mode::Streamed { id, .. } = self.mode else {
            return self.free().map(AsyncStatus::Complete);
        };
        self.freed = true;
        self.has_more_rows = false;
        let mut inner = self.session.lock();
        if inner.wire != (WireState::Streaming { id }) {
            self.draining = false;
            return Ok(AsyncStatus::Complete(()));
        }
        self.draining = true;
        let drained = inner.set_mode(true).and_then(|()| drain(&mut inner));
        match drained {
            Ok(Poll::Pending) => Ok(AsyncStatus::NotReady(inner.interest())),
            Ok(Poll::Ready(())) => {
                self.draining = false;
                Ok(AsyncStatus::Complete(()))
            }
            Err(e) => {
                self.draining = false;
                Err(e)
            }
        }
    }

    fn check_live(&self, inner: &SessionInner) -> Result<()> {
        if self.freed {
            return Err(Error::programming(DESTROYED));
        }
        inner.check_open()
    }
}

/// Read and discard rows until the end of the result.
fn drain(inner: &mut SessionInner) -> Result<Poll<()>> {
    loop {
        let payload = match inner.poll_recv()? {
            Poll::Ready(payload) => payload,
            Poll::Pending => return Ok(Poll::Pending),
        };
        if inner.end_of_rows(&payload)? {
            return Ok(Poll::Ready(()));
        }
    }
}

impl Iterator for ResultStream {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.fetch_row().transpose()
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        let Mode::Streamed { id, .. } = self.mode else {
            return;
        };
        let mut inner = self.session.lock();
        if inner.open && inner.wire == (WireState::Streaming { id }) {
            if let Err(e) = inner.block_on(drain) {
                tracing::debug!(error = %e, "failed to drain dropped result");
            }
        }
    }
}
