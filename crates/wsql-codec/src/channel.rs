//! Resumable packet channel over a std socket.
//!
//! The channel keeps its own read and write buffers, so an operation that
//! stops halfway (because a non-blocking socket returned `WouldBlock`) can be
//! resumed later without losing bytes. The same methods back both modes:
//! blocking callers wrap them in [`Channel::flush`] and [`Channel::recv`],
//! non-blocking callers use [`Channel::poll_flush`] and
//! [`Channel::poll_recv`] directly.

use std::io::{self, Read, Write};
use std::task::Poll;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;
use crate::message::MessageAssembler;
use crate::packet_codec::MySqlCodec;
use crate::transport::Transport;

const READ_CHUNK: usize = 16 * 1024;

/// I/O direction a pending operation is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    /// Wait until the descriptor is readable.
    Read,
    /// Wait until the descriptor is writable.
    Write,
}

/// A framed, resumable MySQL connection.
#[derive(Debug)]
pub struct Channel {
    transport: Transport,
    codec: MySqlCodec,
    assembler: MessageAssembler,
    read_buf: BytesMut,
    write_buf: BytesMut,
    nonblocking: bool,
    interest: Interest,
}

impl Channel {
    /// Wrap a connected transport. The socket is left in blocking mode.
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            codec: MySqlCodec::new(),
            assembler: MessageAssembler::new(),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
            nonblocking: false,
            interest: Interest::Read,
        }
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Switch the socket mode; a no-op when already in `nonblocking` mode.
    pub fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), CodecError> {
        if self.nonblocking != nonblocking {
            self.transport.set_nonblocking(nonblocking)?;
            self.nonblocking = nonblocking;
        }
        Ok(())
    }

    /// Whether the socket is in non-blocking mode.
    #[must_use]
    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    /// Set read/write timeouts for blocking mode.
    pub fn set_timeouts(&self, timeout: Option<Duration>) -> Result<(), CodecError> {
        self.transport.set_timeouts(timeout)?;
        Ok(())
    }

    /// Direction the last `Pending` result was waiting on.
    #[must_use]
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Restart packet numbering for a new command.
    pub fn reset_sequence(&mut self) {
        self.codec.reset_sequence();
        self.assembler.clear();
    }

    /// Queue a payload for sending. No I/O happens until a flush.
    pub fn send(&mut self, payload: Bytes) -> Result<(), CodecError> {
        self.codec.encode(payload, &mut self.write_buf)
    }

    /// Whether queued bytes remain unsent.
    #[must_use]
    pub fn has_pending_write(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Write as much queued data as the socket accepts.
    pub fn poll_flush(&mut self) -> Result<Poll<()>, CodecError> {
        while !self.write_buf.is_empty() {
            match self.transport.write(&self.write_buf) {
                Ok(0) => return Err(CodecError::ConnectionClosed),
                Ok(n) => self.write_buf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if would_block(&e) => {
                    self.interest = Interest::Write;
                    return Ok(Poll::Pending);
                }
                Err(e) => return Err(e.into()),
            }
        }
        match self.transport.flush() {
            Ok(()) => Ok(Poll::Ready(())),
            Err(e) if would_block(&e) => {
                self.interest = Interest::Write;
                Ok(Poll::Pending)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read until one complete payload is available.
    pub fn poll_recv(&mut self) -> Result<Poll<Bytes>, CodecError> {
        loop {
            if let Some(packet) = self.codec.decode(&mut self.read_buf)? {
                if let Some(payload) = self.assembler.push(packet) {
                    return Ok(Poll::Ready(payload));
                }
                continue;
            }

            let mut chunk = [0u8; READ_CHUNK];
            match self.transport.read(&mut chunk) {
                Ok(0) => return Err(CodecError::ConnectionClosed),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if would_block(&e) => {
                    self.interest = Interest::Read;
                    return Ok(Poll::Pending);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Blocking flush. The socket is put in blocking mode first.
    pub fn flush(&mut self) -> Result<(), CodecError> {
        self.set_nonblocking(false)?;
        match self.poll_flush()? {
            Poll::Ready(()) => Ok(()),
            Poll::Pending => Err(CodecError::TimedOut),
        }
    }

    /// Blocking receive. The socket is put in blocking mode first.
    pub fn recv(&mut self) -> Result<Bytes, CodecError> {
        self.set_nonblocking(false)?;
        match self.poll_recv()? {
            Poll::Ready(payload) => Ok(payload),
            Poll::Pending => Err(CodecError::TimedOut),
        }
    }

    /// Queue and flush a payload in blocking mode.
    pub fn write_payload(&mut self, payload: Bytes) -> Result<(), CodecError> {
        self.send(payload)?;
        self.flush()
    }

    /// Shut the socket down; further I/O fails.
    pub fn shutdown(&mut self) {
        self.write_buf.clear();
        self.read_buf.clear();
        self.transport.shutdown();
    }

    /// Raw descriptor for readiness polling.
    #[cfg(unix)]
    #[must_use]
    pub fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.transport.as_raw_fd()
    }
}

// Blocking sockets with a timeout report expiry as WouldBlock on unix and
// TimedOut on windows.
fn would_block(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
