//! Socket transports.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::Path;
use std::time::Duration;

use crate::error::CodecError;

/// A connected stream socket.
#[derive(Debug)]
pub enum Transport {
    /// TCP/IP connection.
    Tcp(TcpStream),
    /// Unix domain socket connection.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Transport {
    /// Resolve `host` and connect to the first address that accepts.
    ///
    /// `timeout` bounds each individual connection attempt.
    pub fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self, CodecError> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|_| CodecError::UnknownHost(host.to_string()))?
            .collect();
        if addrs.is_empty() {
            return Err(CodecError::UnknownHost(host.to_string()));
        }

        let mut last_error = None;
        for addr in addrs {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    tracing::debug!(%addr, "TCP connection established");
                    return Ok(Self::Tcp(stream));
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "TCP connection attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.map_or_else(|| CodecError::UnknownHost(host.to_string()), CodecError::Io))
    }

    /// Connect to a Unix domain socket.
    #[cfg(unix)]
    pub fn connect_unix(path: &Path) -> Result<Self, CodecError> {
        let stream = UnixStream::connect(path)?;
        tracing::debug!(path = %path.display(), "unix socket connection established");
        Ok(Self::Unix(stream))
    }

    /// Whether this is a Unix domain socket.
    #[must_use]
    pub fn is_unix(&self) -> bool {
        match self {
            Self::Tcp(_) => false,
            #[cfg(unix)]
            Self::Unix(_) => true,
        }
    }

    /// Switch the socket between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Self::Unix(s) => s.set_nonblocking(nonblocking),
        }
    }

    /// Set read and write timeouts used in blocking mode.
    pub fn set_timeouts(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)
            }
            #[cfg(unix)]
            Self::Unix(s) => {
                s.set_read_timeout(timeout)?;
                s.set_write_timeout(timeout)
            }
        }
    }

    /// Shut down both directions. Errors are ignored; the peer may be gone.
    pub fn shutdown(&self) {
        let _ = match self {
            Self::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(s) => s.shutdown(Shutdown::Both),
        };
    }

    /// Raw descriptor for readiness polling.
    #[cfg(unix)]
    #[must_use]
    pub fn as_raw_fd(&self) -> std::os::fd::RawFd {
        use std::os::fd::AsRawFd;
        match self {
            Self::Tcp(s) => s.as_raw_fd(),
            Self::Unix(s) => s.as_raw_fd(),
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Self::Unix(s) => s.flush(),
        }
    }
}
