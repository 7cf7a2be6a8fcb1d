//! Duplex socket abstraction
//!
//! The pump only needs a blocking byte stream whose reads and writes can be
//! bounded by a deadline. [`DuplexSocket`] captures exactly that, and is
//! implemented for [`std::net::TcpStream`].

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};

/// Outcome of a single socket read or write.
///
/// Unlike `io::Result<usize>`, a transfer can carry both progress and an
/// error, which is how a write deadline reports a partially written buffer.
#[derive(Debug)]
pub struct Transfer {
    /// Bytes moved before the call returned
    pub bytes: usize,
    /// Error that ended the call, if any
    pub error: Option<io::Error>,
}

impl Transfer {
    pub fn complete(bytes: usize) -> Self {
        Self { bytes, error: None }
    }

    pub fn failed(bytes: usize, error: io::Error) -> Self {
        Self {
            bytes,
            error: Some(error),
        }
    }

    pub fn timeout(bytes: usize) -> Self {
        Self::failed(bytes, io::Error::from(io::ErrorKind::TimedOut))
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_ref().is_some_and(is_timeout)
    }
}

/// True if `err` is a deadline expiry rather than a real failure.
///
/// Unix reports an expired `SO_RCVTIMEO`/`SO_SNDTIMEO` as `WouldBlock`,
/// Windows as `TimedOut`.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// A connected, bidirectional byte stream with independent read and write deadlines.
///
/// One thread reads while another writes, so every method takes `&self`.
#[cfg_attr(test, mockall::automock)]
pub trait DuplexSocket: Send + Sync {
    /// Bound how long the next read may block
    fn set_read_deadline(&self, timeout: Duration) -> io::Result<()>;

    /// Bound how long the next write may block
    fn set_write_deadline(&self, timeout: Duration) -> io::Result<()>;

    /// Read into `buf`, blocking until data arrives, the deadline expires or the stream fails
    fn read(&self, buf: &mut [u8]) -> Transfer;

    /// Write all of `buf`, blocking until done, the deadline expires or the stream fails.
    ///
    /// The deadline bounds the whole call, not each underlying send. A timeout
    /// reports the bytes already written in [`Transfer::bytes`].
    fn write(&self, buf: &[u8]) -> Transfer;

    /// Close the stream in both directions
    fn close(&self) -> io::Result<()>;
}

impl DuplexSocket for TcpStream {
    fn set_read_deadline(&self, timeout: Duration) -> io::Result<()> {
        self.set_read_timeout(Some(timeout))
    }

    fn set_write_deadline(&self, timeout: Duration) -> io::Result<()> {
        self.set_write_timeout(Some(timeout))
    }

    fn read(&self, buf: &mut [u8]) -> Transfer {
        loop {
            match Read::read(&mut &*self, buf) {
                Ok(0) if !buf.is_empty() => {
                    return Transfer::failed(
                        0,
                        io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "peer closed the connection",
                        ),
                    );
                }
                Ok(n) => return Transfer::complete(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Transfer::failed(0, e),
            }
        }
    }

    fn write(&self, buf: &[u8]) -> Transfer {
        // SO_SNDTIMEO restarts on every send, so shrink it as the deadline nears
        let deadline = match self.write_timeout() {
            Ok(timeout) => timeout.map(|timeout| Instant::now() + timeout),
            Err(e) => return Transfer::failed(0, e),
        };

        let mut written = 0;
        while written < buf.len() {
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Transfer::timeout(written);
                }
                if let Err(e) = self.set_write_timeout(Some(remaining)) {
                    return Transfer::failed(written, e);
                }
            }

            match Write::write(&mut &*self, &buf[written..]) {
                Ok(0) => {
                    return Transfer::failed(written, io::Error::from(io::ErrorKind::WriteZero));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Transfer::failed(written, e),
            }
        }
        Transfer::complete(written)
    }

    fn close(&self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            // Already torn down by the peer
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}
