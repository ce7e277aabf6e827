//! Byte-stream abstraction between the wire machinery and the socket.
//!
//! The parser and writer never learn whether bytes crossed a TLS boundary:
//! they speak to a [`Transport`], and a TLS adapter can implement the same
//! trait over an encrypted stream.

use std::io::{self, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};

/// Outcome of one non-destructive read attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n` bytes were placed at the front of the buffer.
    Ready(usize),
    /// The stream has nothing buffered; try again on readiness.
    WouldBlock,
    /// Orderly end of stream.
    Eof,
}

/// Outcome of one write attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteStatus {
    /// `n` bytes were accepted by the stream.
    Ready(usize),
    /// The stream cannot accept bytes right now; try again on readiness.
    WouldBlock,
}

/// A duplex byte stream.
///
/// Signal-interrupted calls are retried internally; `WouldBlock` is the only
/// soft failure surfaced. Blocking streams simply never return it.
pub trait Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadStatus>;

    fn write(&mut self, buf: &[u8]) -> io::Result<WriteStatus>;

    /// Gives up ownership of the underlying descriptor without closing it,
    /// for connections a handler has hijacked. Further reads report EOF.
    fn relinquish(&mut self) {}
}

/// [`Transport`] over a plain TCP socket, blocking or not.
pub struct Tcp {
    stream: Option<TcpStream>,
}

impl Tcp {
    pub fn new(stream: TcpStream) -> Tcp {
        Tcp {
            stream: Some(stream),
        }
    }

    #[cfg(unix)]
    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(|s| s.as_raw_fd())
    }
}

impl Transport for Tcp {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadStatus> {
        let stream = match self.stream {
            Some(ref mut s) => s,
            None => return Ok(ReadStatus::Eof),
        };
        loop {
            return match stream.read(buf) {
                Ok(0) => Ok(ReadStatus::Eof),
                Ok(n) => Ok(ReadStatus::Ready(n)),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadStatus::WouldBlock),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<WriteStatus> {
        let stream = match self.stream {
            Some(ref mut s) => s,
            None => return Err(io::Error::new(io::ErrorKind::NotConnected, "relinquished")),
        };
        loop {
            return match stream.write(buf) {
                Ok(n) => Ok(WriteStatus::Ready(n)),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(WriteStatus::WouldBlock),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
        }
    }

    #[cfg(unix)]
    fn relinquish(&mut self) {
        if let Some(stream) = self.stream.take() {
            // the handler owns the descriptor now; keep it open
            let _ = stream.into_raw_fd();
        }
    }

    #[cfg(not(unix))]
    fn relinquish(&mut self) {
        self.stream.take();
    }
}
