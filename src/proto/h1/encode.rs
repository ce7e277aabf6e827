//! Response serialization and the non-blocking send loop.

use std::io;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use super::date;
use crate::io::{Transport, WriteStatus};
use crate::response::Response;

const AVERAGE_HEADER_SIZE: usize = 30;

/// Outcome of one pump over the socket.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Pump {
    /// The socket stopped accepting bytes; counters are intact, call again
    /// on write readiness.
    WouldBlock,
    /// Every header and body byte is on the wire.
    Done,
}

/// Serializes one response and pushes it out as the socket allows.
///
/// `Date`, `Content-Length`, and `Connection` are always injected by the
/// writer; everything else is emitted in insertion order with the casing
/// the handler used. A `Server` header is deliberately never added.
pub(crate) struct Writer {
    head: BytesMut,
    head_sent: usize,
    body: Bytes,
    body_sent: usize,
    closing: bool,
}

impl Writer {
    pub(crate) fn new() -> Writer {
        Writer {
            head: BytesMut::new(),
            head_sent: 0,
            body: Bytes::new(),
            body_sent: 0,
            closing: false,
        }
    }

    /// Whether the connection must close once this response is flushed.
    pub(crate) fn closing(&self) -> bool {
        self.closing
    }

    /// Serializes the status line and header block.
    ///
    /// A handler that pinned `Connection: close` wins over the
    /// connection's keep-alive wish.
    pub(crate) fn prepare(&mut self, res: &Response, keep_alive: bool) {
        let keep_alive = keep_alive && !res.forces_close();
        self.closing = !keep_alive;
        self.body = res.body_bytes();
        self.head_sent = 0;
        self.body_sent = 0;

        let headers = res.headers();
        self.head.clear();
        self.head
            .reserve(64 + date::DATE_VALUE_LENGTH + headers.len() * AVERAGE_HEADER_SIZE);

        let mut int_buf = itoa::Buffer::new();
        let status = res.status();
        self.head.extend_from_slice(b"HTTP/1.1 ");
        self.head
            .extend_from_slice(int_buf.format(status.as_u16()).as_bytes());
        self.head.extend_from_slice(b" ");
        self.head
            .extend_from_slice(status.canonical_reason().as_bytes());
        self.head.extend_from_slice(b"\r\n");

        self.head.extend_from_slice(b"Date: ");
        date::extend(&mut self.head);
        self.head.extend_from_slice(b"\r\n");

        self.head.extend_from_slice(b"Content-Length: ");
        self.head
            .extend_from_slice(int_buf.format(self.body.len()).as_bytes());
        self.head.extend_from_slice(b"\r\n");

        self.head.extend_from_slice(b"Connection: ");
        self.head.extend_from_slice(if keep_alive {
            b"keep-alive".as_ref()
        } else {
            b"close".as_ref()
        });
        self.head.extend_from_slice(b"\r\n");

        for (name, value) in headers.iter() {
            if name.eq_ignore_ascii_case("date")
                || name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("connection")
            {
                continue;
            }
            self.head.extend_from_slice(name.as_bytes());
            self.head.extend_from_slice(b": ");
            self.head.extend_from_slice(value.as_bytes());
            self.head.extend_from_slice(b"\r\n");
        }
        self.head.extend_from_slice(b"\r\n");

        trace!(
            status = status.as_u16(),
            head_len = self.head.len(),
            body_len = self.body.len(),
            "response prepared"
        );
    }

    /// Sends as many bytes as the transport will take right now.
    pub(crate) fn pump<T: Transport>(&mut self, io: &mut T) -> io::Result<Pump> {
        while self.head_sent < self.head.len() {
            match io.write(&self.head[self.head_sent..])? {
                WriteStatus::Ready(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "send returned 0"))
                }
                WriteStatus::Ready(n) => self.head_sent += n,
                WriteStatus::WouldBlock => return Ok(Pump::WouldBlock),
            }
        }
        while self.body_sent < self.body.len() {
            match io.write(&self.body[self.body_sent..])? {
                WriteStatus::Ready(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "send returned 0"))
                }
                WriteStatus::Ready(n) => self.body_sent += n,
                WriteStatus::WouldBlock => return Ok(Pump::WouldBlock),
            }
        }
        Ok(Pump::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::super::mock::{MockTransport, WriteScript};
    use super::{Pump, Writer};
    use crate::response::Response;
    use crate::status::StatusCode;

    fn emit(res: &Response, keep_alive: bool) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.prepare(res, keep_alive);
        let mut mock = MockTransport::new();
        assert_eq!(Pump::Done, writer.pump(&mut mock).unwrap());
        mock.written
    }

    fn emitted_str(res: &Response, keep_alive: bool) -> String {
        String::from_utf8(emit(res, keep_alive)).unwrap()
    }

    #[test]
    fn status_line_and_injected_headers() {
        let mut res = Response::new();
        res.send_text(StatusCode::OK, "hello");
        let wire = emitted_str(&res, true);
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("\r\nDate: "));
        assert!(wire.contains("\r\nContent-Length: 5\r\n"));
        assert!(wire.contains("\r\nConnection: keep-alive\r\n"));
        assert!(wire.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn content_length_matches_body() {
        let mut res = Response::new();
        res.set_body(vec![b'x'; 12345]);
        let wire = emit(&res, true);
        let text = String::from_utf8_lossy(&wire);
        assert!(text.contains("Content-Length: 12345\r\n"));
        let body_start = wire.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        assert_eq!(12345, wire.len() - body_start);
    }

    #[test]
    fn unknown_status_uses_ok_reason() {
        let mut res = Response::new();
        res.set_status(StatusCode::from_u16(799));
        let wire = emitted_str(&res, true);
        assert!(wire.starts_with("HTTP/1.1 799 OK\r\n"));
    }

    #[test]
    fn handler_headers_keep_order_and_casing() {
        let mut res = Response::new();
        res.set_header("X-First", "1");
        res.set_header("x-SECOND", "2");
        let wire = emitted_str(&res, true);
        let first = wire.find("X-First: 1\r\n").unwrap();
        let second = wire.find("x-SECOND: 2\r\n").unwrap();
        assert!(first < second);
    }

    #[test]
    fn set_cookie_emits_every_value() {
        let mut res = Response::new();
        res.set_header("Set-Cookie", "a=1");
        res.set_header("Set-Cookie", "b=2");
        let wire = emitted_str(&res, true);
        assert!(wire.contains("Set-Cookie: a=1\r\n"));
        assert!(wire.contains("Set-Cookie: b=2\r\n"));
    }

    #[test]
    fn forced_close_overrides_keep_alive() {
        let mut res = Response::new();
        res.set_header("Connection", "close");
        let mut writer = Writer::new();
        writer.prepare(&res, true);
        assert!(writer.closing());
        let mut mock = MockTransport::new();
        writer.pump(&mut mock).unwrap();
        let wire = String::from_utf8(mock.written).unwrap();
        assert!(wire.contains("Connection: close\r\n"));
        // the handler's own connection header is not emitted twice
        assert_eq!(1, wire.matches("Connection:").count());
    }

    #[test]
    fn pump_resumes_after_would_block() {
        let mut res = Response::new();
        res.send_text(StatusCode::OK, "0123456789");
        let mut writer = Writer::new();
        writer.prepare(&res, false);

        let mut mock = MockTransport::new();
        mock.writes.push_back(WriteScript::Accept(10));
        mock.writes.push_back(WriteScript::WouldBlock);
        assert_eq!(Pump::WouldBlock, writer.pump(&mut mock).unwrap());

        mock.writes.push_back(WriteScript::Accept(7));
        mock.writes.push_back(WriteScript::WouldBlock);
        assert_eq!(Pump::WouldBlock, writer.pump(&mut mock).unwrap());

        // unrestricted from here on
        assert_eq!(Pump::Done, writer.pump(&mut mock).unwrap());
        let wire = String::from_utf8(mock.written).unwrap();
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.ends_with("\r\n\r\n0123456789"));
    }
}
