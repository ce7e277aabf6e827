//! The per-connection state machine.
//!
//! One `Conn` drives a socket through read, parse, dispatch, serialize,
//! write, and reset (or close). The same machine runs under two drivers: a
//! blocking loop on a dedicated thread, or reactor callbacks on nonblocking
//! sockets. The drivers differ only in how they wait.

use std::cell::RefCell;
use std::net::{IpAddr, TcpStream};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::encode::{Pump, Writer};
use super::parser::{Parser, Progress};
use super::Reject;
use crate::io::{ReadStatus, Tcp, Transport};
use crate::reactor::{EventSink, Events, Reactor};
use crate::response::Response;
use crate::service::{RouteOutcome, Service};
use crate::status::StatusCode;

const READ_CHUNK: usize = 8192;

/// What the driver must arrange next.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Step {
    /// Wait for readable, then call `on_readable`.
    Read,
    /// A response is prepared; pump it.
    Write,
    /// The socket refused bytes; wait for writable, then pump again.
    WaitWrite,
    /// Tear the connection down.
    Close,
    /// A handler took the socket over; stop driving it, leave it open.
    Hijack,
}

pub(crate) struct Conn<T> {
    io: T,
    parser: Parser,
    writer: Writer,
    // kept until fully written so the `sent` latch lands on the real object
    response: Option<Response>,
    service: Arc<dyn Service>,
    keep_alive: bool,
    client_ip: Option<IpAddr>,
}

impl<T: Transport> Conn<T> {
    pub(crate) fn new(io: T, service: Arc<dyn Service>, client_ip: Option<IpAddr>) -> Conn<T> {
        Conn {
            io,
            parser: Parser::new(),
            writer: Writer::new(),
            response: None,
            service,
            keep_alive: true,
            client_ip,
        }
    }

    /// Reads until the transport runs dry, feeding the parser; dispatches
    /// as soon as a request completes.
    pub(crate) fn on_readable(&mut self) -> Step {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = match self.io.read(&mut chunk) {
                Ok(ReadStatus::Ready(n)) => n,
                Ok(ReadStatus::WouldBlock) => return Step::Read,
                Ok(ReadStatus::Eof) => {
                    trace!("peer closed");
                    return Step::Close;
                }
                Err(e) => {
                    warn!(error = %e, "read failed");
                    return Step::Close;
                }
            };
            match self.parser.feed(&chunk[..n]) {
                Ok(Progress::Complete) => return self.dispatch(),
                Ok(Progress::Incomplete) => continue,
                Err(reject) => return self.reject(reject),
            }
        }
    }

    /// Pumps the prepared response; on completion either resets for
    /// keep-alive (taking the pipelining fast path when the next request is
    /// already buffered) or closes.
    pub(crate) fn on_writable(&mut self) -> Step {
        match self.writer.pump(&mut self.io) {
            Ok(Pump::WouldBlock) => Step::WaitWrite,
            Ok(Pump::Done) => self.finish_response(),
            Err(e) => {
                warn!(error = %e, "write failed");
                Step::Close
            }
        }
    }

    fn dispatch(&mut self) -> Step {
        let mut req = match self.parser.take_request() {
            Some(req) => req,
            None => {
                debug!("dispatch without a completed request");
                return Step::Close;
            }
        };
        if let Some(ip) = self.client_ip {
            req.set_client_ip(ip);
        }
        self.keep_alive = self.parser.keep_alive();

        let mut res = Response::new();
        trace!(method = %req.method(), path = req.path(), "dispatching");
        match self.service.route(&mut req, &mut res) {
            RouteOutcome::Matched => {}
            RouteOutcome::NotMatched => res.send_text(StatusCode::NOT_FOUND, "Not Found"),
        }

        if res.is_hijacked() {
            debug!("connection hijacked by handler");
            self.io.relinquish();
            return Step::Hijack;
        }

        self.keep_alive = self.keep_alive && !res.forces_close();
        self.writer.prepare(&res, self.keep_alive);
        self.keep_alive = !self.writer.closing();
        self.response = Some(res);
        Step::Write
    }

    fn reject(&mut self, reject: Reject) -> Step {
        debug!(
            status = reject.status.as_u16(),
            reason = reject.reason,
            "sending error response"
        );
        let mut res = Response::new();
        res.send_text(reject.status, reject.reason);
        self.keep_alive = false;
        self.writer.prepare(&res, false);
        self.response = Some(res);
        Step::Write
    }

    fn finish_response(&mut self) -> Step {
        if let Some(mut res) = self.response.take() {
            res.mark_sent();
        }
        if !self.keep_alive {
            return Step::Close;
        }
        self.parser.reset(true);
        // fast path: a pipelined request may already be buffered whole, in
        // which case the next dispatch happens without touching the driver
        match self.parser.feed(&[]) {
            Ok(Progress::Complete) => self.dispatch(),
            Ok(Progress::Incomplete) => Step::Read,
            Err(reject) => self.reject(reject),
        }
    }
}

/// Runs the machine to completion with blocking reads and writes.
///
/// The parser and writer behave identically to reactor mode; blocking
/// transports simply never report `WouldBlock`.
pub(crate) fn run_blocking<T: Transport>(mut conn: Conn<T>) {
    let mut step = Step::Read;
    loop {
        step = match step {
            Step::Read => conn.on_readable(),
            Step::Write | Step::WaitWrite => conn.on_writable(),
            Step::Close | Step::Hijack => return,
        };
    }
}

/// A connection driven by reactor callbacks.
///
/// Interest alternates between read and write, switching at most once per
/// FSM cycle; close deregisters before the record drops (which closes the
/// descriptor).
pub(crate) struct ReactorConn {
    conn: Conn<Tcp>,
    fd: RawFd,
}

impl ReactorConn {
    /// Makes `stream` nonblocking and registers it for read readiness.
    pub(crate) fn register(
        reactor: &mut Reactor,
        stream: TcpStream,
        service: Arc<dyn Service>,
        client_ip: Option<IpAddr>,
    ) -> crate::Result<()> {
        stream
            .set_nonblocking(true)
            .map_err(crate::error::Error::new_accept)?;
        let io = Tcp::new(stream);
        let fd = io.raw_fd().expect("fresh transport has a descriptor");
        let conn = Rc::new(RefCell::new(ReactorConn {
            conn: Conn::new(io, service, client_ip),
            fd,
        }));
        reactor.add(fd, Events::READ, conn)
    }

    fn apply(&mut self, reactor: &mut Reactor, mut step: Step) {
        loop {
            match step {
                // flush eagerly; the socket is almost always writable
                Step::Write => step = self.conn.on_writable(),
                Step::Read => {
                    let _ = reactor.modify(self.fd, Events::READ);
                    return;
                }
                Step::WaitWrite => {
                    let _ = reactor.modify(self.fd, Events::WRITE);
                    return;
                }
                Step::Close | Step::Hijack => {
                    if let Err(e) = reactor.remove(self.fd) {
                        debug!(fd = self.fd, error = %e, "deregister on close");
                    }
                    return;
                }
            }
        }
    }
}

impl EventSink for ReactorConn {
    fn on_event(&mut self, reactor: &mut Reactor, fd: RawFd, events: Events) {
        debug_assert_eq!(self.fd, fd);
        if events.contains(Events::ERROR) {
            trace!(fd, "socket error event");
            let _ = reactor.remove(self.fd);
            return;
        }
        let step = if events.contains(Events::WRITE) {
            self.conn.on_writable()
        } else if events.contains(Events::READ) {
            self.conn.on_readable()
        } else {
            return;
        };
        self.apply(reactor, step);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::mock::{MockTransport, ReadScript, WriteScript};
    use super::{run_blocking, Conn, Step};
    use crate::request::Request;
    use crate::response::Response;
    use crate::service::RouteOutcome;
    use crate::status::StatusCode;

    fn echo_service() -> Arc<dyn crate::service::Service> {
        Arc::new(|req: &mut Request, res: &mut Response| {
            let body = String::from_utf8_lossy(req.body()).into_owned();
            res.send_text(StatusCode::OK, &format!("{}:{}", req.path(), body));
            RouteOutcome::Matched
        })
    }

    fn responses(written: &[u8]) -> Vec<String> {
        // split on status lines to count responses on the wire
        let text = String::from_utf8_lossy(written);
        let mut out = Vec::new();
        for part in text.split("HTTP/1.1 ") {
            if !part.is_empty() {
                out.push(format!("HTTP/1.1 {}", part));
            }
        }
        out
    }

    #[test]
    fn single_request_close() {
        let mock = MockTransport::with_reads(vec![
            ReadScript::Data(b"GET /a HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n".to_vec()),
            ReadScript::Eof,
        ]);
        let mut conn = Conn::new(mock, echo_service(), None);
        let step = conn.on_readable();
        assert_eq!(Step::Write, step);
        assert_eq!(Step::Close, conn.on_writable());
        let wire = String::from_utf8(conn.io.written).unwrap();
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("Connection: close\r\n"));
        assert!(wire.ends_with("/a:"));
    }

    #[test]
    fn keep_alive_pipelining_in_one_buffer() {
        // both requests arrive in a single read; the second response must
        // follow without another read
        let mock = MockTransport::with_reads(vec![ReadScript::Data(
            b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n\
              GET /b HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n"
                .to_vec(),
        )]);
        let mut conn = Conn::new(mock, echo_service(), None);

        assert_eq!(Step::Write, conn.on_readable());
        // response A flushes, fast path prepares response B immediately
        assert_eq!(Step::Write, conn.on_writable());
        // response B flushes and the connection closes
        assert_eq!(Step::Close, conn.on_writable());

        let wire = conn.io.written.clone();
        let parts = responses(&wire);
        assert_eq!(2, parts.len());
        assert!(parts[0].contains("Connection: keep-alive"));
        assert!(parts[0].contains("/a:"));
        assert!(parts[1].contains("Connection: close"));
        assert!(parts[1].contains("/b:"));
        let a_pos = wire.windows(3).position(|w| w == b"/a:").unwrap();
        let b_pos = wire.windows(3).position(|w| w == b"/b:").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn parse_error_answers_then_closes() {
        let mock = MockTransport::with_reads(vec![ReadScript::Data(
            b"GET / HTTP/1.1\r\n\r\n".to_vec(),
        )]);
        let mut conn = Conn::new(mock, echo_service(), None);
        assert_eq!(Step::Write, conn.on_readable());
        assert_eq!(Step::Close, conn.on_writable());
        let wire = String::from_utf8(conn.io.written).unwrap();
        assert!(wire.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(wire.contains("Connection: close\r\n"));
        assert!(wire.contains("missing host header"));
    }

    #[test]
    fn eof_before_request_closes_silently() {
        let mock = MockTransport::with_reads(vec![ReadScript::Eof]);
        let mut conn = Conn::new(mock, echo_service(), None);
        assert_eq!(Step::Close, conn.on_readable());
        assert!(conn.io.written.is_empty());
    }

    #[test]
    fn would_block_waits_for_more() {
        let mock = MockTransport::with_reads(vec![
            ReadScript::Data(b"GET /a HTTP".to_vec()),
            ReadScript::WouldBlock,
        ]);
        let mut conn = Conn::new(mock, echo_service(), None);
        assert_eq!(Step::Read, conn.on_readable());
    }

    #[test]
    fn write_backpressure_pauses_the_machine() {
        let mut mock = MockTransport::with_reads(vec![ReadScript::Data(
            b"GET /a HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n".to_vec(),
        )]);
        mock.writes.push_back(WriteScript::Accept(5));
        mock.writes.push_back(WriteScript::WouldBlock);
        let mut conn = Conn::new(mock, echo_service(), None);
        assert_eq!(Step::Write, conn.on_readable());
        assert_eq!(Step::WaitWrite, conn.on_writable());
        // writable again: the remainder drains
        assert_eq!(Step::Close, conn.on_writable());
        let wire = String::from_utf8(conn.io.written).unwrap();
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn blocking_driver_runs_to_close() {
        // two sequential requests, the second asks to close; the driver
        // must terminate on its own
        let mock = MockTransport::with_reads(vec![
            ReadScript::Data(b"POST /e HTTP/1.1\r\nHost: x\r\nContent-Length: 2\r\n\r\nhi".to_vec()),
            ReadScript::Data(b"GET /two HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n".to_vec()),
        ]);
        let conn = Conn::new(mock, echo_service(), None);
        run_blocking(conn);
    }

    #[test]
    fn hijacked_connection_stops_the_machine() {
        let service = Arc::new(|_req: &mut Request, res: &mut Response| {
            res.hijack();
            RouteOutcome::Matched
        });
        let mock = MockTransport::with_reads(vec![ReadScript::Data(
            b"GET /ws HTTP/1.1\r\nHost: x\r\n\r\n".to_vec(),
        )]);
        let mut conn = Conn::new(mock, service, None);
        assert_eq!(Step::Hijack, conn.on_readable());
        assert!(conn.io.written.is_empty());
    }

    #[test]
    fn untouched_response_is_valid_empty_200() {
        let service = Arc::new(|_req: &mut Request, _res: &mut Response| RouteOutcome::Matched);
        let mock = MockTransport::with_reads(vec![ReadScript::Data(
            b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n".to_vec(),
        )]);
        let mut conn = Conn::new(mock, service, None);
        assert_eq!(Step::Write, conn.on_readable());
        assert_eq!(Step::Close, conn.on_writable());
        let wire = String::from_utf8(conn.io.written).unwrap();
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("Content-Length: 0\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn not_matched_is_automatic_404() {
        let service = Arc::new(|_req: &mut Request, _res: &mut Response| RouteOutcome::NotMatched);
        let mock = MockTransport::with_reads(vec![ReadScript::Data(
            b"GET /missing HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n".to_vec(),
        )]);
        let mut conn = Conn::new(mock, service, None);
        assert_eq!(Step::Write, conn.on_readable());
        assert_eq!(Step::Close, conn.on_writable());
        let wire = String::from_utf8(conn.io.written).unwrap();
        assert!(wire.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(wire.ends_with("Not Found"));
    }
}
