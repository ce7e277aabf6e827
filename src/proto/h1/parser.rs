//! Incremental request parsing.
//!
//! The parser owns a buffer of unconsumed bytes and is fed whatever the
//! transport produced, one fragment at a time; it tolerates any packet
//! boundary. Leftover bytes from a pipelined request survive a reset and
//! seed the next parse.

use std::mem;
use std::str::{self, FromStr};

use bytes::{Buf, BytesMut};
use percent_encoding::percent_decode_str;
use tracing::{debug, trace};

use super::decode::{ChunkedDecoder, ChunkedState};
use super::Reject;
use crate::headers::Headers;
use crate::limits::{
    MAX_BODY_BYTES, MAX_HEADER_BYTES, MAX_HEADER_COUNT, MAX_HEADER_LINE_LEN, MAX_REQUEST_BUFFER,
    MAX_REQUEST_LINE_LEN,
};
use crate::method::Method;
use crate::request::Request;
use crate::status::StatusCode;
use crate::version::Version;

/// What a `feed` produced.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Progress {
    /// A full request is parsed and waiting in [`Parser::take_request`].
    Complete,
    /// More bytes are needed.
    Incomplete,
}

/// Externally observable parser phase.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Phase {
    RequestLine,
    Headers,
    Body,
    ChunkSize,
    ChunkData,
    ChunkCrlf,
    ChunkTrailers,
    Complete,
    Error,
}

enum Stage {
    Head,
    Body,
    Chunked(ChunkedDecoder),
    Complete,
    Error,
}

/// The head of a request, parsed but awaiting its body.
struct Head {
    method: Method,
    path: String,
    query: Option<String>,
    version: Version,
    headers: Headers,
}

pub(crate) struct Parser {
    buf: BytesMut,
    stage: Stage,
    head: Option<Head>,
    body: BytesMut,
    content_length: usize,
    body_received: usize,
    header_count: usize,
    total_bytes: usize,
    chunked: bool,
    keep_alive: bool,
    seen_host: bool,
    complete: Option<Request>,
    reject: Option<Reject>,
}

impl Parser {
    pub(crate) fn new() -> Parser {
        Parser {
            buf: BytesMut::new(),
            stage: Stage::Head,
            head: None,
            body: BytesMut::new(),
            content_length: 0,
            body_received: 0,
            header_count: 0,
            total_bytes: 0,
            chunked: false,
            keep_alive: true,
            seen_host: false,
            complete: None,
            reject: None,
        }
    }

    /// Appends `bytes` and drives the state machine as far as they allow.
    ///
    /// An empty slice re-drives whatever is already buffered, which is how
    /// the connection discovers a pipelined request after a reset. Errors
    /// latch: once rejected, every further call reports the same rejection
    /// without consuming anything.
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Result<Progress, Reject> {
        if let Some(reject) = self.reject {
            return Err(reject);
        }
        if !bytes.is_empty() {
            if self.buf.len() + bytes.len() > MAX_REQUEST_BUFFER {
                let reject = match self.stage {
                    Stage::Head => Reject::fields_too_large("request buffer exhausted"),
                    _ => Reject::too_large("request buffer exhausted"),
                };
                return Err(self.latch(reject));
            }
            self.buf.extend_from_slice(bytes);
        }
        if matches!(self.stage, Stage::Complete) {
            return Ok(Progress::Complete);
        }

        let before = self.buf.len();
        let result = self.advance();
        self.total_bytes += before - self.buf.len();
        match result {
            Err(reject) => Err(self.latch(reject)),
            ok => ok,
        }
    }

    /// Returns to the request-line phase for the next request on the
    /// connection. With `preserve_buffer`, pipelined leftovers are kept.
    pub(crate) fn reset(&mut self, preserve_buffer: bool) {
        if !preserve_buffer {
            self.buf.clear();
        }
        self.stage = Stage::Head;
        self.head = None;
        self.body = BytesMut::new();
        self.content_length = 0;
        self.body_received = 0;
        self.header_count = 0;
        self.total_bytes = 0;
        self.chunked = false;
        self.keep_alive = true;
        self.seen_host = false;
        self.complete = None;
        self.reject = None;
    }

    /// The parsed request, once `feed` reported `Complete`.
    pub(crate) fn take_request(&mut self) -> Option<Request> {
        self.complete.take()
    }

    /// Keep-alive decision for the request most recently parsed.
    pub(crate) fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub(crate) fn phase(&self) -> Phase {
        match self.stage {
            Stage::Head => {
                if self.buf.iter().any(|&b| b == b'\n') {
                    Phase::Headers
                } else {
                    Phase::RequestLine
                }
            }
            Stage::Body => Phase::Body,
            Stage::Chunked(ref decoder) => match decoder.state() {
                ChunkedState::Size => Phase::ChunkSize,
                ChunkedState::Data => Phase::ChunkData,
                ChunkedState::DataCrlf => Phase::ChunkCrlf,
                ChunkedState::Trailers => Phase::ChunkTrailers,
                ChunkedState::End => Phase::Complete,
            },
            Stage::Complete => Phase::Complete,
            Stage::Error => Phase::Error,
        }
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> &[u8] {
        &self.buf
    }

    #[cfg(test)]
    pub(crate) fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    fn latch(&mut self, reject: Reject) -> Reject {
        debug!(status = reject.status.as_u16(), reason = reject.reason, "parse rejected");
        self.stage = Stage::Error;
        self.reject = Some(reject);
        reject
    }

    fn advance(&mut self) -> Result<Progress, Reject> {
        loop {
            match self.stage {
                Stage::Head => {
                    if !self.parse_head()? {
                        return Ok(Progress::Incomplete);
                    }
                }
                Stage::Body => {
                    let need = self.content_length - self.body_received;
                    let take = need.min(self.buf.len());
                    if take > 0 {
                        self.body.extend_from_slice(&self.buf[..take]);
                        self.buf.advance(take);
                        self.body_received += take;
                    }
                    if self.body_received < self.content_length {
                        return Ok(Progress::Incomplete);
                    }
                    self.finish();
                    return Ok(Progress::Complete);
                }
                Stage::Chunked(ref mut decoder) => {
                    let done = decoder.decode(&mut self.buf, &mut self.body)?;
                    self.body_received = self.body.len();
                    if !done {
                        return Ok(Progress::Incomplete);
                    }
                    self.finish();
                    return Ok(Progress::Complete);
                }
                Stage::Complete => return Ok(Progress::Complete),
                Stage::Error => {
                    // latched before advance is ever re-entered
                    return Ok(Progress::Incomplete);
                }
            }
        }
    }

    /// Attempts to parse the request line and header block off the front of
    /// the buffer. `Ok(true)` when the head is consumed and the stage moved
    /// on; `Ok(false)` when more bytes are needed.
    fn parse_head(&mut self) -> Result<bool, Reject> {
        if self.buf.is_empty() {
            return Ok(false);
        }
        self.check_head_limits()?;

        let (head, consumed) = {
            let mut slots = [httparse::EMPTY_HEADER; MAX_HEADER_COUNT];
            let mut req = httparse::Request::new(&mut slots);
            let consumed = match req.parse(&self.buf).map_err(reject_for)? {
                httparse::Status::Complete(len) => len,
                httparse::Status::Partial => return Ok(false),
            };
            if consumed > MAX_HEADER_BYTES {
                return Err(Reject::fields_too_large("header block too large"));
            }
            trace!(len = consumed, "head parsed");

            // httparse guarantees these on Complete
            let method = Method::from_str(req.method.expect("complete head has method"))
                .map_err(|_| Reject::new(StatusCode::NOT_IMPLEMENTED, "method not implemented"))?;
            let target = req.path.expect("complete head has target");
            if !target.starts_with('/') {
                return Err(Reject::bad_request("invalid request target"));
            }
            let (raw_path, query) = match target.split_once('?') {
                Some((p, q)) => (p, Some(q.to_string())),
                None => (target, None),
            };
            let path = percent_decode_str(raw_path)
                .decode_utf8()
                .map_err(|_| Reject::bad_request("invalid request target"))?
                .into_owned();
            let version = match req.version.expect("complete head has version") {
                0 => Version::Http10,
                _ => Version::Http11,
            };

            let mut headers = Headers::with_capacity(req.headers.len());
            for header in req.headers.iter() {
                let value = str::from_utf8(header.value)
                    .map_err(|_| Reject::bad_request("invalid header value"))?;
                headers.set(header.name, value.trim());
            }

            (
                Head {
                    method,
                    path,
                    query,
                    version,
                    headers,
                },
                consumed,
            )
        };

        self.buf.advance(consumed);
        self.header_count = head.headers.len();
        self.keep_alive = head.version.keep_alive_default();
        self.examine_headers(&head)?;
        self.head = Some(head);
        self.stage = if self.chunked {
            Stage::Chunked(ChunkedDecoder::new())
        } else {
            Stage::Body
        };
        Ok(true)
    }

    /// Applies the message-framing headers to the parser state.
    fn examine_headers(&mut self, head: &Head) -> Result<(), Reject> {
        let headers = &head.headers;

        self.chunked = false;
        if let Some(te) = headers.get("transfer-encoding") {
            if head.version == Version::Http10 {
                return Err(Reject::bad_request("transfer-encoding on HTTP/1.0"));
            }
            if !te
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("chunked"))
            {
                return Err(Reject::bad_request("unsupported transfer-encoding"));
            }
            self.chunked = true;
        }

        self.content_length = 0;
        if let Some(value) = headers.get("content-length") {
            if self.chunked {
                return Err(Reject::bad_request("conflicting message length"));
            }
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Reject::bad_request("invalid content-length"));
            }
            let len: u64 = value
                .parse()
                .map_err(|_| Reject::too_large("content-length too large"))?;
            if len > MAX_BODY_BYTES as u64 {
                return Err(Reject::too_large("content-length too large"));
            }
            self.content_length = len as usize;
        }

        if let Some(connection) = headers.get("connection") {
            for token in connection.split(',') {
                let token = token.trim();
                if token.eq_ignore_ascii_case("close") {
                    self.keep_alive = false;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    self.keep_alive = true;
                }
            }
        }

        self.seen_host = headers.contains("host");
        if head.version == Version::Http11 && !self.seen_host {
            return Err(Reject::bad_request("missing host header"));
        }
        Ok(())
    }

    /// Enforces line and block caps on the buffered head, before and
    /// independently of a complete parse.
    fn check_head_limits(&self) -> Result<(), Reject> {
        let buf = &self.buf[..];
        let mut line_start = 0;
        let mut first = true;
        for (i, &b) in buf.iter().enumerate() {
            if b != b'\n' {
                continue;
            }
            let line_len = i + 1 - line_start;
            if first {
                if line_len > MAX_REQUEST_LINE_LEN {
                    return Err(Reject::new(StatusCode::URI_TOO_LONG, "request line too long"));
                }
                first = false;
            } else {
                if line_len > MAX_HEADER_LINE_LEN {
                    return Err(Reject::fields_too_large("header line too long"));
                }
                if line_len <= 2 {
                    // blank line: the head ends here, the rest is body
                    return Ok(());
                }
            }
            line_start = i + 1;
        }
        // no terminator yet; the trailing partial line still counts
        let tail = buf.len() - line_start;
        if first {
            if tail > MAX_REQUEST_LINE_LEN {
                return Err(Reject::new(StatusCode::URI_TOO_LONG, "request line too long"));
            }
        } else if tail > MAX_HEADER_LINE_LEN {
            return Err(Reject::fields_too_large("header line too long"));
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(Reject::fields_too_large("header block too large"));
        }
        Ok(())
    }

    fn finish(&mut self) {
        let head = self.head.take().expect("head parsed before body");
        let body = mem::take(&mut self.body).freeze();
        self.complete = Some(Request::new(
            head.method,
            head.path,
            head.query,
            head.version,
            head.headers,
            body,
        ));
        self.stage = Stage::Complete;
    }
}

fn reject_for(err: httparse::Error) -> Reject {
    match err {
        httparse::Error::TooManyHeaders => Reject::fields_too_large("too many header fields"),
        httparse::Error::Version => Reject::bad_request("unsupported protocol version"),
        _ => Reject::bad_request("malformed request"),
    }
}
