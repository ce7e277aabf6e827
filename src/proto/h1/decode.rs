//! Chunked transfer decoding.

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use super::Reject;
use crate::limits::{MAX_BODY_BYTES, MAX_HEADER_COUNT, MAX_HEADER_LINE_LEN};

/// Where the decoder is inside the chunked framing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ChunkedState {
    /// Reading a hex size line (extensions after `;` are ignored).
    Size,
    /// Consuming chunk payload.
    Data,
    /// Expecting the CRLF that closes a chunk's payload.
    DataCrlf,
    /// Discarding trailer lines until the blank line.
    Trailers,
    /// The terminating chunk and trailers have been consumed.
    End,
}

/// Decodes a chunked body out of the connection buffer.
///
/// Payload bytes move from `buf` into `body`; framing bytes are discarded.
/// The decoder never reads past the end of the terminating blank line, so
/// pipelined bytes after the body survive in `buf`.
pub(crate) struct ChunkedDecoder {
    state: ChunkedState,
    remaining: usize,
    trailer_lines: usize,
}

impl ChunkedDecoder {
    pub(crate) fn new() -> ChunkedDecoder {
        ChunkedDecoder {
            state: ChunkedState::Size,
            remaining: 0,
            trailer_lines: 0,
        }
    }

    pub(crate) fn state(&self) -> ChunkedState {
        self.state
    }

    /// Advances as far as the buffered bytes allow. `Ok(true)` means the
    /// body is complete; `Ok(false)` means more input is needed.
    pub(crate) fn decode(&mut self, buf: &mut BytesMut, body: &mut BytesMut) -> Result<bool, Reject> {
        loop {
            match self.state {
                ChunkedState::Size => {
                    let line = match take_line(buf, MAX_HEADER_LINE_LEN)? {
                        Some(line) => line,
                        None => return Ok(false),
                    };
                    let size = parse_size_line(&line)?;
                    if size > MAX_BODY_BYTES - body.len() {
                        return Err(Reject::too_large("chunked body too large"));
                    }
                    trace!(size, "chunk size");
                    if size == 0 {
                        self.state = ChunkedState::Trailers;
                    } else {
                        self.remaining = size;
                        self.state = ChunkedState::Data;
                    }
                }
                ChunkedState::Data => {
                    if buf.is_empty() {
                        return Ok(false);
                    }
                    let take = self.remaining.min(buf.len());
                    body.extend_from_slice(&buf[..take]);
                    buf.advance(take);
                    self.remaining -= take;
                    if self.remaining > 0 {
                        return Ok(false);
                    }
                    self.state = ChunkedState::DataCrlf;
                }
                ChunkedState::DataCrlf => {
                    if buf.len() < 2 {
                        return Ok(false);
                    }
                    if &buf[..2] != b"\r\n" {
                        debug!("chunk data not terminated by CRLF");
                        return Err(Reject::bad_request("invalid chunk terminator"));
                    }
                    buf.advance(2);
                    self.state = ChunkedState::Size;
                }
                ChunkedState::Trailers => {
                    let line = match take_line(buf, MAX_HEADER_LINE_LEN)? {
                        Some(line) => line,
                        None => return Ok(false),
                    };
                    if line.is_empty() {
                        self.state = ChunkedState::End;
                        return Ok(true);
                    }
                    // trailers are read and discarded
                    self.trailer_lines += 1;
                    if self.trailer_lines > MAX_HEADER_COUNT {
                        return Err(Reject::fields_too_large("too many trailer fields"));
                    }
                }
                ChunkedState::End => return Ok(true),
            }
        }
    }
}

/// Splits one CRLF-terminated line off the front of `buf`, without the
/// terminator. `Ok(None)` when the line is still incomplete.
fn take_line(buf: &mut BytesMut, max_len: usize) -> Result<Option<Vec<u8>>, Reject> {
    match buf.iter().position(|&b| b == b'\n') {
        Some(lf) => {
            if lf + 1 > max_len {
                return Err(Reject::fields_too_large("chunk line too long"));
            }
            if lf == 0 || buf[lf - 1] != b'\r' {
                return Err(Reject::bad_request("chunk line missing CR"));
            }
            let mut line = buf.split_to(lf + 1);
            line.truncate(lf - 1);
            Ok(Some(line.to_vec()))
        }
        None => {
            if buf.len() > max_len {
                return Err(Reject::fields_too_large("chunk line too long"));
            }
            Ok(None)
        }
    }
}

/// Parses `HEXDIG+ [ OWS / ";" extension ]` into a chunk size.
fn parse_size_line(line: &[u8]) -> Result<usize, Reject> {
    let mut size: usize = 0;
    let mut digits = 0;
    let mut rest = line;
    while let Some((&b, tail)) = rest.split_first() {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b + 10 - b'a',
            b'A'..=b'F' => b + 10 - b'A',
            _ => break,
        };
        size = size
            .checked_mul(16)
            .and_then(|s| s.checked_add(digit as usize))
            .ok_or_else(|| Reject::too_large("chunk size overflow"))?;
        digits += 1;
        rest = tail;
    }
    if digits == 0 {
        return Err(Reject::bad_request("invalid chunk size"));
    }
    // only whitespace may separate the size from an ignored extension
    while let Some((&b, tail)) = rest.split_first() {
        match b {
            b' ' | b'\t' => rest = tail,
            b';' => return Ok(size),
            _ => return Err(Reject::bad_request("invalid chunk size")),
        }
    }
    Ok(size)
}
