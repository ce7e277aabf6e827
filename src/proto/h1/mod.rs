//! HTTP/1.x connection machinery: parser, writer, and the per-connection
//! state machine that drives them.

pub(crate) mod conn;
mod date;
mod decode;
mod encode;
pub(crate) mod parser;

use crate::status::StatusCode;

/// A terminal parse failure, latched by the parser and turned into the
/// error response sent before closing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Reject {
    pub(crate) status: StatusCode,
    pub(crate) reason: &'static str,
}

impl Reject {
    pub(crate) fn new(status: StatusCode, reason: &'static str) -> Reject {
        Reject { status, reason }
    }

    pub(crate) fn bad_request(reason: &'static str) -> Reject {
        Reject::new(StatusCode::BAD_REQUEST, reason)
    }

    pub(crate) fn too_large(reason: &'static str) -> Reject {
        Reject::new(StatusCode::PAYLOAD_TOO_LARGE, reason)
    }

    pub(crate) fn fields_too_large(reason: &'static str) -> Reject {
        Reject::new(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE, reason)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::io;

    use crate::io::{ReadStatus, Transport, WriteStatus};

    /// Scripted transport for exercising the parser, writer, and FSM
    /// without sockets.
    pub(crate) enum ReadScript {
        Data(Vec<u8>),
        WouldBlock,
        Eof,
    }

    pub(crate) enum WriteScript {
        /// Accept at most this many bytes.
        Accept(usize),
        WouldBlock,
    }

    pub(crate) struct MockTransport {
        pub(crate) reads: VecDeque<ReadScript>,
        pub(crate) writes: VecDeque<WriteScript>,
        pub(crate) written: Vec<u8>,
    }

    impl MockTransport {
        pub(crate) fn new() -> MockTransport {
            MockTransport {
                reads: VecDeque::new(),
                writes: VecDeque::new(),
                written: Vec::new(),
            }
        }

        pub(crate) fn with_reads<I>(reads: I) -> MockTransport
        where
            I: IntoIterator<Item = ReadScript>,
        {
            let mut mock = MockTransport::new();
            mock.reads = reads.into_iter().collect();
            mock
        }
    }

    impl Transport for MockTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadStatus> {
            match self.reads.pop_front() {
                Some(ReadScript::Data(data)) => {
                    assert!(data.len() <= buf.len(), "mock read larger than buffer");
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(ReadStatus::Ready(data.len()))
                }
                Some(ReadScript::WouldBlock) => Ok(ReadStatus::WouldBlock),
                Some(ReadScript::Eof) | None => Ok(ReadStatus::Eof),
            }
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<WriteStatus> {
            match self.writes.pop_front() {
                Some(WriteScript::Accept(limit)) => {
                    let n = limit.min(buf.len());
                    self.written.extend_from_slice(&buf[..n]);
                    Ok(WriteStatus::Ready(n))
                }
                Some(WriteScript::WouldBlock) => Ok(WriteStatus::WouldBlock),
                None => {
                    self.written.extend_from_slice(buf);
                    Ok(WriteStatus::Ready(buf.len()))
                }
            }
        }
    }
}
