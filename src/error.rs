//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;

use crate::status::StatusCode;

/// Result type often returned from methods that can have ember `Error`s.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur while serving HTTP streams.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// The peer sent a message that could not be parsed into a request.
    Parse(StatusCode, &'static str),
    /// An `io::Error` while reading or writing a network stream.
    Io,
    /// Error creating the listening socket.
    Listen,
    /// Error accepting a connection.
    Accept,
    /// The readiness backend failed in a non-retryable way.
    Reactor,
    /// A descriptor was registered twice.
    DuplicateFd,
    /// A descriptor or timer id was not registered.
    NotFound,
    /// The one-shot timer table is full.
    TimerCapacity,
    /// Error decoding a request body at a typed boundary (JSON, form).
    Body,
    /// The connection pool could not produce a connection in time.
    PoolTimeout,
    /// The pool manager failed to establish a connection.
    PoolConnect,
    /// A template file could not be loaded.
    Template,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    #[cfg_attr(not(test), allow(unused))]
    pub(crate) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    pub(crate) fn new_listen(cause: std::io::Error) -> Error {
        Error::new(Kind::Listen).with(cause)
    }

    pub(crate) fn new_accept(cause: std::io::Error) -> Error {
        Error::new(Kind::Accept).with(cause)
    }

    pub(crate) fn new_reactor(cause: std::io::Error) -> Error {
        Error::new(Kind::Reactor).with(cause)
    }

    #[cfg_attr(not(test), allow(unused))]
    pub(crate) fn new_parse(status: StatusCode, reason: &'static str) -> Error {
        Error::new(Kind::Parse(status, reason))
    }

    /// Returns true if this was an HTTP parse error.
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(..))
    }

    /// Returns true if this error wraps a network `io::Error`.
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io | Kind::Listen | Kind::Accept)
    }

    /// Returns true if the pool acquire wait expired.
    pub fn is_pool_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::PoolTimeout)
    }

    /// The status code a parse error maps to on the wire, if any.
    pub fn parse_status(&self) -> Option<StatusCode> {
        match self.inner.kind {
            Kind::Parse(status, _) => Some(status),
            _ => None,
        }
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Parse(_, reason) => reason,
            Kind::Io => "connection error",
            Kind::Listen => "error creating listener",
            Kind::Accept => "error accepting connection",
            Kind::Reactor => "reactor backend error",
            Kind::DuplicateFd => "descriptor already registered",
            Kind::NotFound => "descriptor or timer not registered",
            Kind::TimerCapacity => "timer table full",
            Kind::Body => "error decoding request body",
            Kind::PoolTimeout => "timed out waiting for a pooled connection",
            Kind::PoolConnect => "pool failed to establish a connection",
            Kind::Template => "error loading template",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("ember::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref cause) = self.inner.cause {
            write!(f, "{}: {}", self.description(), cause)
        } else {
            f.write_str(self.description())
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_size_of() {
        assert_eq!(
            std::mem::size_of::<Error>(),
            std::mem::size_of::<usize>()
        );
    }

    #[test]
    fn parse_status() {
        let err = Error::new_parse(StatusCode::BAD_REQUEST, "bad request line");
        assert!(err.is_parse());
        assert_eq!(Some(StatusCode::BAD_REQUEST), err.parse_status());
    }

    #[test]
    fn io_cause_is_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = Error::new_io(io);
        assert!(err.is_io());
        assert!(std::error::Error::source(&err).is_some());
    }
}
