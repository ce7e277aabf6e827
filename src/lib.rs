//! # ember
//!
//! A small and correct HTTP/1.1 serving runtime.
//!
//! ember turns a listening socket into dispatched handlers with three
//! tightly coupled pieces: a platform-portable [`reactor`] (epoll, kqueue,
//! or poll, with one-shot timers), an incremental request parser that
//! tolerates any packet fragmentation (keep-alive, pipelining, fixed and
//! chunked bodies), and a per-connection state machine that runs
//! identically on a thread per connection or single-threaded under the
//! reactor.
//!
//! ```no_run
//! use ember::{Mode, Router, Server, StatusCode};
//!
//! let mut router = Router::new();
//! router.get("/hello/:name", |req, res| {
//!     let name = req.param("name").unwrap_or("world");
//!     res.send_text(StatusCode::OK, &format!("hello, {}", name));
//! });
//!
//! Server::bind("127.0.0.1:8080".parse().unwrap())
//!     .unwrap()
//!     .mode(Mode::Reactor)
//!     .serve(router)
//!     .unwrap();
//! ```

pub mod cookie;
mod error;
mod headers;
pub mod io;
pub mod limiter;
pub mod limits;
mod method;
pub mod pool;
mod proto;
pub mod reactor;
mod request;
mod response;
pub mod router;
mod server;
pub mod service;
pub mod session;
mod status;
pub mod staticfile;
pub mod template;
mod version;

pub use crate::cookie::{Cookie, SameSite};
pub use crate::error::{Error, Result};
pub use crate::headers::Headers;
pub use crate::method::Method;
pub use crate::request::{Params, Request};
pub use crate::response::Response;
pub use crate::router::Router;
pub use crate::server::{Mode, Server};
pub use crate::service::{RouteOutcome, Service};
pub use crate::status::StatusCode;
pub use crate::version::Version;
