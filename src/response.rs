//! The outgoing response.

use std::fmt;

use bytes::Bytes;
use serde::Serialize;

use crate::error::{Error, Kind};
use crate::headers::Headers;
use crate::status::StatusCode;

/// A response under construction by a handler.
///
/// Mutable while the handler runs; once the writer owns it the `sent` latch
/// prevents a second emission. A handler that never touches it still
/// produces a valid `200` with an empty body.
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    sent: bool,
    hijacked: bool,
}

impl Response {
    pub fn new() -> Response {
        Response {
            status: StatusCode::OK,
            headers: Headers::new(),
            body: Bytes::new(),
            sent: false,
            hijacked: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn set_header<N, V>(&mut self, name: N, value: V)
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.headers.set(name, value);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }

    pub fn set_body<B: Into<Bytes>>(&mut self, body: B) {
        self.body = body.into();
    }

    /// Status + `text/plain` body in one call.
    pub fn send_text(&mut self, status: StatusCode, text: &str) {
        self.status = status;
        self.headers.set("Content-Type", "text/plain");
        self.body = Bytes::copy_from_slice(text.as_bytes());
    }

    /// Status + `text/html` body in one call.
    pub fn send_html(&mut self, status: StatusCode, html: &str) {
        self.status = status;
        self.headers.set("Content-Type", "text/html");
        self.body = Bytes::copy_from_slice(html.as_bytes());
    }

    /// Status + JSON-serialized body in one call.
    pub fn send_json<T: Serialize>(&mut self, status: StatusCode, value: &T) -> crate::Result<()> {
        let body = serde_json::to_vec(value).map_err(|e| Error::new(Kind::Body).with(e))?;
        self.status = status;
        self.headers.set("Content-Type", "application/json");
        self.body = Bytes::from(body);
        Ok(())
    }

    /// Whether the writer has already emitted this response.
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent = true;
    }

    /// Whether the handler pinned `Connection: close` on the response.
    pub(crate) fn forces_close(&self) -> bool {
        self.headers
            .get("connection")
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false)
    }

    /// Marks the connection as taken over by the handler (e.g. after a
    /// WebSocket handshake). The runtime stops driving the socket and
    /// relinquishes the descriptor without closing it.
    pub fn hijack(&mut self) {
        self.hijacked = true;
    }

    pub(crate) fn is_hijacked(&self) -> bool {
        self.hijacked
    }
}

impl Default for Response {
    fn default() -> Response {
        Response::new()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("sent", &self.sent)
            .finish()
    }
}
