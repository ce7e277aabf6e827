//! The incoming request.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use bytes::Bytes;
use percent_encoding::percent_decode;
use serde::de::DeserializeOwned;

use crate::error::{Error, Kind};
use crate::headers::Headers;
use crate::method::Method;
use crate::version::Version;

/// Route parameters captured by the router, keyed by segment name.
#[derive(Default, Clone, Debug)]
pub struct Params {
    map: HashMap<String, String>,
}

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    pub fn insert<N, V>(&mut self, name: N, value: V)
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.map.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A parsed request, immutable once the parser hands it over.
///
/// The router may still populate [`Params`], and middleware may stash
/// context in the user-data slot; everything the peer sent is fixed.
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    version: Version,
    headers: Headers,
    body: Bytes,
    params: Params,
    user_data: Option<Box<dyn Any + Send>>,
    client_ip: Option<IpAddr>,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        path: String,
        query: Option<String>,
        version: Version,
        headers: Headers,
        body: Bytes,
    ) -> Request {
        Request {
            method,
            path,
            query,
            version,
            headers,
            body,
            params: Params::default(),
            user_data: None,
            client_ip: None,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// The percent-decoded origin-form path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Mutable access for router implementations that capture parameters.
    pub fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Stores opaque middleware context on the request.
    pub fn set_user_data<T: Any + Send>(&mut self, data: T) {
        self.user_data = Some(Box::new(data));
    }

    pub fn user_data<T: Any + Send>(&self) -> Option<&T> {
        self.user_data.as_ref().and_then(|d| d.downcast_ref())
    }

    /// The peer address, when the listener recorded one.
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    pub(crate) fn set_client_ip(&mut self, ip: IpAddr) {
        self.client_ip = Some(ip);
    }

    /// Decodes the body as JSON into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> crate::Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::new(Kind::Body).with(e))
    }

    /// Decodes an `application/x-www-form-urlencoded` body into a map.
    ///
    /// `+` decodes as space; later duplicates of a name replace earlier
    /// ones.
    pub fn form(&self) -> crate::Result<HashMap<String, String>> {
        let mut out = HashMap::new();
        if self.body.is_empty() {
            return Ok(out);
        }
        for pair in self.body.split(|&b| b == b'&') {
            if pair.is_empty() {
                continue;
            }
            let mut split = pair.splitn(2, |&b| b == b'=');
            let name = split.next().unwrap_or(b"");
            let value = split.next().unwrap_or(b"");
            out.insert(decode_form_component(name)?, decode_form_component(value)?);
        }
        Ok(out)
    }
}

fn decode_form_component(raw: &[u8]) -> crate::Result<String> {
    let plus_decoded: Vec<u8> = raw
        .iter()
        .map(|&b| if b == b'+' { b' ' } else { b })
        .collect();
    let decoded = percent_decode(&plus_decoded).collect::<Vec<u8>>();
    String::from_utf8(decoded).map_err(|e| Error::new(Kind::Body).with(e))
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}
