//! Cookie formatting and request-side parsing.

use std::fmt;

use crate::request::Request;
use crate::response::Response;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(&self) -> &'static str {
        match *self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// One `Set-Cookie` value under construction.
#[derive(Clone, Debug)]
pub struct Cookie {
    name: String,
    value: String,
    domain: Option<String>,
    path: Option<String>,
    max_age: Option<i64>,
    http_only: bool,
    secure: bool,
    same_site: Option<SameSite>,
}

impl Cookie {
    pub fn new<N, V>(name: N, value: V) -> Cookie
    where
        N: Into<String>,
        V: Into<String>,
    {
        Cookie {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            max_age: None,
            http_only: false,
            secure: false,
            same_site: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn domain<D: Into<String>>(mut self, domain: D) -> Cookie {
        self.domain = Some(domain.into());
        self
    }

    pub fn path<P: Into<String>>(mut self, path: P) -> Cookie {
        self.path = Some(path.into());
        self
    }

    /// `Max-Age` in seconds; zero or negative values expire the cookie.
    pub fn max_age(mut self, seconds: i64) -> Cookie {
        self.max_age = Some(seconds);
        self
    }

    pub fn http_only(mut self, on: bool) -> Cookie {
        self.http_only = on;
        self
    }

    pub fn secure(mut self, on: bool) -> Cookie {
        self.secure = on;
        self
    }

    pub fn same_site(mut self, policy: SameSite) -> Cookie {
        self.same_site = Some(policy);
        self
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(ref domain) = self.domain {
            write!(f, "; Domain={}", domain)?;
        }
        if let Some(ref path) = self.path {
            write!(f, "; Path={}", path)?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={}", max_age)?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if let Some(same_site) = self.same_site {
            write!(f, "; SameSite={}", same_site.as_str())?;
        }
        Ok(())
    }
}

impl Response {
    /// Appends a `Set-Cookie` header; repeated calls emit one line per
    /// cookie.
    pub fn set_cookie(&mut self, cookie: &Cookie) {
        self.set_header("Set-Cookie", cookie.to_string());
    }
}

impl Request {
    /// The value of a cookie sent in the `Cookie` header, if any.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies().find(|&(n, _)| n == name).map(|(_, v)| v)
    }

    /// All `(name, value)` pairs from the `Cookie` header.
    pub fn cookies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header("cookie")
            .into_iter()
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                Some((name.trim(), value.trim()))
            })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{Cookie, SameSite};
    use crate::headers::Headers;
    use crate::method::Method;
    use crate::request::Request;
    use crate::response::Response;
    use crate::version::Version;

    #[test]
    fn renders_simple_cookie() {
        let cookie = Cookie::new("sid", "abc123");
        assert_eq!("sid=abc123", cookie.to_string());
    }

    #[test]
    fn renders_all_attributes() {
        let cookie = Cookie::new("sid", "abc")
            .domain("example.com")
            .path("/app")
            .max_age(3600)
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Strict);
        assert_eq!(
            "sid=abc; Domain=example.com; Path=/app; Max-Age=3600; HttpOnly; Secure; SameSite=Strict",
            cookie.to_string()
        );
    }

    #[test]
    fn response_accumulates_set_cookie_lines() {
        let mut res = Response::new();
        res.set_cookie(&Cookie::new("a", "1"));
        res.set_cookie(&Cookie::new("b", "2"));
        let values: Vec<_> = res.headers().get_all("set-cookie").collect();
        assert_eq!(vec!["a=1", "b=2"], values);
    }

    #[test]
    fn request_cookie_lookup() {
        let mut headers = Headers::new();
        headers.set("Cookie", "theme=dark; sid = abc123 ;flag=1");
        let req = Request::new(
            Method::Get,
            "/".to_string(),
            None,
            Version::Http11,
            headers,
            Bytes::new(),
        );
        assert_eq!(Some("dark"), req.cookie("theme"));
        assert_eq!(Some("abc123"), req.cookie("sid"));
        assert_eq!(Some("1"), req.cookie("flag"));
        assert_eq!(None, req.cookie("missing"));
    }
}
