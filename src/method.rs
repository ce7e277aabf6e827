//! The HTTP request method.

use std::fmt;
use std::str::FromStr;

use self::Method::{Delete, Get, Head, Options, Patch, Post, Put};

/// The request method (VERB).
///
/// Covers the seven methods the runtime dispatches. Anything else on the
/// request line is answered with `501 Not Implemented` before routing.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// PATCH
    Patch,
    /// HEAD
    Head,
    /// OPTIONS
    Options,
}

impl Method {
    /// Whether a method is considered "safe", meaning the request is
    /// essentially read-only.
    pub fn is_safe(&self) -> bool {
        matches!(*self, Get | Head | Options)
    }

    /// Whether a method is considered "idempotent", meaning repeating the
    /// request has the same effect as making it once.
    pub fn is_idempotent(&self) -> bool {
        self.is_safe() || matches!(*self, Put | Delete)
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            Get => "GET",
            Post => "POST",
            Put => "PUT",
            Delete => "DELETE",
            Patch => "PATCH",
            Head => "HEAD",
            Options => "OPTIONS",
        }
    }
}

/// Returned when a request-line token is not one of the seven methods.
#[derive(Debug)]
pub struct InvalidMethod(());

impl FromStr for Method {
    type Err = InvalidMethod;

    fn from_str(s: &str) -> Result<Method, InvalidMethod> {
        match s {
            "GET" => Ok(Get),
            "POST" => Ok(Post),
            "PUT" => Ok(Put),
            "DELETE" => Ok(Delete),
            "PATCH" => Ok(Patch),
            "HEAD" => Ok(Head),
            "OPTIONS" => Ok(Options),
            _ => Err(InvalidMethod(())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for InvalidMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid HTTP method")
    }
}

impl std::error::Error for InvalidMethod {}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::Method;

    #[test]
    fn test_from_str() {
        assert_eq!(Method::Get, Method::from_str("GET").unwrap());
        assert_eq!(Method::Options, Method::from_str("OPTIONS").unwrap());
        assert!(Method::from_str("MOVE").is_err());
        // method tokens are case-sensitive
        assert!(Method::from_str("get").is_err());
        assert!(Method::from_str("").is_err());
    }

    #[test]
    fn test_fmt() {
        assert_eq!("GET", format!("{}", Method::Get));
        assert_eq!("PATCH", format!("{}", Method::Patch));
    }

    #[test]
    fn test_safe_idempotent() {
        assert!(Method::Get.is_safe());
        assert!(!Method::Post.is_safe());
        assert!(Method::Put.is_idempotent());
        assert!(!Method::Post.is_idempotent());
    }
}
