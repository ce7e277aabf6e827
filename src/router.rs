//! Method + path-pattern routing with a middleware chain.

use tracing::trace;

use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use crate::service::{RouteOutcome, Service};

/// A route handler.
pub trait Handler: Send + Sync {
    fn handle(&self, req: &mut Request, res: &mut Response);
}

impl<F> Handler for F
where
    F: Fn(&mut Request, &mut Response) + Send + Sync,
{
    fn handle(&self, req: &mut Request, res: &mut Response) {
        (self)(req, res)
    }
}

/// Runs before routing; returning `false` stops the chain and sends
/// whatever the middleware put on the response.
pub type Middleware = Box<dyn Fn(&mut Request, &mut Response) -> bool + Send + Sync>;

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `:name` — captures exactly one segment.
    Param(String),
    /// `*name` — captures the remainder of the path; must be last.
    Wildcard(String),
}

struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    fn parse(pattern: &str) -> Pattern {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if let Some(name) = s.strip_prefix(':') {
                    Segment::Param(name.to_string())
                } else if let Some(name) = s.strip_prefix('*') {
                    Segment::Wildcard(name.to_string())
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Pattern { segments }
    }

    /// Captured `(name, value)` pairs on a match, `None` otherwise.
    fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let mut params = Vec::new();
        let mut parts = path.split('/').filter(|s| !s.is_empty());
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard(name) => {
                    debug_assert_eq!(i + 1, self.segments.len());
                    let rest: Vec<&str> = parts.collect();
                    params.push((name.clone(), rest.join("/")));
                    return Some(params);
                }
                Segment::Literal(lit) => {
                    if parts.next()? != lit {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let part = parts.next()?;
                    params.push((name.clone(), part.to_string()));
                }
            }
        }
        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Box<dyn Handler>,
}

/// An insertion-ordered route table implementing [`Service`].
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    middleware: Vec<Middleware>,
}

impl Router {
    pub fn new() -> Router {
        Router {
            routes: Vec::new(),
            middleware: Vec::new(),
        }
    }

    /// Registers a route. Patterns are literal segments, `:name` captures,
    /// and a trailing `*name` catch-all.
    pub fn add<H>(&mut self, method: Method, pattern: &str, handler: H)
    where
        H: Handler + 'static,
    {
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(pattern),
            handler: Box::new(handler),
        });
    }

    pub fn get<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&mut Request, &mut Response) + Send + Sync + 'static,
    {
        self.add(Method::Get, pattern, handler);
    }

    pub fn post<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&mut Request, &mut Response) + Send + Sync + 'static,
    {
        self.add(Method::Post, pattern, handler);
    }

    pub fn put<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&mut Request, &mut Response) + Send + Sync + 'static,
    {
        self.add(Method::Put, pattern, handler);
    }

    pub fn delete<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&mut Request, &mut Response) + Send + Sync + 'static,
    {
        self.add(Method::Delete, pattern, handler);
    }

    pub fn patch<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&mut Request, &mut Response) + Send + Sync + 'static,
    {
        self.add(Method::Patch, pattern, handler);
    }

    pub fn head<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&mut Request, &mut Response) + Send + Sync + 'static,
    {
        self.add(Method::Head, pattern, handler);
    }

    pub fn options<F>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(&mut Request, &mut Response) + Send + Sync + 'static,
    {
        self.add(Method::Options, pattern, handler);
    }

    /// Appends a middleware; they run in registration order before any
    /// route is consulted.
    pub fn middleware<F>(&mut self, f: F)
    where
        F: Fn(&mut Request, &mut Response) -> bool + Send + Sync + 'static,
    {
        self.middleware.push(Box::new(f));
    }
}

impl Service for Router {
    fn route(&self, req: &mut Request, res: &mut Response) -> RouteOutcome {
        for middleware in &self.middleware {
            if !middleware(req, res) {
                trace!(path = req.path(), "middleware short-circuited");
                return RouteOutcome::Matched;
            }
        }
        for route in &self.routes {
            if route.method != req.method() {
                continue;
            }
            if let Some(params) = route.pattern.matches(req.path()) {
                for (name, value) in params {
                    req.params_mut().insert(name, value);
                }
                route.handler.handle(req, res);
                return RouteOutcome::Matched;
            }
        }
        RouteOutcome::NotMatched
    }
}
