//! The dispatch contract between the connection machinery and routing.

use crate::request::Request;
use crate::response::Response;

/// Whether a service claimed the request.
///
/// `NotMatched` makes the connection machinery answer with an automatic
/// `404` text response; match-ordering policy is entirely the service's
/// business.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RouteOutcome {
    Matched,
    NotMatched,
}

/// Dispatches one parsed request into a response.
///
/// A service is configured before the server starts listening and is shared
/// read-only across connections, so implementations hold no interior
/// mutability beyond what their own collaborators (pools, stores) provide.
pub trait Service: Send + Sync {
    fn route(&self, req: &mut Request, res: &mut Response) -> RouteOutcome;
}

impl<F> Service for F
where
    F: Fn(&mut Request, &mut Response) -> RouteOutcome + Send + Sync,
{
    fn route(&self, req: &mut Request, res: &mut Response) -> RouteOutcome {
        (self)(req, res)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{RouteOutcome, Service};
    use crate::headers::Headers;
    use crate::method::Method;
    use crate::request::Request;
    use crate::response::Response;
    use crate::status::StatusCode;

    #[test]
    fn closures_are_services() {
        let svc = |_req: &mut Request, res: &mut Response| {
            res.send_text(StatusCode::OK, "hi");
            RouteOutcome::Matched
        };
        let mut req = Request::new(
            Method::Get,
            "/".to_string(),
            None,
            crate::Version::Http11,
            Headers::new(),
            Bytes::new(),
        );
        let mut res = Response::new();
        assert_eq!(RouteOutcome::Matched, svc.route(&mut req, &mut res));
        assert_eq!(b"hi", res.body());
    }
}
