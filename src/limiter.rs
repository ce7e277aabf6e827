//! Sliding-window rate limiting keyed by client address.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::request::Request;
use crate::response::Response;
use crate::status::StatusCode;

/// Allows `max_requests` per client within a sliding `window`.
///
/// State is injected wherever it is needed (typically behind an `Arc` as a
/// router middleware); there is no process-wide instance.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clients: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> RateLimiter {
        RateLimiter {
            max_requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Records a request for `client` and reports whether it is allowed.
    pub fn check(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut clients = self.clients.lock().expect("limiter lock poisoned");
        let stamps = clients.entry(client.to_string()).or_default();
        Self::prune(stamps, now, self.window);
        if stamps.len() < self.max_requests {
            stamps.push(now);
            true
        } else {
            debug!(client, "rate limit exceeded");
            false
        }
    }

    /// Requests the client may still make in the current window.
    pub fn remaining(&self, client: &str) -> usize {
        let now = Instant::now();
        let mut clients = self.clients.lock().expect("limiter lock poisoned");
        match clients.get_mut(client) {
            Some(stamps) => {
                Self::prune(stamps, now, self.window);
                self.max_requests - stamps.len()
            }
            None => self.max_requests,
        }
    }

    /// Forgets everything recorded for `client`.
    pub fn reset(&self, client: &str) {
        self.clients
            .lock()
            .expect("limiter lock poisoned")
            .remove(client);
    }

    /// Drops clients whose whole window has passed; returns how many.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let window = self.window;
        let mut clients = self.clients.lock().expect("limiter lock poisoned");
        let before = clients.len();
        clients.retain(|_, stamps| {
            Self::prune(stamps, now, window);
            !stamps.is_empty()
        });
        before - clients.len()
    }

    fn prune(stamps: &mut Vec<Instant>, now: Instant, window: Duration) {
        stamps.retain(|&t| now.duration_since(t) < window);
    }
}

/// A router middleware answering `429` once a client exceeds the limit.
pub fn middleware(
    limiter: Arc<RateLimiter>,
) -> impl Fn(&mut Request, &mut Response) -> bool + Send + Sync + 'static {
    move |req, res| {
        let client = req
            .client_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        if limiter.check(&client) {
            true
        } else {
            res.send_text(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests");
            false
        }
    }
}
