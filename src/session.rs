//! In-memory sessions keyed by a random id cookie.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::RngCore;
use tracing::debug;

use crate::cookie::Cookie;
use crate::request::Request;
use crate::response::Response;

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "session_id";

const SESSION_ID_BYTES: usize = 16;

struct Session {
    data: HashMap<String, String>,
    expires_at: Instant,
}

/// A mutex-guarded session table shared by handlers.
///
/// Sessions expire `max_age` after creation; expired entries answer as
/// missing and are dropped on the next sweep.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    max_age: Duration,
}

impl SessionStore {
    pub fn new(max_age: Duration) -> SessionStore {
        SessionStore {
            sessions: Mutex::new(HashMap::new()),
            max_age,
        }
    }

    /// Creates a session and returns its id.
    pub fn create(&self) -> String {
        let id = generate_session_id();
        let session = Session {
            data: HashMap::new(),
            expires_at: Instant::now() + self.max_age,
        };
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .insert(id.clone(), session);
        debug!(id = %id, "session created");
        id
    }

    /// Whether `id` names a live session.
    pub fn contains(&self, id: &str) -> bool {
        let sessions = self.sessions.lock().expect("session lock poisoned");
        sessions
            .get(id)
            .map(|s| s.expires_at > Instant::now())
            .unwrap_or(false)
    }

    /// Stores a value on a live session. Returns `false` for a missing or
    /// expired id.
    pub fn set<K, V>(&self, id: &str, key: K, value: V) -> bool
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        match sessions.get_mut(id) {
            Some(session) if session.expires_at > Instant::now() => {
                session.data.insert(key.into(), value.into());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: &str, key: &str) -> Option<String> {
        let sessions = self.sessions.lock().expect("session lock poisoned");
        let session = sessions.get(id)?;
        if session.expires_at <= Instant::now() {
            return None;
        }
        session.data.get(key).cloned()
    }

    pub fn remove(&self, id: &str, key: &str) {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        if let Some(session) = sessions.get_mut(id) {
            session.data.remove(key);
        }
    }

    /// Drops the session outright.
    pub fn destroy(&self, id: &str) {
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .remove(id);
    }

    /// Removes every expired session; returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().expect("session lock poisoned");
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        before - sessions.len()
    }

    /// The live session id presented by the request's cookie, if any.
    pub fn session_from_request(&self, req: &Request) -> Option<String> {
        let id = req.cookie(SESSION_COOKIE)?;
        if self.contains(id) {
            Some(id.to_string())
        } else {
            None
        }
    }

    /// Attaches the session cookie to a response.
    pub fn attach_cookie(&self, res: &mut Response, id: &str, path: &str) {
        let cookie = Cookie::new(SESSION_COOKIE, id)
            .path(path)
            .max_age(self.max_age.as_secs() as i64)
            .http_only(true);
        res.set_cookie(&cookie);
    }
}

fn generate_session_id() -> String {
    use std::fmt::Write;

    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut id = String::with_capacity(SESSION_ID_BYTES * 2);
    for b in bytes {
        let _ = write!(id, "{:02x}", b);
    }
    id
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::{SessionStore, SESSION_COOKIE};
    use crate::headers::Headers;
    use crate::method::Method;
    use crate::request::Request;
    use crate::response::Response;
    use crate::version::Version;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(60))
    }

    #[test]
    fn create_set_get_roundtrip() {
        let store = store();
        let id = store.create();
        assert_eq!(32, id.len());
        assert!(store.contains(&id));
        assert!(store.set(&id, "user", "ada"));
        assert_eq!(Some("ada".to_string()), store.get(&id, "user"));
        store.remove(&id, "user");
        assert_eq!(None, store.get(&id, "user"));
    }

    #[test]
    fn ids_are_unique() {
        let store = store();
        assert_ne!(store.create(), store.create());
    }

    #[test]
    fn destroy_removes_session() {
        let store = store();
        let id = store.create();
        store.destroy(&id);
        assert!(!store.contains(&id));
        assert!(!store.set(&id, "k", "v"));
    }

    #[test]
    fn expired_sessions_answer_as_missing() {
        let store = SessionStore::new(Duration::from_millis(0));
        let id = store.create();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!store.contains(&id));
        assert_eq!(None, store.get(&id, "k"));
        assert_eq!(1, store.sweep_expired());
    }

    #[test]
    fn request_extraction_and_cookie() {
        let store = store();
        let id = store.create();

        let mut res = Response::new();
        store.attach_cookie(&mut res, &id, "/");
        let set_cookie = res.headers().get("set-cookie").unwrap();
        assert!(set_cookie.starts_with(&format!("{}={}", SESSION_COOKIE, id)));
        assert!(set_cookie.contains("HttpOnly"));

        let mut headers = Headers::new();
        headers.set("Cookie", format!("{}={}", SESSION_COOKIE, id));
        let req = Request::new(
            Method::Get,
            "/".to_string(),
            None,
            Version::Http11,
            headers,
            Bytes::new(),
        );
        assert_eq!(Some(id), store.session_from_request(&req));
    }

    #[test]
    fn unknown_cookie_id_is_rejected() {
        let store = store();
        let mut headers = Headers::new();
        headers.set("Cookie", format!("{}=deadbeef", SESSION_COOKIE));
        let req = Request::new(
            Method::Get,
            "/".to_string(),
            None,
            Version::Http11,
            headers,
            Bytes::new(),
        );
        assert_eq!(None, store.session_from_request(&req));
    }
}
