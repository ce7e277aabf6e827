//! A generic blocking connection pool for handler-side resources.
//!
//! Bounded between a floor kept warm and a ceiling never exceeded;
//! `acquire` blocks with a timed wait, validates what it hands out, and
//! returns an RAII guard that puts the connection back on drop.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{Error, Kind};

/// Creates and validates pooled connections.
pub trait ManageConnection: Send + Sync + 'static {
    type Connection: Send;

    fn connect(&self) -> crate::Result<Self::Connection>;

    /// Called on every acquire; invalid connections are discarded and
    /// replaced.
    fn is_valid(&self, conn: &mut Self::Connection) -> bool {
        let _ = conn;
        true
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    /// Connections established up front and kept through idle eviction.
    pub min_connections: usize,
    /// Hard ceiling on live connections.
    pub max_connections: usize,
    /// How long `acquire` waits before giving up.
    pub acquire_timeout: Duration,
    /// Idle age beyond which `close_idle` evicts.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> PoolConfig {
        PoolConfig {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// A point-in-time view of the pool.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub in_use: usize,
}

struct Idle<C> {
    conn: C,
    since: Instant,
}

struct PoolState<C> {
    idle: Vec<Idle<C>>,
    total: usize,
}

struct Inner<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Connection>>,
    available: Condvar,
}

/// Cloneable pool handle.
pub struct Pool<M: ManageConnection> {
    inner: Arc<Inner<M>>,
}

impl<M: ManageConnection> Clone for Pool<M> {
    fn clone(&self) -> Pool<M> {
        Pool {
            inner: self.inner.clone(),
        }
    }
}

impl<M: ManageConnection> Pool<M> {
    /// Builds the pool and establishes the configured floor of
    /// connections.
    pub fn new(manager: M, config: PoolConfig) -> crate::Result<Pool<M>> {
        let mut idle = Vec::with_capacity(config.min_connections);
        for _ in 0..config.min_connections {
            let conn = manager
                .connect()
                .map_err(|e| Error::new(Kind::PoolConnect).with(e))?;
            idle.push(Idle {
                conn,
                since: Instant::now(),
            });
        }
        let total = idle.len();
        Ok(Pool {
            inner: Arc::new(Inner {
                manager,
                config,
                state: Mutex::new(PoolState { idle, total }),
                available: Condvar::new(),
            }),
        })
    }

    /// Hands out a validated connection, waiting up to the configured
    /// timeout when the pool is exhausted.
    pub fn acquire(&self) -> crate::Result<PooledConnection<M>> {
        let deadline = Instant::now() + self.inner.config.acquire_timeout;
        let mut state = self.inner.state.lock().expect("pool lock poisoned");
        loop {
            while let Some(idle) = state.idle.pop() {
                let mut conn = idle.conn;
                if self.inner.manager.is_valid(&mut conn) {
                    trace!("pooled connection reused");
                    return Ok(PooledConnection::new(self.inner.clone(), conn));
                }
                debug!("discarding invalid pooled connection");
                state.total -= 1;
            }

            if state.total < self.inner.config.max_connections {
                state.total += 1;
                drop(state);
                return match self.inner.manager.connect() {
                    Ok(conn) => Ok(PooledConnection::new(self.inner.clone(), conn)),
                    Err(e) => {
                        let mut state = self.inner.state.lock().expect("pool lock poisoned");
                        state.total -= 1;
                        drop(state);
                        self.inner.available.notify_one();
                        Err(Error::new(Kind::PoolConnect).with(e))
                    }
                };
            }

            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return Err(Error::new(Kind::PoolTimeout)),
            };
            let (guard, _timeout) = self
                .inner
                .available
                .wait_timeout(state, remaining)
                .expect("pool lock poisoned");
            state = guard;
        }
    }

    /// Evicts idle connections older than the idle timeout, keeping the
    /// configured floor. Returns how many were closed.
    pub fn close_idle(&self) -> usize {
        let now = Instant::now();
        let mut state = self.inner.state.lock().expect("pool lock poisoned");
        let min = self.inner.config.min_connections;
        let idle_timeout = self.inner.config.idle_timeout;
        let mut closed = 0;
        let mut i = 0;
        while i < state.idle.len() {
            if state.total <= min {
                break;
            }
            if now.duration_since(state.idle[i].since) >= idle_timeout {
                state.idle.swap_remove(i);
                state.total -= 1;
                closed += 1;
            } else {
                i += 1;
            }
        }
        if closed > 0 {
            debug!(closed, "evicted idle pooled connections");
        }
        closed
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock().expect("pool lock poisoned");
        PoolStats {
            total: state.total,
            idle: state.idle.len(),
            in_use: state.total - state.idle.len(),
        }
    }
}

/// RAII guard around a pooled connection; dropping it returns the
/// connection to the pool and wakes one waiter.
pub struct PooledConnection<M: ManageConnection> {
    pool: Arc<Inner<M>>,
    conn: Option<M::Connection>,
}

impl<M: ManageConnection> std::fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish()
    }
}

impl<M: ManageConnection> PooledConnection<M> {
    fn new(pool: Arc<Inner<M>>, conn: M::Connection) -> PooledConnection<M> {
        PooledConnection {
            pool,
            conn: Some(conn),
        }
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &M::Connection {
        self.conn.as_ref().expect("connection taken")
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut M::Connection {
        self.conn.as_mut().expect("connection taken")
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let mut state = self.pool.state.lock().expect("pool lock poisoned");
            state.idle.push(Idle {
                conn,
                since: Instant::now(),
            });
            drop(state);
            self.pool.available.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::{ManageConnection, Pool, PoolConfig};

    struct TestManager {
        connected: AtomicUsize,
        fail_connect: AtomicBool,
        fail_validation: AtomicBool,
    }

    impl TestManager {
        fn new() -> TestManager {
            TestManager {
                connected: AtomicUsize::new(0),
                fail_connect: AtomicBool::new(false),
                fail_validation: AtomicBool::new(false),
            }
        }
    }

    impl ManageConnection for Arc<TestManager> {
        type Connection = usize;

        fn connect(&self) -> crate::Result<usize> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(crate::error::Error::new(crate::error::Kind::Io));
            }
            Ok(self.connected.fetch_add(1, Ordering::SeqCst))
        }

        fn is_valid(&self, _conn: &mut usize) -> bool {
            !self.fail_validation.load(Ordering::SeqCst)
        }
    }

    fn config(min: usize, max: usize, timeout_ms: u64) -> PoolConfig {
        PoolConfig {
            min_connections: min,
            max_connections: max,
            acquire_timeout: Duration::from_millis(timeout_ms),
            idle_timeout: Duration::from_millis(0),
        }
    }

    #[test]
    fn acquire_reuses_released_connections() {
        let manager = Arc::new(TestManager::new());
        let pool = Pool::new(manager.clone(), config(1, 4, 100)).unwrap();
        let id = {
            let conn = pool.acquire().unwrap();
            *conn
        };
        let again = pool.acquire().unwrap();
        assert_eq!(id, *again);
        assert_eq!(1, manager.connected.load(Ordering::SeqCst));
    }

    #[test]
    fn exhausted_pool_times_out() {
        let manager = Arc::new(TestManager::new());
        let pool = Pool::new(manager, config(0, 1, 30)).unwrap();
        let _held = pool.acquire().unwrap();
        let err = pool.acquire().unwrap_err();
        assert!(err.is_pool_timeout());
    }

    #[test]
    fn waiting_acquire_wakes_on_release() {
        let manager = Arc::new(TestManager::new());
        let pool = Pool::new(manager, config(0, 1, 1000)).unwrap();
        let held = pool.acquire().unwrap();

        let pool2 = pool.clone();
        let waiter = thread::spawn(move || pool2.acquire().map(|c| *c));
        thread::sleep(Duration::from_millis(30));
        drop(held);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn invalid_connections_are_replaced() {
        let manager = Arc::new(TestManager::new());
        let pool = Pool::new(manager.clone(), config(1, 4, 100)).unwrap();
        // the idle connection fails validation and a fresh one replaces it
        manager.fail_validation.store(true, Ordering::SeqCst);
        let conn = pool.acquire().unwrap();
        assert_eq!(1, *conn);
        assert_eq!(2, manager.connected.load(Ordering::SeqCst));
        assert_eq!(1, pool.stats().total);
    }

    #[test]
    fn connect_failure_surfaces_and_frees_slot() {
        let manager = Arc::new(TestManager::new());
        let pool = Pool::new(manager.clone(), config(0, 1, 50)).unwrap();
        manager.fail_connect.store(true, Ordering::SeqCst);
        assert!(pool.acquire().is_err());
        manager.fail_connect.store(false, Ordering::SeqCst);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn close_idle_respects_floor() {
        let manager = Arc::new(TestManager::new());
        let pool = Pool::new(manager, config(1, 4, 100)).unwrap();
        {
            let _a = pool.acquire().unwrap();
            let _b = pool.acquire().unwrap();
            let _c = pool.acquire().unwrap();
        }
        assert_eq!(3, pool.stats().idle);
        // idle_timeout is zero, so everything above the floor goes
        let closed = pool.close_idle();
        assert_eq!(2, closed);
        assert_eq!(1, pool.stats().total);
    }

    #[test]
    fn stats_track_in_use() {
        let manager = Arc::new(TestManager::new());
        let pool = Pool::new(manager, config(0, 2, 100)).unwrap();
        let held = pool.acquire().unwrap();
        let stats = pool.stats();
        assert_eq!(1, stats.total);
        assert_eq!(0, stats.idle);
        assert_eq!(1, stats.in_use);
        drop(held);
        assert_eq!(1, pool.stats().idle);
    }
}
