//! Readiness-based I/O multiplexer with one-shot timers.
//!
//! One thread drives [`Reactor::run`]; callbacks run to completion and must
//! not block. Registration changes made from inside a callback take effect
//! no later than the next iteration. The backend is chosen at build time:
//! epoll on Linux, kqueue on Apple/BSD, a poll array elsewhere — all used
//! level-triggered.

use std::cell::RefCell;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{error, trace};

use crate::error::{Error, Kind};

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(target_os = "linux")]
use self::epoll::Selector;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd"
))]
mod kqueue;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd"
))]
use self::kqueue::Selector;

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd"
)))]
mod poll;
#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd"
)))]
use self::poll::Selector;

/// Upper bound on concurrently armed one-shot timers.
pub const MAX_TIMERS: usize = 64;

/// The descriptor passed to a sink when a timer fires.
pub const TIMER_FD: RawFd = -1;

/// Readiness (and interest) flags.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Events(u8);

impl Events {
    pub const READ: Events = Events(0b0001);
    pub const WRITE: Events = Events(0b0010);
    pub const ERROR: Events = Events(0b0100);
    pub const TIMEOUT: Events = Events(0b1000);

    pub fn empty() -> Events {
        Events(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersect(self, other: Events) -> Events {
        Events(self.0 & other.0)
    }
}

impl std::ops::BitOr for Events {
    type Output = Events;

    fn bitor(self, rhs: Events) -> Events {
        Events(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Events) {
        self.0 |= rhs.0;
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        if self.contains(Events::READ) {
            list.entry(&"READ");
        }
        if self.contains(Events::WRITE) {
            list.entry(&"WRITE");
        }
        if self.contains(Events::ERROR) {
            list.entry(&"ERROR");
        }
        if self.contains(Events::TIMEOUT) {
            list.entry(&"TIMEOUT");
        }
        list.finish()
    }
}

/// Receives readiness callbacks.
///
/// `fd` is the registered descriptor, or [`TIMER_FD`] for a timer firing.
pub trait EventSink {
    fn on_event(&mut self, reactor: &mut Reactor, fd: RawFd, events: Events);
}

/// Shared handle to a sink; the reactor clones it for the duration of each
/// dispatch so a callback may deregister itself.
pub type Sink = Rc<RefCell<dyn EventSink>>;

/// Wraps a closure as a [`Sink`].
pub fn sink<F>(f: F) -> Sink
where
    F: FnMut(&mut Reactor, RawFd, Events) + 'static,
{
    struct FnSink<F>(F);

    impl<F> EventSink for FnSink<F>
    where
        F: FnMut(&mut Reactor, RawFd, Events),
    {
        fn on_event(&mut self, reactor: &mut Reactor, fd: RawFd, events: Events) {
            (self.0)(reactor, fd, events)
        }
    }

    Rc::new(RefCell::new(FnSink(f)))
}

/// Identifies a registered timer. Stable for the timer's lifetime; never
/// reused within one reactor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TimerId(u64);

struct Handler {
    fd: RawFd,
    interest: Events,
    sink: Sink,
    active: bool,
}

struct Timer {
    id: TimerId,
    expiry: Instant,
    sink: Sink,
    active: bool,
}

/// The multiplexer. Owned by the server (or a test); never global.
pub struct Reactor {
    selector: Selector,
    handlers: Vec<Handler>,
    timers: Vec<Timer>,
    running: bool,
    next_timer_id: u64,
}

impl Reactor {
    pub fn new() -> crate::Result<Reactor> {
        let selector = Selector::new().map_err(Error::new_reactor)?;
        Ok(Reactor {
            selector,
            handlers: Vec::with_capacity(16),
            timers: Vec::new(),
            running: false,
            next_timer_id: 1,
        })
    }

    /// Registers `fd` for `interest`. Registering a descriptor twice is an
    /// error.
    pub fn add(&mut self, fd: RawFd, interest: Events, sink: Sink) -> crate::Result<()> {
        if self.position(fd).is_some() {
            return Err(Error::new(Kind::DuplicateFd));
        }
        self.selector
            .register(fd, interest)
            .map_err(Error::new_reactor)?;
        trace!(fd, ?interest, "reactor add");
        self.handlers.push(Handler {
            fd,
            interest,
            sink,
            active: true,
        });
        Ok(())
    }

    /// Swaps the interest mask in place; the sink is unchanged.
    pub fn modify(&mut self, fd: RawFd, interest: Events) -> crate::Result<()> {
        let idx = self.position(fd).ok_or_else(|| Error::new(Kind::NotFound))?;
        self.selector
            .reregister(fd, interest)
            .map_err(Error::new_reactor)?;
        trace!(fd, ?interest, "reactor modify");
        self.handlers[idx].interest = interest;
        Ok(())
    }

    /// Deregisters `fd`. Safe to call from inside the callback being
    /// removed; the entry is compacted out before the next wait.
    pub fn remove(&mut self, fd: RawFd) -> crate::Result<()> {
        let idx = self.position(fd).ok_or_else(|| Error::new(Kind::NotFound))?;
        self.selector.deregister(fd).map_err(Error::new_reactor)?;
        trace!(fd, "reactor remove");
        self.handlers[idx].active = false;
        Ok(())
    }

    /// Arms a one-shot timer firing no earlier than `delay` from now.
    pub fn add_timer(&mut self, delay: Duration, sink: Sink) -> crate::Result<TimerId> {
        if self.timers.iter().filter(|t| t.active).count() >= MAX_TIMERS {
            return Err(Error::new(Kind::TimerCapacity));
        }
        let id = TimerId(self.next_timer_id);
        self.next_timer_id += 1;
        self.timers.push(Timer {
            id,
            expiry: Instant::now() + delay,
            sink,
            active: true,
        });
        trace!(id = id.0, ?delay, "timer armed");
        Ok(id)
    }

    /// Cancels a timer. A timer whose cancellation returned `Ok` never
    /// invokes its sink. Cancelling twice reports not-found and changes
    /// nothing.
    pub fn cancel_timer(&mut self, id: TimerId) -> crate::Result<()> {
        match self.timers.iter_mut().find(|t| t.active && t.id == id) {
            Some(timer) => {
                timer.active = false;
                trace!(id = id.0, "timer cancelled");
                Ok(())
            }
            None => Err(Error::new(Kind::NotFound)),
        }
    }

    /// Dispatches callbacks until [`stop`](Reactor::stop) is called.
    ///
    /// Waits interrupted by a signal are retried; any other backend failure
    /// unwinds with an error.
    pub fn run(&mut self) -> crate::Result<()> {
        self.running = true;
        let mut ready: Vec<(RawFd, Events)> = Vec::with_capacity(64);
        while self.running {
            self.handlers.retain(|h| h.active);
            self.timers.retain(|t| t.active);

            let timeout = self.next_timeout();
            ready.clear();
            if let Err(e) = self.selector.select(&mut ready, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.running = false;
                error!(error = %e, "reactor backend failed");
                return Err(Error::new_reactor(e));
            }

            for &(fd, events) in &ready {
                if !self.running {
                    break;
                }
                // deliver only what was asked for; errors always surface
                let (sink, deliver) = match self.handlers.iter().find(|h| h.active && h.fd == fd) {
                    Some(handler) => (
                        handler.sink.clone(),
                        events.intersect(handler.interest | Events::ERROR),
                    ),
                    None => continue,
                };
                if deliver.is_empty() {
                    continue;
                }
                sink.borrow_mut().on_event(self, fd, deliver);
            }

            self.fire_timers();
        }
        Ok(())
    }

    /// Makes `run` return after the current iteration.
    pub fn stop(&mut self) {
        self.running = false;
    }

    fn position(&self, fd: RawFd) -> Option<usize> {
        self.handlers
            .iter()
            .position(|h| h.active && h.fd == fd)
    }

    fn next_timeout(&self) -> Option<Duration> {
        let now = Instant::now();
        self.timers
            .iter()
            .filter(|t| t.active)
            .map(|t| t.expiry.saturating_duration_since(now))
            .min()
    }

    fn fire_timers(&mut self) {
        if self.timers.is_empty() {
            return;
        }
        // one monotonic view of now for the whole scan; timers armed by a
        // firing callback are eligible from the next iteration
        let now = Instant::now();
        let mut due: Vec<Sink> = Vec::new();
        for timer in self.timers.iter_mut() {
            if timer.active && timer.expiry <= now {
                timer.active = false;
                due.push(timer.sink.clone());
            }
        }
        for sink in due {
            if !self.running {
                break;
            }
            sink.borrow_mut().on_event(self, TIMER_FD, Events::TIMEOUT);
        }
    }
}

// Backends take a millisecond bound; round up so a timer never fires early.
#[allow(dead_code)]
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = (d.as_nanos() + 999_999) / 1_000_000;
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}
