//! Readiness backend over Linux `epoll`, level-triggered.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::{timeout_millis, Events};

const MAX_EVENTS: usize = 1024;

pub(super) struct Selector {
    epfd: RawFd,
    events: Vec<libc::epoll_event>,
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn interest_mask(interest: Events) -> u32 {
    let mut mask = 0;
    if interest.contains(Events::READ) {
        mask |= libc::EPOLLIN as u32;
    }
    if interest.contains(Events::WRITE) {
        mask |= libc::EPOLLOUT as u32;
    }
    mask
}

fn portable_events(mask: u32) -> Events {
    let mut events = Events::empty();
    if mask & (libc::EPOLLIN | libc::EPOLLPRI) as u32 != 0 {
        events |= Events::READ;
    }
    if mask & libc::EPOLLOUT as u32 != 0 {
        events |= Events::WRITE;
    }
    if mask & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0 {
        events |= Events::ERROR;
    }
    events
}

impl Selector {
    pub(super) fn new() -> io::Result<Selector> {
        let epfd = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        Ok(Selector {
            epfd,
            events: Vec::with_capacity(MAX_EVENTS),
        })
    }

    fn ctl(&mut self, op: libc::c_int, fd: RawFd, interest: Events) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: interest_mask(interest),
            u64: fd as u64,
        };
        cvt(unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) })?;
        Ok(())
    }

    pub(super) fn register(&mut self, fd: RawFd, interest: Events) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest)
    }

    pub(super) fn reregister(&mut self, fd: RawFd, interest: Events) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest)
    }

    pub(super) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, Events::empty())
    }

    pub(super) fn select(
        &mut self,
        ready: &mut Vec<(RawFd, Events)>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let n = cvt(unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                MAX_EVENTS as libc::c_int,
                timeout_millis(timeout),
            )
        })?;
        // epoll_wait wrote n entries into the spare capacity
        unsafe { self.events.set_len(n as usize) };
        for i in 0..self.events.len() {
            // copy out: epoll_event is packed on this target
            let ev: libc::epoll_event = self.events[i];
            let events = portable_events(ev.events);
            if !events.is_empty() {
                ready.push(({ ev.u64 } as RawFd, events));
            }
        }
        self.events.clear();
        Ok(())
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        let _ = unsafe { libc::close(self.epfd) };
    }
}
