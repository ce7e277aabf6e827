//! Readiness backend over POSIX `poll(2)`, for platforms with neither
//! epoll nor kqueue. The descriptor array mirrors the registration table.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::{timeout_millis, Events};

pub(super) struct Selector {
    fds: Vec<libc::pollfd>,
}

fn interest_mask(interest: Events) -> libc::c_short {
    let mut mask = 0;
    if interest.contains(Events::READ) {
        mask |= libc::POLLIN;
    }
    if interest.contains(Events::WRITE) {
        mask |= libc::POLLOUT;
    }
    mask
}

fn portable_events(mask: libc::c_short) -> Events {
    let mut events = Events::empty();
    if mask & (libc::POLLIN | libc::POLLPRI) != 0 {
        events |= Events::READ;
    }
    if mask & libc::POLLOUT != 0 {
        events |= Events::WRITE;
    }
    if mask & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        events |= Events::ERROR;
    }
    events
}

impl Selector {
    pub(super) fn new() -> io::Result<Selector> {
        Ok(Selector {
            fds: Vec::with_capacity(16),
        })
    }

    pub(super) fn register(&mut self, fd: RawFd, interest: Events) -> io::Result<()> {
        self.fds.push(libc::pollfd {
            fd,
            events: interest_mask(interest),
            revents: 0,
        });
        Ok(())
    }

    pub(super) fn reregister(&mut self, fd: RawFd, interest: Events) -> io::Result<()> {
        match self.fds.iter_mut().find(|p| p.fd == fd) {
            Some(pfd) => {
                pfd.events = interest_mask(interest);
                Ok(())
            }
            None => Err(io::Error::new(io::ErrorKind::NotFound, "fd not registered")),
        }
    }

    pub(super) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.fds.retain(|p| p.fd != fd);
        Ok(())
    }

    pub(super) fn select(
        &mut self,
        ready: &mut Vec<(RawFd, Events)>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_millis(timeout),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        for pfd in &mut self.fds {
            if pfd.revents != 0 {
                let events = portable_events(pfd.revents);
                if !events.is_empty() {
                    ready.push((pfd.fd, events));
                }
                pfd.revents = 0;
            }
        }
        Ok(())
    }
}
