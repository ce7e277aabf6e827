//! Readiness backend over BSD `kqueue`, level-triggered.

use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

use super::Events;

const MAX_EVENTS: usize = 1024;

pub(super) struct Selector {
    kq: RawFd,
    events: Vec<libc::kevent>,
}

impl Selector {
    pub(super) fn new() -> io::Result<Selector> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Selector {
            kq,
            events: Vec::with_capacity(MAX_EVENTS),
        })
    }

    /// Adds or deletes one filter for `fd`. Deleting a filter that was
    /// never added reports `ENOENT`, which is not an error here.
    fn apply(&mut self, fd: RawFd, filter: i16, enable: bool) -> io::Result<()> {
        let change = libc::kevent {
            ident: fd as libc::uintptr_t,
            filter: filter as _,
            flags: if enable { libc::EV_ADD } else { libc::EV_DELETE },
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        };
        let ret = unsafe { libc::kevent(self.kq, &change, 1, ptr::null_mut(), 0, ptr::null()) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if !enable && err.raw_os_error() == Some(libc::ENOENT) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    pub(super) fn register(&mut self, fd: RawFd, interest: Events) -> io::Result<()> {
        self.apply(fd, libc::EVFILT_READ as i16, interest.contains(Events::READ))?;
        self.apply(fd, libc::EVFILT_WRITE as i16, interest.contains(Events::WRITE))
    }

    pub(super) fn reregister(&mut self, fd: RawFd, interest: Events) -> io::Result<()> {
        self.register(fd, interest)
    }

    pub(super) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.apply(fd, libc::EVFILT_READ as i16, false)?;
        self.apply(fd, libc::EVFILT_WRITE as i16, false)
    }

    pub(super) fn select(
        &mut self,
        ready: &mut Vec<(RawFd, Events)>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        let ts;
        let ts_ptr = match timeout {
            Some(d) => {
                ts = libc::timespec {
                    tv_sec: d.as_secs() as libc::time_t,
                    tv_nsec: d.subsec_nanos() as _,
                };
                &ts as *const libc::timespec
            }
            None => ptr::null(),
        };
        let n = unsafe {
            libc::kevent(
                self.kq,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                MAX_EVENTS as libc::c_int,
                ts_ptr,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe { self.events.set_len(n as usize) };
        for ev in &self.events {
            let mut events = Events::empty();
            if i32::from(ev.filter) == libc::EVFILT_READ as i32 {
                events |= Events::READ;
            }
            if i32::from(ev.filter) == libc::EVFILT_WRITE as i32 {
                events |= Events::WRITE;
            }
            if ev.flags & libc::EV_ERROR != 0 {
                events |= Events::ERROR;
            }
            if !events.is_empty() {
                ready.push((ev.ident as RawFd, events));
            }
        }
        self.events.clear();
        Ok(())
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        let _ = unsafe { libc::close(self.kq) };
    }
}
