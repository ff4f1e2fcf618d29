//! Owned native handles
//!
//! Each wrapper owns exactly one kernel descriptor through [`OwnedFd`], so the
//! descriptor is closed once when the wrapper drops, on every exit path.
//! Callers never receive the raw descriptor by value.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// An `epoll` instance
#[derive(Debug)]
pub struct EpollHandle {
    fd: OwnedFd,
}

impl EpollHandle {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Start watching `fd`; `token` comes back in every event for it
    pub fn add(&self, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, events, token)
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0, 0)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event { events, u64: token };
        let rc = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Block until at least one watched descriptor is ready.
    ///
    /// `timeout_ms` of -1 waits forever. Returns the number of entries filled
    /// in `events`; an interrupted wait reports zero.
    pub fn wait(&self, events: &mut [libc::epoll_event], timeout_ms: i32) -> io::Result<usize> {
        let max = events.len().min(libc::c_int::MAX as usize) as libc::c_int;
        let rc = unsafe {
            libc::epoll_wait(self.fd.as_raw_fd(), events.as_mut_ptr(), max, timeout_ms)
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(rc as usize)
    }
}

impl AsRawFd for EpollHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Non-blocking `eventfd` counter used to wake a blocked `epoll_wait`
#[derive(Debug)]
pub struct EventFd {
    fd: OwnedFd,
}

impl EventFd {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Make the descriptor readable
    pub fn signal(&self) -> io::Result<()> {
        let one: u64 = 1;
        let rc = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Reset the counter, returning how many signals were pending
    pub fn drain(&self) -> io::Result<u64> {
        let mut count: u64 = 0;
        let rc = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut count as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(count)
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAKE: u64 = 7;

    #[test]
    fn test_eventfd_counts_signals() {
        let wakeup = EventFd::new().unwrap();
        assert_eq!(wakeup.drain().unwrap(), 0);
        wakeup.signal().unwrap();
        wakeup.signal().unwrap();
        assert_eq!(wakeup.drain().unwrap(), 2);
        assert_eq!(wakeup.drain().unwrap(), 0);
    }

    #[test]
    fn test_epoll_reports_signalled_eventfd() {
        let epoll = EpollHandle::new().unwrap();
        let wakeup = EventFd::new().unwrap();
        epoll
            .add(wakeup.as_raw_fd(), libc::EPOLLIN as u32, WAKE)
            .unwrap();

        let mut events = [libc::epoll_event { events: 0, u64: 0 }; 4];
        assert_eq!(epoll.wait(&mut events, 0).unwrap(), 0);

        wakeup.signal().unwrap();
        assert_eq!(epoll.wait(&mut events, 1000).unwrap(), 1);
        let token = events[0].u64;
        assert_eq!(token, WAKE);

        epoll.delete(wakeup.as_raw_fd()).unwrap();
        assert_eq!(epoll.wait(&mut events, 0).unwrap(), 0);
    }
}
