//! Linux `epoll`-based poller.
//!
//! Registration calls may come from any thread while the dispatch thread
//! is blocked in [`EpollPoller::poll`]; `epoll_ctl(2)` is safe to call
//! concurrently with `epoll_wait(2)`, so only the event buffer is guarded.

use super::common::{Interest, SelfPipe, timeout_ms};
use super::WAKE_TOKEN;
use crate::reactor::event::{Event, push_event};

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use parking_lot::Mutex;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Linux `epoll` poller.
///
/// Owns the epoll instance, the wake-up pipe and a reusable event buffer.
pub(crate) struct EpollPoller {
    epoll: OwnedFd,
    waker: SelfPipe,
    events: Mutex<Vec<epoll_event>>,
}

impl EpollPoller {
    /// Creates the epoll instance and registers the wake-up pipe.
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let epoll = unsafe { OwnedFd::from_raw_fd(epoll) };
        let waker = SelfPipe::new()?;

        let poller = Self {
            epoll,
            waker,
            events: Mutex::new(Vec::with_capacity(capacity)),
        };

        poller.ctl(
            EPOLL_CTL_ADD,
            poller.waker.reader_fd(),
            WAKE_TOKEN,
            Interest::READABLE,
        )?;

        Ok(poller)
    }

    /// Interrupts a blocking `poll`.
    pub(crate) fn wake(&self) {
        self.waker.wake();
    }

    pub(crate) fn register(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, token, interest)
    }

    pub(crate) fn reregister(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_MOD, fd, token, interest)
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe {
            epoll_ctl(
                self.epoll.as_raw_fd(),
                EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };

        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Waits for readiness and appends the resulting events.
    ///
    /// Blocks until a descriptor becomes ready, the poller is woken, or
    /// `timeout` elapses. An interrupted wait returns with no events.
    pub(crate) fn poll(&self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let mut buffer = self.events.lock();
        let capacity = buffer.capacity().max(1);

        let n = unsafe {
            epoll_wait(
                self.epoll.as_raw_fd(),
                buffer.as_mut_ptr(),
                capacity as i32,
                timeout_ms(timeout),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            buffer.set_len(n as usize);
        }

        for ev in buffer.iter() {
            let token = ev.u64;

            if token == WAKE_TOKEN {
                self.waker.drain();
                continue;
            }

            push_event(
                events,
                Event {
                    token,
                    readable: ev.events & ((EPOLLIN | EPOLLERR | EPOLLHUP) as u32) != 0,
                    writable: ev.events & ((EPOLLOUT | EPOLLERR) as u32) != 0,
                },
            );
        }

        buffer.clear();

        Ok(())
    }

    fn ctl(&self, op: i32, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let mut flags = 0;

        if interest.read {
            flags |= EPOLLIN;
        }
        if interest.write {
            flags |= EPOLLOUT;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: token,
        };

        let rc = unsafe { epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::poller::unix::{sys_pipe, sys_write};

    #[test]
    fn reports_readable_pipe() {
        let poller = EpollPoller::new(8).unwrap();
        let (reader, writer) = sys_pipe().unwrap();

        poller
            .register(reader.as_raw_fd(), 7, Interest::READABLE)
            .unwrap();
        sys_write(writer.as_raw_fd(), b"x");

        let mut events = Vec::new();
        poller
            .poll(&mut events, Some(Duration::from_secs(1)))
            .unwrap();

        assert_eq!(
            events,
            vec![Event {
                token: 7,
                readable: true,
                writable: false
            }]
        );
    }

    #[test]
    fn wake_interrupts_poll_without_events() {
        let poller = EpollPoller::new(8).unwrap();
        poller.wake();

        let mut events = Vec::new();
        poller
            .poll(&mut events, Some(Duration::from_secs(5)))
            .unwrap();

        assert!(events.is_empty());
    }
}
