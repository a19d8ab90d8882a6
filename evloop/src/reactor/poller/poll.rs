//! Portable `poll(2)`-based poller.
//!
//! The interest set lives in a map keyed by descriptor and is copied into a
//! `pollfd` array on every wait. Any change to the map wakes a blocked wait
//! so the next one sees the new set.

use super::common::{Interest, SelfPipe, timeout_ms};
use crate::reactor::event::{Event, push_event};

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, nfds_t, poll, pollfd};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

pub(crate) struct PollPoller {
    interests: Mutex<HashMap<RawFd, (u64, Interest)>>,
    waker: SelfPipe,
}

impl PollPoller {
    pub(crate) fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            interests: Mutex::new(HashMap::with_capacity(capacity)),
            waker: SelfPipe::new()?,
        })
    }

    pub(crate) fn wake(&self) {
        self.waker.wake();
    }

    pub(crate) fn register(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        {
            let mut interests = self.interests.lock();
            if interests.contains_key(&fd) {
                return Err(io::Error::from_raw_os_error(libc::EEXIST));
            }
            interests.insert(fd, (token, interest));
        }

        self.wake();
        Ok(())
    }

    pub(crate) fn reregister(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        {
            let mut interests = self.interests.lock();
            match interests.get_mut(&fd) {
                Some(entry) => *entry = (token, interest),
                None => return Err(io::Error::from_raw_os_error(libc::ENOENT)),
            }
        }

        self.wake();
        Ok(())
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        if self.interests.lock().remove(&fd).is_none() {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }

        self.wake();
        Ok(())
    }

    pub(crate) fn poll(&self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let mut tokens = Vec::new();
        let mut fds = vec![pollfd {
            fd: self.waker.reader_fd(),
            events: POLLIN,
            revents: 0,
        }];

        for (&fd, &(token, interest)) in self.interests.lock().iter() {
            let mut flags = 0;
            if interest.read {
                flags |= POLLIN;
            }
            if interest.write {
                flags |= POLLOUT;
            }

            fds.push(pollfd {
                fd,
                events: flags,
                revents: 0,
            });
            tokens.push(token);
        }

        let n = unsafe { poll(fds.as_mut_ptr(), fds.len() as nfds_t, timeout_ms(timeout)) };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        if fds[0].revents != 0 {
            self.waker.drain();
        }

        for (pfd, token) in fds[1..].iter().zip(tokens) {
            if pfd.revents == 0 {
                continue;
            }

            push_event(
                events,
                Event {
                    token,
                    readable: pfd.revents & (POLLIN | POLLERR | POLLHUP | POLLNVAL) != 0,
                    writable: pfd.revents & (POLLOUT | POLLERR) != 0,
                },
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::poller::unix::{sys_pipe, sys_write};

    use std::os::fd::AsRawFd;

    #[test]
    fn reports_only_registered_readiness() {
        let poller = PollPoller::new(4).unwrap();
        let (reader, writer) = sys_pipe().unwrap();

        poller
            .register(writer.as_raw_fd(), 2, Interest::WRITABLE)
            .unwrap();
        poller
            .register(reader.as_raw_fd(), 1, Interest::READABLE)
            .unwrap();

        let mut events = Vec::new();
        poller.poll(&mut events, Some(Duration::ZERO)).unwrap();
        assert_eq!(
            events,
            vec![Event {
                token: 2,
                readable: false,
                writable: true
            }]
        );

        sys_write(writer.as_raw_fd(), b"x");
        poller.deregister(writer.as_raw_fd()).unwrap();

        events.clear();
        poller.poll(&mut events, Some(Duration::ZERO)).unwrap();
        assert_eq!(
            events,
            vec![Event {
                token: 1,
                readable: true,
                writable: false
            }]
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let poller = PollPoller::new(4).unwrap();
        let (reader, _writer) = sys_pipe().unwrap();

        poller
            .register(reader.as_raw_fd(), 1, Interest::READABLE)
            .unwrap();
        assert!(
            poller
                .register(reader.as_raw_fd(), 2, Interest::READABLE)
                .is_err()
        );
        assert!(poller.deregister(reader.as_raw_fd()).is_ok());
        assert!(poller.deregister(reader.as_raw_fd()).is_err());
    }
}
