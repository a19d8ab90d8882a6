//! Readiness pollers.
//!
//! The reactor talks to a single [`Poller`] type; which mechanism sits
//! behind it is chosen at runtime from [`Backend`]. `epoll` is only built
//! on Linux, `poll` everywhere.

pub(crate) mod common;
pub(crate) mod unix;

#[cfg(target_os = "linux")]
mod epoll;
mod poll;

use crate::config::Backend;
use crate::error::{Error, Result};
use crate::reactor::event::Event;
use common::Interest;

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Reserved token for the poller's own wake-up pipe.
pub(crate) const WAKE_TOKEN: u64 = u64::MAX;

/// Reserved token for the reactor's signal pipe.
pub(crate) const SIGNAL_TOKEN: u64 = u64::MAX - 1;

pub(crate) enum Poller {
    #[cfg(target_os = "linux")]
    Epoll(epoll::EpollPoller),
    Poll(poll::PollPoller),
}

impl Poller {
    pub(crate) fn new(backend: Backend, capacity: usize) -> Result<Self> {
        match backend {
            #[cfg(target_os = "linux")]
            Backend::Epoll => Ok(Poller::Epoll(epoll::EpollPoller::new(capacity)?)),
            Backend::Poll => Ok(Poller::Poll(poll::PollPoller::new(capacity)?)),
            #[allow(unreachable_patterns)]
            other => Err(Error::UnsupportedBackend(other)),
        }
    }

    pub(crate) fn wake(&self) {
        match self {
            #[cfg(target_os = "linux")]
            Poller::Epoll(p) => p.wake(),
            Poller::Poll(p) => p.wake(),
        }
    }

    pub(crate) fn register(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Poller::Epoll(p) => p.register(fd, token, interest),
            Poller::Poll(p) => p.register(fd, token, interest),
        }
    }

    pub(crate) fn reregister(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Poller::Epoll(p) => p.reregister(fd, token, interest),
            Poller::Poll(p) => p.reregister(fd, token, interest),
        }
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Poller::Epoll(p) => p.deregister(fd),
            Poller::Poll(p) => p.deregister(fd),
        }
    }

    pub(crate) fn poll(&self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Poller::Epoll(p) => p.poll(events, timeout),
            Poller::Poll(p) => p.poll(events, timeout),
        }
    }
}
