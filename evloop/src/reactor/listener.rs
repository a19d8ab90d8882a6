use super::core::{Reactor, Registration};
use super::lock::ReentrantLock;
use super::poller::common::Interest;
use super::poller::unix::{
    sys_accept, sys_bind, sys_listen, sys_set_reuseaddr, sys_sockname, sys_socket,
};
use crate::backend::ListenerOps;
use crate::error::{Error, Result};
use crate::event::ListenerHandler;

use parking_lot::Mutex;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::{Arc, Weak};

pub(crate) struct ListenerShared {
    me: Weak<ListenerShared>,
    reactor: Arc<Reactor>,
    token: u64,
    gate: ReentrantLock,
    fd: Mutex<Option<OwnedFd>>,
    handler: Mutex<Box<dyn ListenerHandler>>,
}

impl ListenerShared {
    /// Accepts every pending connection and hands each to the handler.
    pub(crate) fn handle_event(&self) {
        let _gate = self.gate.guard();

        loop {
            let accepted = match self.fd.lock().as_ref() {
                Some(fd) => sys_accept(fd.as_raw_fd()),
                None => return,
            };

            match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(token = self.token, %peer, "accepted connection");
                    self.handler.lock().on_accept(stream, peer);
                }
                Err(err) => match err.kind() {
                    io::ErrorKind::WouldBlock => return,
                    io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted => continue,
                    _ => {
                        self.handler.lock().on_error(&err);
                        return;
                    }
                },
            }
        }
    }

    fn close(&self) {
        let _gate = self.gate.guard();

        if let Some(fd) = self.fd.lock().take() {
            self.reactor.deregister(fd.as_raw_fd(), self.token, true);
        }
    }
}

/// Listener delegate handed to [`EventListener`](crate::EventListener).
pub(crate) struct ReactorListener {
    shared: Arc<ListenerShared>,
}

impl ReactorListener {
    pub(crate) fn new(reactor: Arc<Reactor>, handler: Box<dyn ListenerHandler>) -> Self {
        reactor.acquire_handle();

        let token = reactor.next_token();
        let shared = Arc::new_cyclic(|me| ListenerShared {
            me: me.clone(),
            reactor,
            token,
            gate: ReentrantLock::new(),
            fd: Mutex::new(None),
            handler: Mutex::new(handler),
        });

        Self { shared }
    }
}

impl ListenerOps for ReactorListener {
    fn bind(&self, port: u16) -> Result<()> {
        let shared = &self.shared;
        shared.reactor.ensure_open()?;

        let mut slot = shared.fd.lock();
        if slot.is_some() {
            return Err(Error::AlreadyBound);
        }

        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        let fd = sys_socket(libc::AF_INET)?;

        sys_set_reuseaddr(fd.as_raw_fd())?;
        sys_bind(fd.as_raw_fd(), &addr)?;
        sys_listen(fd.as_raw_fd())?;

        shared.reactor.register(
            fd.as_raw_fd(),
            shared.token,
            Interest::READABLE,
            Registration::Listener(shared.me.clone()),
        )?;

        tracing::debug!(token = shared.token, port, "listening");
        *slot = Some(fd);

        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.fd.lock()
            .as_ref()
            .and_then(|fd| sys_sockname(fd.as_raw_fd()).ok())
    }
}

impl Drop for ReactorListener {
    fn drop(&mut self) {
        self.shared.close();
        self.shared.reactor.release_handle();
    }
}
