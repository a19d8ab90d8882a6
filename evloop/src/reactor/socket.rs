//! Buffered stream sockets.
//!
//! All descriptor I/O happens on the dispatch thread inside
//! [`SocketShared::handle_event`]. Handle operations only touch the input
//! and output buffers and adjust poller interest.

use super::core::{Reactor, Registration};
use super::event::Event;
use super::lock::ReentrantLock;
use super::poller::common::Interest;
use super::poller::unix::{
    connect_in_progress, domain_of, sys_connect, sys_fd_is_valid, sys_get_socket_error, sys_read,
    sys_restore_flags, sys_send, sys_set_nonblocking, sys_socket,
};
use crate::backend::SocketOps;
use crate::error::{Error, Result};
use crate::event::{SocketEvent, SocketHandler, SocketIo};

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Weak};

enum SocketFd {
    /// Adopted with `bind`; the caller keeps ownership.
    Borrowed(RawFd),

    /// Created by `connect` or handed over with `bind_owned`.
    Owned(OwnedFd),
}

impl SocketFd {
    fn raw(&self) -> RawFd {
        match self {
            SocketFd::Borrowed(fd) => *fd,
            SocketFd::Owned(fd) => fd.as_raw_fd(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SocketState {
    Idle,
    Connecting,
    Open,
    Eof,
    Failed(io::ErrorKind),
}

/// Notifications collected under the core lock and delivered after it.
enum Notice {
    Connected,
    Read,
    Write,
    Eof,
    Error(io::Error),
}

struct SocketCore {
    fd: Option<SocketFd>,
    state: SocketState,
    input: BytesMut,
    output: BytesMut,
    watermark: usize,

    /// Interest currently registered with the poller, if any.
    interest: Option<Interest>,

    scratch: Vec<u8>,
}

impl SocketCore {
    fn desired_interest(&self) -> Option<Interest> {
        match self.state {
            SocketState::Connecting => Some(Interest::WRITABLE),
            SocketState::Open if self.output.is_empty() => Some(Interest::READABLE),
            SocketState::Open => Some(Interest::BOTH),
            SocketState::Idle | SocketState::Eof | SocketState::Failed(_) => None,
        }
    }

    fn fail(&mut self, err: &io::Error) {
        self.state = SocketState::Failed(err.kind());
        self.output.clear();
    }
}

pub(crate) struct SocketShared {
    me: Weak<SocketShared>,
    reactor: Arc<Reactor>,
    token: u64,

    /// Held while callbacks run and by [`SocketOps::lock`].
    gate: ReentrantLock,

    core: Mutex<SocketCore>,
    handler: Mutex<Box<dyn SocketHandler>>,
}

impl SocketShared {
    fn attach(&self, fd: SocketFd, state: SocketState) -> Result<()> {
        self.reactor.ensure_open()?;

        let mut core = self.core.lock();
        if core.fd.is_some() {
            return Err(Error::AlreadyBound);
        }

        let raw = fd.raw();
        let flags = sys_set_nonblocking(raw)?;

        core.state = state;
        let interest = core.desired_interest();

        if let Some(interest) = interest {
            if let Err(err) = self.reactor.register(
                raw,
                self.token,
                interest,
                Registration::Socket(self.me.clone()),
            ) {
                core.state = SocketState::Idle;
                if let Err(restore) = sys_restore_flags(raw, flags) {
                    tracing::warn!(fd = raw, error = %restore, "failed to restore descriptor flags");
                }
                return Err(err);
            }
        }

        core.fd = Some(fd);
        core.interest = interest;

        tracing::debug!(token = self.token, fd = raw, state = ?core.state, "socket attached");
        Ok(())
    }

    /// Brings the poller registration in line with the socket state.
    fn sync_interest(&self, core: &mut SocketCore) {
        let Some(fd) = core.fd.as_ref().map(SocketFd::raw) else {
            return;
        };

        let desired = core.desired_interest();
        if desired == core.interest {
            return;
        }

        match desired {
            Some(interest) => {
                if let Err(err) = self.reactor.poller().reregister(fd, self.token, interest) {
                    tracing::warn!(token = self.token, fd, %err, "failed to update interest");
                    return;
                }
            }
            None => self.reactor.deregister(fd, self.token, core.interest.is_some()),
        }

        core.interest = desired;
    }

    pub(crate) fn handle_event(&self, event: &Event) {
        let _gate = self.gate.guard();
        let mut notices = Vec::new();

        {
            let mut guard = self.core.lock();
            let core = &mut *guard;

            let Some(fd) = core.fd.as_ref().map(SocketFd::raw) else {
                return;
            };

            if core.state == SocketState::Connecting && (event.writable || event.readable) {
                match sys_get_socket_error(fd) {
                    Ok(()) => {
                        core.state = SocketState::Open;
                        notices.push(Notice::Connected);
                    }
                    Err(err) => {
                        core.fail(&err);
                        notices.push(Notice::Error(err));
                    }
                }
            }

            if core.state == SocketState::Open && event.readable {
                self.fill(fd, core, &mut notices);
            }

            if core.state == SocketState::Open && event.writable && !core.output.is_empty() {
                self.flush(fd, core, &mut notices);
            }

            self.sync_interest(core);
        }

        self.notify(notices);
    }

    /// Reads everything available into the input buffer.
    fn fill(&self, fd: RawFd, core: &mut SocketCore, notices: &mut Vec<Notice>) {
        let chunk = self.reactor.config().read_chunk;
        core.scratch.resize(chunk, 0);

        let before = core.input.len();
        let first = notices.len();

        loop {
            let n = sys_read(fd, &mut core.scratch);

            if n > 0 {
                let n = n as usize;
                core.input.extend_from_slice(&core.scratch[..n]);

                if n < chunk {
                    break;
                }
                continue;
            }

            if n == 0 {
                core.state = SocketState::Eof;
                break;
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => break,
                io::ErrorKind::Interrupted => continue,
                _ => {
                    core.fail(&err);
                    notices.push(Notice::Error(err));
                    break;
                }
            }
        }

        let threshold = core.watermark.max(1);
        if core.input.len() > before && core.input.len() >= threshold {
            notices.insert(first, Notice::Read);
        }

        if core.state == SocketState::Eof {
            tracing::debug!(token = self.token, fd, "peer closed connection");
            notices.push(Notice::Eof);
        }
    }

    /// Writes as much of the output buffer as the descriptor accepts.
    fn flush(&self, fd: RawFd, core: &mut SocketCore, notices: &mut Vec<Notice>) {
        loop {
            let n = sys_send(fd, &core.output);

            if n > 0 {
                core.output.advance(n as usize);
                if core.output.is_empty() {
                    notices.push(Notice::Write);
                    break;
                }
                continue;
            }

            if n == 0 {
                break;
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => break,
                io::ErrorKind::Interrupted => continue,
                _ => {
                    core.fail(&err);
                    notices.push(Notice::Error(err));
                    break;
                }
            }
        }
    }

    fn notify(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }

        let mut handler = self.handler.lock();
        let io = SocketIo::new(self);

        for notice in notices {
            match notice {
                Notice::Connected => handler.on_event(&io, SocketEvent::Connected),
                Notice::Read => handler.on_read(&io),
                Notice::Write => handler.on_write(&io),
                Notice::Eof => handler.on_event(&io, SocketEvent::Eof),
                Notice::Error(err) => handler.on_event(&io, SocketEvent::Error(err)),
            }
        }
    }

    /// Deregisters and releases the descriptor.
    ///
    /// Waits for a callback running on another thread to finish.
    fn close(&self) {
        let _gate = self.gate.guard();
        let mut core = self.core.lock();

        if let Some(fd) = core.fd.take() {
            self.reactor
                .deregister(fd.raw(), self.token, core.interest.take().is_some());
        }

        core.state = SocketState::Idle;
    }
}

impl SocketOps for SocketShared {
    fn bind(&self, fd: RawFd) -> Result<()> {
        if !sys_fd_is_valid(fd) {
            return Err(Error::InvalidDescriptor(fd));
        }

        self.attach(SocketFd::Borrowed(fd), SocketState::Open)
    }

    fn bind_owned(&self, fd: OwnedFd) -> Result<()> {
        self.attach(SocketFd::Owned(fd), SocketState::Open)
    }

    fn connect(&self, ip: &str, port: u16) -> Result<()> {
        self.reactor.ensure_open()?;

        if self.core.lock().fd.is_some() {
            return Err(Error::AlreadyBound);
        }

        // Literal addresses only: name resolution would block the caller.
        let addr = ip
            .parse::<IpAddr>()
            .map(|ip| SocketAddr::new(ip, port))
            .map_err(|_| Error::Resolve(format!("{ip}:{port}")))?;

        let socket = sys_socket(domain_of(&addr))?;

        match sys_connect(socket.as_raw_fd(), &addr) {
            Ok(()) => {}
            Err(err) if connect_in_progress(&err) => {}
            Err(err) => {
                tracing::debug!(%addr, %err, "connect failed");
                return Err(err.into());
            }
        }

        tracing::debug!(token = self.token, %addr, "connecting");
        self.attach(SocketFd::Owned(socket), SocketState::Connecting)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut core = self.core.lock();

        match core.state {
            SocketState::Idle => return Err(Error::NotBound),
            SocketState::Eof => return Err(Error::Closed),
            SocketState::Failed(kind) => return Err(kind.into()),
            SocketState::Connecting | SocketState::Open => {}
        }

        let room = self
            .reactor
            .config()
            .max_write_buffer
            .saturating_sub(core.output.len());
        let n = room.min(buf.len());

        if n > 0 {
            core.output.extend_from_slice(&buf[..n]);
            self.sync_interest(&mut core);
        }

        Ok(n)
    }

    fn set_read_watermark(&self, length: usize) {
        self.core.lock().watermark = length;
    }

    fn len(&self) -> usize {
        self.core.lock().input.len()
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut core = self.core.lock();
        let n = buf.len().min(core.input.len());

        if n == 0 {
            if let SocketState::Failed(kind) = core.state {
                if core.input.is_empty() {
                    return Err(kind.into());
                }
            }
            return Ok(0);
        }

        buf[..n].copy_from_slice(&core.input[..n]);
        core.input.advance(n);

        Ok(n)
    }

    fn discard(&self, length: usize) -> usize {
        let mut core = self.core.lock();
        let n = length.min(core.input.len());
        core.input.advance(n);
        n
    }

    fn lock(&self) {
        self.gate.lock();
    }

    fn unlock(&self) {
        if !self.gate.unlock() {
            tracing::warn!(token = self.token, "socket unlocked by a thread that does not hold it");
        }
    }
}

/// Socket delegate handed to [`EventSocket`](crate::EventSocket).
pub(crate) struct ReactorSocket {
    shared: Arc<SocketShared>,
}

impl ReactorSocket {
    pub(crate) fn new(reactor: Arc<Reactor>, handler: Box<dyn SocketHandler>) -> Self {
        reactor.acquire_handle();

        let token = reactor.next_token();
        let shared = Arc::new_cyclic(|me| SocketShared {
            me: me.clone(),
            reactor,
            token,
            gate: ReentrantLock::new(),
            core: Mutex::new(SocketCore {
                fd: None,
                state: SocketState::Idle,
                input: BytesMut::new(),
                output: BytesMut::new(),
                watermark: 0,
                interest: None,
                scratch: Vec::new(),
            }),
            handler: Mutex::new(handler),
        });

        Self { shared }
    }
}

impl SocketOps for ReactorSocket {
    fn bind(&self, fd: RawFd) -> Result<()> {
        self.shared.bind(fd)
    }

    fn bind_owned(&self, fd: OwnedFd) -> Result<()> {
        self.shared.bind_owned(fd)
    }

    fn connect(&self, ip: &str, port: u16) -> Result<()> {
        self.shared.connect(ip, port)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.shared.write(buf)
    }

    fn set_read_watermark(&self, length: usize) {
        self.shared.set_read_watermark(length);
    }

    fn len(&self) -> usize {
        self.shared.len()
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.shared.read(buf)
    }

    fn discard(&self, length: usize) -> usize {
        self.shared.discard(length)
    }

    fn lock(&self) {
        self.shared.lock();
    }

    fn unlock(&self) {
        self.shared.unlock();
    }
}

impl Drop for ReactorSocket {
    fn drop(&mut self) {
        self.shared.close();
        self.shared.reactor.release_handle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    struct Ordered(Arc<Mutex<Vec<&'static str>>>);

    impl SocketHandler for Ordered {
        fn on_read(&mut self, io: &SocketIo<'_>) {
            io.discard(io.len());
            self.0.lock().push("read");
        }

        fn on_event(&mut self, _io: &SocketIo<'_>, event: SocketEvent) {
            if matches!(event, SocketEvent::Connected) {
                self.0.lock().push("connected");
            }
        }
    }

    #[test]
    fn connected_precedes_read_in_one_event() {
        let reactor = Arc::new(Reactor::new(Config::default()).unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let socket = ReactorSocket::new(reactor, Box::new(Ordered(seen.clone())));

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        socket.connect("127.0.0.1", port).unwrap();

        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(b"greeting").unwrap();
        thread::sleep(Duration::from_millis(50));

        socket.shared.handle_event(&Event {
            token: socket.shared.token,
            readable: true,
            writable: true,
        });

        assert_eq!(*seen.lock(), ["connected", "read"]);
        assert_eq!(socket.len(), 0);
    }
}
