use super::EventLoop;
use crate::backend::SocketOps;
use crate::error::Result;

use std::io;
use std::marker::PhantomData;
use std::ops::Deref;
use std::os::fd::{OwnedFd, RawFd};

/// Something that happened to a socket other than data arriving.
#[derive(Debug)]
pub enum SocketEvent {
    /// An outgoing connection completed.
    Connected,

    /// The peer closed the stream. Buffered input can still be read.
    Eof,

    /// The transport failed; further writes are refused.
    Error(io::Error),
}

/// Buffer access handed to [`SocketHandler`] callbacks.
///
/// Offers the buffer operations of [`EventSocket`] without the socket
/// itself, which the callback usually does not own.
pub struct SocketIo<'a> {
    ops: &'a dyn SocketOps,
}

impl<'a> SocketIo<'a> {
    pub fn new(ops: &'a dyn SocketOps) -> Self {
        Self { ops }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.ops.read(buf)
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.ops.write(buf)
    }

    pub fn discard(&self, length: usize) -> usize {
        self.ops.discard(length)
    }

    pub fn set_read_watermark(&self, length: usize) {
        self.ops.set_read_watermark(length);
    }
}

/// Callbacks of an [`EventSocket`], run on the dispatch thread.
pub trait SocketHandler: Send + 'static {
    /// At least the read watermark worth of bytes is buffered.
    fn on_read(&mut self, io: &SocketIo<'_>);

    /// The output buffer has drained.
    fn on_write(&mut self, io: &SocketIo<'_>) {
        let _ = io;
    }

    fn on_event(&mut self, io: &SocketIo<'_>, event: SocketEvent) {
        let _ = io;
        match event {
            SocketEvent::Error(err) => tracing::debug!(%err, "socket error"),
            other => tracing::trace!(?other, "socket event"),
        }
    }
}

/// A buffered, non-blocking stream socket.
///
/// Incoming bytes are accumulated in an input buffer and announced through
/// [`SocketHandler::on_read`] once at least the read watermark is
/// available. Writes are queued in an output buffer and flushed by the
/// loop. Neither `read` nor `write` ever blocks on the network.
///
/// # Examples
///
/// ```rust,ignore
/// struct Echo;
///
/// impl SocketHandler for Echo {
///     fn on_read(&mut self, io: &SocketIo<'_>) {
///         let mut buf = [0u8; 1024];
///         while let Ok(n @ 1..) = io.read(&mut buf) {
///             let _ = io.write(&buf[..n]);
///         }
///     }
/// }
///
/// let socket = EventSocket::new(&event_loop, Echo);
/// socket.connect("127.0.0.1", 7)?;
/// ```
pub struct EventSocket {
    delegate: Box<dyn SocketOps>,
}

impl EventSocket {
    pub fn new(event_loop: &EventLoop, handler: impl SocketHandler) -> Self {
        Self {
            delegate: event_loop.delegate().socket(Box::new(handler)),
        }
    }

    /// Adopts an open descriptor. The caller keeps ownership and must keep
    /// it open while the socket is alive.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDescriptor`](crate::Error::InvalidDescriptor) for a
    /// closed descriptor, [`Error::AlreadyBound`](crate::Error::AlreadyBound)
    /// if this socket already has a transport.
    pub fn bind(&self, fd: RawFd) -> Result<()> {
        self.delegate.bind(fd)
    }

    /// Adopts an owned descriptor, closing it when the socket is dropped.
    pub fn bind_owned(&self, fd: OwnedFd) -> Result<()> {
        self.delegate.bind_owned(fd)
    }

    /// Starts connecting to `ip:port`.
    ///
    /// Returns once the attempt is under way. The outcome is reported to
    /// [`SocketHandler::on_event`]. Bytes written before completion are
    /// sent once connected.
    pub fn connect(&self, ip: &str, port: u16) -> Result<()> {
        self.delegate.connect(ip, port)
    }

    /// Queues bytes for sending and returns how many were accepted.
    ///
    /// Fewer than `buf.len()` bytes are accepted when the output buffer is
    /// full.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.delegate.write(buf)
    }

    /// Sets the number of buffered bytes required before `on_read` fires.
    pub fn set_read_watermark(&self, length: usize) {
        self.delegate.set_read_watermark(length);
    }

    /// Bytes buffered and not yet consumed.
    pub fn len(&self) -> usize {
        self.delegate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves up to `buf.len()` buffered bytes into `buf`.
    ///
    /// Returns `Ok(0)` when nothing is buffered.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.delegate.read(buf)
    }

    /// Drops up to `length` buffered bytes and returns how many were dropped.
    pub fn discard(&self, length: usize) -> usize {
        self.delegate.discard(length)
    }

    /// Excludes the socket's callbacks (and other lockers) until the guard
    /// is released.
    ///
    /// The lock is re-entrant: a callback may lock its own socket.
    pub fn lock(&self) -> SocketGuard<'_> {
        self.delegate.lock();

        SocketGuard {
            socket: self,
            _not_send: PhantomData,
        }
    }
}

/// Scoped ownership of an [`EventSocket`] lock.
///
/// Must be released on the thread that acquired it, so it is not `Send`.
pub struct SocketGuard<'a> {
    socket: &'a EventSocket,
    _not_send: PhantomData<*const ()>,
}

impl SocketGuard<'_> {
    /// Releases the lock. Same as dropping the guard.
    pub fn unlock(self) {}
}

impl Deref for SocketGuard<'_> {
    type Target = EventSocket;

    fn deref(&self) -> &EventSocket {
        self.socket
    }
}

impl Drop for SocketGuard<'_> {
    fn drop(&mut self) {
        self.socket.delegate.unlock();
    }
}
