use super::EventLoop;
use crate::backend::ListenerOps;
use crate::error::Result;

use std::io;
use std::net::SocketAddr;
use std::os::fd::OwnedFd;

/// Callbacks of an [`EventListener`], run on the dispatch thread.
///
/// Closures taking `(OwnedFd, SocketAddr)` implement this trait.
pub trait ListenerHandler: Send + 'static {
    /// A connection was accepted. The descriptor is non-blocking.
    fn on_accept(&mut self, stream: OwnedFd, peer: SocketAddr);

    /// Accepting failed, for example because the process ran out of
    /// descriptors. The listener stays registered.
    fn on_error(&mut self, err: &io::Error) {
        tracing::warn!(%err, "accept failed");
    }
}

impl<F> ListenerHandler for F
where
    F: FnMut(OwnedFd, SocketAddr) + Send + 'static,
{
    fn on_accept(&mut self, stream: OwnedFd, peer: SocketAddr) {
        self(stream, peer)
    }
}

/// A passive TCP endpoint.
///
/// # Examples
///
/// ```rust,ignore
/// let listener = EventListener::new(&event_loop, |stream, peer| {
///     println!("connection from {peer}");
///     drop(stream);
/// });
/// listener.bind(8080)?;
/// ```
pub struct EventListener {
    delegate: Box<dyn ListenerOps>,
}

impl EventListener {
    pub fn new(event_loop: &EventLoop, handler: impl ListenerHandler) -> Self {
        Self {
            delegate: event_loop.delegate().listener(Box::new(handler)),
        }
    }

    /// Listens on `0.0.0.0:port`. Port 0 picks an ephemeral port, see
    /// [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// Fails if the port is unavailable or the listener is already bound.
    pub fn bind(&self, port: u16) -> Result<()> {
        self.delegate.bind(port)
    }

    /// The bound address, once [`bind`](Self::bind) succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.delegate.local_addr()
    }
}
