use crate::config::Backend;

use std::io;
use std::os::fd::RawFd;

/// Errors reported by event loop handles and backends.
///
/// Setup failures (bad descriptor, unreachable endpoint, unavailable port)
/// and hard I/O failures are both reported through this type. Transient
/// conditions such as "no data buffered yet" are not errors: they surface
/// as `Ok(0)` or a partial byte count.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The owning [`EventLoop`](crate::EventLoop) has been dropped.
    #[error("event loop has been shut down")]
    LoopClosed,

    /// Another thread is already dispatching this loop.
    #[error("event loop is already being dispatched by another thread")]
    AlreadyRunning,

    /// The handle already owns an active transport.
    #[error("handle is already bound")]
    AlreadyBound,

    /// The socket has no transport yet.
    #[error("socket is not bound to a descriptor")]
    NotBound,

    /// The peer closed the stream.
    #[error("connection closed by peer")]
    Closed,

    /// The descriptor is closed or otherwise unusable.
    #[error("invalid descriptor {0}")]
    InvalidDescriptor(RawFd),

    /// The signal number is unknown or cannot be caught.
    #[error("signal {0} cannot be watched")]
    InvalidSignal(i32),

    /// Address resolution produced no usable endpoint.
    #[error("could not resolve `{0}`")]
    Resolve(String),

    /// A backend name did not match any known backend.
    #[error("unknown backend `{0}`")]
    UnknownBackend(String),

    /// The backend is not available on this platform.
    #[error("backend `{0}` is not supported on this platform")]
    UnsupportedBackend(Backend),

    /// The dispatch thread panicked while running callbacks.
    #[error("dispatch thread panicked")]
    DispatchPanicked,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::ErrorKind> for Error {
    fn from(kind: io::ErrorKind) -> Self {
        Error::Io(kind.into())
    }
}
