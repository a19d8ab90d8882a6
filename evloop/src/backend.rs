//! The delegate boundary.
//!
//! Every public handle owns one boxed delegate and forwards each operation
//! to it. A backend supplies the delegates through [`LoopBackend`]; the
//! built-in reactor is one such backend and a third party can plug in
//! another with [`EventLoop::from_backend`](crate::EventLoop::from_backend).
//!
//! Contract shared by all delegates:
//!
//! - methods may be called from any thread, concurrently with dispatch;
//! - callbacks run only on the thread inside [`LoopBackend::run`] or
//!   [`LoopBackend::run_once`];
//! - once a `remove` returns, the handle's callback does not start again;
//! - dropping a delegate releases its registration.

use crate::config::Backend;
use crate::error::Result;
use crate::event::{ListenerHandler, SignalTrigger, SocketHandler, TimerMode};

use std::net::SocketAddr;
use std::os::fd::{OwnedFd, RawFd};
use std::time::Duration;

/// Callback run when a watched signal arrives or its timeout elapses.
pub type SignalCallback = Box<dyn FnMut(SignalTrigger) + Send>;

/// Callback run when a timer expires.
pub type TimerCallback = Box<dyn FnMut() + Send>;

/// A dispatch engine and factory for per-handle delegates.
pub trait LoopBackend: Send + Sync {
    /// The readiness mechanism in use.
    fn backend(&self) -> Backend;

    fn socket(&self, handler: Box<dyn SocketHandler>) -> Box<dyn SocketOps>;

    fn listener(&self, handler: Box<dyn ListenerHandler>) -> Box<dyn ListenerOps>;

    fn signal(&self, signal: i32, callback: SignalCallback) -> Box<dyn SignalOps>;

    fn timer(&self, callback: TimerCallback) -> Box<dyn TimerOps>;

    /// Dispatches on the calling thread until [`exit`](Self::exit).
    fn run(&self) -> Result<()>;

    /// Runs one poll-and-dispatch turn, waiting at most `timeout`.
    fn run_once(&self, timeout: Option<Duration>) -> Result<()>;

    /// Asks the dispatching thread to return from `run`.
    fn exit(&self);

    /// Number of delegates created by this backend and not yet dropped.
    fn live_handles(&self) -> usize;

    /// Stops dispatching for good. Called when the owning loop is dropped.
    fn shutdown(&self);
}

/// Socket delegate.
pub trait SocketOps: Send + Sync {
    fn bind(&self, fd: RawFd) -> Result<()>;

    fn bind_owned(&self, fd: OwnedFd) -> Result<()>;

    fn connect(&self, ip: &str, port: u16) -> Result<()>;

    fn write(&self, buf: &[u8]) -> Result<usize>;

    fn set_read_watermark(&self, length: usize);

    fn len(&self) -> usize;

    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    fn discard(&self, length: usize) -> usize;

    fn lock(&self);

    fn unlock(&self);
}

/// Listener delegate.
pub trait ListenerOps: Send + Sync {
    fn bind(&self, port: u16) -> Result<()>;

    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Signal delegate.
pub trait SignalOps: Send + Sync {
    fn add(&self, timeout: Option<Duration>) -> Result<()>;

    fn remove(&self);

    fn is_pending(&self) -> bool;
}

/// Timer delegate.
pub trait TimerOps: Send + Sync {
    fn add(&self, timeout: Duration, mode: TimerMode) -> Result<()>;

    fn remove(&self);

    fn is_pending(&self) -> bool;
}
