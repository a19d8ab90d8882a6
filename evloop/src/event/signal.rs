use super::EventLoop;
use crate::backend::SignalOps;
use crate::error::Result;

use std::time::Duration;

/// Why an [`EventSignal`] callback ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalTrigger {
    /// The signal was delivered to the process.
    Delivered,

    /// The timeout given to [`EventSignal::add_with_timeout`] elapsed first.
    TimedOut,
}

/// Watches for a POSIX signal.
///
/// A registration is one-shot: after the callback fires the handle is no
/// longer pending and must be added again to keep watching.
///
/// # Examples
///
/// ```rust,ignore
/// let signal = EventSignal::new(&event_loop, libc::SIGINT, |trigger| {
///     println!("{trigger:?}");
/// });
/// signal.add_with_timeout(Duration::from_secs(5))?;
/// ```
pub struct EventSignal {
    signal: i32,
    delegate: Box<dyn SignalOps>,
}

impl EventSignal {
    pub fn new<F>(event_loop: &EventLoop, signal: i32, callback: F) -> Self
    where
        F: FnMut(SignalTrigger) + Send + 'static,
    {
        Self {
            signal,
            delegate: event_loop.delegate().signal(signal, Box::new(callback)),
        }
    }

    /// Starts watching. Re-adding a pending signal restarts the
    /// registration and cancels its timeout.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSignal`](crate::Error::InvalidSignal) for unknown or
    /// uncatchable signals such as `SIGKILL`.
    pub fn add(&self) -> Result<()> {
        self.delegate.add(None)
    }

    /// Starts watching; fires with [`SignalTrigger::TimedOut`] if the
    /// signal does not arrive within `timeout`.
    pub fn add_with_timeout(&self, timeout: Duration) -> Result<()> {
        self.delegate.add(Some(timeout))
    }

    /// Stops watching. Removing an idle signal does nothing.
    pub fn remove(&self) {
        self.delegate.remove();
    }

    pub fn is_pending(&self) -> bool {
        self.delegate.is_pending()
    }

    /// The signal number given at construction.
    pub fn signal(&self) -> i32 {
        self.signal
    }
}
