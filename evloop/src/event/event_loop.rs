use crate::backend::LoopBackend;
use crate::config::{Backend, Config, EventLoopBuilder};
use crate::error::{Error, Result};
use crate::reactor::ReactorHandle;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// An event loop.
///
/// The loop is the only place a backend is chosen. Handles such as
/// [`EventSocket`](crate::EventSocket) are created against a loop and
/// obtain their delegate from it.
///
/// Callbacks run serially on whichever thread is inside [`run`](Self::run)
/// or [`run_once`](Self::run_once). Handles may be used from any thread.
///
/// Dropping the loop shuts its backend down. Handles that are still alive
/// stay memory-safe, never fire again, and fail their setup operations
/// with [`Error::LoopClosed`].
pub struct EventLoop {
    backend: Arc<dyn LoopBackend>,
}

impl EventLoop {
    /// Creates a loop using the default backend for this platform, or the
    /// one named by `EVLOOP_BACKEND`.
    ///
    /// # Panics
    ///
    /// Panics if the loop cannot be created (for example when the process
    /// is out of file descriptors) or the environment names an unknown or
    /// unsupported backend. Use [`EventLoop::builder`] to handle these
    /// errors instead.
    pub fn make_event_loop() -> EventLoop {
        match EventLoopBuilder::from_env().and_then(EventLoopBuilder::build) {
            Ok(event_loop) => event_loop,
            Err(err) => panic!("failed to create event loop: {err}"),
        }
    }

    /// Returns a builder for a loop with an explicit configuration.
    pub fn builder() -> EventLoopBuilder {
        EventLoopBuilder::new()
    }

    pub(crate) fn with_config(config: Config) -> Result<Self> {
        if !config.backend.is_supported() {
            return Err(Error::UnsupportedBackend(config.backend));
        }

        Ok(Self::from_backend(Arc::new(ReactorHandle::new(config)?)))
    }

    /// Wraps a custom backend.
    pub fn from_backend(backend: Arc<dyn LoopBackend>) -> Self {
        Self { backend }
    }

    /// Dispatches events on the calling thread until [`exit`](Self::exit)
    /// is called.
    ///
    /// An `exit` issued while nobody is dispatching makes the next `run`
    /// return after its first turn.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyRunning`] if another thread is dispatching this loop.
    pub fn run(&self) -> Result<()> {
        self.backend.run()
    }

    /// Runs a single turn: waits up to `timeout` for readiness (forever if
    /// `None`, bounded by the next timer), then runs the due callbacks.
    pub fn run_once(&self, timeout: Option<Duration>) -> Result<()> {
        self.backend.run_once(timeout)
    }

    /// Asks the dispatching thread to return. Callable from any thread,
    /// including from inside a callback.
    pub fn exit(&self) {
        self.backend.exit();
    }

    /// Starts a thread named `evloop-dispatch` running [`run`](Self::run).
    pub fn spawn_dispatcher(&self) -> Result<DispatchThread> {
        let backend = self.backend.clone();

        let handle = thread::Builder::new()
            .name("evloop-dispatch".into())
            .spawn(move || backend.run())?;

        Ok(DispatchThread {
            backend: self.backend.clone(),
            handle: Some(handle),
        })
    }

    /// The readiness mechanism driving this loop.
    pub fn backend(&self) -> Backend {
        self.backend.backend()
    }

    /// Number of handles created on this loop that are still alive.
    pub fn live_handles(&self) -> usize {
        self.backend.live_handles()
    }

    pub(crate) fn delegate(&self) -> &dyn LoopBackend {
        self.backend.as_ref()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::make_event_loop()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.backend.shutdown();
    }
}

/// A thread dispatching an [`EventLoop`].
///
/// Dropping it stops the loop and joins the thread.
pub struct DispatchThread {
    backend: Arc<dyn LoopBackend>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl DispatchThread {
    /// Stops dispatching and waits for the thread to finish.
    ///
    /// # Errors
    ///
    /// Returns what `run` returned, or [`Error::DispatchPanicked`] if a
    /// callback panicked.
    pub fn stop(mut self) -> Result<()> {
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        self.backend.exit();
        handle.join().map_err(|_| Error::DispatchPanicked)?
    }
}

impl Drop for DispatchThread {
    fn drop(&mut self) {
        if let Err(err) = self.join() {
            tracing::warn!(%err, "dispatch thread ended with an error");
        }
    }
}
