//! Event loop configuration.
//!
//! [`EventLoopBuilder`] is the single place where a backend is chosen.
//! Handles never see this choice: they are built against whatever loop
//! the builder produced.

use crate::error::{Error, Result};
use crate::event::EventLoop;

use std::env;
use std::fmt;
use std::str::FromStr;

/// Environment variable selecting the backend in [`EventLoopBuilder::from_env`].
pub const ENV_BACKEND: &str = "EVLOOP_BACKEND";

/// Environment variable overriding [`Config::event_capacity`].
pub const ENV_EVENT_CAPACITY: &str = "EVLOOP_EVENT_CAPACITY";

/// Environment variable overriding [`Config::read_chunk`].
pub const ENV_READ_CHUNK: &str = "EVLOOP_READ_CHUNK";

/// Environment variable overriding [`Config::max_write_buffer`].
pub const ENV_MAX_WRITE_BUFFER: &str = "EVLOOP_MAX_WRITE_BUFFER";

/// The readiness mechanism driving a loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Backend {
    /// Linux `epoll(7)`.
    Epoll,

    /// Portable `poll(2)`.
    Poll,
}

impl Backend {
    /// Returns the canonical lowercase name of the backend.
    pub fn name(self) -> &'static str {
        match self {
            Backend::Epoll => "epoll",
            Backend::Poll => "poll",
        }
    }

    /// Whether the backend can be built on the current platform.
    pub fn is_supported(self) -> bool {
        match self {
            Backend::Epoll => cfg!(target_os = "linux"),
            Backend::Poll => true,
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(target_os = "linux") {
            Backend::Epoll
        } else {
            Backend::Poll
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "epoll" => Ok(Backend::Epoll),
            "poll" => Ok(Backend::Poll),
            "" | "default" => Ok(Backend::default()),
            _ => Err(Error::UnknownBackend(s.to_string())),
        }
    }
}

/// Tunables shared by a loop and every handle built against it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Readiness mechanism.
    pub backend: Backend,

    /// Maximum number of readiness events collected per poll.
    pub event_capacity: usize,

    /// Number of bytes read from a descriptor per `read(2)` call.
    pub read_chunk: usize,

    /// Upper bound on bytes queued in a socket's output buffer.
    ///
    /// `write` accepts fewer bytes than requested once this is reached.
    pub max_write_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            event_capacity: 64,
            read_chunk: 4096,
            max_write_buffer: 1 << 20,
        }
    }
}

/// Builder for configuring and creating an [`EventLoop`].
///
/// # Examples
///
/// ```rust,ignore
/// let event_loop = EventLoopBuilder::new()
///     .backend(Backend::Poll)
///     .read_chunk(16 * 1024)
///     .build()?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct EventLoopBuilder {
    config: Config,
}

impl EventLoopBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder seeded from `EVLOOP_*` environment variables.
    ///
    /// Unset variables keep their defaults. A set but malformed variable is
    /// reported as an error rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::new();

        if let Ok(value) = env::var(ENV_BACKEND) {
            builder.config.backend = value.parse()?;
        }
        if let Some(n) = env_usize(ENV_EVENT_CAPACITY)? {
            builder = builder.event_capacity(n);
        }
        if let Some(n) = env_usize(ENV_READ_CHUNK)? {
            builder = builder.read_chunk(n);
        }
        if let Some(n) = env_usize(ENV_MAX_WRITE_BUFFER)? {
            builder = builder.max_write_buffer(n);
        }

        Ok(builder)
    }

    /// Selects the readiness mechanism.
    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Sets the number of events collected per poll.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn event_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "event_capacity must be > 0");

        self.config.event_capacity = n;
        self
    }

    /// Sets the size of each read from a socket descriptor.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn read_chunk(mut self, n: usize) -> Self {
        assert!(n > 0, "read_chunk must be > 0");

        self.config.read_chunk = n;
        self
    }

    /// Caps each socket's output buffer.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn max_write_buffer(mut self, n: usize) -> Self {
        assert!(n > 0, "max_write_buffer must be > 0");

        self.config.max_write_buffer = n;
        self
    }

    /// Returns the configuration assembled so far.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Builds the loop.
    ///
    /// This creates the poller and its wake-up and signal pipes.
    pub fn build(self) -> Result<EventLoop> {
        EventLoop::with_config(self.config)
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .map(Some)
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{key} must be a positive integer, got `{value}`"),
                ))
            }),
        Err(_) => Ok(None),
    }
}
