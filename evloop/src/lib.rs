//! # evloop
//!
//! **evloop** is a small event-loop layer for the **Nebula** ecosystem. It
//! exposes reactor-style handles (sockets, listeners, signals and timers)
//! behind a stable API, while the actual registration, polling and dispatch
//! are done by a backend that can be swapped without touching any handle.
//!
//! Each handle owns an opaque delegate obtained from the loop it was created
//! on. The loop is the single place where a backend is chosen:
//!
//! - an `epoll(7)` reactor on Linux (the default there),
//! - a portable `poll(2)` reactor everywhere else,
//! - or any third-party [`backend::LoopBackend`].
//!
//! Callbacks run serially on one dispatch thread; handles can be used from
//! any thread.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use evloop::{EventLoop, EventTimer};
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::make_event_loop();
//!
//! let timer = EventTimer::new(&event_loop, || println!("tick"));
//! timer.add_periodic(Duration::from_millis(100))?;
//!
//! let dispatcher = event_loop.spawn_dispatcher()?;
//! std::thread::sleep(Duration::from_secs(1));
//! dispatcher.stop()?;
//! ```
//!
//! ## Modules
//!
//! - [`backend`]: the delegate traits a backend implements
//! - [`config`]: backend selection and tunables
//!
//! ## Testing
//!
//! `#[evloop::test]` builds a loop, dispatches it on a background thread and
//! hands the test a `&EventLoop`:
//!
//! ```rust,ignore
//! #[evloop::test]
//! fn fires(event_loop: &EventLoop) {
//!     let timer = EventTimer::new(event_loop, || {});
//!     timer.add(Duration::from_millis(10)).unwrap();
//! }
//! ```

mod error;
mod event;
mod reactor;
mod utils;

pub mod backend;
pub mod config;

pub use config::{Backend, Config, EventLoopBuilder};
pub use error::{Error, Result};
pub use event::{
    DispatchThread, EventListener, EventLoop, EventSignal, EventSocket, EventTimer,
    ListenerHandler, SignalTrigger, SocketEvent, SocketGuard, SocketHandler, SocketIo, TimerMode,
};

pub use evloop_macros::test;
