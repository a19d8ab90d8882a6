//! The built-in backend.
//!
//! The reactor owns a poller, a timer heap and a registry mapping poller
//! tokens to handles. It is driven by whichever thread calls `run` or
//! `run_once`; every other thread talks to it through commands and by
//! registering descriptors directly with the poller.
//!
//! Users never name these types. [`EventLoop`](crate::EventLoop) builds a
//! [`ReactorHandle`] and every handle asks it for a delegate.

mod command;
mod core;
mod event;
mod listener;
mod lock;
mod poller;
mod signal;
mod socket;
mod timer;
mod trigger;

pub(crate) use core::ReactorHandle;
