//! Public handle types.
//!
//! Each handle is a thin facade over a delegate obtained from the loop's
//! backend. None of them know which backend is active.

mod event_loop;
mod listener;
mod signal;
mod socket;
mod timer;

pub use event_loop::{DispatchThread, EventLoop};
pub use listener::{EventListener, ListenerHandler};
pub use signal::{EventSignal, SignalTrigger};
pub use socket::{EventSocket, SocketEvent, SocketGuard, SocketHandler, SocketIo};
pub use timer::{EventTimer, TimerMode};
