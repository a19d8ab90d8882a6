//! Signal delivery through a self-pipe.
//!
//! A process-wide handler writes the signal number into the signal pipe of
//! the loop watching it. The dispatch thread reads the pipe and runs the
//! callbacks of every handle watching that number on that loop.
//!
//! The disposition that was in place before the first registration is
//! restored once the last registration for a signal goes away.

use super::core::Reactor;
use super::timer::TimerTarget;
use super::trigger::Trigger;
use crate::backend::{SignalCallback, SignalOps};
use crate::error::{Error, Result};
use crate::event::SignalTrigger;

use nix::errno::Errno;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use std::time::{Duration, Instant};

const SIGNAL_SLOTS: usize = 65;

/// Write end of the signal pipe of the loop receiving each signal.
static SIGNAL_PIPES: [AtomicI32; SIGNAL_SLOTS] = [const { AtomicI32::new(-1) }; SIGNAL_SLOTS];

struct Installed {
    previous: SigAction,

    /// One entry per live registration, most recent last.
    watchers: Vec<RawFd>,
}

static INSTALLED: LazyLock<Mutex<HashMap<i32, Installed>>> = LazyLock::new(Default::default);

extern "C" fn forward_signal(signal: libc::c_int) {
    let saved = Errno::last_raw();

    if let Some(slot) = SIGNAL_PIPES.get(signal as usize) {
        let fd = slot.load(Ordering::Acquire);
        if fd >= 0 {
            let byte = signal as u8;
            unsafe {
                libc::write(fd, &byte as *const u8 as *const _, 1);
            }
        }
    }

    Errno::set_raw(saved);
}

fn catchable(signal: i32) -> Result<Signal> {
    match Signal::try_from(signal) {
        Ok(Signal::SIGKILL | Signal::SIGSTOP) | Err(_) => Err(Error::InvalidSignal(signal)),
        Ok(sig) => Ok(sig),
    }
}

/// Routes `signal` to `pipe`, installing the forwarding handler if needed.
fn install(signal: Signal, pipe: RawFd) -> io::Result<()> {
    let signum = signal as i32;
    let slot = &SIGNAL_PIPES[signum as usize];
    let mut installed = INSTALLED.lock();

    let previous_pipe = slot.swap(pipe, Ordering::AcqRel);

    match installed.get_mut(&signum) {
        Some(entry) => entry.watchers.push(pipe),
        None => {
            let action = SigAction::new(
                SigHandler::Handler(forward_signal),
                SaFlags::SA_RESTART,
                SigSet::empty(),
            );

            let previous = match unsafe { sigaction(signal, &action) } {
                Ok(previous) => previous,
                Err(errno) => {
                    slot.store(previous_pipe, Ordering::Release);
                    return Err(errno.into());
                }
            };

            tracing::debug!(signal = signum, "installed signal handler");
            installed.insert(
                signum,
                Installed {
                    previous,
                    watchers: vec![pipe],
                },
            );
        }
    }

    if previous_pipe >= 0 && previous_pipe != pipe {
        tracing::warn!(
            signal = signum,
            "signal is now delivered to a different event loop"
        );
    }

    Ok(())
}

/// Drops one registration of `signal` for `pipe`.
fn uninstall(signum: i32, pipe: RawFd) {
    let mut installed = INSTALLED.lock();

    let Some(entry) = installed.get_mut(&signum) else {
        return;
    };

    if let Some(pos) = entry.watchers.iter().rposition(|fd| *fd == pipe) {
        entry.watchers.remove(pos);
    }

    let slot = &SIGNAL_PIPES[signum as usize];

    if let Some(&fd) = entry.watchers.last() {
        slot.store(fd, Ordering::Release);
        return;
    }

    let Some(entry) = installed.remove(&signum) else {
        return;
    };

    if let Ok(signal) = Signal::try_from(signum) {
        if let Err(errno) = unsafe { sigaction(signal, &entry.previous) } {
            tracing::warn!(signal = signum, %errno, "failed to restore signal disposition");
        }
    }

    slot.store(-1, Ordering::Release);
    tracing::debug!(signal = signum, "restored signal disposition");
}

/// Signal handles registered on one loop, by signal number.
#[derive(Default)]
pub(crate) struct SignalTable {
    watchers: Mutex<HashMap<i32, Vec<Weak<SignalShared>>>>,
}

impl SignalTable {
    fn watch(&self, signal: i32, shared: Weak<SignalShared>) {
        self.watchers.lock().entry(signal).or_default().push(shared);
    }

    fn unwatch(&self, signal: i32, shared: &Weak<SignalShared>) {
        let mut watchers = self.watchers.lock();

        if let Some(list) = watchers.get_mut(&signal) {
            list.retain(|w| !w.ptr_eq(shared));
            if list.is_empty() {
                watchers.remove(&signal);
            }
        }
    }

    /// Runs the callbacks for every signal number read from the pipe.
    pub(crate) fn dispatch(&self, delivered: &[u8]) {
        let mut seen = Vec::new();

        for &byte in delivered {
            let signal = byte as i32;
            if seen.contains(&signal) {
                continue;
            }
            seen.push(signal);

            let targets: Vec<Arc<SignalShared>> = self.watchers.lock()
                .get(&signal)
                .map(|list| list.iter().filter_map(Weak::upgrade).collect())
                .unwrap_or_default();

            tracing::trace!(signal, handles = targets.len(), "signal delivered");

            for target in targets {
                target.fire_delivered();
            }
        }
    }

    /// Cancels and releases every registration of this loop.
    pub(crate) fn release_all(&self) {
        let all: Vec<Arc<SignalShared>> = self.watchers.lock()
            .values()
            .flatten()
            .filter_map(Weak::upgrade)
            .collect();

        for shared in all {
            shared.trigger.disarm(true);
            shared.release();
        }
    }
}

pub(crate) struct SignalShared {
    me: Weak<SignalShared>,
    reactor: Arc<Reactor>,
    signal: i32,
    trigger: Trigger<SignalTrigger>,

    /// Whether this handle currently holds a watch and a handler reference.
    installed: Mutex<bool>,
}

impl SignalShared {
    /// Drops the watch and the handler reference unless the handle has been
    /// armed again in the meantime.
    ///
    /// `add` arms under the same lock, so a concurrent re-add either keeps
    /// the watch here or installs a fresh one afterwards.
    fn release(&self) {
        let mut installed = self.installed.lock();
        if !*installed || self.trigger.is_pending() {
            return;
        }

        *installed = false;
        self.reactor.signals.unwatch(self.signal, &self.me);
        uninstall(self.signal, self.reactor.signal_writer_fd());
    }

    fn fire_delivered(&self) {
        self.trigger
            .fire(None, false, SignalTrigger::Delivered, || self.release());
    }

    pub(crate) fn awaits_timeout(&self, generation: u64) -> bool {
        self.trigger.is_current(generation)
    }

    pub(crate) fn fire_timeout(&self, generation: u64) {
        self.trigger.fire(
            Some(generation),
            false,
            SignalTrigger::TimedOut,
            || self.release(),
        );
    }
}

/// Signal delegate handed to [`EventSignal`](crate::EventSignal).
pub(crate) struct ReactorSignal {
    shared: Arc<SignalShared>,
}

impl ReactorSignal {
    pub(crate) fn new(reactor: Arc<Reactor>, signal: i32, callback: SignalCallback) -> Self {
        reactor.acquire_handle();

        let shared = Arc::new_cyclic(|me| SignalShared {
            me: me.clone(),
            reactor,
            signal,
            trigger: Trigger::new(callback),
            installed: Mutex::new(false),
        });

        Self { shared }
    }
}

impl SignalOps for ReactorSignal {
    fn add(&self, timeout: Option<Duration>) -> Result<()> {
        let shared = &self.shared;
        let reactor = &shared.reactor;

        reactor.ensure_open()?;
        let signal = catchable(shared.signal)?;

        // An unrepresentable deadline means the timeout never elapses.
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));

        let generation = {
            let mut installed = shared.installed.lock();
            let generation = shared.trigger.arm();

            if !*installed {
                reactor.signals.watch(shared.signal, shared.me.clone());

                if let Err(err) = install(signal, reactor.signal_writer_fd()) {
                    reactor.signals.unwatch(shared.signal, &shared.me);
                    drop(installed);
                    shared.trigger.disarm(true);
                    return Err(err.into());
                }

                *installed = true;
            }

            generation
        };

        if let Some(deadline) = deadline {
            let scheduled = reactor.schedule(
                deadline,
                generation,
                TimerTarget::SignalTimeout(shared.me.clone()),
            );

            if let Err(err) = scheduled {
                self.remove();
                return Err(err);
            }
        }

        tracing::debug!(signal = shared.signal, ?timeout, "watching signal");
        Ok(())
    }

    fn remove(&self) {
        let shared = &self.shared;

        shared.trigger.disarm(shared.reactor.is_dispatch_thread());
        shared.release();
    }

    fn is_pending(&self) -> bool {
        self.shared.trigger.is_pending()
    }
}

impl Drop for ReactorSignal {
    fn drop(&mut self) {
        self.remove();
        self.shared.reactor.release_handle();
    }
}
