//! Armed callbacks with generation-based cancellation.
//!
//! Timers and signals share the same life cycle: they are armed, they may
//! fire, and they may be cancelled from any thread. Every arm or disarm
//! bumps a generation counter; a scheduled firing carries the generation it
//! was armed with and is dropped if the counter has moved on.


use parking_lot::Mutex;

struct ArmState {
    generation: u64,
    pending: bool,
}

pub(crate) struct Trigger<A> {
    state: Mutex<ArmState>,
    callback: Mutex<Box<dyn FnMut(A) + Send>>,
}

impl<A> Trigger<A> {
    pub(crate) fn new(callback: Box<dyn FnMut(A) + Send>) -> Self {
        Self {
            state: Mutex::new(ArmState {
                generation: 0,
                pending: false,
            }),
            callback: Mutex::new(callback),
        }
    }

    /// Marks the trigger pending and returns the new generation.
    pub(crate) fn arm(&self) -> u64 {
        let mut state = self.state.lock();
        state.generation += 1;
        state.pending = true;
        state.generation
    }

    /// Cancels any pending firing.
    ///
    /// Off the dispatch thread this also waits for a callback that is
    /// already running, so nothing fires after `disarm` returns. On the
    /// dispatch thread the callback may be the caller itself, so it returns
    /// immediately.
    pub(crate) fn disarm(&self, on_dispatch_thread: bool) {
        {
            let mut state = self.state.lock();
            state.generation += 1;
            state.pending = false;
        }

        if !on_dispatch_thread {
            drop(self.callback.lock());
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state.lock().pending
    }

    /// Whether `generation` is still the live, pending arming.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.pending && state.generation == generation
    }

    /// Runs the callback if the trigger is pending.
    ///
    /// `expected` restricts the firing to one arming; `None` accepts
    /// whatever is current. Unless `keep_pending` is set the trigger goes
    /// back to idle before the callback runs, so the callback may re-arm
    /// it. `before` runs after that transition and before the callback.
    ///
    /// Returns whether the callback ran.
    pub(crate) fn fire(
        &self,
        expected: Option<u64>,
        keep_pending: bool,
        arg: A,
        before: impl FnOnce(),
    ) -> bool {
        let mut callback = self.callback.lock();

        {
            let mut state = self.state.lock();

            if !state.pending || expected.is_some_and(|g| g != state.generation) {
                return false;
            }

            if !keep_pending {
                state.pending = false;
            }
        }

        before();
        (callback)(arg);

        true
    }
}
