use super::core::Reactor;
use super::signal::SignalShared;
use super::trigger::Trigger;
use crate::backend::{TimerCallback, TimerOps};
use crate::error::Result;
use crate::event::TimerMode;

use std::cmp::Ordering;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// What a timer entry fires when its deadline passes.
pub(crate) enum TimerTarget {
    Timer {
        timer: Weak<TimerShared>,
        period: Option<Duration>,
    },
    SignalTimeout(Weak<SignalShared>),
}

/// An entry in the reactor timer queue.
///
/// Entries are never removed from the heap on cancellation: the owning
/// trigger's generation moves on and the stale entry is skipped when popped.
pub(crate) struct TimerEntry {
    /// The time at which the timer should fire.
    pub(crate) deadline: Instant,

    /// Tie-breaker keeping insertion order among equal deadlines.
    pub(crate) seq: u64,

    /// Arming this entry belongs to.
    pub(crate) generation: u64,

    pub(crate) target: TimerTarget,
}

impl TimerEntry {
    /// Deadline of the next firing of a periodic entry, `None` when it lies
    /// beyond what `Instant` can represent.
    ///
    /// Missed periods are skipped rather than replayed.
    pub(crate) fn next_deadline(&self, period: Duration, now: Instant) -> Option<Instant> {
        let next = self.deadline.checked_add(period)?;
        if next <= now { now.checked_add(period) } else { Some(next) }
    }
}

impl TimerEntry {
    /// Whether firing this entry could still run a callback.
    pub(crate) fn is_live(&self) -> bool {
        match &self.target {
            TimerTarget::Timer { timer, .. } => timer
                .upgrade()
                .is_some_and(|timer| timer.trigger.is_current(self.generation)),
            TimerTarget::SignalTimeout(signal) => signal
                .upgrade()
                .is_some_and(|signal| signal.awaits_timeout(self.generation)),
        }
    }
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Ord for TimerEntry {
    /// Orders timer entries by deadline, then by sequence number.
    ///
    /// The comparison is **reversed** so that a `BinaryHeap<TimerEntry>`
    /// behaves as a min-heap, where the earliest deadline is popped first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub(crate) struct TimerShared {
    pub(crate) trigger: Trigger<()>,
}

/// Timer delegate handed to [`EventTimer`](crate::EventTimer).
pub(crate) struct ReactorTimer {
    reactor: Arc<Reactor>,
    shared: Arc<TimerShared>,
}

impl ReactorTimer {
    pub(crate) fn new(reactor: Arc<Reactor>, mut callback: TimerCallback) -> Self {
        reactor.acquire_handle();

        Self {
            reactor,
            shared: Arc::new(TimerShared {
                trigger: Trigger::new(Box::new(move |()| callback())),
            }),
        }
    }
}

impl TimerOps for ReactorTimer {
    fn add(&self, timeout: Duration, mode: TimerMode) -> Result<()> {
        self.reactor.ensure_open()?;

        let deadline = Instant::now().checked_add(timeout);
        let generation = self.shared.trigger.arm();
        let period = match mode {
            TimerMode::OneShot => None,
            TimerMode::Periodic(period) => Some(period),
        };

        // Stays pending without a queue entry: it never fires until removed.
        let Some(deadline) = deadline else {
            tracing::debug!(?timeout, "timer deadline out of range");
            return Ok(());
        };

        let scheduled = self.reactor.schedule(
            deadline,
            generation,
            TimerTarget::Timer {
                timer: Arc::downgrade(&self.shared),
                period,
            },
        );

        if scheduled.is_err() {
            self.shared.trigger.disarm(true);
        }

        scheduled
    }

    fn remove(&self) {
        self.shared
            .trigger
            .disarm(self.reactor.is_dispatch_thread());
    }

    fn is_pending(&self) -> bool {
        self.reactor.ensure_open().is_ok() && self.shared.trigger.is_pending()
    }
}

impl Drop for ReactorTimer {
    fn drop(&mut self) {
        self.remove();
        self.reactor.release_handle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BinaryHeap;

    fn entry(deadline: Instant, seq: u64) -> TimerEntry {
        TimerEntry {
            deadline,
            seq,
            generation: 0,
            target: TimerTarget::SignalTimeout(Weak::new()),
        }
    }

    #[test]
    fn heap_pops_earliest_deadline_first() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();

        heap.push(entry(now + Duration::from_millis(30), 0));
        heap.push(entry(now + Duration::from_millis(10), 1));
        heap.push(entry(now + Duration::from_millis(20), 2));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn equal_deadlines_keep_insertion_order() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();

        for seq in [4, 2, 3] {
            heap.push(entry(now, seq));
        }

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![2, 3, 4]);
    }

    #[test]
    fn periodic_deadline_skips_missed_periods() {
        let start = Instant::now();
        let period = Duration::from_millis(10);
        let e = entry(start, 0);

        assert_eq!(e.next_deadline(period, start), Some(start + period));

        let late = start + Duration::from_millis(35);
        assert_eq!(e.next_deadline(period, late), Some(late + period));
    }

    #[test]
    fn periodic_deadline_out_of_range() {
        let start = Instant::now();
        let e = entry(start, 0);

        assert_eq!(e.next_deadline(Duration::MAX, start), None);
    }
}
