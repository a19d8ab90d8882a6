/// A readiness event reported by the poller.
///
/// The token identifies the registration inside the reactor registry.
/// Error and hang-up conditions are folded into `readable` so that the
/// next read observes them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Event {
    pub(crate) token: u64,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}

/// Merges `event` into `events`, coalescing entries with the same token.
pub(crate) fn push_event(events: &mut Vec<Event>, event: Event) {
    if let Some(existing) = events.iter_mut().find(|e| e.token == event.token) {
        existing.readable |= event.readable;
        existing.writable |= event.writable;
    } else {
        events.push(event);
    }
}
