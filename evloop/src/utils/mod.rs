//! Small internal helpers.
//!
//! [`thread_token`] gives every thread a cheap, non-zero identifier that
//! fits in an atomic, used to recognise the dispatch thread.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

/// Returns a process-unique, non-zero token for the calling thread.
pub(crate) fn thread_token() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}
