//! A re-entrant lock keyed by thread.
//!
//! Sockets hold this lock while their callbacks run on the dispatch thread.
//! A user thread that takes [`EventSocket::lock`](crate::EventSocket::lock)
//! therefore excludes callbacks, and a callback that locks its own socket
//! simply nests.

use parking_lot::lock_api::RawReentrantMutex;
use parking_lot::{RawMutex, RawThreadId};

pub(crate) struct ReentrantLock {
    raw: RawReentrantMutex<RawMutex, RawThreadId>,
}

impl ReentrantLock {
    pub(crate) fn new() -> Self {
        Self {
            raw: RawReentrantMutex::INIT,
        }
    }

    /// Blocks until the calling thread owns the lock. Nests when the
    /// calling thread already owns it.
    pub(crate) fn lock(&self) {
        self.raw.lock();
    }

    /// Releases one level of ownership.
    ///
    /// Returns `false` if the calling thread does not own the lock.
    pub(crate) fn unlock(&self) -> bool {
        if !self.raw.is_owned_by_current_thread() {
            return false;
        }

        // SAFETY: ownership by the current thread was checked above.
        unsafe { self.raw.unlock() };
        true
    }

    /// Acquires the lock for the lifetime of the returned guard.
    pub(crate) fn guard(&self) -> ReentrantGuard<'_> {
        self.lock();
        ReentrantGuard { lock: self }
    }
}

pub(crate) struct ReentrantGuard<'a> {
    lock: &'a ReentrantLock,
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn nests_on_the_same_thread() {
        let lock = ReentrantLock::new();

        lock.lock();
        lock.lock();
        assert!(lock.unlock());
        assert!(lock.unlock());
        assert!(!lock.unlock());
    }

    #[test]
    fn excludes_other_threads() {
        let lock = Arc::new(ReentrantLock::new());
        let entered = Arc::new(AtomicBool::new(false));

        lock.lock();

        let handle = {
            let lock = lock.clone();
            let entered = entered.clone();
            thread::spawn(move || {
                let _guard = lock.guard();
                entered.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));

        assert!(lock.unlock());
        handle.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn foreign_unlock_is_refused() {
        let lock = Arc::new(ReentrantLock::new());
        lock.lock();

        let other = lock.clone();
        assert!(!thread::spawn(move || other.unlock()).join().unwrap());
        assert!(lock.unlock());
    }
}
