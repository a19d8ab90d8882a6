use super::EventLoop;
use crate::backend::TimerOps;
use crate::error::Result;

use parking_lot::Mutex;
use std::time::Duration;

/// How an [`EventTimer`] was last armed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimerMode {
    /// Fires once.
    #[default]
    OneShot,

    /// Fires every period until removed.
    Periodic(Duration),
}

/// A one-shot or periodic timer.
///
/// # Examples
///
/// ```rust,ignore
/// let timer = EventTimer::new(&event_loop, || println!("tick"));
/// timer.add_periodic(Duration::from_millis(100))?;
/// ```
pub struct EventTimer {
    mode: Mutex<TimerMode>,
    delegate: Box<dyn TimerOps>,
}

impl EventTimer {
    pub fn new<F>(event_loop: &EventLoop, callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self {
            mode: Mutex::new(TimerMode::OneShot),
            delegate: event_loop.delegate().timer(Box::new(callback)),
        }
    }

    /// Arms a one-shot timer firing after `timeout`, replacing any previous
    /// arming.
    pub fn add(&self, timeout: Duration) -> Result<()> {
        self.arm(timeout, TimerMode::OneShot)
    }

    /// Arms a timer firing every `period`, replacing any previous arming.
    pub fn add_periodic(&self, period: Duration) -> Result<()> {
        self.arm(period, TimerMode::Periodic(period))
    }

    /// The mode is only recorded once the delegate accepted the arming.
    fn arm(&self, timeout: Duration, mode: TimerMode) -> Result<()> {
        let mut current = self.mode.lock();

        self.delegate.add(timeout, mode)?;
        *current = mode;

        Ok(())
    }

    /// Cancels the timer, whatever its mode. Idempotent.
    pub fn remove(&self) {
        self.delegate.remove();
    }

    pub fn is_pending(&self) -> bool {
        self.delegate.is_pending()
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.mode(), TimerMode::Periodic(_))
    }

    /// The period of a periodic timer, zero otherwise.
    pub fn period(&self) -> Duration {
        match self.mode() {
            TimerMode::OneShot => Duration::ZERO,
            TimerMode::Periodic(period) => period,
        }
    }

    pub fn mode(&self) -> TimerMode {
        *self.mode.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        ListenerOps, LoopBackend, SignalCallback, SignalOps, SocketOps, TimerCallback,
    };
    use crate::config::Backend;
    use crate::error::Error;
    use crate::event::{ListenerHandler, SocketHandler};

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records what the facade asked for and nothing else.
    #[derive(Default)]
    struct RecordingTimer {
        armed: Arc<Mutex<Vec<(Duration, TimerMode)>>>,
        refuse: Arc<AtomicBool>,
        pending: AtomicBool,
    }

    impl TimerOps for RecordingTimer {
        fn add(&self, timeout: Duration, mode: TimerMode) -> Result<()> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(Error::LoopClosed);
            }

            self.armed.lock().push((timeout, mode));
            self.pending.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn remove(&self) {
            self.pending.store(false, Ordering::SeqCst);
        }

        fn is_pending(&self) -> bool {
            self.pending.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct TimersOnly {
        armed: Arc<Mutex<Vec<(Duration, TimerMode)>>>,
        refuse: Arc<AtomicBool>,
    }

    impl LoopBackend for TimersOnly {
        fn backend(&self) -> Backend {
            Backend::Poll
        }

        fn socket(&self, _: Box<dyn SocketHandler>) -> Box<dyn SocketOps> {
            unimplemented!()
        }

        fn listener(&self, _: Box<dyn ListenerHandler>) -> Box<dyn ListenerOps> {
            unimplemented!()
        }

        fn signal(&self, _: i32, _: SignalCallback) -> Box<dyn SignalOps> {
            unimplemented!()
        }

        fn timer(&self, _: TimerCallback) -> Box<dyn TimerOps> {
            Box::new(RecordingTimer {
                armed: self.armed.clone(),
                refuse: self.refuse.clone(),
                ..Default::default()
            })
        }

        fn run(&self) -> Result<()> {
            Ok(())
        }

        fn run_once(&self, _: Option<Duration>) -> Result<()> {
            Ok(())
        }

        fn exit(&self) {}

        fn live_handles(&self) -> usize {
            0
        }

        fn shutdown(&self) {}
    }

    fn fixture() -> (EventLoop, Arc<Mutex<Vec<(Duration, TimerMode)>>>) {
        let backend = TimersOnly::default();
        let armed = backend.armed.clone();

        (EventLoop::from_backend(Arc::new(backend)), armed)
    }

    #[test]
    fn add_resets_periodic_state() {
        let (event_loop, _) = fixture();
        let timer = EventTimer::new(&event_loop, || {});

        timer.add_periodic(Duration::from_millis(250)).unwrap();
        assert!(timer.is_persistent());
        assert_eq!(timer.period(), Duration::from_millis(250));

        timer.add(Duration::from_secs(5)).unwrap();
        assert!(!timer.is_persistent());
        assert_eq!(timer.period(), Duration::ZERO);
        assert_eq!(timer.mode(), TimerMode::OneShot);
    }

    #[test]
    fn facade_forwards_mode_to_delegate() {
        let (event_loop, armed) = fixture();
        let timer = EventTimer::new(&event_loop, || {});

        timer.add(Duration::from_secs(1)).unwrap();
        timer.add_periodic(Duration::from_secs(2)).unwrap();

        assert_eq!(
            *armed.lock(),
            vec![
                (Duration::from_secs(1), TimerMode::OneShot),
                (
                    Duration::from_secs(2),
                    TimerMode::Periodic(Duration::from_secs(2))
                ),
            ]
        );
    }

    #[test]
    fn remove_twice_is_harmless() {
        let (event_loop, _) = fixture();
        let timer = EventTimer::new(&event_loop, || {});

        timer.add(Duration::from_secs(5)).unwrap();
        assert!(timer.is_pending());

        timer.remove();
        timer.remove();
        assert!(!timer.is_pending());
        assert!(!timer.is_persistent());
    }

    #[test]
    fn failed_add_keeps_previous_mode() {
        let backend = TimersOnly::default();
        let refuse = backend.refuse.clone();
        let event_loop = EventLoop::from_backend(Arc::new(backend));
        let timer = EventTimer::new(&event_loop, || {});

        timer.add(Duration::from_secs(1)).unwrap();

        refuse.store(true, Ordering::SeqCst);
        assert!(timer.add_periodic(Duration::from_secs(3)).is_err());

        assert_eq!(timer.mode(), TimerMode::OneShot);
        assert!(!timer.is_persistent());
        assert_eq!(timer.period(), Duration::ZERO);
    }
}
