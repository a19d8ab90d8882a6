use super::command::Command;
use super::event::Event;
use super::listener::{ListenerShared, ReactorListener};
use super::poller::common::{Interest, SelfPipe};
use super::poller::{Poller, SIGNAL_TOKEN};
use super::signal::{ReactorSignal, SignalTable};
use super::socket::{ReactorSocket, SocketShared};
use super::timer::{ReactorTimer, TimerEntry, TimerTarget};
use crate::backend::{
    ListenerOps, LoopBackend, SignalCallback, SignalOps, SocketOps, TimerCallback, TimerOps,
};
use crate::config::{Backend, Config};
use crate::error::{Error, Result};
use crate::event::{ListenerHandler, SocketHandler};
use crate::utils::thread_token;

use parking_lot::{Mutex, MutexGuard};
use std::collections::{BinaryHeap, HashMap};
use std::mem;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// A registry entry: who to notify for a poller token.
pub(crate) enum Registration {
    Socket(Weak<SocketShared>),
    Listener(Weak<ListenerShared>),
}

enum Live {
    Socket(Arc<SocketShared>),
    Listener(Arc<ListenerShared>),
}

/// State owned by whichever thread is dispatching.
struct Dispatcher {
    /// Channel receiving commands from other threads.
    receiver: Receiver<Command>,

    /// Buffer used to collect I/O events from the poller.
    events: Vec<Event>,

    /// Min-heap of pending timers ordered by deadline.
    timers: BinaryHeap<TimerEntry>,

    /// Heap size at which cancelled entries are swept out.
    compact_at: usize,
}

/// Smallest heap worth sweeping.
const COMPACT_MIN: usize = 64;

impl Dispatcher {
    fn push_timer(&mut self, entry: TimerEntry) {
        self.timers.push(entry);

        if self.timers.len() >= self.compact_at {
            self.timers.retain(TimerEntry::is_live);
            self.compact_at = (self.timers.len() * 2).max(COMPACT_MIN);
        }
    }
}

/// Shared state of one event loop.
///
/// Handles keep this alive through an `Arc`; the registry only holds weak
/// references back to the handles, so nothing here keeps a handle alive.
pub(crate) struct Reactor {
    config: Config,
    poller: Poller,
    sender: Sender<Command>,

    /// Held for the duration of `run` / `run_once`.
    dispatcher: Mutex<Dispatcher>,

    registry: Mutex<HashMap<u64, Registration>>,
    next_token: AtomicU64,
    next_seq: AtomicU64,

    pub(crate) signals: SignalTable,
    signal_pipe: SelfPipe,

    /// Thread token of the dispatching thread, 0 when idle.
    dispatch_thread: AtomicU64,
    closed: AtomicBool,
    live_handles: AtomicUsize,
}

impl Reactor {
    pub(crate) fn new(config: Config) -> Result<Self> {
        let poller = Poller::new(config.backend, config.event_capacity)?;
        let signal_pipe = SelfPipe::new()?;
        poller.register(signal_pipe.reader_fd(), SIGNAL_TOKEN, Interest::READABLE)?;

        let (sender, receiver) = channel();
        let dispatcher = Dispatcher {
            receiver,
            events: Vec::with_capacity(config.event_capacity),
            timers: BinaryHeap::new(),
            compact_at: COMPACT_MIN,
        };

        Ok(Self {
            config,
            poller,
            sender,
            dispatcher: Mutex::new(dispatcher),
            registry: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            next_seq: AtomicU64::new(0),
            signals: SignalTable::default(),
            signal_pipe,
            dispatch_thread: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            live_handles: AtomicUsize::new(0),
        })
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn poller(&self) -> &Poller {
        &self.poller
    }

    pub(crate) fn signal_writer_fd(&self) -> RawFd {
        self.signal_pipe.writer_fd()
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::LoopClosed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn is_dispatch_thread(&self) -> bool {
        self.dispatch_thread.load(Ordering::Acquire) == thread_token()
    }

    pub(crate) fn next_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn acquire_handle(&self) {
        self.live_handles.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release_handle(&self) {
        self.live_handles.fetch_sub(1, Ordering::AcqRel);
    }

    /// Records `registration` under `token` and starts polling `fd`.
    ///
    /// Nothing is left behind if the poller rejects the descriptor.
    pub(crate) fn register(
        &self,
        fd: RawFd,
        token: u64,
        interest: Interest,
        registration: Registration,
    ) -> Result<()> {
        self.ensure_open()?;
        self.registry.lock().insert(token, registration);

        if let Err(err) = self.poller.register(fd, token, interest) {
            self.registry.lock().remove(&token);
            return Err(err.into());
        }

        tracing::debug!(token, fd, "registered descriptor");
        Ok(())
    }

    /// Stops polling `fd` and forgets `token`.
    pub(crate) fn deregister(&self, fd: RawFd, token: u64, polled: bool) {
        self.registry.lock().remove(&token);

        if polled {
            if let Err(err) = self.poller.deregister(fd) {
                tracing::debug!(token, fd, %err, "deregister failed");
            }
        }

        tracing::debug!(token, fd, "deregistered descriptor");
    }

    /// Queues a timer firing at `deadline` and wakes the dispatcher.
    pub(crate) fn schedule(
        &self,
        deadline: Instant,
        generation: u64,
        target: TimerTarget,
    ) -> Result<()> {
        self.ensure_open()?;

        let entry = TimerEntry {
            deadline,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            generation,
            target,
        };

        self.send(Command::SetTimer(entry))
    }

    /// Sends a command to the dispatcher and wakes it.
    pub(crate) fn send(&self, cmd: Command) -> Result<()> {
        self.sender.send(cmd).map_err(|_| Error::LoopClosed)?;
        self.poller.wake();
        Ok(())
    }

    fn enter(&self) -> Result<DispatchScope<'_>> {
        self.ensure_open()?;

        let Some(dispatcher) = self.dispatcher.try_lock() else {
            return Err(Error::AlreadyRunning);
        };

        self.dispatch_thread.store(thread_token(), Ordering::Release);

        Ok(DispatchScope {
            reactor: self,
            dispatcher,
        })
    }

    /// Dispatches until [`exit`](Self::exit) is called or the loop shuts down.
    pub(crate) fn run(&self) -> Result<()> {
        let mut scope = self.enter()?;
        tracing::debug!(backend = %self.config.backend, "event loop running");

        while !self.turn(&mut scope.dispatcher, None)? {}

        tracing::debug!("event loop stopped");
        Ok(())
    }

    /// Performs a single poll-and-dispatch turn.
    pub(crate) fn run_once(&self, timeout: Option<Duration>) -> Result<()> {
        let mut scope = self.enter()?;
        self.turn(&mut scope.dispatcher, timeout)?;
        Ok(())
    }

    pub(crate) fn exit(&self) {
        if self.send(Command::Exit).is_err() {
            tracing::debug!("exit requested on a closed loop");
        }
    }

    /// One reactor turn.
    ///
    /// 1. Process pending commands
    /// 2. Poll the OS for new events (with timer-based timeout)
    /// 3. Handle I/O events
    /// 4. Fire expired timers
    ///
    /// Returns `true` when the loop should stop.
    fn turn(&self, dispatcher: &mut Dispatcher, timeout: Option<Duration>) -> Result<bool> {
        let mut exit = false;

        while let Ok(cmd) = dispatcher.receiver.try_recv() {
            match cmd {
                Command::SetTimer(entry) => dispatcher.push_timer(entry),
                Command::Exit => exit = true,
            }
        }

        if exit || self.closed.load(Ordering::Acquire) {
            return Ok(true);
        }

        let next_timer = dispatcher
            .timers
            .peek()
            .map(|t| t.deadline.saturating_duration_since(Instant::now()));

        let timeout = match (timeout, next_timer) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let mut events = mem::take(&mut dispatcher.events);
        events.clear();
        self.poller.poll(&mut events, timeout)?;

        for event in &events {
            self.handle_event(event);
        }

        dispatcher.events = events;
        self.fire_timers(dispatcher);

        Ok(false)
    }

    fn handle_event(&self, event: &Event) {
        if event.token == SIGNAL_TOKEN {
            let delivered = self.signal_pipe.drain();
            self.signals.dispatch(&delivered);
            return;
        }

        let live = match self.registry.lock().get(&event.token) {
            Some(Registration::Socket(socket)) => socket.upgrade().map(Live::Socket),
            Some(Registration::Listener(listener)) => listener.upgrade().map(Live::Listener),
            None => None,
        };

        match live {
            Some(Live::Socket(socket)) => socket.handle_event(event),
            Some(Live::Listener(listener)) => listener.handle_event(),
            None => tracing::trace!(token = event.token, "event for a released handle"),
        }
    }

    fn fire_timers(&self, dispatcher: &mut Dispatcher) {
        let now = Instant::now();
        let mut rearm = Vec::new();

        while dispatcher.timers.peek().is_some_and(|t| t.deadline <= now) {
            let Some(entry) = dispatcher.timers.pop() else {
                break;
            };

            match &entry.target {
                TimerTarget::Timer { timer, period } => {
                    let Some(timer) = timer.upgrade() else {
                        continue;
                    };

                    let fired = timer
                        .trigger
                        .fire(Some(entry.generation), period.is_some(), (), || {});

                    let Some(period) = *period else {
                        continue;
                    };

                    if !fired || !timer.trigger.is_current(entry.generation) {
                        continue;
                    }

                    if let Some(deadline) = entry.next_deadline(period, now) {
                        rearm.push(TimerEntry {
                            deadline,
                            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                            generation: entry.generation,
                            target: TimerTarget::Timer {
                                timer: Arc::downgrade(&timer),
                                period: Some(period),
                            },
                        });
                    }
                }

                TimerTarget::SignalTimeout(signal) => {
                    if let Some(signal) = signal.upgrade() {
                        signal.fire_timeout(entry.generation);
                    }
                }
            }
        }

        for entry in rearm {
            dispatcher.push_timer(entry);
        }
    }

    /// Stops dispatching and releases every registration.
    ///
    /// Handles that are still alive keep this state reachable; their setup
    /// operations fail with [`Error::LoopClosed`] from now on.
    pub(crate) fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let live = self.live_handles.load(Ordering::Acquire);
        if live > 0 {
            tracing::error!(
                live_handles = live,
                "event loop dropped while handles are still alive"
            );
        }

        self.registry.lock().clear();
        self.signals.release_all();

        let _ = self.sender.send(Command::Exit);
        self.poller.wake();

        tracing::debug!("event loop shut down");
    }
}

/// Marks the current thread as the dispatcher while alive.
struct DispatchScope<'a> {
    reactor: &'a Reactor,
    dispatcher: MutexGuard<'a, Dispatcher>,
}

impl Drop for DispatchScope<'_> {
    fn drop(&mut self) {
        self.reactor.dispatch_thread.store(0, Ordering::Release);
    }
}

/// The reactor backend as seen by [`EventLoop`](crate::EventLoop).
pub(crate) struct ReactorHandle(Arc<Reactor>);

impl ReactorHandle {
    pub(crate) fn new(config: Config) -> Result<Self> {
        tracing::debug!(?config, "creating reactor");
        Ok(Self(Arc::new(Reactor::new(config)?)))
    }
}

impl LoopBackend for ReactorHandle {
    fn backend(&self) -> Backend {
        self.0.config.backend
    }

    fn socket(&self, handler: Box<dyn SocketHandler>) -> Box<dyn SocketOps> {
        Box::new(ReactorSocket::new(self.0.clone(), handler))
    }

    fn listener(&self, handler: Box<dyn ListenerHandler>) -> Box<dyn ListenerOps> {
        Box::new(ReactorListener::new(self.0.clone(), handler))
    }

    fn signal(&self, signal: i32, callback: SignalCallback) -> Box<dyn SignalOps> {
        Box::new(ReactorSignal::new(self.0.clone(), signal, callback))
    }

    fn timer(&self, callback: TimerCallback) -> Box<dyn TimerOps> {
        Box::new(ReactorTimer::new(self.0.clone(), callback))
    }

    fn run(&self) -> Result<()> {
        self.0.run()
    }

    fn run_once(&self, timeout: Option<Duration>) -> Result<()> {
        self.0.run_once(timeout)
    }

    fn exit(&self) {
        self.0.exit();
    }

    fn live_handles(&self) -> usize {
        self.0.live_handles.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.0.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TimerMode;

    fn reactor() -> Arc<Reactor> {
        Arc::new(Reactor::new(Config::default()).unwrap())
    }

    #[test]
    fn rearming_one_timer_keeps_the_heap_bounded() {
        let reactor = reactor();
        let timer = ReactorTimer::new(reactor.clone(), Box::new(|| {}));

        for _ in 0..10_000 {
            timer.add(Duration::from_secs(3600), TimerMode::OneShot).unwrap();
            reactor.run_once(Some(Duration::ZERO)).unwrap();
        }

        let queued = reactor.dispatcher.lock().timers.len();
        assert!(queued <= COMPACT_MIN, "{queued} entries queued for one timer");
        assert!(timer.is_pending());
    }

    #[test]
    fn sweeping_keeps_live_timers() {
        let reactor = reactor();
        let fired = Arc::new(AtomicUsize::new(0));

        let keeper = {
            let fired = fired.clone();
            ReactorTimer::new(
                reactor.clone(),
                Box::new(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };
        keeper.add(Duration::from_millis(20), TimerMode::OneShot).unwrap();

        let churn = ReactorTimer::new(reactor.clone(), Box::new(|| {}));
        for _ in 0..(COMPACT_MIN * 4) {
            churn.add(Duration::from_secs(3600), TimerMode::OneShot).unwrap();
            reactor.run_once(Some(Duration::ZERO)).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while fired.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            reactor.run_once(Some(Duration::from_millis(10))).unwrap();
        }

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn out_of_range_timeout_stays_pending_without_firing() {
        let reactor = reactor();
        let fired = Arc::new(AtomicUsize::new(0));

        let timer = {
            let fired = fired.clone();
            ReactorTimer::new(
                reactor.clone(),
                Box::new(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };

        timer.add(Duration::MAX, TimerMode::OneShot).unwrap();
        reactor.run_once(Some(Duration::ZERO)).unwrap();

        assert!(timer.is_pending());
        assert!(reactor.dispatcher.lock().timers.is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        timer.remove();
        assert!(!timer.is_pending());
    }
}
