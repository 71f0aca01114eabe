use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;
use mio::event::{Event, Source};
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

use crate::config::ExecutorConfig;
use crate::reactor::timer::{TimerQueue, WaitSlot};

pub mod timer;

/// A deferred callable executed on the dispatch-loop thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Receiver of readiness events for a bound handle.
///
/// Implementations are shared between the reactor (which dispatches
/// readiness from the loop thread) and the caller; all state they touch
/// must be behind interior mutability.
pub trait EventHandler: Send + Sync {
    /// Readiness delivered from the poller.
    fn on_ready(&self, event: &Event);

    /// Explicit nudge scheduled via [`Reactor::poke`]; no readiness
    /// information accompanies it.
    fn on_drive(&self) {}
}

/// Token reserved for the internal cross-thread waker.
const WAKE_TOKEN: Token = Token(usize::MAX);

struct HandleTable {
    entries: HashMap<Token, Option<Arc<dyn EventHandler>>>,
    max: usize,
}

/// Run-to-completion dispatcher: waits for I/O readiness, due deadline
/// timers, or posted callables, and invokes them on whichever thread is
/// inside [`Reactor::run`].
///
/// The loop returns when [`stop`](Reactor::stop) is signaled, or when it
/// runs out of work entirely: no [`WorkGuard`] held, no queued tasks, no
/// bound handles, no pending timers. Holding a `WorkGuard` is the
/// keep-alive token that pins an idle loop in place.
pub struct Reactor {
    /// Held exclusively by a running dispatch loop.
    poll: Mutex<Poll>,
    registry: Registry,
    waker: Waker,
    tasks: SegQueue<Task>,
    handles: Mutex<HandleTable>,
    timers: Mutex<TimerQueue>,
    stopped: AtomicBool,
    outstanding_work: AtomicUsize,
    next_token: AtomicUsize,
    events_capacity: usize,
    max_tasks_drain: usize,
}

impl Reactor {
    pub fn new(cfg: &ExecutorConfig) -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;

        Ok(Self {
            poll: Mutex::new(poll),
            registry,
            waker,
            tasks: SegQueue::new(),
            handles: Mutex::new(HandleTable {
                entries: HashMap::new(),
                max: cfg.max_handles(),
            }),
            timers: Mutex::new(TimerQueue::default()),
            stopped: AtomicBool::new(false),
            outstanding_work: AtomicUsize::new(0),
            next_token: AtomicUsize::new(0),
            events_capacity: cfg.events_capacity(),
            max_tasks_drain: cfg.max_tasks_drain(),
        })
    }

    /// Run the dispatch loop on the calling thread until stopped or out of
    /// work. A second concurrent `run` blocks until the first releases the
    /// poller.
    pub fn run(&self) -> io::Result<()> {
        let mut poll = self.poll.lock();
        let mut events = Events::with_capacity(self.events_capacity);

        loop {
            if self.stopped.load(Ordering::Acquire) {
                return Ok(());
            }
            if self.out_of_work() {
                return Ok(());
            }

            if let Err(err) = poll.poll(&mut events, self.next_timeout()) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    continue;
                }
                // Clone the handler out so dispatch runs without the table
                // lock; handlers re-enter the reactor (register, post).
                let handler = self
                    .handles
                    .lock()
                    .entries
                    .get(&event.token())
                    .and_then(|slot| slot.clone());
                if let Some(handler) = handler {
                    handler.on_ready(event);
                }
            }

            self.fire_due_timers();
            self.drain_tasks();
        }
    }

    /// Signal the dispatch loop to return. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.wake();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Re-arm a stopped reactor so a fresh `run` dispatches again.
    /// Bound handles, queued tasks, and pending timers survive.
    pub fn reset(&self) {
        self.stopped.store(false, Ordering::Release);
    }

    /// Enqueue a callable for the loop thread. Callables pushed from one
    /// thread run in push order. Dropped (with a trace event) once the
    /// reactor has been stopped.
    pub fn post(&self, task: Task) {
        if self.stopped.load(Ordering::Acquire) {
            tracing::trace!("[Reactor] dropping task posted after stop");
            return;
        }
        self.tasks.push(task);
        self.wake();
    }

    /// Reserve a handle slot. Fails when the handle table is exhausted —
    /// the allocation failure the executor reacts to with a restart.
    pub(crate) fn bind(&self) -> io::Result<Token> {
        let mut table = self.handles.lock();
        if table.entries.len() >= table.max {
            return Err(io::Error::other("reactor handle table exhausted"));
        }
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        table.entries.insert(token, None);
        Ok(token)
    }

    /// Attach the handler for a reserved slot. The table's reference is the
    /// reactor-side share of the handle's ownership.
    pub(crate) fn install(&self, token: Token, handler: Arc<dyn EventHandler>) {
        if let Some(slot) = self.handles.lock().entries.get_mut(&token) {
            *slot = Some(handler);
        }
    }

    /// Schedule an [`EventHandler::on_drive`] nudge for a bound handle on
    /// the loop thread. Used by handles whose operations may be able to
    /// progress immediately, where edge-triggered readiness alone would
    /// never fire.
    pub(crate) fn poke(&self, token: Token) {
        let handler = self
            .handles
            .lock()
            .entries
            .get(&token)
            .and_then(|slot| slot.clone());
        if let Some(handler) = handler {
            self.post(Box::new(move || handler.on_drive()));
        }
    }

    /// Release a handle slot, dropping the reactor-side reference.
    pub(crate) fn unbind(&self, token: Token) {
        self.handles.lock().entries.remove(&token);
        self.wake();
    }

    /// Drop every handle-table entry. Terminal teardown only: breaks the
    /// reactor -> handle -> reactor reference cycle when the owning
    /// executor is destroyed.
    pub(crate) fn clear_handles(&self) {
        self.handles.lock().entries.clear();
    }

    pub(crate) fn register<S: Source>(
        &self,
        source: &mut S,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.registry.register(source, token, interests)
    }

    pub(crate) fn reregister<S: Source>(
        &self,
        source: &mut S,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.registry.reregister(source, token, interests)
    }

    pub(crate) fn deregister<S: Source>(&self, source: &mut S) -> io::Result<()> {
        self.registry.deregister(source)
    }

    /// Queue a deadline entry; the loop fires the slot at or after the
    /// deadline unless the slot was emptied first.
    pub(crate) fn arm_timer(&self, deadline: Instant, slot: WaitSlot) {
        self.timers.lock().push(deadline, slot);
        self.wake();
    }

    fn fire_due_timers(&self) {
        loop {
            let entry = self.timers.lock().pop_due(Instant::now());
            let Some(entry) = entry else { break };
            // Canceled waits leave the slot empty; skip them.
            if let Some(callback) = entry.slot.lock().take() {
                callback(Ok(()));
            }
        }
    }

    fn drain_tasks(&self) {
        for _ in 0..self.max_tasks_drain {
            match self.tasks.pop() {
                Some(task) => task(),
                None => break,
            }
        }
    }

    fn next_timeout(&self) -> Option<Duration> {
        if !self.tasks.is_empty() {
            return Some(Duration::ZERO);
        }
        self.timers
            .lock()
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn out_of_work(&self) -> bool {
        self.outstanding_work.load(Ordering::Acquire) == 0
            && self.tasks.is_empty()
            && self.handles.lock().entries.is_empty()
            && self.timers.lock().is_empty()
    }

    fn wake(&self) {
        if let Err(err) = self.waker.wake() {
            tracing::warn!("[Reactor] failed to wake dispatch loop: {err}");
        }
    }
}

/// Keep-alive token: while any `WorkGuard` exists, an idle dispatch loop
/// stays blocked in the poller instead of returning.
pub struct WorkGuard {
    reactor: Arc<Reactor>,
}

impl WorkGuard {
    pub fn new(reactor: Arc<Reactor>) -> Self {
        reactor.outstanding_work.fetch_add(1, Ordering::AcqRel);
        Self { reactor }
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.reactor.outstanding_work.fetch_sub(1, Ordering::AcqRel);
        self.reactor.wake();
    }
}
