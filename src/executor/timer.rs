use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::Token;
use mio::event::Event;
use parking_lot::Mutex;

use crate::reactor::timer::{WaitCanceled, WaitResult, WaitSlot};
use crate::reactor::{EventHandler, Reactor};

struct TimerInner {
    deadline: Instant,
    pending: Option<WaitSlot>,
}

/// One-shot deadline timer bound to a reactor.
///
/// A single wait may be outstanding at a time; rearming the deadline,
/// starting another wait, or [`cancel`](DeadlineTimer::cancel) aborts the
/// pending wait with [`WaitCanceled`]. Callbacks run on the executor's
/// worker thread.
pub struct DeadlineTimer {
    reactor: Arc<Reactor>,
    token: Token,
    inner: Mutex<TimerInner>,
}

impl DeadlineTimer {
    pub(crate) fn bind_to(reactor: Arc<Reactor>) -> io::Result<Arc<Self>> {
        let token = reactor.bind()?;
        let timer = Arc::new(Self {
            reactor: reactor.clone(),
            token,
            inner: Mutex::new(TimerInner {
                deadline: Instant::now(),
                pending: None,
            }),
        });
        reactor.install(token, timer.clone());
        Ok(timer)
    }

    /// Set the deadline relative to now, aborting any pending wait.
    pub fn expires_after(&self, timeout: Duration) {
        self.expires_at(Instant::now() + timeout);
    }

    /// Set an absolute deadline, aborting any pending wait.
    pub fn expires_at(&self, deadline: Instant) {
        let aborted = {
            let mut inner = self.inner.lock();
            inner.deadline = deadline;
            inner.pending.take()
        };
        self.abort(aborted);
    }

    /// Wait for the configured deadline. The callback receives `Ok(())`
    /// once the deadline passes, or `Err(WaitCanceled)` if the wait is
    /// aborted first.
    pub fn async_wait<F>(&self, on_elapsed: F)
    where
        F: FnOnce(WaitResult) + Send + 'static,
    {
        let slot: WaitSlot = Arc::new(Mutex::new(Some(Box::new(on_elapsed))));
        let (aborted, deadline) = {
            let mut inner = self.inner.lock();
            (inner.pending.replace(slot.clone()), inner.deadline)
        };
        self.abort(aborted);
        self.reactor.arm_timer(deadline, slot);
    }

    /// Abort the pending wait, if any.
    pub fn cancel(&self) {
        let aborted = self.inner.lock().pending.take();
        self.abort(aborted);
    }

    /// Cancel and drop the reactor-side reference.
    pub fn release(&self) {
        self.cancel();
        self.reactor.unbind(self.token);
    }

    fn abort(&self, slot: Option<WaitSlot>) {
        let Some(slot) = slot else { return };
        // Taking the callback out of the slot is what aborts the wait: a
        // fired entry finds the slot empty and does nothing.
        if let Some(callback) = slot.lock().take() {
            self.reactor
                .post(Box::new(move || callback(Err(WaitCanceled))));
        }
    }
}

impl EventHandler for DeadlineTimer {
    // Deadlines are driven by the reactor's timer queue, not the poller.
    fn on_ready(&self, _event: &Event) {}
}
