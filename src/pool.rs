use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::ExecutorConfig;
use crate::executor::{CloseMode, EventLoopExecutor};
use crate::utils::TimeBudget;

struct PoolInner {
    slots: Vec<Option<Arc<EventLoopExecutor>>>,
    next_idx: usize,
}

/// Fixed-size collection of executors handed out in arrival order
/// (round-robin). Slots fill lazily on first use and empty only during
/// [`close`](ExecutorPool::close).
pub struct ExecutorPool {
    cfg: ExecutorConfig,
    inner: Mutex<PoolInner>,
}

impl ExecutorPool {
    /// A pool with `slot_count` slots (at least one) and default executor
    /// configuration.
    pub fn new(slot_count: usize) -> Self {
        Self::with_config(slot_count, ExecutorConfig::default())
    }

    pub fn with_config(slot_count: usize, cfg: ExecutorConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(PoolInner {
                slots: vec![None; slot_count.max(1)],
                next_idx: 0,
            }),
        }
    }

    /// The next executor in round-robin order, created and started on
    /// first access to its slot.
    pub fn get(&self) -> io::Result<Arc<EventLoopExecutor>> {
        let mut inner = self.inner.lock();
        let idx = inner.next_idx % inner.slots.len();
        inner.next_idx = inner.next_idx.wrapping_add(1);

        if let Some(executor) = &inner.slots[idx] {
            return Ok(executor.clone());
        }
        let executor = EventLoopExecutor::create(self.cfg.clone())?;
        inner.slots[idx] = Some(executor.clone());
        Ok(executor)
    }

    /// Close every populated executor, dividing `total` across members
    /// with a shrinking remainder. Once the budget is exhausted, remaining
    /// slots get a non-blocking signal-and-forget close; none are skipped.
    /// Every visited slot is emptied whether or not its close finished in
    /// time, so later teardown never re-attempts a close on an abandoned
    /// executor.
    pub fn close(&self, total: Duration) {
        let mut inner = self.inner.lock();
        let budget = TimeBudget::start(total);

        for slot in inner.slots.iter_mut() {
            let Some(executor) = slot.take() else { continue };
            let left = budget.remaining();
            if left.is_zero() {
                executor.close(CloseMode::NonBlocking);
            } else {
                executor.close(CloseMode::Bounded(left));
            }
        }
        tracing::debug!("[ExecutorPool] all slots drained");
    }

    pub fn slot_count(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Number of slots currently holding a live executor.
    pub fn populated_count(&self) -> usize {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}
