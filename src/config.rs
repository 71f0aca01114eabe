use serde::{Deserialize, Serialize};

/// Tuning knobs for a single executor and its reactor.
/// Unset fields fall back to the defaults resolved at construction.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExecutorConfig {
    /// Name given to the worker thread.
    pub thread_name: Option<String>,
    /// Capacity of the readiness event buffer handed to the poller.
    pub events_capacity: Option<usize>,
    /// Upper bound on reactor-bound handles (sockets, resolvers, timers).
    pub max_handles: Option<usize>,
    /// Maximum posted callables executed per dispatch cycle.
    pub max_tasks_drain: Option<usize>,
}

impl ExecutorConfig {
    pub(crate) fn events_capacity(&self) -> usize {
        self.events_capacity.unwrap_or(1024)
    }

    pub(crate) fn max_handles(&self) -> usize {
        self.max_handles.unwrap_or(8192)
    }

    pub(crate) fn max_tasks_drain(&self) -> usize {
        self.max_tasks_drain.unwrap_or(1024)
    }

    pub(crate) fn thread_name(&self) -> String {
        self.thread_name
            .clone()
            .unwrap_or_else(|| "evloop-worker".to_string())
    }
}
