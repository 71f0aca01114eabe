use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::ExecutorConfig;
use crate::error::ExecError;
use crate::executor::resolver::TcpResolver;
use crate::executor::socket::{TcpSocket, TlsSocket};
use crate::executor::timer::DeadlineTimer;
use crate::reactor::{Reactor, WorkGuard};
use crate::utils::HealthFlag;

pub mod resolver;
pub mod socket;
pub mod timer;

/// How a close call relates to the worker thread's termination.
#[derive(Debug, Clone, Copy)]
pub enum CloseMode {
    /// Signal the loop to stop and return immediately.
    NonBlocking,
    /// Signal, then wait until the loop finishes or the timeout elapses,
    /// whichever comes first.
    Bounded(Duration),
    /// Signal, then wait until the loop finishes. Used for teardown that
    /// must not leave the thread behind.
    Blocking,
}

/// Guards exactly the loop-finished flag and nothing else.
#[derive(Default)]
struct LoopState {
    finished: Mutex<bool>,
    cond: Condvar,
}

/// A managed asynchronous I/O execution unit: one reactor, one background
/// worker thread driving it, factories for reactor-bound primitives.
///
/// Handles returned by [`create`](EventLoopExecutor::create) are "hot" —
/// the worker thread is launched before the handle is handed out. The
/// worker is detached; synchronization with its termination happens only
/// through the loop-finished signal consumed by
/// [`close`](EventLoopExecutor::close).
pub struct EventLoopExecutor {
    reactor: Arc<Reactor>,
    state: Arc<LoopState>,
    running: HealthFlag,
    closed: AtomicBool,
    restarts: AtomicUsize,
    cfg: ExecutorConfig,
}

impl EventLoopExecutor {
    /// Allocate a reactor and start the worker thread.
    pub fn create(cfg: ExecutorConfig) -> io::Result<Arc<Self>> {
        let executor = Arc::new(Self {
            reactor: Arc::new(Reactor::new(&cfg)?),
            state: Arc::new(LoopState::default()),
            running: HealthFlag::new(false),
            closed: AtomicBool::new(false),
            restarts: AtomicUsize::new(0),
            cfg,
        });
        executor.start();
        Ok(executor)
    }

    pub fn create_default() -> io::Result<Arc<Self>> {
        Self::create(ExecutorConfig::default())
    }

    /// Spawn the detached worker thread that drives the dispatch loop.
    ///
    /// The worker holds a synthetic [`WorkGuard`] for the lifetime of the
    /// loop so that an empty work queue alone never ends it. Whatever way
    /// the loop exits, the finished flag is set and waiters are notified.
    fn start(&self) {
        let reactor = self.reactor.clone();
        let state = self.state.clone();
        let running = self.running.clone();

        let spawned = thread::Builder::new()
            .name(self.cfg.thread_name())
            .spawn(move || {
                tracing::debug!("[EventLoopExecutor] running event loop in a single thread");
                running.up();
                let keep_alive = WorkGuard::new(reactor.clone());
                let result = reactor.run();
                drop(keep_alive);
                running.down();

                match result {
                    Ok(()) => tracing::debug!("[EventLoopExecutor] event loop exits"),
                    Err(err) => {
                        tracing::error!("[EventLoopExecutor] failed to run event loop: {err}")
                    }
                }

                {
                    let mut finished = state.finished.lock();
                    *finished = true;
                }
                state.cond.notify_all();
            });

        if let Err(err) = spawned {
            tracing::error!("[EventLoopExecutor] failed to spawn worker thread: {err}");
            // No loop will ever run; don't strand close waiters.
            self.running.down();
            {
                let mut finished = self.state.finished.lock();
                *finished = true;
            }
            self.state.cond.notify_all();
        }
    }

    /// Factory for a TCP socket bound to this executor's reactor.
    ///
    /// On allocation failure the executor restarts itself once before
    /// reporting the failure, so the caller's next attempt runs against a
    /// fresh loop.
    pub fn create_socket(&self) -> Result<Arc<TcpSocket>, ExecError> {
        match TcpSocket::bind_to(self.reactor.clone()) {
            Ok(socket) => Ok(socket),
            Err(source) => Err(self.allocation_failed("socket", source)),
        }
    }

    /// Wrap an existing socket and an opaque TLS client configuration into
    /// a composite handle. Allocates no reactor-owned state, so a failure
    /// here triggers no restart.
    pub fn create_tls_socket(
        &self,
        socket: Arc<TcpSocket>,
        tls_config: Arc<rustls::ClientConfig>,
        server_name: &str,
    ) -> Result<Arc<TlsSocket>, ExecError> {
        TlsSocket::wrap(socket, tls_config, server_name)
    }

    /// Factory for a name resolver bound to this executor's reactor.
    pub fn create_tcp_resolver(&self) -> Result<Arc<TcpResolver>, ExecError> {
        match TcpResolver::bind_to(self.reactor.clone()) {
            Ok(resolver) => Ok(resolver),
            Err(source) => Err(self.allocation_failed("resolver", source)),
        }
    }

    /// Factory for a deadline timer bound to this executor's reactor.
    pub fn create_deadline_timer(&self) -> Result<Arc<DeadlineTimer>, ExecError> {
        match DeadlineTimer::bind_to(self.reactor.clone()) {
            Ok(timer) => Ok(timer),
            Err(source) => Err(self.allocation_failed("deadline timer", source)),
        }
    }

    /// Schedule a deferred callable on the worker thread. Fire-and-forget:
    /// no result channel, no completion signal. Callables submitted from
    /// one thread run in submission order. Once a close has begun, new
    /// callables are dropped.
    pub fn post_work<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.reactor.post(Box::new(task));
    }

    /// Stop the current loop and bring up a fresh one.
    ///
    /// An in-flight close is treated as already satisfied (the close call
    /// below is a no-op for everyone but the first closer). Concurrent
    /// restarts may interleave; each independently leaves the executor
    /// runnable.
    pub fn restart(&self) {
        self.close(CloseMode::Blocking);
        self.closed.store(false, Ordering::Release);
        {
            let mut finished = self.state.finished.lock();
            *finished = false;
        }
        self.reactor.reset();
        self.restarts.fetch_add(1, Ordering::AcqRel);
        self.start();
    }

    /// Close the executor. The first caller wins the closed transition and
    /// gets its requested wait semantics; every later caller returns
    /// immediately regardless of its mode.
    pub fn close(&self, mode: CloseMode) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        match mode {
            CloseMode::NonBlocking => {
                self.reactor.stop();
            }
            CloseMode::Bounded(timeout) => {
                let deadline = Instant::now() + timeout;
                let mut finished = self.state.finished.lock();
                self.reactor.stop();
                while !*finished {
                    if self.state.cond.wait_until(&mut finished, deadline).timed_out() {
                        break;
                    }
                }
            }
            CloseMode::Blocking => {
                let mut finished = self.state.finished.lock();
                self.reactor.stop();
                while !*finished {
                    self.state.cond.wait(&mut finished);
                }
            }
        }
    }

    /// Whether a close sequence has begun. Does not imply the loop has
    /// finished draining.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether the worker thread is currently inside the dispatch loop.
    pub fn is_loop_running(&self) -> bool {
        self.running.get()
    }

    /// Number of restarts performed, including automatic ones taken on
    /// allocation failure.
    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::Acquire)
    }

    fn allocation_failed(&self, what: &'static str, source: io::Error) -> ExecError {
        tracing::warn!("[EventLoopExecutor] failed to create {what}: {source}; restarting");
        self.restart();
        ExecError::Allocation { what, source }
    }
}

impl Drop for EventLoopExecutor {
    fn drop(&mut self) {
        // Unconditional blocking close: the worker thread must not outlive
        // this value.
        self.close(CloseMode::Blocking);
        self.reactor.clear_handles();
    }
}
