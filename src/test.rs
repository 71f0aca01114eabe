#[cfg(test)]
mod tests {
    use crate::config::ExecutorConfig;
    use crate::error::ExecError;
    use crate::executor::{CloseMode, EventLoopExecutor};
    use crate::pool::ExecutorPool;
    use crate::reactor::timer::WaitCanceled;
    use crate::utils::logger::LoggerConfig;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    // ---- helper: poll a condition with a hard deadline
    fn wait_for(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() <= limit {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn posted_work_runs_in_submission_order() {
        let executor = EventLoopExecutor::create_default().expect("create failed");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..8 {
            let seen = seen.clone();
            executor.post_work(move || seen.lock().unwrap().push(i));
        }

        assert!(wait_for(Duration::from_secs(2), || seen.lock().unwrap().len() == 8));
        assert_eq!(*seen.lock().unwrap(), (0..8).collect::<Vec<_>>());
        executor.close(CloseMode::Blocking);
    }

    #[test]
    fn non_blocking_close_rejects_new_work() {
        let executor = EventLoopExecutor::create_default().expect("create failed");
        executor.close(CloseMode::NonBlocking);
        assert!(executor.is_closed());

        let ran = flag();
        {
            let ran = ran.clone();
            executor.post_work(move || ran.store(true, Ordering::SeqCst));
        }

        assert!(wait_for(Duration::from_secs(2), || !executor.is_loop_running()));
        thread::sleep(Duration::from_millis(50));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn blocking_close_waits_for_loop_exit() {
        let executor = EventLoopExecutor::create_default().expect("create failed");

        let started = flag();
        {
            let started = started.clone();
            executor.post_work(move || {
                started.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(100));
            });
        }
        assert!(wait_for(Duration::from_secs(2), || started.load(Ordering::SeqCst)));

        let t0 = Instant::now();
        executor.close(CloseMode::Blocking);
        assert!(t0.elapsed() >= Duration::from_millis(50));
        assert!(!executor.is_loop_running());
    }

    #[test]
    fn second_close_returns_immediately() {
        let executor = EventLoopExecutor::create_default().expect("create failed");

        let started = flag();
        {
            let started = started.clone();
            executor.post_work(move || {
                started.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(300));
            });
        }
        assert!(wait_for(Duration::from_secs(2), || started.load(Ordering::SeqCst)));

        executor.close(CloseMode::NonBlocking);

        // The loop is still draining, but a late closer must not wait,
        // whatever mode it asks for.
        let t0 = Instant::now();
        executor.close(CloseMode::Blocking);
        assert!(t0.elapsed() < Duration::from_millis(100));

        assert!(wait_for(Duration::from_secs(2), || !executor.is_loop_running()));
    }

    #[test]
    fn restart_brings_up_fresh_loop() {
        let executor = EventLoopExecutor::create_default().expect("create failed");
        executor.close(CloseMode::Blocking);
        assert!(!executor.is_loop_running());

        executor.restart();
        assert_eq!(executor.restart_count(), 1);
        assert!(wait_for(Duration::from_secs(2), || executor.is_loop_running()));

        let timer = executor.create_deadline_timer().expect("timer failed");
        timer.expires_after(Duration::from_millis(20));

        let fired = flag();
        {
            let fired = fired.clone();
            timer.async_wait(move |result| {
                if result.is_ok() {
                    fired.store(true, Ordering::SeqCst);
                }
            });
        }
        assert!(wait_for(Duration::from_secs(2), || fired.load(Ordering::SeqCst)));
        executor.close(CloseMode::Blocking);
    }

    #[test]
    fn allocation_failure_restarts_once() {
        let cfg = ExecutorConfig {
            max_handles: Some(1),
            ..Default::default()
        };
        let executor = EventLoopExecutor::create(cfg).expect("create failed");

        let _first = executor.create_socket().expect("first socket failed");
        let err = executor
            .create_socket()
            .expect_err("handle table should be exhausted");
        assert!(matches!(err, ExecError::Allocation { .. }));
        assert_eq!(executor.restart_count(), 1);

        // The automatic restart left the executor runnable.
        assert!(wait_for(Duration::from_secs(2), || executor.is_loop_running()));
        executor.close(CloseMode::Blocking);
    }

    #[test]
    fn timer_cancel_aborts_pending_wait() {
        let executor = EventLoopExecutor::create_default().expect("create failed");
        let timer = executor.create_deadline_timer().expect("timer failed");
        timer.expires_after(Duration::from_secs(30));

        let outcome = Arc::new(Mutex::new(None));
        {
            let outcome = outcome.clone();
            timer.async_wait(move |result| {
                *outcome.lock().unwrap() = Some(result);
            });
        }
        timer.cancel();

        assert!(wait_for(Duration::from_secs(2), || outcome.lock().unwrap().is_some()));
        assert_eq!(*outcome.lock().unwrap(), Some(Err(WaitCanceled)));

        timer.release();
        executor.close(CloseMode::Blocking);
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let executor = EventLoopExecutor::create_default().expect("create failed");
        let order = Arc::new(Mutex::new(Vec::new()));

        let slow = executor.create_deadline_timer().expect("timer failed");
        slow.expires_after(Duration::from_millis(80));
        let fast = executor.create_deadline_timer().expect("timer failed");
        fast.expires_after(Duration::from_millis(20));

        for (timer, tag) in [(&slow, 1), (&fast, 2)] {
            let order = order.clone();
            timer.async_wait(move |result| {
                if result.is_ok() {
                    order.lock().unwrap().push(tag);
                }
            });
        }

        assert!(wait_for(Duration::from_secs(2), || order.lock().unwrap().len() == 2));
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
        executor.close(CloseMode::Blocking);
    }

    #[test]
    fn resolver_returns_loopback() {
        let executor = EventLoopExecutor::create_default().expect("create failed");
        let resolver = executor.create_tcp_resolver().expect("resolver failed");

        let found = Arc::new(Mutex::new(None));
        {
            let found = found.clone();
            resolver.resolve("127.0.0.1", 7000, move |result| {
                *found.lock().unwrap() = Some(result);
            });
        }

        assert!(wait_for(Duration::from_secs(2), || found.lock().unwrap().is_some()));
        let addrs = found
            .lock()
            .unwrap()
            .take()
            .expect("callback not delivered")
            .expect("resolve failed");
        assert!(addrs.contains(&"127.0.0.1:7000".parse().expect("bad literal")));

        resolver.release();
        executor.close(CloseMode::Blocking);
    }

    #[test]
    fn socket_connects_sends_and_receives() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind failed");
        let addr = listener.local_addr().expect("local_addr failed");

        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().expect("accept failed");
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).expect("server read failed");
            assert_eq!(&buf, b"ping");
            conn.write_all(b"pong").expect("server write failed");
        });

        let executor = EventLoopExecutor::create_default().expect("create failed");
        let socket = executor.create_socket().expect("socket failed");

        let connected = Arc::new(Mutex::new(None));
        {
            let connected = connected.clone();
            socket.connect(addr, move |result| {
                *connected.lock().unwrap() = Some(result.is_ok());
            });
        }
        assert!(wait_for(Duration::from_secs(2), || connected.lock().unwrap().is_some()));
        assert_eq!(*connected.lock().unwrap(), Some(true));
        assert_eq!(socket.peer_addr().expect("peer_addr failed"), addr);

        let sent = Arc::new(Mutex::new(None));
        {
            let sent = sent.clone();
            socket.send(b"ping".to_vec(), move |result| {
                *sent.lock().unwrap() = Some(result.map_err(|e| e.to_string()));
            });
        }
        assert!(wait_for(Duration::from_secs(2), || sent.lock().unwrap().is_some()));
        assert_eq!(*sent.lock().unwrap(), Some(Ok(4)));

        let received = Arc::new(Mutex::new(None));
        {
            let received = received.clone();
            socket.recv(16, move |result| {
                *received.lock().unwrap() = Some(result.map_err(|e| e.to_string()));
            });
        }
        assert!(wait_for(Duration::from_secs(2), || received.lock().unwrap().is_some()));
        assert_eq!(*received.lock().unwrap(), Some(Ok(b"pong".to_vec())));

        server.join().expect("server thread failed");
        socket.release();
        executor.close(CloseMode::Bounded(Duration::from_secs(1)));
    }

    #[test]
    fn tls_wrap_emits_client_hello_without_restart() {
        let executor = EventLoopExecutor::create_default().expect("create failed");
        let socket = executor.create_socket().expect("socket failed");

        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(rustls::RootCertStore::empty())
                .with_no_client_auth(),
        );

        let tls = executor
            .create_tls_socket(socket.clone(), tls_config.clone(), "localhost")
            .expect("tls wrap failed");
        assert!(tls.is_handshaking());
        assert!(Arc::ptr_eq(&tls.plain(), &socket));

        let hello = tls.take_tls_output().expect("tls output failed");
        assert!(!hello.is_empty());

        let err = executor
            .create_tls_socket(socket, tls_config, "bad name!")
            .expect_err("invalid server name should be rejected");
        assert!(matches!(err, ExecError::InvalidDnsName(_)));
        // TLS wrapping never takes the restart path.
        assert_eq!(executor.restart_count(), 0);

        executor.close(CloseMode::Blocking);
    }

    #[test]
    fn end_to_end_close_within_budget() {
        let _ = LoggerConfig::default().init();

        let executor = EventLoopExecutor::create_default().expect("create failed");
        let _socket = executor.create_socket().expect("socket failed");

        let t0 = Instant::now();
        executor.close(CloseMode::Bounded(Duration::from_secs(1)));
        assert!(t0.elapsed() < Duration::from_secs(1));
        assert!(wait_for(Duration::from_secs(2), || !executor.is_loop_running()));
    }

    #[test]
    fn pool_round_robin_assignment() {
        let pool = ExecutorPool::new(3);
        assert_eq!(pool.slot_count(), 3);

        let a = pool.get().expect("get failed");
        let b = pool.get().expect("get failed");
        let c = pool.get().expect("get failed");
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&b, &c));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(pool.populated_count(), 3);

        let d = pool.get().expect("get failed");
        assert!(Arc::ptr_eq(&a, &d));

        pool.close(Duration::from_secs(1));
        assert_eq!(pool.populated_count(), 0);
    }

    #[test]
    fn pool_close_divides_budget() {
        let pool = ExecutorPool::new(3);
        let first = pool.get().expect("get failed");
        let _second = pool.get().expect("get failed");
        let _third = pool.get().expect("get failed");

        let started = flag();
        {
            let started = started.clone();
            first.post_work(move || {
                started.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(250));
            });
        }
        assert!(wait_for(Duration::from_secs(2), || started.load(Ordering::SeqCst)));

        let t0 = Instant::now();
        pool.close(Duration::from_millis(300));
        let elapsed = t0.elapsed();

        // The busy member really was waited for; the rest only saw the
        // shrinking remainder.
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(600));
        assert_eq!(pool.populated_count(), 0);
    }

    #[test]
    fn pool_close_exhausted_budget_still_signals() {
        let pool = ExecutorPool::new(2);
        let first = pool.get().expect("get failed");
        let second = pool.get().expect("get failed");

        let started = flag();
        {
            let started = started.clone();
            first.post_work(move || {
                started.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(300));
            });
        }
        assert!(wait_for(Duration::from_secs(2), || started.load(Ordering::SeqCst)));

        let t0 = Instant::now();
        pool.close(Duration::from_millis(100));
        assert!(t0.elapsed() < Duration::from_millis(300));

        // The slot past the exhausted budget still got its stop signal.
        assert!(second.is_closed());
        assert_eq!(pool.populated_count(), 0);
        assert!(wait_for(Duration::from_secs(2), || {
            !first.is_loop_running() && !second.is_loop_running()
        }));
    }
}
