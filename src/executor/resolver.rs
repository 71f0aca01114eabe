use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mio::Token;
use mio::event::Event;

use crate::reactor::{EventHandler, Reactor};

/// Name resolver bound to a reactor.
///
/// Resolution runs as posted work on the executor's worker thread and the
/// callback receives the resolved addresses there. Results that arrive
/// after [`release`](TcpResolver::release) are discarded.
pub struct TcpResolver {
    reactor: Arc<Reactor>,
    token: Token,
    /// Shared with in-flight resolutions so they can observe a release.
    released: Arc<AtomicBool>,
}

impl TcpResolver {
    pub(crate) fn bind_to(reactor: Arc<Reactor>) -> io::Result<Arc<Self>> {
        let token = reactor.bind()?;
        let resolver = Arc::new(Self {
            reactor: reactor.clone(),
            token,
            released: Arc::new(AtomicBool::new(false)),
        });
        reactor.install(token, resolver.clone());
        Ok(resolver)
    }

    /// Resolve `host:port` to socket addresses.
    pub fn resolve<F>(&self, host: &str, port: u16, on_resolved: F)
    where
        F: FnOnce(io::Result<Vec<SocketAddr>>) + Send + 'static,
    {
        let host = host.to_string();
        let released = self.released.clone();
        self.reactor.post(Box::new(move || {
            if released.load(Ordering::Acquire) {
                return;
            }
            let result = (host.as_str(), port)
                .to_socket_addrs()
                .map(|addrs| addrs.collect());
            on_resolved(result);
        }));
    }

    /// Drop the reactor-side reference; in-flight resolutions are
    /// discarded.
    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
        self.reactor.unbind(self.token);
    }
}

impl EventHandler for TcpResolver {
    // Resolvers own no pollable source; the binding exists for lifetime
    // accounting and the shared allocation limit.
    fn on_ready(&self, _event: &Event) {}
}
