use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use mio::event::Event;
use mio::net::TcpStream;
use mio::{Interest, Token};
use parking_lot::Mutex;

use crate::error::ExecError;
use crate::reactor::{EventHandler, Reactor};

type ConnectCallback = Box<dyn FnOnce(io::Result<()>) + Send>;
type RecvCallback = Box<dyn FnOnce(io::Result<Vec<u8>>) + Send>;
type SendCallback = Box<dyn FnOnce(io::Result<usize>) + Send>;

struct RecvOp {
    max_len: usize,
    callback: RecvCallback,
}

struct SendOp {
    data: Vec<u8>,
    written: usize,
    callback: SendCallback,
}

#[derive(Default)]
struct SocketIo {
    stream: Option<TcpStream>,
    /// Interest currently registered with the poller, if any.
    interest: Option<Interest>,
    connect: Option<ConnectCallback>,
    recv: Option<RecvOp>,
    send: Option<SendOp>,
}

/// TCP socket bound to a reactor.
///
/// Operations are asynchronous and callback-style: the callback always runs
/// on the executor's worker thread. One operation of each kind (connect,
/// recv, send) may be outstanding at a time.
///
/// Ownership is shared between the reactor's handle table and the caller;
/// the socket is destroyed once both sides release it. Call
/// [`release`](TcpSocket::release) to drop the reactor-side reference and
/// abort pending operations.
pub struct TcpSocket {
    reactor: Arc<Reactor>,
    token: Token,
    io: Mutex<SocketIo>,
}

impl TcpSocket {
    pub(crate) fn bind_to(reactor: Arc<Reactor>) -> io::Result<Arc<Self>> {
        let token = reactor.bind()?;
        let socket = Arc::new(Self {
            reactor: reactor.clone(),
            token,
            io: Mutex::new(SocketIo::default()),
        });
        reactor.install(token, socket.clone());
        Ok(socket)
    }

    /// Start a non-blocking connect. The callback fires once the connection
    /// is established or has failed.
    pub fn connect<F>(&self, addr: SocketAddr, on_connect: F)
    where
        F: FnOnce(io::Result<()>) + Send + 'static,
    {
        let mut io = self.io.lock();
        if io.stream.is_some() {
            drop(io);
            self.reactor.post(Box::new(move || {
                on_connect(Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "socket already connected or connecting",
                )))
            }));
            return;
        }

        match TcpStream::connect(addr) {
            Ok(stream) => {
                io.stream = Some(stream);
                io.connect = Some(Box::new(on_connect));
                self.refresh_interest(&mut io);
                drop(io);
                self.poke();
            }
            Err(err) => {
                drop(io);
                self.reactor.post(Box::new(move || on_connect(Err(err))));
            }
        }
    }

    /// Receive up to `max_len` bytes. An empty buffer in the callback means
    /// the peer closed the connection.
    pub fn recv<F>(&self, max_len: usize, on_received: F)
    where
        F: FnOnce(io::Result<Vec<u8>>) + Send + 'static,
    {
        let mut io = self.io.lock();
        if io.recv.is_some() {
            drop(io);
            self.reactor.post(Box::new(move || {
                on_received(Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "recv already in progress",
                )))
            }));
            return;
        }
        if io.stream.is_none() {
            drop(io);
            self.reactor
                .post(Box::new(move || on_received(Err(not_connected()))));
            return;
        }

        io.recv = Some(RecvOp {
            max_len,
            callback: Box::new(on_received),
        });
        self.refresh_interest(&mut io);
        drop(io);
        self.poke();
    }

    /// Send the whole buffer; the callback receives the byte count on
    /// completion.
    pub fn send<F>(&self, data: Vec<u8>, on_sent: F)
    where
        F: FnOnce(io::Result<usize>) + Send + 'static,
    {
        let mut io = self.io.lock();
        if io.send.is_some() {
            drop(io);
            self.reactor.post(Box::new(move || {
                on_sent(Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "send already in progress",
                )))
            }));
            return;
        }
        if io.stream.is_none() {
            drop(io);
            self.reactor
                .post(Box::new(move || on_sent(Err(not_connected()))));
            return;
        }

        io.send = Some(SendOp {
            data,
            written: 0,
            callback: Box::new(on_sent),
        });
        self.refresh_interest(&mut io);
        drop(io);
        self.poke();
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self.io.lock().stream.as_ref() {
            Some(stream) => stream.peer_addr(),
            None => Err(not_connected()),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self.io.lock().stream.as_ref() {
            Some(stream) => stream.local_addr(),
            None => Err(not_connected()),
        }
    }

    /// Drop the reactor-side reference and abort pending operations with
    /// `ConnectionAborted`. The socket itself is destroyed once the caller
    /// also drops its handle.
    pub fn release(&self) {
        let mut io = self.io.lock();
        let mut aborted: Vec<Box<dyn FnOnce() + Send>> = Vec::new();
        if let Some(callback) = io.connect.take() {
            aborted.push(Box::new(move || callback(Err(aborted_err()))));
        }
        if let Some(op) = io.recv.take() {
            let callback = op.callback;
            aborted.push(Box::new(move || callback(Err(aborted_err()))));
        }
        if let Some(op) = io.send.take() {
            let callback = op.callback;
            aborted.push(Box::new(move || callback(Err(aborted_err()))));
        }
        if let Some(mut stream) = io.stream.take() {
            let _ = self.reactor.deregister(&mut stream);
        }
        io.interest = None;
        drop(io);

        for callback in aborted {
            self.reactor.post(callback);
        }
        self.reactor.unbind(self.token);
    }

    /// Progress every pending operation as far as readiness allows, then
    /// run completions outside the lock (callbacks may re-enter the
    /// socket).
    fn drive(&self) {
        let mut done: Vec<Box<dyn FnOnce() + Send>> = Vec::new();
        let mut io = self.io.lock();

        if io.connect.is_some() {
            if let Some(status) = io.stream.as_ref().and_then(connect_status) {
                if let Some(callback) = io.connect.take() {
                    done.push(Box::new(move || callback(status)));
                }
            }
        }

        // Reads and writes wait for the connect phase to finish.
        if io.connect.is_none() {
            if let Some(op) = io.recv.take() {
                let mut pending: Option<RecvOp> = None;
                match io.stream.as_mut() {
                    None => {
                        let callback = op.callback;
                        done.push(Box::new(move || callback(Err(not_connected()))));
                    }
                    Some(stream) => {
                        let mut buf = vec![0u8; op.max_len];
                        match stream.read(&mut buf) {
                            Ok(n) => {
                                buf.truncate(n);
                                let callback = op.callback;
                                done.push(Box::new(move || callback(Ok(buf))));
                            }
                            Err(err)
                                if err.kind() == io::ErrorKind::WouldBlock
                                    || err.kind() == io::ErrorKind::Interrupted =>
                            {
                                pending = Some(op);
                            }
                            Err(err) => {
                                let callback = op.callback;
                                done.push(Box::new(move || callback(Err(err))));
                            }
                        }
                    }
                }
                io.recv = pending;
            }

            if let Some(mut op) = io.send.take() {
                let mut pending: Option<SendOp> = None;
                match io.stream.as_mut() {
                    None => {
                        let callback = op.callback;
                        done.push(Box::new(move || callback(Err(not_connected()))));
                    }
                    Some(stream) => {
                        let mut outcome: Option<io::Result<usize>> = None;
                        loop {
                            if op.written >= op.data.len() {
                                outcome = Some(Ok(op.written));
                                break;
                            }
                            match stream.write(&op.data[op.written..]) {
                                Ok(0) => {
                                    outcome = Some(Err(io::ErrorKind::WriteZero.into()));
                                    break;
                                }
                                Ok(n) => op.written += n,
                                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                                Err(err) => {
                                    outcome = Some(Err(err));
                                    break;
                                }
                            }
                        }
                        match outcome {
                            Some(result) => {
                                let callback = op.callback;
                                done.push(Box::new(move || callback(result)));
                            }
                            None => pending = Some(op),
                        }
                    }
                }
                io.send = pending;
            }
        }

        self.refresh_interest(&mut io);
        drop(io);

        for callback in done {
            callback();
        }
    }

    /// Keep the poller registration in sync with the pending operations.
    fn refresh_interest(&self, io: &mut SocketIo) {
        let want_read = io.recv.is_some();
        let want_write = io.connect.is_some() || io.send.is_some();
        let want = match (want_read, want_write) {
            (true, true) => Some(Interest::READABLE.add(Interest::WRITABLE)),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        };

        let SocketIo {
            stream, interest, ..
        } = io;
        let Some(stream) = stream.as_mut() else {
            *interest = None;
            return;
        };

        let result = match (*interest, want) {
            (Some(_), None) => {
                *interest = None;
                self.reactor.deregister(stream)
            }
            (None, Some(next)) => {
                *interest = Some(next);
                self.reactor.register(stream, self.token, next)
            }
            (Some(current), Some(next)) if current != next => {
                *interest = Some(next);
                self.reactor.reregister(stream, self.token, next)
            }
            _ => Ok(()),
        };
        if let Err(err) = result {
            tracing::warn!("[TcpSocket] failed to update poller registration: {err}");
        }
    }

    /// Kick the state machine on the loop thread; edge-triggered readiness
    /// alone would miss operations that could progress immediately.
    fn poke(&self) {
        self.reactor.poke(self.token);
    }
}

impl EventHandler for TcpSocket {
    fn on_ready(&self, _event: &Event) {
        self.drive();
    }

    fn on_drive(&self) {
        self.drive();
    }
}

impl Drop for TcpSocket {
    fn drop(&mut self) {
        if let Some(mut stream) = self.io.lock().stream.take() {
            let _ = self.reactor.deregister(&mut stream);
        }
    }
}

fn connect_status(stream: &TcpStream) -> Option<io::Result<()>> {
    match stream.take_error() {
        Ok(Some(err)) => return Some(Err(err)),
        Ok(None) => {}
        Err(err) => return Some(Err(err)),
    }
    match stream.peer_addr() {
        Ok(_) => Some(Ok(())),
        // Still connecting.
        Err(err) if err.kind() == io::ErrorKind::NotConnected => None,
        Err(err) => Some(Err(err)),
    }
}

fn not_connected() -> io::Error {
    io::ErrorKind::NotConnected.into()
}

fn aborted_err() -> io::Error {
    io::ErrorKind::ConnectionAborted.into()
}

/// TLS adapter over an established [`TcpSocket`].
///
/// The session is sans-io: callers shuttle ciphertext between
/// [`read_ciphertext`](TlsSocket::read_ciphertext) /
/// [`take_tls_output`](TlsSocket::take_tls_output) and the plain socket's
/// `send`/`recv`, and exchange plaintext through
/// [`write_plaintext`](TlsSocket::write_plaintext) and the values returned
/// by `read_ciphertext`. The TLS configuration is opaque to this crate.
pub struct TlsSocket {
    socket: Arc<TcpSocket>,
    session: Mutex<rustls::ClientConnection>,
}

impl TlsSocket {
    pub(crate) fn wrap(
        socket: Arc<TcpSocket>,
        tls_config: Arc<rustls::ClientConfig>,
        server_name: &str,
    ) -> Result<Arc<Self>, ExecError> {
        let name = rustls::pki_types::ServerName::try_from(server_name.to_string())
            .map_err(|_| ExecError::InvalidDnsName(server_name.to_string()))?;
        let session = rustls::ClientConnection::new(tls_config, name)?;
        Ok(Arc::new(Self {
            socket,
            session: Mutex::new(session),
        }))
    }

    /// The underlying plain socket carrying the ciphertext.
    pub fn plain(&self) -> Arc<TcpSocket> {
        self.socket.clone()
    }

    pub fn is_handshaking(&self) -> bool {
        self.session.lock().is_handshaking()
    }

    /// Feed ciphertext received from the peer into the session and return
    /// whatever plaintext it yields.
    pub fn read_ciphertext(&self, ciphertext: &[u8]) -> io::Result<Vec<u8>> {
        let mut session = self.session.lock();
        let mut cursor = io::Cursor::new(ciphertext);
        while (cursor.position() as usize) < ciphertext.len() {
            if session.read_tls(&mut cursor)? == 0 {
                break;
            }
        }

        let state = session.process_new_packets().map_err(io::Error::other)?;
        let mut plaintext = vec![0u8; state.plaintext_bytes_to_read()];
        if !plaintext.is_empty() {
            session.reader().read_exact(&mut plaintext)?;
        }
        Ok(plaintext)
    }

    /// Encrypt plaintext and return the ciphertext to put on the wire.
    pub fn write_plaintext(&self, plaintext: &[u8]) -> io::Result<Vec<u8>> {
        let mut session = self.session.lock();
        session.writer().write_all(plaintext)?;
        drain_tls(&mut session)
    }

    /// Pull pending session output: handshake records, alerts.
    pub fn take_tls_output(&self) -> io::Result<Vec<u8>> {
        drain_tls(&mut self.session.lock())
    }
}

fn drain_tls(session: &mut rustls::ClientConnection) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    while session.wants_write() {
        session.write_tls(&mut out)?;
    }
    Ok(out)
}
