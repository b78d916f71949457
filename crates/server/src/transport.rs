//! TCP endpoint, connections and interrupt handling.
//!
//! The endpoint serves one connection at a time. A [`ShutdownHandle`] can be
//! triggered from any thread (the Ctrl-C handler in the binary); it closes
//! the active connection and wakes a blocked `accept` so the server loop
//! leaves through its normal cleanup path.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use simgate_wire::{Envelope, WireError, read_frame, write_envelope};

/// How long `trigger` waits when connecting to wake a blocked accept.
const WAKE_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================================================
// Shutdown Handle
// ============================================================================

struct ShutdownState {
    triggered: AtomicBool,
    wake_addr: SocketAddr,
    /// Clone of the stream currently being served, if any.
    active: Mutex<Option<TcpStream>>,
}

/// Clonable, thread-safe request to stop the server loop.
#[derive(Clone)]
pub struct ShutdownHandle {
    state: Arc<ShutdownState>,
}

impl ShutdownHandle {
    fn new(local_addr: SocketAddr) -> Self {
        Self {
            state: Arc::new(ShutdownState {
                triggered: AtomicBool::new(false),
                wake_addr: wake_addr(local_addr),
                active: Mutex::new(None),
            }),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        if self.state.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutdown requested");

        if let Some(stream) = self.state.active.lock().as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        // The accepted stream is dropped immediately by `Endpoint::accept`.
        let _ = TcpStream::connect_timeout(&self.state.wake_addr, WAKE_TIMEOUT);
    }

    pub fn is_triggered(&self) -> bool {
        self.state.triggered.load(Ordering::SeqCst)
    }

    fn set_active(&self, stream: Option<TcpStream>) {
        *self.state.active.lock() = stream;
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("triggered", &self.is_triggered())
            .field("wake_addr", &self.state.wake_addr)
            .finish()
    }
}

/// A wildcard bind address cannot be connected to; use loopback instead.
fn wake_addr(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}

// ============================================================================
// Endpoint
// ============================================================================

/// The server's listening endpoint. Lives as long as the server.
pub struct Endpoint {
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown: ShutdownHandle,
}

impl Endpoint {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            shutdown: ShutdownHandle::new(local_addr),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Block until a client connects.
    ///
    /// Returns `Ok(None)` once shutdown has been triggered.
    pub fn accept(&self) -> io::Result<Option<Connection>> {
        loop {
            if self.shutdown.is_triggered() {
                return Ok(None);
            }
            let (stream, peer) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if is_retryable_accept_error(e.kind()) => {
                    tracing::debug!("Accept retried: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if self.shutdown.is_triggered() {
                return Ok(None);
            }
            match Connection::open(stream, peer, self.shutdown.clone()) {
                Ok(conn) => return Ok(Some(conn)),
                Err(e) => {
                    tracing::warn!(peer = %peer, "Dropping connection: {e}");
                    continue;
                }
            }
        }
    }
}

/// Accept failures that concern one pending connection, not the listener.
fn is_retryable_accept_error(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

// ============================================================================
// Connection
// ============================================================================

/// One accepted client stream.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: ShutdownHandle,
}

impl Connection {
    fn open(stream: TcpStream, peer: SocketAddr, shutdown: ShutdownHandle) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        shutdown.set_active(Some(stream.try_clone()?));
        // A trigger between accept and registration would otherwise be missed.
        if shutdown.is_triggered() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        Ok(Self {
            stream,
            peer,
            shutdown,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Next request frame, or `None` when the client closed cleanly.
    pub fn recv_frame(&mut self, max_len: usize) -> Result<Option<Vec<u8>>, WireError> {
        read_frame(&mut self.stream, max_len)
    }

    /// Send one reply and flush it.
    pub fn send(&mut self, reply: &Envelope) -> Result<(), WireError> {
        write_envelope(&mut self.stream, reply)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.set_active(None);
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
