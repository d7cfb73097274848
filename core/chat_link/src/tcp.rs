//! Reference transport over TCP sockets.
//!
//! Stand-in for the platform wireless primitives: a peer address is a
//! `host:port` string, the passive endpoint is a TCP listener, and service
//! discovery is a 16-byte identifier preamble exchanged right after the TCP
//! handshake. The dialer announces the identifier; the listener answers with
//! one acknowledgement byte on a match and hangs up otherwise, which the
//! dialer observes as [`TransportError::ServiceNotOffered`].

use std::io::{self, Read, Write};
use std::net::{
    IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use uuid::Uuid;

use crate::transport::{Connection, Listener, Outbound, Transport, TransportError};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for a blocking outbound TCP connect.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for the service-identifier exchange after the TCP handshake.
const PREAMBLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Acknowledgement byte sent by the listener on a service match.
const PREAMBLE_ACK: u8 = 0x01;

/// Rebind attempts while a just-retired listener is still releasing the port.
const BIND_ATTEMPTS: u32 = 20;

/// Delay between rebind attempts.
const BIND_RETRY_DELAY: Duration = Duration::from_millis(25);

// ============================================================================
// Transport
// ============================================================================

/// TCP transport bound to one local address.
pub struct TcpTransport {
    bind_addr: SocketAddr,
}

impl TcpTransport {
    /// `bind_addr` is where `listen` binds the passive endpoint.
    pub fn new(bind_addr: SocketAddr) -> Self {
        TcpTransport { bind_addr }
    }
}

impl Transport for TcpTransport {
    fn listen(&self, service: Uuid) -> Result<Arc<dyn Listener>, TransportError> {
        // A listener retired moments ago may still hold the port while its
        // worker thread unwinds; retry briefly before giving up.
        let mut attempt = 0;
        let listener = loop {
            match TcpListener::bind(self.bind_addr) {
                Ok(listener) => break listener,
                Err(e) if e.kind() == io::ErrorKind::AddrInUse && attempt < BIND_ATTEMPTS => {
                    attempt += 1;
                    thread::sleep(BIND_RETRY_DELAY);
                }
                Err(e) => return Err(map_bind_error(e)),
            }
        };
        let local = listener.local_addr()?;
        log::debug!("tcp: listening on {}", local);
        Ok(Arc::new(TcpListenHandle {
            listener,
            local,
            service,
            closed: AtomicBool::new(false),
        }))
    }

    fn open_outbound(
        &self,
        peer: &str,
        service: Uuid,
    ) -> Result<Arc<dyn Outbound>, TransportError> {
        let addr = peer
            .to_socket_addrs()
            .map_err(|_| TransportError::PeerUnreachable)?
            .next()
            .ok_or(TransportError::PeerUnreachable)?;
        Ok(Arc::new(TcpOutbound {
            addr,
            service,
            stream: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

fn map_bind_error(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::AddrInUse => TransportError::AlreadyBound,
        io::ErrorKind::AddrNotAvailable => TransportError::Unavailable,
        _ => TransportError::Io(e),
    }
}

// ============================================================================
// Listener
// ============================================================================

struct TcpListenHandle {
    listener: TcpListener,
    local: SocketAddr,
    service: Uuid,
    closed: AtomicBool,
}

impl Listener for TcpListenHandle {
    fn accept(&self) -> Result<Arc<dyn Connection>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let (stream, peer) = self.listener.accept().map_err(|e| {
            if self.closed.load(Ordering::SeqCst) {
                TransportError::Closed
            } else {
                TransportError::Io(e)
            }
        })?;

        if self.closed.load(Ordering::SeqCst) {
            // The wake-up connection from close(), or an arrival that raced it.
            let _ = stream.shutdown(Shutdown::Both);
            return Err(TransportError::Closed);
        }

        // Service check: the dialer announces its identifier first. A peer
        // that writes nothing, hangs up, or names another service does not
        // offer ours.
        stream.set_read_timeout(Some(PREAMBLE_TIMEOUT))?;
        let mut preamble = [0u8; 16];
        if (&stream).read_exact(&mut preamble).is_err()
            || Uuid::from_bytes(preamble) != self.service
        {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(TransportError::ServiceNotOffered);
        }
        (&stream).write_all(&[PREAMBLE_ACK])?;
        stream.set_read_timeout(None)?;

        Ok(Arc::new(TcpConnection::new(stream, peer)))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake a blocked accept with a throwaway local connection.
        let mut wake = self.local;
        if wake.ip().is_unspecified() {
            wake.set_ip(match wake {
                SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        match TcpStream::connect_timeout(&wake, Duration::from_millis(250)) {
            Ok(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
            }
            Err(e) => log::debug!("tcp: listener wake-up connect failed: {}", e),
        }
    }
}

// ============================================================================
// Outbound
// ============================================================================

struct TcpOutbound {
    addr: SocketAddr,
    service: Uuid,
    /// Clone of the live socket, exposed so close() can interrupt the
    /// preamble exchange. Empty until the TCP connect itself succeeds;
    /// cancelling earlier is bounded by [`DIAL_TIMEOUT`].
    stream: Mutex<Option<TcpStream>>,
    closed: AtomicBool,
}

impl TcpOutbound {
    fn stream_slot(&self) -> std::sync::MutexGuard<'_, Option<TcpStream>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Outbound for TcpOutbound {
    fn dial(&self) -> Result<Arc<dyn Connection>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let stream =
            TcpStream::connect_timeout(&self.addr, DIAL_TIMEOUT).map_err(map_connect_error)?;
        *self.stream_slot() = Some(stream.try_clone()?);
        if self.closed.load(Ordering::SeqCst) {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(TransportError::Closed);
        }

        // Announce the service identifier; the listener hangs up on a
        // mismatch, which surfaces here as a failed acknowledgement read.
        stream.set_write_timeout(Some(PREAMBLE_TIMEOUT))?;
        (&stream)
            .write_all(self.service.as_bytes())
            .map_err(|_| TransportError::ServiceNotOffered)?;
        stream.set_read_timeout(Some(PREAMBLE_TIMEOUT))?;
        let mut ack = [0u8; 1];
        (&stream).read_exact(&mut ack).map_err(|_| {
            if self.closed.load(Ordering::SeqCst) {
                TransportError::Closed
            } else {
                TransportError::ServiceNotOffered
            }
        })?;
        if ack[0] != PREAMBLE_ACK {
            return Err(TransportError::ServiceNotOffered);
        }
        stream.set_read_timeout(None)?;
        stream.set_write_timeout(None)?;

        Ok(Arc::new(TcpConnection::new(stream, self.addr)))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(stream) = self.stream_slot().as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn map_connect_error(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
        io::ErrorKind::ConnectionRefused => TransportError::PeerUnreachable,
        _ => TransportError::Io(e),
    }
}

// ============================================================================
// Connection
// ============================================================================

struct TcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
    closed: AtomicBool,
}

impl TcpConnection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        TcpConnection {
            stream,
            peer,
            closed: AtomicBool::new(false),
        }
    }
}

impl Connection for TcpConnection {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.stream).read(buf)
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        (&self.stream).write_all(buf)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // Unblocks a pending read on the other thread with end-of-stream.
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }

    fn peer_name(&self) -> Option<String> {
        // Plain TCP carries no peer display name; callers fall back to the
        // address.
        None
    }

    fn peer_addr(&self) -> String {
        self.peer.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
