//! Transport boundary consumed by the session manager.
//!
//! The four traits below are the sole I/O seam of the core:
//! - [`Transport`] binds passive endpoints and resolves outbound attempts
//! - [`Listener`] blocks in `accept` for one inbound connection
//! - [`Outbound`] blocks in `dial` for one outbound connection
//! - [`Connection`] is an established duplex byte stream
//!
//! Every handle is closable from a thread other than the one blocked on it;
//! `close` is idempotent and makes the blocked call return promptly. Workers
//! distinguish a cancellation-induced error from a genuine failure via their
//! own cancelled flag, not by inspecting the error value.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Errors
// ============================================================================

/// Failures surfaced by the transport boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The local transport is switched off or missing.
    #[error("local transport unavailable")]
    Unavailable,

    /// The service identifier is already bound by another listener.
    #[error("service identifier already bound")]
    AlreadyBound,

    /// No route to the peer, or the peer refused the connection.
    #[error("peer unreachable")]
    PeerUnreachable,

    /// The peer is reachable but does not offer the requested service.
    #[error("peer does not offer the service")]
    ServiceNotOffered,

    /// The blocking operation ran out of time.
    #[error("operation timed out")]
    Timeout,

    /// The handle was closed from another thread.
    #[error("handle closed")]
    Closed,

    /// Any other transport-level I/O failure.
    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),
}

// ============================================================================
// Traits
// ============================================================================

/// Factory side of the transport: one passive and one active entry point.
pub trait Transport: Send + Sync {
    /// Bind a passive endpoint under `service`.
    ///
    /// May block briefly for local setup but must not wait on a peer.
    fn listen(&self, service: Uuid) -> Result<Arc<dyn Listener>, TransportError>;

    /// Resolve an outbound attempt toward `peer` without contacting it.
    ///
    /// The returned handle carries everything `dial` needs; resolution
    /// failure here leaves the connect worker inert.
    fn open_outbound(&self, peer: &str, service: Uuid)
        -> Result<Arc<dyn Outbound>, TransportError>;
}

/// A bound passive endpoint.
pub trait Listener: Send + Sync {
    /// Block until one inbound connection arrives.
    ///
    /// Returns [`TransportError::Closed`] when the handle is closed from
    /// another thread while blocked.
    fn accept(&self) -> Result<Arc<dyn Connection>, TransportError>;

    /// Idempotent; unblocks a pending `accept`.
    fn close(&self);
}

/// One resolved outbound attempt.
pub trait Outbound: Send + Sync {
    /// Block until connected or failed.
    fn dial(&self) -> Result<Arc<dyn Connection>, TransportError>;

    /// Idempotent; unblocks an in-flight `dial`.
    fn close(&self);
}

/// An established duplex byte-stream connection.
pub trait Connection: Send + Sync {
    /// Blocking read of up to `buf.len()` bytes. `Ok(0)` means end of stream.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Blocking write of the whole buffer.
    fn write_all(&self, buf: &[u8]) -> io::Result<()>;

    /// Idempotent; unblocks a pending read. The sole cancellation mechanism.
    fn close(&self);

    /// Best-effort peer display name.
    fn peer_name(&self) -> Option<String>;

    /// Peer address in the transport's own notation.
    fn peer_addr(&self) -> String;
}
