//! Point-to-point duplex chat link.
//!
//! This crate maintains a single duplex byte-stream session between two
//! peers that discover each other under a fixed service identifier:
//! - A [`LinkManager`] state machine that listens and dials concurrently,
//!   arbitrates whichever side connects first, and recovers into listening
//!   when a session fails
//! - A transport trait boundary ([`Transport`]) behind which the platform
//!   connection primitives live
//! - Fire-and-forget [`LinkEvent`] notifications delivered to an
//!   application-supplied [`EventSink`]
//!
//! Payloads are opaque byte buffers; framing, history, and identity beyond
//! the transport's own pairing are the application's concern.

use uuid::Uuid;

// ============================================================================
// Modules
// ============================================================================

pub mod event;
pub mod manager;
pub mod tcp;
pub mod transport;

mod worker;

// ============================================================================
// Constants
// ============================================================================

/// 128-bit identifier naming the chat service on both peers.
///
/// Not an instance id: every peer listens and dials under this same value.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xfa87_c0d0_afac_11de_8a39_0800_200c_9a66);

/// Capacity of the session read buffer; each inbound event carries at most
/// this many bytes.
pub const READ_BUF_LEN: usize = 1024;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{EventSink, LinkEvent};
pub use manager::{LinkManager, LinkState};
pub use transport::{Connection, Listener, Outbound, Transport, TransportError};
