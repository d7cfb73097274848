//! Notifications emitted by the session manager and its workers.

use std::sync::mpsc;

use crate::manager::LinkState;

/// A notification delivered to the [`EventSink`].
///
/// Events are fire-and-forget and ordered only with respect to the single
/// worker that emitted them. Data events from a superseded session worker
/// have no defined ordering relative to the current one; consumers that care
/// must discard events that arrive after a state change away from Connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The manager committed a lifecycle transition.
    StateChanged(LinkState),
    /// Bytes read from the peer. Always a fresh copy of exactly the bytes
    /// received, never a shared buffer.
    DataReceived(Vec<u8>),
    /// Bytes handed to the transport for delivery.
    DataSent(Vec<u8>),
    /// Display name (or address) of the peer of a new session.
    PeerIdentified(String),
    /// A recoverable failure; the manager has already re-entered listening.
    TransientError(String),
}

/// Consumer of [`LinkEvent`]s.
///
/// `notify` runs inline on the emitting worker's thread, sometimes inside the
/// manager's critical section: it must return quickly and must not call back
/// into the manager.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: LinkEvent);
}

/// Channel senders make convenient sinks for applications that consume
/// events on their own thread.
impl EventSink for mpsc::Sender<LinkEvent> {
    fn notify(&self, event: LinkEvent) {
        // A dropped receiver means the application is shutting down.
        let _ = self.send(event);
    }
}
