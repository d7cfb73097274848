//! The connection session manager: a four-state machine arbitrating between
//! one listening role, one connecting role, and one established session.
//!
//! # State machine
//!
//! ```text
//!            start()                connect(peer)
//!   None ─────────────▶ Listening ───────────────▶ Connecting
//!    ▲                      ▲  ▲                        │
//!    │ stop()               │  │ connection_failed /    │ dial or accept
//!    │ (from any state)     │  │ connection_lost        │ succeeds
//!    │                      │  └────────────────────────┤
//!    └──────────────────────┴─────────── Connected ◀────┘
//! ```
//!
//! Listening and connecting run concurrently: both peers may initiate at
//! once, and whichever accept/dial resolves first wins while the loser is
//! cancelled. There is no negotiation protocol; the cost is one possibly
//! wasted connection attempt.
//!
//! # Locking
//!
//! The lifecycle state and the three worker handles are the only shared
//! mutable state, guarded by one mutex. Every transition runs under it, and
//! state-change events are emitted inside the same critical section, so
//! observers see the manager's true history. Blocking transport calls never
//! happen under the lock; `write` captures the live connection reference
//! under the lock and writes after releasing it.
//!
//! # Worker generations
//!
//! Every spawned worker carries a generation token. Worker-invoked
//! transitions are ignored when the token no longer matches the live worker
//! in the corresponding slot, so a superseded or cancelled worker can never
//! tear down its successor.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::event::{EventSink, LinkEvent};
use crate::transport::{Connection, Transport};
use crate::worker::{AcceptWorker, DialWorker, StreamWorker};

// ============================================================================
// Lifecycle state
// ============================================================================

/// The single source of truth for which role the manager is performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Idle; no workers are meaningful.
    None,
    /// A listen worker waits for an inbound connection.
    Listening,
    /// A dial worker races the listen worker for the first connection.
    Connecting,
    /// One session worker pumps an established connection.
    Connected,
}

// ============================================================================
// Manager
// ============================================================================

/// Control surface of the session core.
///
/// All methods are safe to call from any thread; transitions are serialized
/// internally.
pub struct LinkManager {
    inner: Arc<Inner>,
}

/// Shared manager state reachable from the workers.
pub(crate) struct Inner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) sink: Arc<dyn EventSink>,
    shared: Mutex<Shared>,
}

struct Shared {
    state: LinkState,
    accept: Option<AcceptWorker>,
    dial: Option<DialWorker>,
    stream: Option<StreamWorker>,
    next_generation: u64,
}

impl Shared {
    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

impl LinkManager {
    pub fn new(transport: Arc<dyn Transport>, sink: Arc<dyn EventSink>) -> Self {
        LinkManager {
            inner: Arc::new(Inner {
                transport,
                sink,
                shared: Mutex::new(Shared {
                    state: LinkState::None,
                    accept: None,
                    dial: None,
                    stream: None,
                    next_generation: 0,
                }),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        self.inner.lock().state
    }

    /// Tear down any session or attempt in flight and (re-)enter listening.
    pub fn start(&self) {
        let mut shared = self.inner.lock();
        Inner::start_locked(&self.inner, &mut shared);
    }

    /// Cancel every worker and go idle. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut shared = self.inner.lock();
        if let Some(w) = shared.dial.take() {
            w.cancel();
        }
        if let Some(w) = shared.accept.take() {
            w.cancel();
        }
        if let Some(w) = shared.stream.take() {
            w.cancel();
        }
        // Repeated stops are no-ops on the absent workers above and must not
        // replay the state-change event.
        if shared.state != LinkState::None {
            self.inner.set_state_locked(&mut shared, LinkState::None);
        }
    }

    /// Start an outbound attempt toward `peer`.
    ///
    /// The listen worker keeps running concurrently; whichever side
    /// establishes a connection first wins. Any current session is torn
    /// down immediately.
    pub fn connect(&self, peer: &str) {
        let mut shared = self.inner.lock();
        if shared.state == LinkState::Connecting {
            if let Some(w) = shared.dial.take() {
                w.cancel();
            }
        }
        let generation = shared.bump();
        shared.dial = Some(DialWorker::spawn(
            Arc::clone(&self.inner),
            peer.to_string(),
            generation,
        ));
        if let Some(w) = shared.stream.take() {
            w.cancel();
        }
        self.inner.set_state_locked(&mut shared, LinkState::Connecting);
    }

    /// Hand `bytes` to the current session for delivery.
    ///
    /// Silently dropped unless the manager is Connected. On success a
    /// `DataSent` event is emitted; a failed transport write is logged and
    /// swallowed without triggering recovery (a dead connection is detected
    /// on its read side).
    pub fn write(&self, bytes: &[u8]) {
        let target: Option<Arc<dyn Connection>> = {
            let shared = self.inner.lock();
            if shared.state != LinkState::Connected {
                return;
            }
            shared.stream.as_ref().map(|w| w.connection())
        };

        let Some(conn) = target else { return };
        match conn.write_all(bytes) {
            Ok(()) => self.inner.sink.notify(LinkEvent::DataSent(bytes.to_vec())),
            Err(e) => log::debug!("write: payload dropped: {}", e),
        }
    }
}

// ============================================================================
// Transitions
// ============================================================================

// The transitions that spawn workers are associated functions over
// `&Arc<Inner>` rather than `&self` methods: workers hold the manager by
// `Arc` and each spawn hands a fresh clone to the new worker's thread.

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state_locked(&self, shared: &mut Shared, state: LinkState) {
        shared.state = state;
        self.sink.notify(LinkEvent::StateChanged(state));
    }

    /// Cancel dial and session workers, replace the listen worker, enter
    /// Listening. The previous listen worker is cancelled before its slot is
    /// reused so the passive endpoint can actually be rebound.
    fn start_locked(this: &Arc<Inner>, shared: &mut Shared) {
        if let Some(w) = shared.dial.take() {
            w.cancel();
        }
        if let Some(w) = shared.stream.take() {
            w.cancel();
        }
        if let Some(w) = shared.accept.take() {
            w.cancel();
        }
        let generation = shared.bump();
        shared.accept = Some(AcceptWorker::spawn(Arc::clone(this), generation));
        this.set_state_locked(shared, LinkState::Listening);
    }

    /// A listen worker's accept resolved. Adopt or reject under the lock:
    /// the worker never decides its own fate from a racily read state.
    pub(crate) fn offer_inbound(this: &Arc<Inner>, conn: Arc<dyn Connection>, generation: u64) {
        let mut shared = this.lock();
        if shared.accept.as_ref().map(AcceptWorker::generation) != Some(generation) {
            // Superseded while the accept was resolving.
            drop(shared);
            conn.close();
            return;
        }
        // Single-shot policy: the worker terminates after this offer either
        // way, so retire its endpoint now.
        if let Some(w) = shared.accept.take() {
            w.cancel();
        }

        match shared.state {
            LinkState::Listening | LinkState::Connecting => {
                Inner::connected_locked(this, &mut shared, conn);
            }
            LinkState::None | LinkState::Connected => {
                // A session is already active or shutdown is in progress.
                drop(shared);
                conn.close();
            }
        }
    }

    /// A dial worker's attempt succeeded. The worker's slot is cleared
    /// without cancelling: its handle now backs the live connection, and any
    /// later cancellation request must be a no-op.
    pub(crate) fn adopt_outbound(this: &Arc<Inner>, conn: Arc<dyn Connection>, generation: u64) {
        let mut shared = this.lock();
        if shared.dial.as_ref().map(DialWorker::generation) != Some(generation) {
            // stop() or a newer connect() superseded this attempt.
            drop(shared);
            conn.close();
            return;
        }
        shared.dial = None;
        Inner::connected_locked(this, &mut shared, conn);
    }

    /// Common tail of both arbitration paths: tear down the loser and any
    /// prior session, then hand the connection to a fresh session worker.
    fn connected_locked(this: &Arc<Inner>, shared: &mut Shared, conn: Arc<dyn Connection>) {
        if let Some(w) = shared.dial.take() {
            w.cancel();
        }
        if let Some(w) = shared.stream.take() {
            w.cancel();
        }

        let peer = conn.peer_name().unwrap_or_else(|| conn.peer_addr());
        let generation = shared.bump();
        shared.stream = Some(StreamWorker::spawn(
            Arc::clone(this),
            Arc::clone(&conn),
            generation,
        ));

        this.set_state_locked(shared, LinkState::Connected);
        this.sink.notify(LinkEvent::PeerIdentified(peer));
    }

    /// A dial worker's attempt failed: surface it and re-enter listening.
    pub(crate) fn connection_failed(this: &Arc<Inner>, generation: u64) {
        let mut shared = this.lock();
        if shared.dial.as_ref().map(DialWorker::generation) != Some(generation) {
            return;
        }
        shared.dial = None;
        this.sink
            .notify(LinkEvent::TransientError("cannot connect".to_string()));
        Inner::start_locked(this, &mut shared);
    }

    /// The session worker's read side failed: surface it and re-enter
    /// listening. The dead worker is cancelled as part of the restart.
    pub(crate) fn connection_lost(this: &Arc<Inner>, generation: u64) {
        let mut shared = this.lock();
        if shared.stream.as_ref().map(StreamWorker::generation) != Some(generation) {
            return;
        }
        this.sink
            .notify(LinkEvent::TransientError("connection lost".to_string()));
        Inner::start_locked(this, &mut shared);
    }
}

// ============================================================================
// Tests
// ============================================================================
