//! Blocking worker threads owned by the session manager.
//!
//! Each worker performs exactly one blocking transport operation on the
//! manager's behalf: accept one inbound connection, dial one outbound
//! connection, or pump one established session's read side. Workers never
//! coordinate with each other; every outcome is routed back through the
//! manager's transition methods together with the worker's generation token,
//! so a superseded worker cannot affect its successor.
//!
//! Cancellation is defined as closing the worker's underlying handle. The
//! cancelled flag is set before the close, so the worker can tell an induced
//! error from a genuine failure and terminate silently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::event::LinkEvent;
use crate::manager::Inner;
use crate::transport::{Connection, Listener, Outbound};
use crate::{READ_BUF_LEN, SERVICE_UUID};

// ============================================================================
// Listen Worker
// ============================================================================

/// Owns the passive listening endpoint. One `accept` per lifetime; a fresh
/// worker must be spawned to listen again.
pub(crate) struct AcceptWorker {
    generation: u64,
    listener: Option<Arc<dyn Listener>>,
    cancelled: Arc<AtomicBool>,
}

impl AcceptWorker {
    /// Open the passive endpoint and start the accept thread.
    ///
    /// If the endpoint cannot be opened the worker is returned inert: the
    /// manager stays in its declared state with no active listener. This
    /// degraded mode is logged and not retried.
    pub(crate) fn spawn(inner: Arc<Inner>, generation: u64) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));

        let listener = match inner.transport.listen(SERVICE_UUID) {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("accept[{}]: cannot open listening endpoint: {}", generation, e);
                return AcceptWorker {
                    generation,
                    listener: None,
                    cancelled,
                };
            }
        };

        let thread_listener = Arc::clone(&listener);
        let thread_cancelled = Arc::clone(&cancelled);
        let spawned = thread::Builder::new()
            .name(format!("link-accept-{}", generation))
            .spawn(move || accept_run(inner, thread_listener, thread_cancelled, generation));
        if let Err(e) = spawned {
            log::error!("accept[{}]: cannot spawn worker thread: {}", generation, e);
            listener.close();
            return AcceptWorker {
                generation,
                listener: None,
                cancelled,
            };
        }

        AcceptWorker {
            generation,
            listener: Some(listener),
            cancelled,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Close the listening endpoint, unblocking a pending accept.
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(listener) = &self.listener {
            listener.close();
        }
    }
}

fn accept_run(
    inner: Arc<Inner>,
    listener: Arc<dyn Listener>,
    cancelled: Arc<AtomicBool>,
    generation: u64,
) {
    match listener.accept() {
        Ok(conn) => {
            log::debug!("accept[{}]: inbound connection from {}", generation, conn.peer_addr());
            Inner::offer_inbound(&inner, conn, generation);
        }
        Err(e) => {
            listener.close();
            if cancelled.load(Ordering::SeqCst) {
                log::debug!("accept[{}]: cancelled", generation);
            } else {
                log::warn!("accept[{}]: accept failed, listener retired: {}", generation, e);
            }
        }
    }
}

// ============================================================================
// Connect Worker
// ============================================================================

/// Owns one outbound connection attempt.
pub(crate) struct DialWorker {
    generation: u64,
    outbound: Option<Arc<dyn Outbound>>,
    cancelled: Arc<AtomicBool>,
}

impl DialWorker {
    /// Resolve the outbound attempt and start the dial thread.
    ///
    /// Resolution failure leaves the worker inert; the failure is still
    /// routed through `connection_failed` so the manager re-enters listening
    /// instead of sitting in Connecting forever.
    pub(crate) fn spawn(inner: Arc<Inner>, peer: String, generation: u64) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));

        let outbound = match inner.transport.open_outbound(&peer, SERVICE_UUID) {
            Ok(outbound) => Some(outbound),
            Err(e) => {
                log::error!("dial[{}]: cannot resolve outbound to {}: {}", generation, peer, e);
                None
            }
        };

        let thread_outbound = outbound.clone();
        let thread_cancelled = Arc::clone(&cancelled);
        let spawned = thread::Builder::new()
            .name(format!("link-dial-{}", generation))
            .spawn(move || dial_run(inner, thread_outbound, thread_cancelled, generation, peer));
        if let Err(e) = spawned {
            log::error!("dial[{}]: cannot spawn worker thread: {}", generation, e);
            if let Some(outbound) = &outbound {
                outbound.close();
            }
        }

        DialWorker {
            generation,
            outbound,
            cancelled,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Close the outbound handle, unblocking an in-flight dial.
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(outbound) = &self.outbound {
            outbound.close();
        }
    }
}

fn dial_run(
    inner: Arc<Inner>,
    outbound: Option<Arc<dyn Outbound>>,
    cancelled: Arc<AtomicBool>,
    generation: u64,
    peer: String,
) {
    let Some(outbound) = outbound else {
        Inner::connection_failed(&inner, generation);
        return;
    };

    match outbound.dial() {
        Ok(conn) => {
            log::debug!("dial[{}]: connected to {}", generation, peer);
            Inner::adopt_outbound(&inner, conn, generation);
        }
        Err(e) => {
            outbound.close();
            if cancelled.load(Ordering::SeqCst) {
                log::debug!("dial[{}]: cancelled", generation);
            } else {
                log::warn!("dial[{}]: cannot connect to {}: {}", generation, peer, e);
                Inner::connection_failed(&inner, generation);
            }
        }
    }
}

// ============================================================================
// Session Worker
// ============================================================================

/// Owns one established connection and pumps its read side.
pub(crate) struct StreamWorker {
    generation: u64,
    conn: Arc<dyn Connection>,
    cancelled: Arc<AtomicBool>,
}

impl StreamWorker {
    pub(crate) fn spawn(inner: Arc<Inner>, conn: Arc<dyn Connection>, generation: u64) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));

        let thread_conn = Arc::clone(&conn);
        let thread_cancelled = Arc::clone(&cancelled);
        let spawned = thread::Builder::new()
            .name(format!("link-stream-{}", generation))
            .spawn(move || stream_run(inner, thread_conn, thread_cancelled, generation));
        if let Err(e) = spawned {
            // Without a read loop the session is dead on arrival; closing the
            // connection lets the peer notice.
            log::error!("stream[{}]: cannot spawn worker thread: {}", generation, e);
            conn.close();
        }

        StreamWorker {
            generation,
            conn,
            cancelled,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// The connection this session wraps, for the manager's write path.
    pub(crate) fn connection(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.conn)
    }

    /// Close the connection, unblocking the read loop.
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.conn.close();
    }
}

fn stream_run(
    inner: Arc<Inner>,
    conn: Arc<dyn Connection>,
    cancelled: Arc<AtomicBool>,
    generation: u64,
) {
    let mut buf = [0u8; READ_BUF_LEN];

    loop {
        match conn.read(&mut buf) {
            // Only the first n bytes of the buffer are valid for this read;
            // each event carries its own copy.
            Ok(n) if n > 0 => inner.sink.notify(LinkEvent::DataReceived(buf[..n].to_vec())),
            Ok(_) => {
                // End of stream: the peer hung up.
                if cancelled.load(Ordering::SeqCst) {
                    log::debug!("stream[{}]: cancelled", generation);
                } else {
                    log::info!("stream[{}]: peer closed the connection", generation);
                    Inner::connection_lost(&inner, generation);
                }
                return;
            }
            Err(e) => {
                // The loop exits on the first failure; recovery fires at most
                // once per session.
                if cancelled.load(Ordering::SeqCst) {
                    log::debug!("stream[{}]: cancelled", generation);
                } else {
                    log::warn!("stream[{}]: read failed: {}", generation, e);
                    Inner::connection_lost(&inner, generation);
                }
                return;
            }
        }
    }
}
