//! End-to-end tests: two link managers talking over the TCP transport.

use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chat_link::tcp::TcpTransport;
use chat_link::{EventSink, LinkEvent, LinkManager, LinkState, Transport};

const WAIT: Duration = Duration::from_secs(10);

/// Grab two distinct currently-free localhost ports. Both probes are bound
/// at once so the addresses cannot collide; they are dropped before use.
fn free_addrs() -> (SocketAddr, SocketAddr) {
    let probe_a = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let probe_b = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    (
        probe_a.local_addr().unwrap(),
        probe_b.local_addr().unwrap(),
    )
}

fn peer_on(addr: SocketAddr) -> (LinkManager, Receiver<LinkEvent>) {
    let (tx, rx) = std::sync::mpsc::channel::<LinkEvent>();
    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(addr));
    let sink: Arc<dyn EventSink> = Arc::new(tx);
    (LinkManager::new(transport, sink), rx)
}

/// Drain `rx` until an event satisfies `pred`, panicking on timeout.
fn expect_event(rx: &Receiver<LinkEvent>, pred: impl Fn(&LinkEvent) -> bool) -> LinkEvent {
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(event) if pred(&event) => return event,
            Ok(_) => continue,
            Err(e) => panic!("timed out waiting for event: {}", e),
        }
    }
}

#[test]
fn duplex_exchange_and_recovery() {
    let (addr_a, addr_b) = free_addrs();

    let (peer_a, events_a) = peer_on(addr_a);
    let (peer_b, events_b) = peer_on(addr_b);

    peer_a.start();
    expect_event(&events_a, |e| {
        *e == LinkEvent::StateChanged(LinkState::Listening)
    });

    peer_b.start();
    peer_b.connect(&addr_a.to_string());

    expect_event(&events_a, |e| {
        *e == LinkEvent::StateChanged(LinkState::Connected)
    });
    expect_event(&events_b, |e| {
        *e == LinkEvent::StateChanged(LinkState::Connected)
    });
    expect_event(&events_a, |e| matches!(e, LinkEvent::PeerIdentified(_)));
    expect_event(&events_b, |e| matches!(e, LinkEvent::PeerIdentified(_)));

    // Both directions of the byte stream work.
    peer_a.write(b"hello from a");
    expect_event(&events_a, |e| {
        *e == LinkEvent::DataSent(b"hello from a".to_vec())
    });
    expect_event(&events_b, |e| {
        *e == LinkEvent::DataReceived(b"hello from a".to_vec())
    });

    peer_b.write(b"hello from b");
    expect_event(&events_a, |e| {
        *e == LinkEvent::DataReceived(b"hello from b".to_vec())
    });

    // One side going away is a transient failure for the other, which
    // re-enters listening rather than stopping.
    peer_b.stop();
    expect_event(&events_a, |e| {
        *e == LinkEvent::TransientError("connection lost".to_string())
    });
    expect_event(&events_a, |e| {
        *e == LinkEvent::StateChanged(LinkState::Listening)
    });
    assert_eq!(peer_a.state(), LinkState::Listening);

    peer_a.stop();
    assert_eq!(peer_a.state(), LinkState::None);
}

#[test]
fn dial_failure_recovers_to_listening() {
    let (addr, _) = free_addrs();

    let (peer, events) = peer_on(addr);
    peer.start();
    expect_event(&events, |e| {
        *e == LinkEvent::StateChanged(LinkState::Listening)
    });

    // Nothing listens on port 1.
    peer.connect("127.0.0.1:1");
    expect_event(&events, |e| {
        *e == LinkEvent::StateChanged(LinkState::Connecting)
    });
    expect_event(&events, |e| {
        *e == LinkEvent::TransientError("cannot connect".to_string())
    });
    expect_event(&events, |e| {
        *e == LinkEvent::StateChanged(LinkState::Listening)
    });

    peer.stop();
}

#[test]
fn reconnect_after_session_drop() {
    let (addr_a, addr_b) = free_addrs();

    let (peer_a, events_a) = peer_on(addr_a);
    let (peer_b, events_b) = peer_on(addr_b);

    peer_a.start();
    peer_b.start();
    peer_b.connect(&addr_a.to_string());
    expect_event(&events_a, |e| {
        *e == LinkEvent::StateChanged(LinkState::Connected)
    });
    expect_event(&events_b, |e| {
        *e == LinkEvent::StateChanged(LinkState::Connected)
    });

    // Drop the session from b's side and wait for a to re-enter listening
    // before dialing again; the second session must carry data like the
    // first.
    peer_b.stop();
    expect_event(&events_a, |e| {
        *e == LinkEvent::StateChanged(LinkState::Listening)
    });

    peer_b.start();
    peer_b.connect(&addr_a.to_string());
    expect_event(&events_a, |e| {
        *e == LinkEvent::StateChanged(LinkState::Connected)
    });
    expect_event(&events_b, |e| {
        *e == LinkEvent::StateChanged(LinkState::Connected)
    });

    peer_b.write(b"again");
    expect_event(&events_a, |e| {
        *e == LinkEvent::DataReceived(b"again".to_vec())
    });

    peer_a.stop();
    peer_b.stop();
}
