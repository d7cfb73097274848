//! Terminal chat peer
//!
//! A line-oriented chat client over the chat_link session core:
//! - Listens for an inbound peer on the bind address
//! - Dials out on `--peer` or the `/connect` command
//! - Sends each typed line to the connected peer
//! - Prints received payloads, state changes, and transient errors

use std::io::{self, BufRead};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chat_link::tcp::TcpTransport;
use chat_link::{EventSink, LinkEvent, LinkManager, LinkState, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Default local bind port for the passive endpoint
const DEFAULT_BIND_PORT: u16 = 7480;

/// How long the main loop waits for input before polling the shutdown flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    // --bind <addr:port>  Local address for the passive endpoint
    // --peer <addr:port>  Peer to dial immediately (optional)

    let bind = parse_arg(&args, "--bind")
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_BIND_PORT));
    let peer = parse_arg(&args, "--peer");

    let bind: SocketAddr = bind.parse().map_err(|_| "Invalid bind address")?;

    log::info!("Chat peer starting...");
    log::info!("  Bind:    {}", bind);
    log::info!("  Peer:    {}", peer.as_deref().unwrap_or("(wait for inbound)"));
    log::info!("  Service: {}", chat_link::SERVICE_UUID);

    // Events flow from the worker threads into the terminal loop.
    let (event_tx, event_rx) = mpsc::channel::<LinkEvent>();
    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(bind));
    let sink: Arc<dyn EventSink> = Arc::new(event_tx);
    let manager = LinkManager::new(transport, sink);

    manager.start();
    if let Some(peer) = &peer {
        manager.connect(peer);
    }

    // SIGTERM/SIGINT request a clean stop
    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;

    // stdin is read on its own thread so the main loop can keep draining
    // events and watching the shutdown flag.
    let (line_tx, line_rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    println!("* type /connect <host:port> to dial, /quit to exit");

    while !term.load(Ordering::Relaxed) {
        while let Ok(event) = event_rx.try_recv() {
            render_event(&event);
        }

        match line_rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => {
                if !handle_line(&manager, line.trim()) {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    manager.stop();
    log::info!("Chat peer shut down");
    Ok(())
}

fn parse_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

// ============================================================================
// Terminal Loop
// ============================================================================

/// Apply one input line. Returns false when the user asked to quit.
fn handle_line(manager: &LinkManager, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    if line == "/quit" {
        return false;
    }
    if let Some(target) = line.strip_prefix("/connect ") {
        manager.connect(target.trim());
        return true;
    }
    if manager.state() == LinkState::Connected {
        manager.write(line.as_bytes());
    } else {
        println!("* not connected (use /connect <host:port>)");
    }
    true
}

fn render_event(event: &LinkEvent) {
    match event {
        LinkEvent::StateChanged(state) => println!("* {}", status_line(*state)),
        LinkEvent::DataReceived(bytes) => {
            println!("peer: {}", String::from_utf8_lossy(bytes));
        }
        LinkEvent::DataSent(bytes) => {
            println!("  me: {}", String::from_utf8_lossy(bytes));
        }
        LinkEvent::PeerIdentified(name) => println!("* talking to {}", name),
        LinkEvent::TransientError(message) => println!("* {}", message),
    }
}

fn status_line(state: LinkState) -> &'static str {
    match state {
        LinkState::None => "stopped",
        LinkState::Listening => "not connected",
        LinkState::Connecting => "connecting...",
        LinkState::Connected => "connected",
    }
}
