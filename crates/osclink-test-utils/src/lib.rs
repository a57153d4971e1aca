//! Common test helpers for osclink tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - Message collectors for handler testing
//! - Timetag builders relative to now
//! - Opt-in tracing output

use osclink_core::{Bundle, Message, Packet, TimeTag};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub fn find_available_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Find an available UDP port for testing
pub fn find_available_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub fn wait_for<F>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check() {
            return true;
        }
        std::thread::sleep(interval);
    }
    check()
}

/// Install a fmt subscriber honoring `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Timetags
// ============================================================================

/// Timetag `delay` from now
pub fn timetag_in(delay: Duration) -> TimeTag {
    TimeTag::after(delay)
}

/// Timetag `age` ago
pub fn timetag_ago(age: Duration) -> TimeTag {
    TimeTag::before(age)
}

/// Bundle of the given messages, due `delay` from now
pub fn bundle_in(delay: Duration, messages: Vec<Message>) -> Bundle {
    Bundle::new(
        timetag_in(delay),
        messages.into_iter().map(Packet::from).collect(),
    )
}

// ============================================================================
// Message Collector
// ============================================================================

/// Collector for dispatched messages with thread-safe access
#[derive(Clone)]
pub struct MessageCollector {
    received: Arc<Mutex<Vec<(Instant, Message)>>>,
    arrived: Arc<Condvar>,
}

impl MessageCollector {
    pub fn new() -> Self {
        Self {
            received: Arc::new(Mutex::new(Vec::new())),
            arrived: Arc::new(Condvar::new()),
        }
    }

    /// Create a handler callback that records every message
    pub fn callback(&self) -> impl Fn(Message) + Send + Sync + 'static {
        let received = self.received.clone();
        let arrived = self.arrived.clone();

        move |message| {
            received.lock().push((Instant::now(), message));
            arrived.notify_all();
        }
    }

    /// Get the count of received messages
    pub fn count(&self) -> usize {
        self.received.lock().len()
    }

    /// Wait for at least n messages to be received
    pub fn wait_for_count(&self, n: usize, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        let mut received = self.received.lock();
        while received.len() < n {
            if self.arrived.wait_until(&mut received, deadline).timed_out() {
                return received.len() >= n;
            }
        }
        true
    }

    /// Get all collected messages in arrival order
    pub fn messages(&self) -> Vec<Message> {
        self.received
            .lock()
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Addresses in arrival order
    pub fn addresses(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .map(|(_, m)| m.address.clone())
            .collect()
    }

    /// Arrival instants in arrival order
    pub fn arrival_times(&self) -> Vec<Instant> {
        self.received.lock().iter().map(|(t, _)| *t).collect()
    }

    /// Check if a specific address was received
    pub fn has_address(&self, addr: &str) -> bool {
        self.received
            .lock()
            .iter()
            .any(|(_, m)| m.address == addr)
    }

    /// Get the last message received
    pub fn last(&self) -> Option<Message> {
        self.received.lock().last().map(|(_, m)| m.clone())
    }

    /// Clear all collected messages
    pub fn clear(&self) {
        self.received.lock().clear();
    }
}

impl Default for MessageCollector {
    fn default() -> Self {
        Self::new()
    }
}
