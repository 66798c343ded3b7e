//! Metrics instrumentation for lanbeacon.
//!
//! All metrics are prefixed with `mdns.`

use metrics::{counter, histogram};
use std::time::Instant;

/// Record a received packet by decode outcome ("decoded" / "dropped").
pub fn record_packet(outcome: &'static str) {
    counter!("mdns.packet.count", "outcome" => outcome).increment(1);
}

/// Record an answered question by kind ("browse" / "lookup" / "type_enum")
/// and how long composing and sending the answer took.
pub fn record_question(kind: &'static str, duration: std::time::Duration) {
    counter!("mdns.question.count", "kind" => kind).increment(1);
    histogram!("mdns.question.duration.seconds", "kind" => kind).record(duration.as_secs_f64());
}

/// Record a successful send by transport and family.
pub fn record_send(transport: &'static str, family: &'static str) {
    counter!("mdns.send.count", "transport" => transport, "family" => family).increment(1);
}

/// Record a failed send by transport and family.
pub fn record_send_error(transport: &'static str, family: &'static str) {
    counter!("mdns.send.error.count", "transport" => transport, "family" => family).increment(1);
}

/// Record a resolver emission ("ready" / "withdrawn").
pub fn record_discovery(event: &'static str) {
    counter!("mdns.discovery.count", "event" => event).increment(1);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
