//! Probe and announce driver for a fresh registration.
//!
//! RFC 6762 §8: a responder probes for its chosen name before answering
//! for it, then sends unsolicited announcements with increasing intervals.
//! Probe responses are not currently evaluated; the name is assumed to be
//! unique on the link. A conflict check would slot in between the probe
//! sends and the announce phase.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::message;
use crate::responder::RegistrationInner;

/// Upper bound of the random pause between probe sends.
const PROBE_JITTER_MS: u64 = 250;

/// Initial interval between unsolicited announcements.
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);

/// Run the two-phase probe/announce sequence for a registration.
pub(crate) async fn run(inner: Arc<RegistrationInner>) {
    // Phase 1: probe queries carrying the future SRV/TXT in the
    // authority section, jittered per RFC 6762 §8.1.
    for attempt in 0..inner.config.capped_probe_sends() {
        let entry = inner.snapshot();
        match message::probe_query(&entry, entry.ttl) {
            Ok(msg) => inner.multicast(&msg).await,
            Err(e) => warn!("failed to compose probe: {}", e),
        }
        debug!(attempt, "sent probe");

        let jitter = Duration::from_millis(rand::rng().random_range(0..PROBE_JITTER_MS));
        if !pause(&inner.cancel, jitter).await {
            return;
        }
    }

    // Phase 2: unsolicited announcements, interval doubling each round
    // (RFC 6762 §8.3).
    let mut interval = ANNOUNCE_INTERVAL;
    for attempt in 0..inner.config.capped_announce_sends() {
        let entry = inner.snapshot();
        match message::lookup_response(&entry, entry.ttl) {
            Ok(msg) => inner.multicast(&msg).await,
            Err(e) => warn!("failed to compose announcement: {}", e),
        }
        debug!(attempt, "sent announcement");

        if !pause(&inner.cancel, interval).await {
            return;
        }
        interval *= 2;
    }
}

/// Sleep unless cancelled; false means the registration is shutting down.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
