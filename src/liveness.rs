//! Liveness monitoring
//!
//! The initiator sends `ping_request{timestamp}` on a fixed interval; the
//! responder echoes the timestamp back in a `ping_response`, and RTT is the
//! difference at receive time. The measurement is advisory telemetry only
//! and never gates forwarding; there is no disconnect-on-timeout here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::protocol::{now_timestamp, Envelope};

/// Round-trip latency tracker for one connection.
#[derive(Debug, Clone, Default)]
pub struct LivenessMonitor {
    /// Last RTT in microseconds, 0 before the first response
    last_rtt_us: Arc<AtomicU64>,
    /// Responses observed
    responses: Arc<AtomicU64>,
}

impl LivenessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the next ping for `identity`, stamped with the current time.
    pub fn ping(&self, identity: &str) -> Envelope {
        Envelope::PingRequest {
            uuid: identity.to_string(),
            timestamp: now_timestamp(),
        }
    }

    /// Echo a received `ping_request` back as a `ping_response`, timestamp
    /// unchanged.
    pub fn pong(identity: &str, echoed_timestamp: f64) -> Envelope {
        Envelope::PingResponse {
            uuid: identity.to_string(),
            timestamp: echoed_timestamp,
        }
    }

    /// Record a `ping_response` and return the measured RTT. A timestamp
    /// from the future (clock skew, bogus echo) is discarded.
    pub fn observe_response(&self, echoed_timestamp: f64) -> Option<Duration> {
        let rtt_secs = now_timestamp() - echoed_timestamp;
        if !rtt_secs.is_finite() || rtt_secs < 0.0 {
            return None;
        }

        let rtt = Duration::from_secs_f64(rtt_secs);
        self.last_rtt_us
            .store(rtt.as_micros() as u64, Ordering::Relaxed);
        self.responses.fetch_add(1, Ordering::Relaxed);
        Some(rtt)
    }

    /// Most recent RTT, if any response has arrived yet.
    pub fn last_rtt(&self) -> Option<Duration> {
        match self.responses.load(Ordering::Relaxed) {
            0 => None,
            _ => Some(Duration::from_micros(
                self.last_rtt_us.load(Ordering::Relaxed),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtt_from_echoed_timestamp() {
        let monitor = LivenessMonitor::new();
        assert!(monitor.last_rtt().is_none());

        // A ping stamped 50ms ago measures roughly 50ms.
        let echoed = now_timestamp() - 0.050;
        let rtt = monitor.observe_response(echoed).unwrap();
        assert!(rtt >= Duration::from_millis(49));
        assert!(rtt < Duration::from_millis(500));
        assert!(monitor.last_rtt().is_some());
    }

    #[test]
    fn test_future_timestamp_discarded() {
        let monitor = LivenessMonitor::new();
        assert!(monitor.observe_response(now_timestamp() + 10.0).is_none());
        assert!(monitor.last_rtt().is_none());
    }

    #[test]
    fn test_ping_pong_envelopes() {
        let monitor = LivenessMonitor::new();
        let ping = monitor.ping("X");
        let ts = match ping {
            Envelope::PingRequest { ref uuid, timestamp } => {
                assert_eq!(uuid, "X");
                timestamp
            }
            ref other => panic!("unexpected envelope: {:?}", other),
        };

        match LivenessMonitor::pong("X", ts) {
            Envelope::PingResponse { timestamp, .. } => assert_eq!(timestamp, ts),
            other => panic!("unexpected envelope: {:?}", other),
        }
    }
}
