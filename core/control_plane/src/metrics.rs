//! Lightweight Prometheus-compatible metrics for the controller.
//!
//! Uses atomic counters for lock-free instrumentation from the read, write
//! and housekeeping threads. Renders metrics in Prometheus text exposition
//! format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters updated by a [`Controller`](crate::Controller).
pub struct ControllerMetrics {
    /// Request-kind packets recorded in the staging table (counter)
    pub requests_staged_total: AtomicU64,
    /// Responses delivered to a staged request (counter)
    pub responses_matched_total: AtomicU64,
    /// Responses with an unknown or already-resolved id (counter)
    pub responses_dropped_total: AtomicU64,
    /// Non-response packets handed to the inbound queue (counter)
    pub inbound_forwarded_total: AtomicU64,
    /// Packets with an invalid or unclassifiable type (counter)
    pub invalid_packets_total: AtomicU64,
    /// Staged requests dropped by the housekeeping sweep (counter)
    pub staging_evicted_total: AtomicU64,
    /// Controller start time (for uptime calculation)
    pub start_time: Instant,
}

impl ControllerMetrics {
    pub fn new() -> Self {
        Self {
            requests_staged_total: AtomicU64::new(0),
            responses_matched_total: AtomicU64::new(0),
            responses_dropped_total: AtomicU64::new(0),
            inbound_forwarded_total: AtomicU64::new(0),
            invalid_packets_total: AtomicU64::new(0),
            staging_evicted_total: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Render metrics in Prometheus text exposition format.
    ///
    /// `staging_len` is sampled by the caller since it lives behind the
    /// staging mutex.
    pub fn render(&self, staging_len: usize) -> String {
        let uptime = self.start_time.elapsed().as_secs();
        format!(
            "# HELP tunnel_requests_staged_total Total requests recorded in the staging table\n\
             # TYPE tunnel_requests_staged_total counter\n\
             tunnel_requests_staged_total {}\n\
             # HELP tunnel_responses_matched_total Total responses delivered to a staged request\n\
             # TYPE tunnel_responses_matched_total counter\n\
             tunnel_responses_matched_total {}\n\
             # HELP tunnel_responses_dropped_total Total responses with an unknown correlation id\n\
             # TYPE tunnel_responses_dropped_total counter\n\
             tunnel_responses_dropped_total {}\n\
             # HELP tunnel_inbound_forwarded_total Total packets handed to the inbound queue\n\
             # TYPE tunnel_inbound_forwarded_total counter\n\
             tunnel_inbound_forwarded_total {}\n\
             # HELP tunnel_invalid_packets_total Total packets with an invalid type\n\
             # TYPE tunnel_invalid_packets_total counter\n\
             tunnel_invalid_packets_total {}\n\
             # HELP tunnel_staging_evicted_total Total staged requests dropped by housekeeping\n\
             # TYPE tunnel_staging_evicted_total counter\n\
             tunnel_staging_evicted_total {}\n\
             # HELP tunnel_staging_entries Current number of staged requests\n\
             # TYPE tunnel_staging_entries gauge\n\
             tunnel_staging_entries {}\n\
             # HELP tunnel_uptime_seconds Controller uptime in seconds\n\
             # TYPE tunnel_uptime_seconds gauge\n\
             tunnel_uptime_seconds {}\n",
            self.requests_staged_total.load(Ordering::Relaxed),
            self.responses_matched_total.load(Ordering::Relaxed),
            self.responses_dropped_total.load(Ordering::Relaxed),
            self.inbound_forwarded_total.load(Ordering::Relaxed),
            self.invalid_packets_total.load(Ordering::Relaxed),
            self.staging_evicted_total.load(Ordering::Relaxed),
            staging_len,
            uptime,
        )
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render_format() {
        let m = ControllerMetrics::new();
        m.requests_staged_total.fetch_add(5, Ordering::Relaxed);
        m.responses_dropped_total.fetch_add(2, Ordering::Relaxed);
        let output = m.render(3);
        assert!(output.contains("tunnel_requests_staged_total 5"));
        assert!(output.contains("tunnel_responses_dropped_total 2"));
        assert!(output.contains("tunnel_staging_entries 3"));
        assert!(output.contains("# TYPE tunnel_uptime_seconds gauge"));
    }

    #[test]
    fn test_metrics_default_zero() {
        let m = ControllerMetrics::default();
        assert_eq!(m.requests_staged_total.load(Ordering::Relaxed), 0);
        assert_eq!(m.responses_matched_total.load(Ordering::Relaxed), 0);
        assert_eq!(m.responses_dropped_total.load(Ordering::Relaxed), 0);
        assert_eq!(m.inbound_forwarded_total.load(Ordering::Relaxed), 0);
        assert_eq!(m.invalid_packets_total.load(Ordering::Relaxed), 0);
        assert_eq!(m.staging_evicted_total.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_metrics_incr() {
        let m = ControllerMetrics::new();
        ControllerMetrics::incr(&m.inbound_forwarded_total);
        ControllerMetrics::incr(&m.inbound_forwarded_total);
        assert!(m.render(0).contains("tunnel_inbound_forwarded_total 2"));
    }
}
