//! Metrics definitions for the broadcast service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `bs_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `kind`: 5 values (presenter, viewer, onIceCandidate, stop, unknown)
//! - `reason`: bounded by `BroadcastError::reason_label`
//! - `role`: 2 values (presenter, viewer)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded. Negotiation buckets cover
/// the range of an SDP offer round trip through the media engine.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("bs_negotiation".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set negotiation buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("bs_engine_request".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set engine request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Session Gauges
// ============================================================================

/// Set whether a presenter is live.
///
/// Metric: `bs_presenter_active`
/// Labels: none
pub fn set_presenter_active(active: bool) {
    gauge!("bs_presenter_active").set(if active { 1.0 } else { 0.0 });
}

/// Set the number of connected viewers.
///
/// Metric: `bs_viewers_active`
/// Labels: none
pub fn set_viewers_active(count: usize) {
    // usize to f64 conversion is safe for realistic viewer counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("bs_viewers_active").set(count as f64);
}

/// Set the number of open signaling connections.
///
/// Metric: `bs_connections_active`
/// Labels: none
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("bs_connections_active").set(count as f64);
}

/// Set the coordinator mailbox depth.
///
/// Metric: `bs_coordinator_mailbox_depth`
/// Labels: none
pub fn set_coordinator_mailbox_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("bs_coordinator_mailbox_depth").set(depth as f64);
}

// ============================================================================
// Signaling Counters
// ============================================================================

/// Record an inbound signaling message.
///
/// Metric: `bs_signaling_messages_total`
/// Labels: `kind`
pub fn record_signaling_message(kind: &'static str) {
    counter!("bs_signaling_messages_total", "kind" => kind).increment(1);
}

/// Record a rejected request.
///
/// Metric: `bs_rejections_total`
/// Labels: `reason`
pub fn record_rejection(reason: &'static str) {
    counter!("bs_rejections_total", "reason" => reason).increment(1);
}

/// Record an outbound message dropped because the peer's queue was full
/// or closed.
///
/// Metric: `bs_outbound_dropped_total`
/// Labels: none
///
/// Non-zero values indicate slow or vanished peers.
pub fn record_outbound_dropped() {
    counter!("bs_outbound_dropped_total").increment(1);
}

// ============================================================================
// Latency Metrics (Histograms)
// ============================================================================

/// Record the time taken to negotiate a presenter or viewer.
///
/// Metric: `bs_negotiation_duration_seconds`
/// Labels: `role`, `status`
pub fn record_negotiation_duration(role: &'static str, status: &'static str, duration: Duration) {
    histogram!(
        "bs_negotiation_duration_seconds",
        "role" => role,
        "status" => status
    )
    .record(duration.as_secs_f64());
}

/// Record a media engine request round trip.
///
/// Metric: `bs_engine_request_duration_seconds`
/// Labels: `method` (create, invoke, subscribe, release)
pub fn record_engine_request(method: &'static str, duration: Duration) {
    histogram!("bs_engine_request_duration_seconds", "method" => method)
        .record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    // These run against the global no-op recorder; they cover the call paths
    // without asserting on recorded values.

    #[test]
    fn test_session_gauges() {
        set_presenter_active(true);
        set_presenter_active(false);
        set_viewers_active(0);
        set_viewers_active(250);
        set_connections_active(3);
        set_coordinator_mailbox_depth(12);
    }

    #[test]
    fn test_signaling_counters() {
        record_signaling_message("presenter");
        record_signaling_message("unknown");
        record_rejection("presenter_active");
        record_rejection("no_presenter");
        record_outbound_dropped();
    }

    #[test]
    fn test_latency_histograms() {
        record_negotiation_duration("presenter", "accepted", Duration::from_millis(120));
        record_negotiation_duration("viewer", "rejected", Duration::from_millis(3));
        record_engine_request("invoke", Duration::from_micros(800));
    }
}
