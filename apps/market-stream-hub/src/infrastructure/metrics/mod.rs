//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Broadcast**: cycles, frames queued, evictions, cycle duration
//! - **Connections**: active subscriber count, disconnects by reason
//! - **Protocol**: inbound control messages by kind
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Broadcast counters
    describe_counter!(
        "stream_hub_broadcasts_total",
        "Total broadcast cycles executed"
    );
    describe_counter!(
        "stream_hub_frames_sent_total",
        "Total snapshot frames queued to subscribers"
    );
    describe_counter!(
        "stream_hub_evictions_total",
        "Total subscribers evicted after a failed delivery"
    );

    // Connection gauges and counters
    describe_gauge!(
        "stream_hub_active_connections",
        "Number of registered subscriber connections"
    );
    describe_counter!(
        "stream_hub_disconnects_total",
        "Total subscriber disconnects by reason"
    );

    // Protocol counters
    describe_counter!(
        "stream_hub_inbound_messages_total",
        "Total inbound control messages by kind"
    );

    // Latency histograms
    describe_histogram!(
        "stream_hub_broadcast_duration_seconds",
        "Time to serialize and queue one snapshot to all subscribers"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for inbound control message kinds.
#[derive(Debug, Clone, Copy)]
pub enum InboundKind {
    /// Liveness probe.
    Ping,
    /// Feed status query.
    StatusRequest,
    /// Well-formed envelope with an unrecognized kind.
    Unknown,
    /// Input that did not parse as an envelope.
    Malformed,
}

impl InboundKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::StatusRequest => "status_request",
            Self::Unknown => "unknown",
            Self::Malformed => "malformed",
        }
    }
}

/// Metric labels for subscriber disconnect reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The remote end closed the connection.
    ClientClose,
    /// The transport failed while reading.
    ReadError,
    /// The session was cancelled (eviction, write failure, or shutdown).
    Cancelled,
}

impl DisconnectReason {
    /// Label for logging and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientClose => "client_close",
            Self::ReadError => "read_error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Record one broadcast cycle.
pub fn record_broadcast(delivered: usize, evicted: usize, duration: Duration) {
    counter!("stream_hub_broadcasts_total").increment(1);
    counter!("stream_hub_frames_sent_total").increment(delivered as u64);
    counter!("stream_hub_evictions_total").increment(evicted as u64);
    histogram!("stream_hub_broadcast_duration_seconds").record(duration.as_secs_f64());
}

/// Update the active subscriber connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_connections(count: usize) {
    gauge!("stream_hub_active_connections").set(count as f64);
}

/// Record one subscriber disconnect.
pub fn record_disconnect(reason: DisconnectReason) {
    counter!(
        "stream_hub_disconnects_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record one inbound control message.
pub fn record_inbound_message(kind: InboundKind) {
    counter!(
        "stream_hub_inbound_messages_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_kind_as_str() {
        assert_eq!(InboundKind::Ping.as_str(), "ping");
        assert_eq!(InboundKind::StatusRequest.as_str(), "status_request");
        assert_eq!(InboundKind::Unknown.as_str(), "unknown");
        assert_eq!(InboundKind::Malformed.as_str(), "malformed");
    }

    #[test]
    fn disconnect_reason_as_str() {
        assert_eq!(DisconnectReason::ClientClose.as_str(), "client_close");
        assert_eq!(DisconnectReason::ReadError.as_str(), "read_error");
        assert_eq!(DisconnectReason::Cancelled.as_str(), "cancelled");
    }
}
