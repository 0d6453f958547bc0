//! Broadcast Engine
//!
//! Delivers each feed snapshot to every registered subscriber connection.
//!
//! # Architecture
//!
//! Each cycle is two explicit passes over the registry: a point-in-time
//! snapshot of the live set is taken first, then delivery is attempted to
//! every connection in that copy, then all failed connections are evicted
//! in one batch. Connections added or removed mid-cycle are picked up from
//! the next cycle.
//!
//! The `market_update` envelope is serialized exactly once per cycle and the
//! serialized frame is reused for every recipient. When no subscribers are
//! registered the cycle returns before serializing anything.
//!
//! A failed delivery is fatal to that connection only: it is recorded,
//! evicted after the pass, and never aborts delivery to the remaining
//! connections. `broadcast` itself never fails.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::application::ports::FeedEvent;
use crate::domain::envelope::ServerEnvelope;
use crate::domain::feed::{MarketSnapshot, SnapshotCell};
use crate::infrastructure::metrics;
use crate::infrastructure::registry::{ConnectionId, ConnectionRegistry};

// =============================================================================
// Broadcast Outcome
// =============================================================================

/// Result of one broadcast cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Connections the frame was queued to.
    pub delivered: usize,
    /// Connections evicted after a failed delivery.
    pub evicted: usize,
}

// =============================================================================
// Broadcaster
// =============================================================================

/// Fans one serialized snapshot out to every registered connection.
#[derive(Debug)]
pub struct SnapshotBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl SnapshotBroadcaster {
    /// Create a broadcaster over the given registry.
    #[must_use]
    pub const fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver one snapshot to every connection registered at call start.
    ///
    /// Every connection present in the registry snapshot either receives a
    /// successful write or is evicted; none is left registered but
    /// unreachable.
    pub fn broadcast(&self, snapshot: &MarketSnapshot) -> BroadcastOutcome {
        let connections = self.registry.snapshot();
        if connections.is_empty() {
            // Nobody is watching; skip serialization entirely.
            return BroadcastOutcome::default();
        }

        let started = Instant::now();
        let envelope = ServerEnvelope::market_update(snapshot.clone());
        let frame = match envelope.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                // Serialize-once-then-send: nothing was sent, so no
                // subscriber ever observes a partial envelope.
                tracing::error!(
                    sequence = snapshot.sequence,
                    error = %e,
                    "Failed to serialize market update; cycle dropped"
                );
                return BroadcastOutcome::default();
            }
        };

        let mut delivered = 0;
        let mut failed: Vec<ConnectionId> = Vec::new();

        for connection in &connections {
            match connection.try_deliver(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(failure) => {
                    tracing::debug!(
                        connection = connection.id(),
                        peer = %connection.remote_addr(),
                        reason = failure.as_str(),
                        "Evicting subscriber after failed delivery"
                    );
                    failed.push(connection.id());
                }
            }
        }

        for id in &failed {
            self.registry.remove(*id);
        }

        let outcome = BroadcastOutcome {
            delivered,
            evicted: failed.len(),
        };
        metrics::record_broadcast(outcome.delivered, outcome.evicted, started.elapsed());
        metrics::set_active_connections(self.registry.len());
        outcome
    }
}

// =============================================================================
// Feed Event Pump
// =============================================================================

/// Drain feed events: publish each snapshot to the latest-snapshot cell,
/// then broadcast it. Runs until the feed side of the channel closes.
///
/// A feed error skips the tick; the previously published snapshot stays
/// authoritative for new joiners until the next successful tick.
pub async fn pump_feed_events(
    mut events: mpsc::Receiver<FeedEvent>,
    cell: Arc<SnapshotCell>,
    broadcaster: Arc<SnapshotBroadcaster>,
) {
    while let Some(event) = events.recv().await {
        match event {
            FeedEvent::Snapshot(snapshot) => {
                cell.publish(snapshot.clone());
                let outcome = broadcaster.broadcast(&snapshot);
                tracing::debug!(
                    sequence = snapshot.sequence,
                    delivered = outcome.delivered,
                    evicted = outcome.evicted,
                    "Broadcast cycle complete"
                );
            }
            FeedEvent::Error(message) => {
                tracing::warn!(error = %message, "Feed tick skipped");
            }
        }
    }
    tracing::info!("Feed event channel closed; broadcast loop stopped");
}

// =============================================================================
// Tests
// =============================================================================
