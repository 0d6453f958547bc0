//! Market Snapshot Types
//!
//! Domain types for the periodic market-data payload and the feed status
//! report, plus the shared latest-snapshot cell read by newly joined
//! subscribers.
//!
//! # Design
//!
//! A `MarketSnapshot` is immutable once produced: it is consumed by exactly
//! one broadcast cycle, serialized once, and the serialized form is reused
//! for every recipient in that cycle. The `SnapshotCell` holds the most
//! recently produced snapshot so a subscriber joining between ticks does not
//! wait a full tick to see current state.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Snapshot Types
// =============================================================================

/// One tracked instrument's normalized quote within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentQuote {
    /// Display name (e.g. "Bitcoin").
    pub name: String,
    /// Ticker symbol (e.g. "BTC").
    pub symbol: String,
    /// Last price in USD.
    pub price_usd: Decimal,
    /// 24h price change, percent.
    pub change_24h_pct: Decimal,
    /// 24h traded volume in USD.
    pub volume_usd: Decimal,
    /// Rank within the snapshot (1-based, by volume).
    pub rank: u32,
}

/// A single market-data payload produced by the feed at one point in time.
///
/// Immutable once produced. `sequence` is strictly monotonic across ticks of
/// one feed, so subscribers can verify production order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Monotonic production sequence number (1-based).
    pub sequence: u64,
    /// Production time. Distinct from the envelope send-time timestamp.
    pub produced_at: DateTime<Utc>,
    /// Label of the feed that produced this snapshot.
    pub source: String,
    /// Quotes for every tracked instrument.
    pub instruments: Vec<InstrumentQuote>,
}

/// Feed health and statistics, returned for `status_request` queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStatus {
    /// Whether the feed's producer loop is running.
    pub running: bool,
    /// Label of the feed.
    pub source: String,
    /// Time of the last successful tick, if any.
    pub last_update: Option<DateTime<Utc>>,
    /// Number of instruments tracked per snapshot.
    pub instruments_tracked: usize,
    /// Total snapshots produced since startup.
    pub ticks_produced: u64,
    /// Configured production interval in seconds.
    pub update_interval_secs: u64,
}

// =============================================================================
// Latest Snapshot Cell
// =============================================================================

/// Shared cell holding the most recently produced snapshot.
///
/// Written once per feed tick, read on every new subscriber connection for
/// the `initial_data` send. Reads and writes are mutually exclusive; readers
/// receive an independent clone so later ticks never mutate data already
/// handed out.
#[derive(Debug, Default)]
pub struct SnapshotCell {
    inner: RwLock<Option<MarketSnapshot>>,
}

impl SnapshotCell {
    /// Create an empty cell.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Replace the cell's contents with a newer snapshot.
    pub fn publish(&self, snapshot: MarketSnapshot) {
        *self.inner.write() = Some(snapshot);
    }

    /// Get a clone of the most recent snapshot, if one exists yet.
    #[must_use]
    pub fn latest(&self) -> Option<MarketSnapshot> {
        self.inner.read().clone()
    }

    /// Sequence number of the most recent snapshot, if any.
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.inner.read().as_ref().map(|s| s.sequence)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_snapshot(sequence: u64) -> MarketSnapshot {
        MarketSnapshot {
            sequence,
            produced_at: Utc::now(),
            source: "test".to_string(),
            instruments: vec![InstrumentQuote {
                name: "Bitcoin".to_string(),
                symbol: "BTC".to_string(),
                price_usd: Decimal::new(43_250_17, 2),
                change_24h_pct: Decimal::new(-125, 2),
                volume_usd: Decimal::new(12_000_000, 0),
                rank: 1,
            }],
        }
    }

    #[test]
    fn cell_starts_empty() {
        let cell = SnapshotCell::new();
        assert!(cell.latest().is_none());
        assert!(cell.sequence().is_none());
    }

    #[test]
    fn publish_replaces_previous_snapshot() {
        let cell = SnapshotCell::new();
        cell.publish(make_snapshot(1));
        cell.publish(make_snapshot(2));

        let latest = cell.latest().unwrap();
        assert_eq!(latest.sequence, 2);
        assert_eq!(cell.sequence(), Some(2));
    }

    #[test]
    fn latest_returns_independent_clone() {
        let cell = SnapshotCell::new();
        cell.publish(make_snapshot(1));

        let held = cell.latest().unwrap();
        cell.publish(make_snapshot(2));

        // The clone handed out earlier is unaffected by the later publish.
        assert_eq!(held.sequence, 1);
        assert_eq!(cell.sequence(), Some(2));
    }

    #[test]
    fn snapshot_serializes_decimal_prices_as_strings() {
        let snapshot = make_snapshot(7);
        let value = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(value["sequence"], 7);
        assert_eq!(value["source"], "test");
        assert_eq!(value["instruments"][0]["symbol"], "BTC");
        assert_eq!(value["instruments"][0]["price_usd"], "43250.17");
        assert_eq!(value["instruments"][0]["rank"], 1);
    }

    #[test]
    fn feed_status_roundtrips() {
        let status = FeedStatus {
            running: true,
            source: "simulated".to_string(),
            last_update: Some(Utc::now()),
            instruments_tracked: 10,
            ticks_produced: 42,
            update_interval_secs: 5,
        };

        let json = serde_json::to_string(&status).unwrap();
        let back: FeedStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }
}
