//! Simulated Market Feed Adapter
//!
//! An in-process feed that produces one snapshot per tick by random-walking
//! a fixed table of instruments. It stands in for a real exchange-backed
//! feed behind the same two contracts the core consumes: `FeedEvent`s on a
//! channel, and the [`FeedStatusSource`] status query.
//!
//! The producer runs as its own task (`run`) until the shutdown token is
//! cancelled, updating shared [`FeedTelemetry`] on every tick so status
//! queries and the health endpoint observe live state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FeedEvent, FeedStatusSource};
use crate::domain::feed::{FeedStatus, InstrumentQuote, MarketSnapshot};
use crate::infrastructure::config::FeedSettings;

/// Feed label reported in snapshots and status replies.
const SOURCE_LABEL: &str = "simulated";

/// Tracked instruments: (symbol, name, base price in cents).
const INSTRUMENTS: &[(&str, &str, i64)] = &[
    ("BTC", "Bitcoin", 43_250_17),
    ("ETH", "Ethereum", 2_315_40),
    ("BNB", "BNB", 312_75),
    ("XRP", "XRP", 62),
    ("ADA", "Cardano", 59),
    ("DOGE", "Dogecoin", 16),
    ("SOL", "Solana", 98_43),
    ("DOT", "Polkadot", 7_81),
    ("MATIC", "Polygon", 89),
    ("LTC", "Litecoin", 72_10),
];

/// Largest per-tick price move, in basis points.
const MAX_DRIFT_BPS: i64 = 50;

// =============================================================================
// Feed Telemetry
// =============================================================================

/// Live feed statistics shared with status queries and the health endpoint.
#[derive(Debug, Default)]
pub struct FeedTelemetry {
    running: AtomicBool,
    ticks: AtomicU64,
    last_update: RwLock<Option<DateTime<Utc>>>,
}

impl FeedTelemetry {
    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        *self.last_update.write() = Some(Utc::now());
    }

    /// Whether the producer loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Total snapshots produced since startup.
    #[must_use]
    pub fn ticks_produced(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Time of the last successful tick.
    #[must_use]
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.read()
    }
}

// =============================================================================
// Status Handle
// =============================================================================

/// [`FeedStatusSource`] implementation backed by the feed's live telemetry.
#[derive(Debug)]
pub struct FeedStatusHandle {
    telemetry: Arc<FeedTelemetry>,
    instruments: usize,
    update_interval_secs: u64,
}

#[async_trait]
impl FeedStatusSource for FeedStatusHandle {
    async fn status(&self) -> FeedStatus {
        FeedStatus {
            running: self.telemetry.is_running(),
            source: SOURCE_LABEL.to_string(),
            last_update: self.telemetry.last_update(),
            instruments_tracked: self.instruments,
            ticks_produced: self.telemetry.ticks_produced(),
            update_interval_secs: self.update_interval_secs,
        }
    }
}

// =============================================================================
// Simulated Feed
// =============================================================================

/// Interval-driven snapshot producer over the fixed instrument table.
pub struct SimulatedFeed {
    settings: FeedSettings,
    events: mpsc::Sender<FeedEvent>,
    shutdown: CancellationToken,
    telemetry: Arc<FeedTelemetry>,
}

impl SimulatedFeed {
    /// Create a feed that pushes events into `events` until `shutdown`.
    #[must_use]
    pub fn new(
        settings: FeedSettings,
        events: mpsc::Sender<FeedEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            settings,
            events,
            shutdown,
            telemetry: Arc::new(FeedTelemetry::default()),
        }
    }

    /// Shared telemetry, for the health endpoint.
    #[must_use]
    pub fn telemetry(&self) -> Arc<FeedTelemetry> {
        Arc::clone(&self.telemetry)
    }

    /// Status query handle answering the `FeedStatusSource` port.
    #[must_use]
    pub fn status_source(&self) -> Arc<FeedStatusHandle> {
        Arc::new(FeedStatusHandle {
            telemetry: Arc::clone(&self.telemetry),
            instruments: self.tracked_count(),
            update_interval_secs: self.settings.tick_interval.as_secs(),
        })
    }

    /// Run the producer loop until the shutdown token is cancelled or the
    /// event channel closes.
    pub async fn run(&self) {
        self.telemetry.set_running(true);
        tracing::info!(
            instruments = self.tracked_count(),
            interval_secs = self.settings.tick_interval.as_secs(),
            "Simulated feed started"
        );

        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut prices: Vec<i64> = INSTRUMENTS
            .iter()
            .take(self.tracked_count())
            .map(|(_, _, base)| *base)
            .collect();
        let mut sequence = 0u64;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    sequence += 1;
                    let snapshot = self.generate_snapshot(sequence, &mut prices);
                    self.telemetry.record_tick();
                    if self.events.send(FeedEvent::Snapshot(snapshot)).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.telemetry.set_running(false);
        tracing::info!("Simulated feed stopped");
    }

    fn tracked_count(&self) -> usize {
        self.settings.instruments.min(INSTRUMENTS.len())
    }

    fn generate_snapshot(&self, sequence: u64, prices: &mut [i64]) -> MarketSnapshot {
        let mut rng = rand::rng();

        let mut instruments: Vec<InstrumentQuote> = INSTRUMENTS
            .iter()
            .take(prices.len())
            .zip(prices.iter_mut())
            .map(|((symbol, name, base), price)| {
                let drift_bps = rng.random_range(-MAX_DRIFT_BPS..=MAX_DRIFT_BPS);
                *price = (*price + *price * drift_bps / 10_000).max(1);

                let change_bps = (*price - base) * 10_000 / base;
                let volume = rng.random_range(1_000_000..100_000_000_i64);

                InstrumentQuote {
                    name: (*name).to_string(),
                    symbol: (*symbol).to_string(),
                    price_usd: Decimal::new(*price, 2),
                    change_24h_pct: Decimal::new(change_bps, 2),
                    volume_usd: Decimal::from(volume),
                    rank: 0,
                }
            })
            .collect();

        // Rank by traded volume, the way the upstream APIs order markets.
        instruments.sort_by(|a, b| b.volume_usd.cmp(&a.volume_usd));
        for (index, quote) in instruments.iter_mut().enumerate() {
            quote.rank = u32::try_from(index + 1).unwrap_or(u32::MAX);
        }

        MarketSnapshot {
            sequence,
            produced_at: Utc::now(),
            source: SOURCE_LABEL.to_string(),
            instruments,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use tokio_test::assert_ok;

    use super::*;

    fn fast_settings() -> FeedSettings {
        FeedSettings {
            tick_interval: Duration::from_millis(10),
            instruments: 5,
            events_capacity: 16,
        }
    }

    #[test]
    fn instrument_table_symbols_are_unique() {
        let symbols: HashSet<&str> = INSTRUMENTS.iter().map(|(s, _, _)| *s).collect();
        assert_eq!(symbols.len(), INSTRUMENTS.len());
    }

    #[test]
    fn snapshot_shape_and_ranks() {
        let (tx, _rx) = mpsc::channel(1);
        let feed = SimulatedFeed::new(fast_settings(), tx, CancellationToken::new());

        let mut prices: Vec<i64> = INSTRUMENTS.iter().take(5).map(|(_, _, p)| *p).collect();
        let snapshot = feed.generate_snapshot(9, &mut prices);

        assert_eq!(snapshot.sequence, 9);
        assert_eq!(snapshot.source, "simulated");
        assert_eq!(snapshot.instruments.len(), 5);

        let ranks: Vec<u32> = snapshot.instruments.iter().map(|q| q.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
        for pair in snapshot.instruments.windows(2) {
            assert!(pair[0].volume_usd >= pair[1].volume_usd);
        }
        for quote in &snapshot.instruments {
            assert!(quote.price_usd > Decimal::ZERO);
        }
    }

    #[test]
    fn instrument_count_is_clamped_to_table_size() {
        let (tx, _rx) = mpsc::channel(1);
        let settings = FeedSettings {
            instruments: 500,
            ..fast_settings()
        };
        let feed = SimulatedFeed::new(settings, tx, CancellationToken::new());
        assert_eq!(feed.tracked_count(), INSTRUMENTS.len());
    }

    #[tokio::test]
    async fn run_produces_ordered_snapshots_until_cancelled() {
        let (tx, mut rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let feed = Arc::new(SimulatedFeed::new(fast_settings(), tx, shutdown.clone()));
        let status = feed.status_source();

        let producer = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.run().await })
        };

        let mut sequences = Vec::new();
        for _ in 0..3 {
            match rx.recv().await.unwrap() {
                FeedEvent::Snapshot(snapshot) => sequences.push(snapshot.sequence),
                FeedEvent::Error(e) => panic!("unexpected feed error: {e}"),
            }
        }
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(status.status().await.running);

        shutdown.cancel();
        drop(rx);
        assert_ok!(producer.await);

        let status = status.status().await;
        assert!(!status.running);
        assert!(status.ticks_produced >= 3);
        assert!(status.last_update.is_some());
        assert_eq!(status.source, "simulated");
        assert_eq!(status.instruments_tracked, 5);
    }
}
