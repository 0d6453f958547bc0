//! Port Interfaces
//!
//! Contracts between the fan-out core and the feed it consumes, following
//! the Hexagonal Architecture pattern. The core needs exactly two things
//! from a feed:
//!
//! - snapshots delivered on the feed's own schedule, as [`FeedEvent`]s
//!   pushed into an `mpsc` channel by the adapter's producer task
//! - an on-demand status query, the [`FeedStatusSource`] port, answered
//!   for subscriber `status_request` messages

use async_trait::async_trait;

use crate::domain::feed::{FeedStatus, MarketSnapshot};

/// An event emitted by a feed adapter's producer task.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A new snapshot was produced; publish and broadcast it.
    Snapshot(MarketSnapshot),
    /// The feed failed to produce this tick. The tick is skipped and the
    /// previous snapshot stays authoritative for new joiners.
    Error(String),
}

/// On-demand feed status query.
///
/// Called from subscriber sessions when a `status_request` arrives. The
/// session bounds the call with a timeout, so implementations may block
/// briefly but replies are dropped if they take too long.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedStatusSource: Send + Sync {
    /// Report the feed's current status.
    async fn status(&self) -> FeedStatus;
}
