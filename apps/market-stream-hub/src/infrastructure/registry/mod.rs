//! Connection Registry
//!
//! Tracks the set of currently-open subscriber connections. The registry is
//! the single synchronization point between the broadcast cycle and each
//! connection's own receive path: both evict through the idempotent
//! [`ConnectionRegistry::remove`], so a broadcast-write failure racing a
//! read error on the same connection is safe.
//!
//! # Invariant
//!
//! A connection is present in the registry iff its transport is open and has
//! not yet failed a write. Removal cancels the connection's token, which
//! shuts down its session tasks and releases the transport.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a subscriber connection.
pub type ConnectionId = u64;

/// Why delivering a frame to a connection failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The connection's outbound channel is closed (session gone).
    Closed,
    /// The connection's outbound channel is full (subscriber too slow).
    Backpressure,
}

impl DeliveryFailure {
    /// Label for logging and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Backpressure => "backpressure",
        }
    }
}

// =============================================================================
// Connection Handle
// =============================================================================

/// Handle to one live subscriber connection.
///
/// The handle does not own the transport; the session tasks do. It carries
/// the connection's outbound frame channel (written by the broadcast engine
/// and by the session's own replies) and the cancellation token that tears
/// the session down on eviction.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    remote_addr: SocketAddr,
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
    connected_at: DateTime<Utc>,
}

impl ConnectionHandle {
    /// Create a handle for a freshly upgraded connection.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        outbound: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            remote_addr,
            outbound,
            cancel,
            connected_at: Utc::now(),
        }
    }

    /// The connection's identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote peer address (diagnostic only).
    #[must_use]
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// When the connection was registered.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queue one pre-serialized frame without blocking.
    ///
    /// A full channel is a failed write: a subscriber that cannot keep up
    /// with the broadcast rate is evicted, not retried.
    ///
    /// # Errors
    ///
    /// Returns the [`DeliveryFailure`] when the frame could not be queued.
    pub fn try_deliver(&self, frame: String) -> Result<(), DeliveryFailure> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed,
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::Backpressure,
        })
    }

    /// Cancel the connection's session tasks. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Synchronized set of live subscriber connections.
///
/// All mutations and the point-in-time snapshot read go through one lock;
/// the mutation rate (connects, disconnects, evictions) is low, so no finer
/// granularity is needed.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionHandle>>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next connection identifier.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Insert a connection. Idempotent: re-adding an already present
    /// connection leaves the original registration in place.
    pub fn add(&self, connection: Arc<ConnectionHandle>) {
        self.connections
            .write()
            .entry(connection.id())
            .or_insert(connection);
    }

    /// Remove a connection and cancel its session. Idempotent: removing an
    /// absent connection is a no-op, so a broadcast-write failure and a read
    /// error may race on the same connection without double-release.
    ///
    /// Returns whether the connection was present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        if let Some(connection) = self.connections.write().remove(&id) {
            connection.shutdown();
            true
        } else {
            false
        }
    }

    /// Point-in-time copy of the live set for broadcast iteration.
    /// Mutations after this call do not affect the returned copy.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.read().values().cloned().collect()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
