#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Market Stream Hub - Snapshot Fan-Out Service
//!
//! A WebSocket service that accepts many concurrent viewer connections and
//! pushes periodic market-data snapshots to all of them with low latency,
//! answering small control-plane requests (liveness ping, feed status) over
//! the same channel. Best-effort, in-memory, single-process.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core fan-out types
//!   - `envelope`: the discriminated wire message format
//!   - `feed`: market snapshot, feed status, latest-snapshot cell
//!
//! - **Application**: Port definitions
//!   - `ports`: feed event and status contracts the core consumes
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `registry`: synchronized set of live subscriber connections
//!   - `broadcast`: serialize-once fan-out with per-connection isolation
//!   - `ws`: WebSocket server loop and per-connection sessions
//!   - `feed`: simulated market feed adapter
//!   - `config`, `health`, `metrics`, `telemetry`: operational plumbing
//!
//! # Data Flow
//!
//! ```text
//! Feed Adapter ──► Feed Events ──► Broadcast ──┬──► Subscriber 1
//!                       │          Engine      ├──► Subscriber 2
//!                       ▼             ▲        └──► Subscriber N
//!                 SnapshotCell   Connection
//!                 (initial_data)  Registry
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core fan-out types with no transport dependencies.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::envelope::{ClientEnvelope, ServerEnvelope};
pub use domain::feed::{FeedStatus, InstrumentQuote, MarketSnapshot, SnapshotCell};

// Application ports
pub use application::ports::{FeedEvent, FeedStatusSource};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, FeedSettings, HubConfig, ListenSettings, SessionSettings,
};

// Registry and broadcast (for integration tests)
pub use infrastructure::broadcast::{BroadcastOutcome, SnapshotBroadcaster, pump_feed_events};
pub use infrastructure::registry::{
    ConnectionHandle, ConnectionId, ConnectionRegistry, DeliveryFailure,
};

// WebSocket server (for integration tests)
pub use infrastructure::ws::{ServerError, SessionContext, StreamHubServer};

// Feed adapter
pub use infrastructure::feed::{FeedStatusHandle, FeedTelemetry, SimulatedFeed};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::{DisconnectReason, InboundKind, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
