//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, and Prometheus
//! metrics. Used by container orchestrators, load balancers, and monitoring
//! systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (ready once a snapshot exists)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::FeedStatusSource;
use crate::domain::feed::{FeedStatus, SnapshotCell};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::registry::ConnectionRegistry;

/// A feed is considered stalled after missing this many intervals.
const STALL_INTERVALS: i64 = 3;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Hub version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Feed status at call time.
    pub feed: FeedStatus,
    /// Active subscriber count.
    pub clients: ClientStatus,
    /// Sequence of the most recent snapshot, if any.
    pub latest_sequence: Option<u64>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed running and ticking on schedule.
    Healthy,
    /// Feed running but not ticking on schedule yet.
    Degraded,
    /// Feed stopped.
    Unhealthy,
}

/// Active subscriber information.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    /// Total registered subscriber connections.
    pub total: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    status: Arc<dyn FeedStatusSource>,
    registry: Arc<ConnectionRegistry>,
    cell: Arc<SnapshotCell>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        status: Arc<dyn FeedStatusSource>,
        registry: Arc<ConnectionRegistry>,
        cell: Arc<SnapshotCell>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            status,
            registry,
            cell,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state).await;
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    // Ready once at least one snapshot exists for initial_data sends.
    if state.cell.sequence().is_some() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feed = state.status.status().await;
    let status = determine_health_status(&feed, Utc::now());

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        clients: ClientStatus {
            total: state.registry.len(),
        },
        latest_sequence: state.cell.sequence(),
    }
}

fn determine_health_status(feed: &FeedStatus, now: DateTime<Utc>) -> HealthStatus {
    if !feed.running {
        return HealthStatus::Unhealthy;
    }
    feed.last_update.map_or(HealthStatus::Degraded, |at| {
        let stall_after = chrono::Duration::seconds(
            i64::try_from(feed.update_interval_secs)
                .unwrap_or(i64::MAX)
                .saturating_mul(STALL_INTERVALS),
        );
        if now.signed_duration_since(at) > stall_after {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    })
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
