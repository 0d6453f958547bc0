//! Market Stream Hub Binary
//!
//! Starts the snapshot fan-out service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream-hub
//! ```
//!
//! # Environment Variables
//!
//! All optional:
//! - `STREAM_HUB_HOST`: Interface to bind (default: 0.0.0.0)
//! - `STREAM_HUB_PORT`: WebSocket port (default: 8765)
//! - `STREAM_HUB_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `STREAM_HUB_TICK_INTERVAL_SECS`: Feed production interval (default: 5)
//! - `STREAM_HUB_INSTRUMENTS`: Instruments per snapshot (default: 10)
//! - `STREAM_HUB_OUTBOUND_CAPACITY`: Per-subscriber frame buffer (default: 256)
//! - `STREAM_HUB_STATUS_TIMEOUT_MS`: Bound on feed status queries (default: 2000)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-stream-hub)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use market_stream_hub::infrastructure::telemetry;
use market_stream_hub::{
    ConnectionRegistry, FeedEvent, HealthServer, HealthServerState, HubConfig, SimulatedFeed,
    SnapshotBroadcaster, SnapshotCell, StreamHubServer, init_metrics, pump_feed_events,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Stream Hub");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = HubConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Shared fan-out state
    let registry = Arc::new(ConnectionRegistry::new());
    let cell = Arc::new(SnapshotCell::new());
    let broadcaster = Arc::new(SnapshotBroadcaster::new(Arc::clone(&registry)));

    // Feed adapter and its event channel
    let (feed_tx, feed_rx) = mpsc::channel::<FeedEvent>(config.feed.events_capacity);
    let feed = Arc::new(SimulatedFeed::new(
        config.feed.clone(),
        feed_tx,
        shutdown_token.clone(),
    ));
    let status_source = feed.status_source();

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        status_source.clone(),
        Arc::clone(&registry),
        Arc::clone(&cell),
    ));
    let health_server = HealthServer::new(
        config.listen.health_port,
        health_state,
        shutdown_token.clone(),
    );

    // WebSocket fan-out server
    let ws_server = StreamHubServer::new(
        &config,
        Arc::clone(&registry),
        Arc::clone(&cell),
        status_source,
        shutdown_token.clone(),
    );

    // Spawn the feed producer
    let feed_task = Arc::clone(&feed);
    tokio::spawn(async move {
        feed_task.run().await;
    });

    // Spawn the feed-tick → broadcast cycle
    tokio::spawn(pump_feed_events(
        feed_rx,
        Arc::clone(&cell),
        Arc::clone(&broadcaster),
    ));

    // Spawn the health server
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Bind failure here is fatal: the process must not start half-up.
    let server_shutdown = shutdown_token.clone();
    let server_task = tokio::spawn(async move {
        let result = ws_server.run().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "WebSocket server error");
            server_shutdown.cancel();
        }
        result
    });

    tracing::info!("Market stream hub ready");

    await_shutdown(shutdown_token).await;

    server_task.await??;

    tracing::info!("Market stream hub stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &HubConfig) {
    tracing::info!(
        ws_addr = %config.listen.ws_addr(),
        health_port = config.listen.health_port,
        tick_interval_secs = config.feed.tick_interval.as_secs(),
        instruments = config.feed.instruments,
        outbound_capacity = config.session.outbound_capacity,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::info!("Internal shutdown requested");
        }
    }

    shutdown_token.cancel();
}
