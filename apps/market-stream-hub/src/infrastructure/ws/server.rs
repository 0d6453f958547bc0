//! WebSocket Server Loop
//!
//! Owns the listening socket and the accept loop. Each accepted connection
//! is upgraded and run as an independent session task; the loop itself
//! never waits on any single subscriber.
//!
//! On shutdown the loop stops accepting new connections and returns; live
//! sessions observe the same cancellation token and close best-effort.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::FeedStatusSource;
use crate::domain::feed::SnapshotCell;
use crate::infrastructure::config::{HubConfig, ListenSettings};
use crate::infrastructure::registry::ConnectionRegistry;

use super::session::{self, SessionContext};

/// The subscriber-facing WebSocket server.
///
/// Explicitly constructed and explicitly owned: everything the sessions
/// share is injected here, and whichever entry point starts the process
/// calls [`StreamHubServer::run`].
pub struct StreamHubServer {
    listen: ListenSettings,
    sessions: Arc<SessionContext>,
    shutdown: CancellationToken,
}

impl StreamHubServer {
    /// Create a server over the given shared components.
    #[must_use]
    pub fn new(
        config: &HubConfig,
        registry: Arc<ConnectionRegistry>,
        cell: Arc<SnapshotCell>,
        status: Arc<dyn FeedStatusSource>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            listen: config.listen.clone(),
            sessions: Arc::new(SessionContext {
                registry,
                cell,
                status,
                settings: config.session.clone(),
            }),
            shutdown,
        }
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the listener cannot be bound; this
    /// is the one fatal startup error and the process must not start
    /// without it.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.listen.ws_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;

        tracing::info!(addr = %addr, "WebSocket fan-out listening");
        self.run_with_listener(listener).await;
        Ok(())
    }

    /// Serve on an already-bound listener until shutdown.
    ///
    /// Split out from [`StreamHubServer::run`] so tests can bind an
    /// ephemeral port first.
    pub async fn run_with_listener(self, listener: TcpListener) {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let ctx = Arc::clone(&self.sessions);
                        let shutdown = self.shutdown.clone();
                        tokio::spawn(async move {
                            session::run(ctx, stream, peer, shutdown).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                    }
                }
            }
        }
        tracing::info!("Stopped accepting subscriber connections");
    }
}

/// WebSocket server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listening socket.
    #[error("failed to bind WebSocket listener on {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::domain::feed::FeedStatus;

    struct StubStatusSource;

    #[async_trait]
    impl FeedStatusSource for StubStatusSource {
        async fn status(&self) -> FeedStatus {
            FeedStatus {
                running: true,
                source: "stub".to_string(),
                last_update: Some(Utc::now()),
                instruments_tracked: 0,
                ticks_produced: 0,
                update_interval_secs: 5,
            }
        }
    }

    #[tokio::test]
    async fn bind_failure_is_fatal() {
        // Hold the port so the server cannot bind it.
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = occupied.local_addr().unwrap();

        let config = HubConfig {
            listen: ListenSettings {
                host: addr.ip().to_string(),
                port: addr.port(),
                ..Default::default()
            },
            ..Default::default()
        };

        let server = StreamHubServer::new(
            &config,
            Arc::new(ConnectionRegistry::new()),
            Arc::new(SnapshotCell::new()),
            Arc::new(StubStatusSource),
            CancellationToken::new(),
        );

        let result = server.run().await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn shutdown_stops_the_accept_loop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();

        let server = StreamHubServer::new(
            &HubConfig::default(),
            Arc::new(ConnectionRegistry::new()),
            Arc::new(SnapshotCell::new()),
            Arc::new(StubStatusSource),
            shutdown.clone(),
        );

        let handle = tokio::spawn(server.run_with_listener(listener));
        shutdown.cancel();
        handle.await.unwrap();
    }
}
