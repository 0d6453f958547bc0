//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations around the domain core:
//! the subscriber-facing transport, the feed adapter, and operational
//! plumbing.

/// Broadcast engine fanning snapshots out to registered connections.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Simulated market feed adapter.
pub mod feed;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Connection registry tracking live subscribers.
pub mod registry;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// WebSocket server and subscriber sessions.
pub mod ws;
