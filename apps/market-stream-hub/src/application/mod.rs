//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the port interfaces that define how the fan-out core
//! interacts with the feed it consumes.

/// Port interfaces for the market feed.
pub mod ports;
