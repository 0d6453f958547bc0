//! WebSocket Fan-Out Server
//!
//! The subscriber-facing transport: a listener that upgrades incoming TCP
//! connections to WebSockets and runs one session per connection.
//!
//! # Architecture
//!
//! - `server`: owns the listening socket, accepts and upgrades connections,
//!   and spawns each session as an independent task
//! - `session`: one subscriber's receive path and control-message protocol

pub mod server;
pub mod session;

pub use server::{ServerError, StreamHubServer};
pub use session::SessionContext;
