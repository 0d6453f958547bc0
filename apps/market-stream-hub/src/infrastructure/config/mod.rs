//! Configuration Module
//!
//! Configuration loading for the fan-out hub.

mod settings;

pub use settings::{
    ConfigError, FeedSettings, HubConfig, ListenSettings, SessionSettings,
};
