//! Wire Envelope Types
//!
//! The self-describing message format spoken over subscriber connections.
//! Every message is one JSON object discriminated by its `type` field.
//!
//! # Outbound
//!
//! `market_update`, `initial_data`, `pong`, and `status`. All outbound
//! envelopes carry a `timestamp` taken at send time (not at snapshot
//! production time) so recipients can measure delivery latency. `pong`
//! carries no payload.
//!
//! # Inbound
//!
//! `ping` and `status_request`. Unrecognized `type` values parse to
//! [`ClientEnvelope::Unknown`] so new client message kinds are not errors;
//! anything that is not a well-formed envelope fails to parse and is
//! ignored by the session layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::feed::{FeedStatus, MarketSnapshot};

// =============================================================================
// Outbound Envelopes
// =============================================================================

/// A message sent from the hub to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Periodic snapshot delivered to every live subscriber.
    MarketUpdate {
        /// Send time, UTC.
        timestamp: DateTime<Utc>,
        /// The snapshot payload.
        data: MarketSnapshot,
    },
    /// The latest known snapshot, sent once when a subscriber joins.
    InitialData {
        /// Send time, UTC.
        timestamp: DateTime<Utc>,
        /// The snapshot payload.
        data: MarketSnapshot,
    },
    /// Reply to a subscriber `ping`. Carries no payload.
    Pong {
        /// Send time, UTC.
        timestamp: DateTime<Utc>,
    },
    /// Reply to a subscriber `status_request`.
    Status {
        /// Send time, UTC.
        timestamp: DateTime<Utc>,
        /// The feed's status at call time.
        data: FeedStatus,
    },
}

impl ServerEnvelope {
    /// Build a `market_update` envelope stamped with the current time.
    #[must_use]
    pub fn market_update(data: MarketSnapshot) -> Self {
        Self::MarketUpdate {
            timestamp: Utc::now(),
            data,
        }
    }

    /// Build an `initial_data` envelope stamped with the current time.
    #[must_use]
    pub fn initial_data(data: MarketSnapshot) -> Self {
        Self::InitialData {
            timestamp: Utc::now(),
            data,
        }
    }

    /// Build a `pong` envelope stamped with the current time.
    #[must_use]
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }

    /// Build a `status` envelope stamped with the current time.
    #[must_use]
    pub fn status(data: FeedStatus) -> Self {
        Self::Status {
            timestamp: Utc::now(),
            data,
        }
    }

    /// Serialize this envelope to its single-line JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` if serialization fails; the caller
    /// must drop the message rather than send a partial envelope.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Inbound Envelopes
// =============================================================================

/// A control message received from a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Liveness probe; answered with exactly one `pong`.
    Ping,
    /// Feed status query; answered with exactly one `status`.
    StatusRequest,
    /// Any well-formed envelope with an unrecognized `type`. Ignored,
    /// so unknown kinds stay forward compatible instead of erroring.
    #[serde(other)]
    Unknown,
}

impl ClientEnvelope {
    /// Parse one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` for anything that is not a well-formed
    /// envelope (non-JSON input, non-object JSON, or a missing `type` tag).
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use test_case::test_case;

    use super::*;
    use crate::domain::feed::InstrumentQuote;

    fn make_snapshot() -> MarketSnapshot {
        MarketSnapshot {
            sequence: 3,
            produced_at: Utc::now(),
            source: "test".to_string(),
            instruments: vec![InstrumentQuote {
                name: "Ethereum".to_string(),
                symbol: "ETH".to_string(),
                price_usd: Decimal::new(2_315_40, 2),
                change_24h_pct: Decimal::new(210, 2),
                volume_usd: Decimal::new(8_500_000, 0),
                rank: 2,
            }],
        }
    }

    #[test]
    fn market_update_wire_shape() {
        let envelope = ServerEnvelope::market_update(make_snapshot());
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], "market_update");
        assert!(value["timestamp"].is_string());
        assert_eq!(value["data"]["sequence"], 3);
        assert_eq!(value["data"]["instruments"][0]["symbol"], "ETH");
    }

    #[test]
    fn initial_data_wire_shape() {
        let envelope = ServerEnvelope::initial_data(make_snapshot());
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], "initial_data");
        assert_eq!(value["data"]["sequence"], 3);
    }

    #[test]
    fn pong_carries_no_data() {
        let envelope = ServerEnvelope::pong();
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], "pong");
        assert!(value["timestamp"].is_string());
        assert!(value.get("data").is_none());
    }

    #[test]
    fn status_wire_shape() {
        let envelope = ServerEnvelope::status(FeedStatus {
            running: true,
            source: "simulated".to_string(),
            last_update: None,
            instruments_tracked: 10,
            ticks_produced: 5,
            update_interval_secs: 5,
        });
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], "status");
        assert_eq!(value["data"]["running"], true);
        assert_eq!(value["data"]["ticks_produced"], 5);
    }

    #[test]
    fn timestamp_is_rfc3339_utc() {
        let envelope = ServerEnvelope::pong();
        let value = serde_json::to_value(&envelope).unwrap();
        let raw = value["timestamp"].as_str().unwrap();

        let parsed = DateTime::parse_from_rfc3339(raw).unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), 0);
    }

    #[test_case(r#"{"type":"ping"}"# => ClientEnvelope::Ping; "ping")]
    #[test_case(r#"{"type":"status_request"}"# => ClientEnvelope::StatusRequest; "status request")]
    #[test_case(r#"{"type":"subscribe"}"# => ClientEnvelope::Unknown; "unknown kind")]
    #[test_case(r#"{"type":"ping","extra":42}"# => ClientEnvelope::Ping; "extra fields tolerated")]
    fn parse_inbound(text: &str) -> ClientEnvelope {
        ClientEnvelope::parse(text).unwrap()
    }

    #[test_case("not json at all"; "non json")]
    #[test_case(r#"{"no_type":true}"#; "missing type tag")]
    #[test_case("[1,2,3]"; "non object")]
    #[test_case(""; "empty input")]
    fn parse_rejects_malformed(text: &str) {
        assert!(ClientEnvelope::parse(text).is_err());
    }
}
