//! Subscriber Session
//!
//! One session per upgraded connection: a writer task draining the
//! connection's outbound frame channel into the socket, and a reader loop
//! handling the inbound control protocol.
//!
//! # Protocol
//!
//! On entry the latest known snapshot (if any) is queued as `initial_data`
//! before the connection is registered, so it is always the first frame a
//! subscriber observes. Afterwards: `ping` is answered with `pong`,
//! `status_request` with a `status` reply bounded by the configured timeout,
//! malformed input is logged and ignored, unknown kinds are ignored.
//!
//! # Teardown
//!
//! A close frame, read error, write error, eviction, or server shutdown all
//! converge on the same path: the connection is removed from the registry
//! (idempotent), its token is cancelled, and the transport is released.
//! Failures never propagate beyond the session.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tokio_util::sync::CancellationToken;

use crate::application::ports::FeedStatusSource;
use crate::domain::envelope::{ClientEnvelope, ServerEnvelope};
use crate::domain::feed::SnapshotCell;
use crate::infrastructure::config::SessionSettings;
use crate::infrastructure::metrics::{self, DisconnectReason, InboundKind};
use crate::infrastructure::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};

/// Dependencies shared by every subscriber session.
pub struct SessionContext {
    /// The live connection set.
    pub registry: Arc<ConnectionRegistry>,
    /// Most recent snapshot, for the `initial_data` send.
    pub cell: Arc<SnapshotCell>,
    /// Feed status port answering `status_request`.
    pub status: Arc<dyn FeedStatusSource>,
    /// Session tuning.
    pub settings: SessionSettings,
}

/// Upgrade one accepted TCP stream and run its session to completion.
pub async fn run(
    ctx: Arc<SessionContext>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: CancellationToken,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let id = ctx.registry.next_connection_id();
    let cancel = shutdown.child_token();
    let (outbound_tx, outbound_rx) = mpsc::channel(ctx.settings.outbound_capacity);
    let connection = Arc::new(ConnectionHandle::new(
        id,
        peer,
        outbound_tx.clone(),
        cancel.clone(),
    ));

    // Entry behavior: queue initial_data before registering, so no
    // market_update can ever precede it on this connection.
    if let Some(snapshot) = ctx.cell.latest() {
        send_envelope(&outbound_tx, &ServerEnvelope::initial_data(snapshot), id).await;
    }

    ctx.registry.add(connection);
    metrics::set_active_connections(ctx.registry.len());
    tracing::info!(
        connection = id,
        peer = %peer,
        total = ctx.registry.len(),
        "Subscriber connected"
    );

    let (ws_sink, ws_stream) = ws.split();
    let writer = tokio::spawn(write_loop(ws_sink, outbound_rx, cancel.clone()));

    let reason = read_loop(ws_stream, &ctx, &outbound_tx, &cancel, id).await;

    // Single synchronization point for teardown: racing removals (a
    // broadcast-write failure, this read path) are both no-ops past the
    // first. Removal cancels the token, which stops the writer.
    ctx.registry.remove(id);
    drop(outbound_tx);
    let _ = writer.await;

    metrics::set_active_connections(ctx.registry.len());
    metrics::record_disconnect(reason);
    tracing::info!(
        connection = id,
        peer = %peer,
        reason = reason.as_str(),
        total = ctx.registry.len(),
        "Subscriber disconnected"
    );
}

/// Drain the outbound channel into the socket until cancellation, channel
/// close, or a write failure.
async fn write_loop(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        tracing::debug!(error = %e, "Write failed; closing session");
                        cancel.cancel();
                        break;
                    }
                }
                None => break,
            },
            () = cancel.cancelled() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "closing".into(),
                    })))
                    .await;
                break;
            }
        }
    }
}

/// Consume inbound frames until the connection ends one way or another.
async fn read_loop(
    mut stream: SplitStream<WebSocketStream<TcpStream>>,
    ctx: &SessionContext,
    outbound: &mpsc::Sender<String>,
    cancel: &CancellationToken,
    id: ConnectionId,
) -> DisconnectReason {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return DisconnectReason::Cancelled,
            next = stream.next() => match next {
                None => return DisconnectReason::ClientClose,
                Some(Ok(message)) => {
                    if !handle_message(message, ctx, outbound, id).await {
                        return DisconnectReason::ClientClose;
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(connection = id, error = %e, "Read failed");
                    return DisconnectReason::ReadError;
                }
            }
        }
    }
}

/// Handle one inbound frame. Returns whether the session stays open.
async fn handle_message(
    message: Message,
    ctx: &SessionContext,
    outbound: &mpsc::Sender<String>,
    id: ConnectionId,
) -> bool {
    match message {
        Message::Text(text) => match ClientEnvelope::parse(text.as_str()) {
            Ok(ClientEnvelope::Ping) => {
                metrics::record_inbound_message(InboundKind::Ping);
                send_envelope(outbound, &ServerEnvelope::pong(), id).await;
            }
            Ok(ClientEnvelope::StatusRequest) => {
                metrics::record_inbound_message(InboundKind::StatusRequest);
                answer_status_request(ctx, outbound, id).await;
            }
            Ok(ClientEnvelope::Unknown) => {
                // Forward compatible: unrecognized kinds are not errors.
                metrics::record_inbound_message(InboundKind::Unknown);
                tracing::trace!(connection = id, "Ignoring unrecognized message kind");
            }
            Err(e) => {
                metrics::record_inbound_message(InboundKind::Malformed);
                tracing::debug!(connection = id, error = %e, "Ignoring malformed message");
            }
        },
        Message::Binary(_) => {
            metrics::record_inbound_message(InboundKind::Malformed);
            tracing::debug!(connection = id, "Ignoring binary frame");
        }
        // Transport-level keepalives; tungstenite answers pings itself.
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        Message::Close(_) => {
            tracing::debug!(connection = id, "Close frame received");
            return false;
        }
    }
    true
}

/// Query the feed status port, bounded so a slow source cannot stall the
/// session's reply path, and send the reply if it arrives in time.
async fn answer_status_request(
    ctx: &SessionContext,
    outbound: &mpsc::Sender<String>,
    id: ConnectionId,
) {
    match tokio::time::timeout(ctx.settings.status_timeout, ctx.status.status()).await {
        Ok(status) => send_envelope(outbound, &ServerEnvelope::status(status), id).await,
        Err(_) => {
            tracing::warn!(
                connection = id,
                timeout_ms = u64::try_from(ctx.settings.status_timeout.as_millis())
                    .unwrap_or(u64::MAX),
                "Status query timed out; reply dropped"
            );
        }
    }
}

/// Serialize and queue one envelope on the connection's outbound channel.
async fn send_envelope(outbound: &mpsc::Sender<String>, envelope: &ServerEnvelope, id: ConnectionId) {
    match envelope.to_json() {
        Ok(frame) => {
            if outbound.send(frame).await.is_err() {
                tracing::debug!(connection = id, "Connection closed before reply was sent");
            }
        }
        Err(e) => {
            tracing::error!(connection = id, error = %e, "Failed to serialize reply; dropped");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::application::ports::MockFeedStatusSource;
    use crate::domain::feed::FeedStatus;
    use crate::infrastructure::config::SessionSettings;

    fn make_status() -> FeedStatus {
        FeedStatus {
            running: true,
            source: "mock".to_string(),
            last_update: Some(Utc::now()),
            instruments_tracked: 3,
            ticks_produced: 11,
            update_interval_secs: 5,
        }
    }

    fn make_ctx(status: MockFeedStatusSource) -> Arc<SessionContext> {
        Arc::new(SessionContext {
            registry: Arc::new(ConnectionRegistry::new()),
            cell: Arc::new(SnapshotCell::new()),
            status: Arc::new(status),
            settings: SessionSettings::default(),
        })
    }

    #[tokio::test]
    async fn ping_yields_exactly_one_pong() {
        let ctx = make_ctx(MockFeedStatusSource::new());
        let (tx, mut rx) = mpsc::channel(8);

        let keep_open =
            handle_message(Message::Text(r#"{"type":"ping"}"#.into()), &ctx, &tx, 1).await;
        assert!(keep_open);

        let frame = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "pong");
        assert!(value.get("data").is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn status_request_yields_the_port_result() {
        let mut status = MockFeedStatusSource::new();
        status.expect_status().returning(make_status);
        let ctx = make_ctx(status);
        let (tx, mut rx) = mpsc::channel(8);

        handle_message(
            Message::Text(r#"{"type":"status_request"}"#.into()),
            &ctx,
            &tx,
            1,
        )
        .await;

        let frame = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["data"]["source"], "mock");
        assert_eq!(value["data"]["ticks_produced"], 11);
    }

    #[tokio::test]
    async fn malformed_and_unknown_messages_produce_no_reply() {
        let ctx = make_ctx(MockFeedStatusSource::new());
        let (tx, mut rx) = mpsc::channel(8);

        assert!(handle_message(Message::Text("garbage".into()), &ctx, &tx, 1).await);
        assert!(
            handle_message(
                Message::Text(r#"{"type":"subscribe","symbol":"BTC"}"#.into()),
                &ctx,
                &tx,
                1
            )
            .await
        );
        assert!(handle_message(Message::Binary(vec![0, 159].into()), &ctx, &tx, 1).await);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_frame_ends_the_session() {
        let ctx = make_ctx(MockFeedStatusSource::new());
        let (tx, _rx) = mpsc::channel(8);

        let keep_open = handle_message(Message::Close(None), &ctx, &tx, 1).await;
        assert!(!keep_open);
    }

    #[tokio::test]
    async fn slow_status_source_drops_the_reply() {
        struct StalledStatusSource;

        #[async_trait::async_trait]
        impl FeedStatusSource for StalledStatusSource {
            async fn status(&self) -> FeedStatus {
                // Never resolves within the session's bound.
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                make_status()
            }
        }

        let ctx = Arc::new(SessionContext {
            registry: Arc::new(ConnectionRegistry::new()),
            cell: Arc::new(SnapshotCell::new()),
            status: Arc::new(StalledStatusSource),
            settings: SessionSettings {
                status_timeout: std::time::Duration::from_millis(5),
                ..SessionSettings::default()
            },
        });
        let (tx, mut rx) = mpsc::channel(8);

        handle_message(
            Message::Text(r#"{"type":"status_request"}"#.into()),
            &ctx,
            &tx,
            1,
        )
        .await;

        assert!(rx.try_recv().is_err());
    }
}
