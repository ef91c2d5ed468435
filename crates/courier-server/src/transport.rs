//! Transport handlers: WebSocket primary mode, HTTP/SSE fallback mode, and
//! the producer dispatch edge.
//!
//! The WebSocket path carries the full bidirectional protocol with
//! negotiated text/binary framing. Constrained clients that cannot hold a
//! WebSocket use the fallback pair: an SSE stream for confirm/replay/live
//! pushes and a plain POST for the read-status RPC.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use courier_delivery::{
    AuthRequest, ClientMessage, ConnectionHandle, ConnectionRegistry, ConnectionSession,
    DeliveryEngine, Frame, Framing, NewNotification, NotificationDispatcher, ReadStatusRequest,
    SubscriptionGuard,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DeliveryEngine>,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<NotificationDispatcher>,
    /// Active transport connection count.
    pub connections: Arc<AtomicUsize>,
}

/// RAII counter for the active-connection gauge: increments on open,
/// decrements when the owning transport (socket task or SSE stream) drops.
pub struct ConnectionGauge(Arc<AtomicUsize>);

impl ConnectionGauge {
    pub fn open(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter.clone())
    }

    pub fn active(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

impl Drop for ConnectionGauge {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Health check with registry gauges.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.registry.connection_count(),
        "groups": state.registry.group_count(),
    }))
}

// =============================================================================
// WEBSOCKET TRANSPORT (primary mode)
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// `text` (default) or `binary`.
    framing: Option<String>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let framing = Framing::from_param(params.framing.as_deref());
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, framing))
}

async fn handle_ws_connection(socket: WebSocket, state: AppState, framing: Framing) {
    let gauge = ConnectionGauge::open(&state.connections);
    info!(active = gauge.active(), ?framing, "WebSocket connection opened");

    let (mut sender, mut receiver) = socket.split();
    let (handle, mut mailbox) = ConnectionHandle::new();
    let mut session = ConnectionSession::new(state.engine.clone(), handle);

    // Writer task: drain the connection mailbox under the negotiated
    // framing, with periodic pings.
    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            tokio::select! {
                msg = mailbox.recv() => {
                    let Some(msg) = msg else { break };
                    let frame = match msg.encode(framing) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode outbound frame");
                            continue;
                        }
                    };
                    let out = match frame {
                        Frame::Text(text) => Message::Text(text),
                        Frame::Binary(bytes) => Message::Binary(bytes),
                    };
                    if sender.send(out).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader loop: decode once at the boundary, then drive the session
    // state machine. Malformed frames are logged and ignored.
    while let Some(Ok(msg)) = receiver.next().await {
        let decoded = match msg {
            Message::Text(ref text) => ClientMessage::decode_text(text),
            Message::Binary(ref bytes) => ClientMessage::decode_binary(bytes),
            Message::Close(_) => break,
            _ => continue,
        };
        match decoded {
            Ok(message) => session.handle(message).await,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed client frame");
            }
        }
    }

    session.close();
    send_task.abort();
    drop(gauge);
    info!(
        active = state.connections.load(Ordering::Relaxed),
        "WebSocket connection closed"
    );
}

// =============================================================================
// HTTP/SSE FALLBACK (request-poll mode)
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    user: Uuid,
    origin: Option<String>,
}

/// SSE notification stream for clients that cannot hold a WebSocket.
///
/// The query parameters stand in for the handshake frame; the stream then
/// carries the same server events as the WebSocket path (confirm, replay,
/// live pushes). The subscription ends when the client drops the stream.
pub async fn notification_stream(
    Query(params): Query<StreamParams>,
    State(state): State<AppState>,
) -> Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (handle, mailbox) = ConnectionHandle::new();
    let guard = SubscriptionGuard::new(state.registry.clone(), params.user, handle.id);
    let gauge = ConnectionGauge::open(&state.connections);
    info!(active = gauge.active(), user = %params.user, "SSE stream opened");

    state
        .engine
        .authenticate(
            &handle,
            AuthRequest {
                user: params.user,
                origin: params.origin.unwrap_or_else(|| "sse".to_string()),
            },
        )
        .await;

    // The registry holds its own sender clone; the mailbox stays open for
    // as long as the subscription lives.
    let stream = UnboundedReceiverStream::new(mailbox).filter_map(move |msg| {
        // Captured guard unsubscribes, and the gauge decrements, when the
        // stream is dropped.
        let _keep = (&guard, &gauge);
        let event = serde_json::to_string(&msg)
            .ok()
            .map(|json| Ok(Event::default().event(msg.event_name()).data(json)));
        futures::future::ready(event)
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadStatusBody {
    user_id: Uuid,
    read: bool,
}

/// Read-status RPC over plain HTTP, for fallback clients.
///
/// Group-connected devices still observe `notificationStatusChanged`
/// through their streams; the HTTP response is the caller-only completion.
pub async fn set_read_status(
    Path(notification_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<ReadStatusBody>,
) -> impl IntoResponse {
    let request = ReadStatusRequest {
        request_id: Uuid::new_v4(),
        notification_id,
        user_id: body.user_id,
        read: body.read,
    };

    match state.engine.set_read_status(&request).await {
        Some(notification) => (StatusCode::OK, Json(json!(notification))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "notification not found" })),
        )
            .into_response(),
    }
}

// =============================================================================
// PRODUCER EDGE
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchBody {
    #[serde(rename = "type")]
    kind: String,
    message: String,
    recipient: Option<Uuid>,
    linkback: Option<String>,
    /// When present, one job is enqueued per listed recipient.
    recipients: Option<Vec<Uuid>>,
}

/// Enqueue notification delivery jobs (single or multicast).
pub async fn dispatch(
    State(state): State<AppState>,
    Json(body): Json<DispatchBody>,
) -> impl IntoResponse {
    let template = NewNotification {
        kind: body.kind,
        message: body.message,
        recipient: body.recipient.unwrap_or(Uuid::nil()),
        linkback: body.linkback,
    };

    let result = match body.recipients {
        Some(recipients) if !recipients.is_empty() => state
            .dispatcher
            .send_multicast(template, &recipients)
            .await
            .map(|job_ids| json!({ "jobIds": job_ids })),
        _ => {
            if body.recipient.is_none() {
                return (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({ "error": "recipient or recipients is required" })),
                )
                    .into_response();
            }
            state
                .dispatcher
                .send(template)
                .await
                .map(|job_id| json!({ "jobId": job_id }))
        }
    };

    match result {
        Ok(response) => (StatusCode::ACCEPTED, Json(response)).into_response(),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
