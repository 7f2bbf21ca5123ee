//! HTTP event-stream transport.
//!
//! Each `GET` on the stream endpoint registers a session and spawns a task
//! running [`run_session`]. The task waits on four sources at once: the
//! session's inbound queue, its done token, the client going away, and the
//! keepalive timer. Client requests arrive through the POST-message
//! endpoint, which only enqueues them.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt as _};
use tracing::{debug, info, warn};

use super::server::McpServer;
use super::session::{DeliveryError, Session, SessionRegistry};
use super::transport::JsonRpcRequest;
use crate::http::{decode_request, AppState};

/// Header carrying the session id on POST-message requests.
pub const SESSION_HEADER: &str = "x-session-id";

/// Path announced in the `endpoint` event.
pub const MESSAGES_PATH: &str = "/messages";

/// Buffered outbound events per connection.
const OUTBOUND_BUFFER: usize = 32;

/// One server-sent event, before it is handed to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub id: String,
    pub event: String,
    pub data: String,
}

impl SseFrame {
    /// Builds a frame whose data is `payload` encoded as JSON.
    pub fn json<T: Serialize>(event: &str, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            id: event_id(),
            event: event.to_string(),
            data: serde_json::to_string(payload)?,
        })
    }

    pub fn into_event(self) -> Event {
        Event::default().id(self.id).event(self.event).data(self.data)
    }
}

fn event_id() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .to_string()
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Sends a frame, returning `false` once the client is gone.
async fn emit<T: Serialize>(outbound: &mpsc::Sender<SseFrame>, event: &str, payload: &T) -> bool {
    match SseFrame::json(event, payload) {
        Ok(frame) => outbound.send(frame).await.is_ok(),
        Err(e) => {
            warn!(event, error = %e, "failed to encode SSE payload");
            true
        }
    }
}

/// Drives one session until it is closed, the server shuts down, or the
/// client disconnects, then removes it from the registry.
pub async fn run_session(
    server: Arc<McpServer>,
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    mut inbound: mpsc::Receiver<JsonRpcRequest>,
    outbound: mpsc::Sender<SseFrame>,
    endpoint: String,
) {
    let session_id = session.id().to_string();
    info!(session_id = %session_id, "SSE session opened");

    let handshake = emit(&outbound, "session", &json!({ "sessionId": session_id })).await
        && emit(&outbound, "endpoint", &json!({ "uri": endpoint })).await;

    if handshake {
        let period = registry.settings().keepalive_interval;
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;
                _ = session.done().cancelled() => {
                    debug!(session_id = %session_id, "session closed by server");
                    break;
                }
                _ = outbound.closed() => {
                    debug!(session_id = %session_id, "client disconnected");
                    break;
                }
                message = inbound.recv() => {
                    let Some(request) = message else { break };
                    if !handle_inbound(&server, &session, &outbound, request).await {
                        break;
                    }
                }
                _ = keepalive.tick() => {
                    let ping = json!({ "timestamp": unix_timestamp().to_string() });
                    if !emit(&outbound, "ping", &ping).await {
                        break;
                    }
                }
            }
        }
    }

    registry.deregister(&session_id);
    drop(inbound);
    info!(
        session_id = %session_id,
        initialized = session.is_initialized(),
        "SSE session closed"
    );
}

/// Dispatches one queued request. Notifications run but emit nothing.
async fn handle_inbound(
    server: &McpServer,
    session: &Session,
    outbound: &mpsc::Sender<SseFrame>,
    request: JsonRpcRequest,
) -> bool {
    if request.method == "initialize" {
        session.mark_initialized();
    }

    match server.call(request).await {
        Some(response) => emit(outbound, "message", &response).await,
        None => true,
    }
}

/// `GET /sse` (and legacy `GET /mcp`): opens a session and streams its
/// events.
pub async fn stream_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (session, inbound) = state.sessions.register();
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);

    tokio::spawn(run_session(
        Arc::clone(&state.server),
        Arc::clone(&state.sessions),
        session,
        inbound,
        tx,
        MESSAGES_PATH.to_string(),
    ));

    Sse::new(ReceiverStream::new(rx).map(|frame| Ok::<_, Infallible>(frame.into_event())))
}

/// `POST /messages` (and legacy `POST /mcp`): hands one request to a
/// session's queue.
pub async fn message_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(session_id) = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    else {
        return (StatusCode::BAD_REQUEST, "missing session ID").into_response();
    };

    let request = match decode_request(&body) {
        Ok(request) => request,
        Err(rejection) => return rejection,
    };

    match state.sessions.deliver(session_id, request).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(DeliveryError::NotFound) => {
            (StatusCode::NOT_FOUND, "session not found").into_response()
        }
        Err(DeliveryError::Busy) => {
            (StatusCode::SERVICE_UNAVAILABLE, "session busy").into_response()
        }
    }
}
