//! HTTP surface: the MCP event-stream routes, the legacy one-shot JSON-RPC
//! endpoint, and the `/api/*` REST handlers, all on one axum router.

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::db::Database;
use crate::errors::{KnowledgeGraphError, Result};
use crate::mcp::session::SessionRegistry;
use crate::mcp::sse::{message_handler, stream_handler};
use crate::mcp::{JsonRpcRequest, McpServer};

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<McpServer>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(server: Arc<McpServer>, sessions: Arc<SessionRegistry>) -> Self {
        Self { server, sessions }
    }

    pub fn database(&self) -> &Database {
        self.server.database()
    }
}

/// Decodes a POSTed JSON-RPC request, rejecting bad JSON or a protocol
/// version other than 2.0 with `400 Bad Request`.
pub(crate) fn decode_request(body: &[u8]) -> std::result::Result<JsonRpcRequest, Response> {
    let request: JsonRpcRequest = serde_json::from_slice(body)
        .map_err(|_| (StatusCode::BAD_REQUEST, "bad JSON").into_response())?;

    if !request.has_valid_version() {
        return Err((StatusCode::BAD_REQUEST, "invalid JSON-RPC version").into_response());
    }
    Ok(request)
}

/// Returns `true` for an `Origin` whose host is a loopback name.
///
/// The scheme and port are ignored; the host must match exactly so that
/// `http://localhost.example.com` is not mistaken for `localhost`.
pub fn is_loopback_origin(origin: &str) -> bool {
    let Some((_, rest)) = origin.split_once("://") else {
        return false;
    };
    let authority = rest.split('/').next().unwrap_or_default();

    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        match bracketed.split_once(']') {
            Some((host, _)) => host,
            None => return false,
        }
    } else {
        authority.split(':').next().unwrap_or_default()
    };

    matches!(
        host.to_ascii_lowercase().as_str(),
        "localhost" | "127.0.0.1" | "::1"
    )
}

/// Rejects cross-origin browser requests that do not come from loopback
/// (DNS-rebinding guard). Requests without an `Origin` header pass.
async fn require_loopback_origin(request: Request, next: Next) -> Response {
    if let Some(origin) = request.headers().get(header::ORIGIN) {
        let allowed = origin.to_str().map(is_loopback_origin).unwrap_or(false);
        if !allowed {
            warn!(origin = ?origin, "rejected request with non-loopback origin");
            return (StatusCode::FORBIDDEN, "invalid origin").into_response();
        }
    }
    next.run(request).await
}

/// `POST /mcp/legacy`: answers one JSON-RPC request synchronously.
async fn legacy_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match decode_request(&body) {
        Ok(request) => request,
        Err(rejection) => return rejection,
    };

    match state.server.call(request).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Builds the full application router.
pub fn router(state: AppState) -> Router {
    let mcp_routes = Router::new()
        .route("/sse", get(stream_handler))
        .route("/messages", post(message_handler))
        .route("/mcp", get(stream_handler).post(message_handler))
        .route("/mcp/legacy", post(legacy_handler))
        .route_layer(middleware::from_fn(require_loopback_origin));

    let api_routes = Router::new()
        .route("/api/read_graph", get(api::read_graph))
        .route("/api/create_entities", post(api::create_entities))
        .route("/api/create_relations", post(api::create_relations))
        .route("/api/add_observations", post(api::add_observations))
        .route("/api/delete_entities", delete(api::delete_entities))
        .route("/api/delete_observations", delete(api::delete_observations))
        .route("/api/delete_relations", delete(api::delete_relations))
        .route("/api/search_nodes", get(api::search_nodes))
        .route("/api/open_nodes", post(api::open_nodes))
        .route("/api/export_db", get(api::export_db))
        .route(
            "/api/import_db",
            post(api::import_db).layer(DefaultBodyLimit::max(api::MAX_IMPORT_BYTES)),
        );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(mcp_routes)
        .merge(api_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Binds `addr` and serves until `shutdown` is cancelled. Open SSE sessions
/// are closed before the listener drains.
pub async fn serve(state: AppState, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| KnowledgeGraphError::Transport {
            message: format!("failed to bind {addr}: {e}"),
        })?;
    info!(%addr, "HTTP server listening");

    let sessions = Arc::clone(&state.sessions);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            sessions.shutdown();
        })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_origins() {
        assert!(is_loopback_origin("http://localhost"));
        assert!(is_loopback_origin("http://localhost:3000"));
        assert!(is_loopback_origin("https://127.0.0.1:8443/app"));
        assert!(is_loopback_origin("http://[::1]:8080"));
        assert!(is_loopback_origin("http://LOCALHOST"));
    }

    #[test]
    fn test_foreign_origins() {
        assert!(!is_loopback_origin("http://example.com"));
        assert!(!is_loopback_origin("http://localhost.example.com"));
        assert!(!is_loopback_origin("http://127.0.0.1.nip.io"));
        assert!(!is_loopback_origin("null"));
        assert!(!is_loopback_origin(""));
    }

    #[test]
    fn test_decode_request_rejects_bad_version() {
        let rejection =
            decode_request(br#"{"jsonrpc":"1.0","id":1,"method":"initialize"}"#).unwrap_err();
        assert_eq!(rejection.status(), StatusCode::BAD_REQUEST);

        let rejection = decode_request(b"{not json").unwrap_err();
        assert_eq!(rejection.status(), StatusCode::BAD_REQUEST);

        let request = decode_request(br#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#)
            .ok()
            .expect("valid request should decode");
        assert_eq!(request.method, "initialize");
    }
}
