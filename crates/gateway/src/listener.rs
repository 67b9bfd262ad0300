//! Streamable HTTP listener: session lifecycle, body limits, health.
//!
//! The MCP wire framing (JSON POST + SSE streaming) is delegated to the
//! rmcp streamable HTTP service, which creates one [`GatewayMcpServer`]
//! per session through the service factory. The listener wraps it with the
//! gateway's own policy: a request-body cap with a JSON error shape, JSON
//! validation before dispatch, a session registry backing the
//! `No session found` responses, and request counting.

use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;
use crate::mcp_server::{GatewayAnalytics, GatewayMcpServer};
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode},
    middleware::{Next, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::get,
};
use parking_lot::RwLock;
use rmcp::transport::{
    StreamableHttpServerConfig, StreamableHttpService,
    streamable_http_server::session::local::LocalSessionManager,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Hard cap on request bodies accepted on `/mcp`.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024; // 4 MiB

const SESSION_HEADER: &str = "mcp-session-id";

/// Live session ids, as observed at the HTTP boundary.
///
/// Initialization POSTs register the id the transport assigns; DELETE and
/// stale responses remove it. GET/DELETE with an id that is not here are
/// rejected before reaching the transport.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashSet<String>>,
}

impl SessionRegistry {
    pub fn insert(&self, id: String) -> bool {
        self.sessions.write().insert(id)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.sessions.write().remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn clear(&self) -> usize {
        let mut sessions = self.sessions.write();
        let count = sessions.len();
        sessions.clear();
        count
    }
}

/// Shared listener state.
pub struct ListenerState {
    pub registry: SessionRegistry,
    pub total_requests: AtomicU64,
    pub failed_requests: AtomicU64,
}

impl ListenerState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: SessionRegistry::default(),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
        })
    }
}

/// The gateway's HTTP front end.
pub struct McpListener {
    gateway: Arc<Gateway>,
    analytics: Option<GatewayAnalytics>,
    state: Arc<ListenerState>,
    ct: CancellationToken,
}

impl McpListener {
    pub fn new(gateway: Arc<Gateway>, analytics: Option<GatewayAnalytics>) -> Self {
        Self {
            gateway,
            analytics,
            state: ListenerState::new(),
            ct: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> Arc<ListenerState> {
        self.state.clone()
    }

    /// Build the axum application: `/mcp` (nested rmcp service), `/health`,
    /// 404 for everything else, session/body policy wrapped around it all.
    pub fn router(&self) -> Router {
        let gateway = self.gateway.clone();
        let analytics = self.analytics.clone();

        let mcp_service = StreamableHttpService::new(
            move || Ok(GatewayMcpServer::new(gateway.clone(), analytics.clone())),
            LocalSessionManager::default().into(),
            StreamableHttpServerConfig {
                stateful_mode: true,
                sse_keep_alive: Some(Duration::from_secs(15)),
            },
        );

        Router::new()
            .route("/health", get(health))
            .nest_service("/mcp", mcp_service)
            .fallback(not_found)
            .layer(from_fn_with_state(self.state.clone(), session_guard))
    }

    /// Bind and serve until shutdown.
    pub async fn serve(&self, addr: SocketAddr) -> Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(GatewayError::Io)?;
        tracing::info!(%addr, "gateway listening");

        let ct = self.ct.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                ct.cancelled().await;
            })
            .await
            .map_err(GatewayError::Io)
    }

    /// Tear down: stop accepting connections, close every live session,
    /// then close the backends.
    pub async fn shutdown(&self) {
        self.ct.cancel();
        let closed = self.state.registry.clear();
        tracing::info!(
            sessions_closed = closed,
            total_requests = self.state.total_requests.load(Ordering::Relaxed),
            failed_requests = self.state.failed_requests.load(Ordering::Relaxed),
            "listener shut down"
        );
        self.gateway.close().await;
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// GET /health - liveness only.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "Not found"})),
    )
        .into_response()
}

fn error_response(status: StatusCode, reason: &str) -> Response {
    (status, Json(serde_json::json!({"error": reason}))).into_response()
}

/// Session and body policy around `/mcp`.
///
/// - POST: bodies are buffered up to [`MAX_BODY_BYTES`] (413 beyond) and
///   must parse as JSON (400 otherwise). An unknown `mcp-session-id` is
///   stripped so the transport starts a fresh session instead of failing.
///   Newly assigned session ids on the response are registered.
/// - GET/DELETE: require a registered session id, else 400; DELETE
///   unregisters after delegation.
async fn session_guard(
    State(state): State<Arc<ListenerState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if path != "/mcp" && !path.starts_with("/mcp/") {
        return next.run(request).await;
    }

    state.total_requests.fetch_add(1, Ordering::Relaxed);
    let method = request.method().clone();
    let session_header = request
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = match method {
        Method::POST => handle_post(&state, session_header, request, next).await,
        Method::GET | Method::DELETE => {
            match session_header {
                Some(id) if state.registry.contains(&id) => {
                    let response = next.run(request).await;
                    // The transport owns the close; mirror it in the registry.
                    if (method == Method::DELETE || response.status() == StatusCode::NOT_FOUND)
                        && state.registry.remove(&id)
                    {
                        tracing::info!(session_id = %id, "session closed");
                    }
                    response
                }
                _ => error_response(StatusCode::BAD_REQUEST, "No session found"),
            }
        }
        _ => next.run(request).await,
    };

    if !response.status().is_success() {
        state.failed_requests.fetch_add(1, Ordering::Relaxed);
    }
    response
}

async fn handle_post(
    state: &ListenerState,
    session_header: Option<String>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }
    };

    if serde_json::from_slice::<Value>(&bytes).is_err() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid JSON body");
    }

    // An id the registry does not know (expired or fabricated) must not be
    // forwarded: without the header the transport initializes a new session.
    if let Some(id) = &session_header
        && !state.registry.contains(id)
    {
        tracing::debug!(session_id = %id, "unknown session id on POST; starting a new session");
        parts.headers.remove(SESSION_HEADER);
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(request).await;

    if let Some(id) = response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        && state.registry.insert(id.to_string())
    {
        tracing::info!(session_id = %id, "session initialized");
    }

    response
}
