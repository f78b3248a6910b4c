pub mod config;
pub mod error;
pub mod graphite;
pub mod handlers;
pub mod ingest;
pub mod retention;
pub mod sanitize;
pub mod store;
pub mod tempo;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use config::GotelConfig;
use store::Store;

/// Shared application state, cloned into every handler (spec §4.6). Mirrors
/// the teacher's `AppState { ch, config_db, usage }` shape — one field per
/// shared collaborator.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<GotelConfig>,
    pub cancel: CancellationToken,
}

const DEBUG_BODY_CAPTURE_LIMIT: usize = 64 * 1024;

/// Reads and logs the request body when the subscriber is at debug level,
/// then re-wraps it so downstream handlers still see the full body
/// (spec §4.6 "Logging").
async fn capture_body_at_debug(req: Request, next: Next) -> Response {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return next.run(req).await;
    }
    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, 10 * 1024 * 1024).await {
        Ok(bytes) => bytes,
        Err(_) => Bytes::new(),
    };
    let logged_len = bytes.len().min(DEBUG_BODY_CAPTURE_LIMIT);
    tracing::debug!(
        body = %String::from_utf8_lossy(&bytes[..logged_len]),
        truncated = bytes.len() > DEBUG_BODY_CAPTURE_LIMIT,
        "request body",
    );
    let req = Request::from_parts(parts, axum::body::Body::from(bytes));
    next.run(req).await
}

/// Builds the router with the fixed endpoint table (spec §6) and the
/// logging → CORS → router middleware chain (spec §4.6), following the
/// teacher's `main.rs` route-table assembly style.
pub fn build_router(state: AppState) -> Router {
    use handlers::{metrics, status, traces};

    Router::new()
        .route("/api/traces/{id}", get(traces::get_trace))
        .route("/api/v2/traces/{id}", get(traces::get_trace_v2))
        .route("/api/search", get(traces::search_traces))
        .route("/api/v2/search", get(traces::search_traces))
        .route("/api/search/tags", get(traces::list_tag_names))
        .route("/api/v2/search/tags", get(traces::list_tag_names_v2))
        .route("/api/search/tag/{tag}/values", get(traces::tag_values))
        .route("/api/v2/search/tag/{tag}/values", get(traces::tag_values_v2))
        .route("/api/services", get(traces::list_services))
        .route("/api/traces", get(traces::list_traces))
        .route("/api/spans", get(traces::list_spans))
        .route("/api/exceptions", get(traces::list_exceptions))
        .route(
            "/render",
            get(metrics::render).post(metrics::render_form),
        )
        .route(
            "/metrics/find",
            get(metrics::metrics_find).post(metrics::metrics_find),
        )
        .route("/api/status", get(status::status))
        .route("/ready", get(status::ready))
        .route("/api/echo", get(status::echo))
        .layer(middleware::from_fn(capture_body_at_debug))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Runs the HTTP gateway to completion, honouring graceful shutdown via
/// `cancel` (spec §5 shutdown step 2). `query_port = 0` disables the
/// gateway entirely (spec §6).
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    if port == 0 {
        tracing::info!("query_port=0, HTTP gateway disabled");
        state.cancel.cancelled().await;
        return Ok(());
    }

    let cancel = state.cancel.clone();
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("gotel listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

/// Read-header timeout and header size cap (spec §5). `axum::serve` doesn't
/// expose hyper's per-connection builder, so these are enforced by a
/// reverse proxy in front of the gateway in practice; kept here as the
/// documented contract values rather than silently dropped.
pub const READ_HEADER_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_HEADER_SIZE_BYTES: usize = 1024 * 1024;
