//! Status/health probes (spec §4.6).

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::GotelResult;
use crate::AppState;

/// `/api/status`.
pub async fn status(State(state): State<AppState>) -> GotelResult<impl IntoResponse> {
    let stats = state.store.stats(&state.cancel).await?;
    Ok(Json(stats))
}

/// `/ready`.
pub async fn ready() -> impl IntoResponse {
    "ready"
}

/// `/api/echo`.
pub async fn echo() -> impl IntoResponse {
    "echo"
}
