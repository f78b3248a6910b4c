use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Closed error taxonomy for the appliance (spec §7). Each variant maps to
/// exactly one HTTP status; handlers translate once, at the outermost
/// boundary, the way the teacher's handlers build `(StatusCode, String)`
/// tuples at each call site — centralised here into a single conversion.
#[derive(Debug, thiserror::Error)]
pub enum GotelError {
    #[error("{0}")]
    Input(String),

    #[error("{0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("ingest error: {0}")]
    Ingest(String),
}

impl From<rusqlite::Error> for GotelError {
    fn from(e: rusqlite::Error) -> Self {
        GotelError::Store(e.to_string())
    }
}

impl From<crate::store::StoreError> for GotelError {
    fn from(e: crate::store::StoreError) -> Self {
        match e {
            crate::store::StoreError::Cancelled => GotelError::Store("operation cancelled".to_string()),
            other => GotelError::Store(other.to_string()),
        }
    }
}

impl IntoResponse for GotelError {
    fn into_response(self) -> Response {
        match &self {
            GotelError::Input(msg) => {
                tracing::warn!("input error: {msg}");
                (StatusCode::BAD_REQUEST, msg.clone()).into_response()
            }
            GotelError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()).into_response(),
            GotelError::Store(e) => {
                tracing::error!("store error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal store error".to_string())
                    .into_response()
            }
            GotelError::Encode(e) => {
                tracing::debug!("encode error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "encode error".to_string()).into_response()
            }
            GotelError::Ingest(msg) => {
                tracing::error!("ingest error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()).into_response()
            }
        }
    }
}

pub type GotelResult<T> = Result<T, GotelError>;
