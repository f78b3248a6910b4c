//! Tempo-compatible trace endpoints (spec §4.4, component C4).
//!
//! Follows the teacher's `handlers/traces.rs` shape — `State`/`Path`/`Query`
//! extractors, a `Result<impl IntoResponse, _>` handler signature — with the
//! error tuple replaced by the centralised [`crate::error::GotelError`].

use std::sync::OnceLock;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::{GotelError, GotelResult};
use crate::store::{SpanFilter, TraceSearchFilter};
use crate::tempo;
use crate::AppState;

use super::clamp_limit;

#[derive(Debug, Deserialize, Default)]
pub struct SearchParams {
    pub service: Option<String>,
    pub operation: Option<String>,
    pub tags: Option<String>,
    pub q: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub limit: Option<u32>,
}

pub async fn get_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> GotelResult<impl IntoResponse> {
    if trace_id.is_empty() {
        return Err(GotelError::Input("trace id must not be empty".to_string()));
    }
    let spans = state.store.query_trace_by_id(&state.cancel, &trace_id).await?;
    if spans.is_empty() {
        return Err(GotelError::NotFound("trace not found".to_string()));
    }
    Ok(Json(tempo::spans_to_envelope(&spans)))
}

pub async fn get_trace_v2(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> GotelResult<impl IntoResponse> {
    if trace_id.is_empty() {
        return Err(GotelError::Input("trace id must not be empty".to_string()));
    }
    let spans = state.store.query_trace_by_id(&state.cancel, &trace_id).await?;
    if spans.is_empty() {
        return Err(GotelError::NotFound("trace not found".to_string()));
    }
    let envelope = tempo::spans_to_envelope(&spans);
    Ok(Json(json!({ "trace": envelope })))
}

pub async fn search_traces(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> GotelResult<impl IntoResponse> {
    let summaries = run_search(&state, &params, 10_000).await?;
    let body: Vec<_> = summaries
        .into_iter()
        .map(|s| {
            json!({
                "traceID": s.trace_id,
                "rootServiceName": s.root_service_name,
                "rootTraceName": s.root_trace_name,
                "startTimeUnixNano": s.start_time_unix_nano.to_string(),
                "durationMs": s.duration_ms,
            })
        })
        .collect();
    Ok(Json(body))
}

/// `/api/traces` without an id: UI-oriented projection over the same
/// search, with its own max limit (spec §4.4 "List traces").
pub async fn list_traces(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> GotelResult<impl IntoResponse> {
    let summaries = run_search(&state, &params, 1_000).await?;
    let body: Vec<_> = summaries
        .into_iter()
        .map(|s| {
            json!({
                "trace_id": s.trace_id,
                "span_name": s.root_trace_name,
                "service_name": s.root_service_name,
                "duration_ms": s.duration_ms,
                "status_code": s.status_code,
                "span_count": s.span_count,
                "start_time": s.start_time_unix_nano,
            })
        })
        .collect();
    Ok(Json(body))
}

async fn run_search(
    state: &AppState,
    params: &SearchParams,
    max_limit: u32,
) -> GotelResult<Vec<crate::store::TraceSummary>> {
    let service = resolve_service(params);
    let operation = discard_wildcard(params.operation.clone());

    let filter = TraceSearchFilter {
        service,
        operation,
        min_start_ns: params.start.map(|s| s * 1_000_000_000),
        max_start_ns: params.end.map(|e| e * 1_000_000_000),
        limit: clamp_limit(params.limit, 20, max_limit),
    };
    state
        .store
        .search_traces(&state.cancel, filter)
        .await
        .map_err(GotelError::from)
}

fn discard_wildcard(value: Option<String>) -> Option<String> {
    value.filter(|v| v != "*" && v != ".*")
}

/// Resolves the effective service filter: explicit `service` param first,
/// then `tags` logfmt, then a `q` TraceQL-fragment regex (spec §4.4
/// "Search traces" pre-processing).
fn resolve_service(params: &SearchParams) -> Option<String> {
    if let Some(service) = discard_wildcard(params.service.clone()) {
        if !service.is_empty() {
            return Some(service);
        }
    }
    if let Some(tags) = &params.tags {
        if let Some(service) = parse_logfmt_service(tags) {
            return Some(service);
        }
    }
    if let Some(q) = &params.q {
        if let Some(service) = parse_traceql_service(q) {
            return Some(service);
        }
    }
    None
}

fn parse_logfmt_service(tags: &str) -> Option<String> {
    for token in tags.split_whitespace() {
        let (key, value) = token.split_once('=')?;
        if key == "service.name" || key == "resource.service.name" {
            return Some(value.trim_matches('"').to_string());
        }
    }
    None
}

fn traceql_service_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r#"(?:resource\.)?service\.name\s*=\s*"([^"]+)""#)
            .expect("static regex is valid")
    })
}

fn parse_traceql_service(q: &str) -> Option<String> {
    traceql_service_regex()
        .captures(q)
        .map(|c| c[1].to_string())
}

/// `/api/services`.
pub async fn list_services(State(state): State<AppState>) -> GotelResult<impl IntoResponse> {
    let services = state.store.list_services(&state.cancel).await?;
    Ok(Json(services))
}

/// `/api/search/tags`, `/api/v2/search/tags` — only `service.name` is
/// advertised as a searchable tag.
pub async fn list_tag_names() -> impl IntoResponse {
    Json(json!(["service.name"]))
}

pub async fn list_tag_names_v2() -> impl IntoResponse {
    Json(json!({ "tagNames": ["service.name"] }))
}

/// `/api/search/tag/{tag}/values`.
pub async fn tag_values(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> GotelResult<impl IntoResponse> {
    if tag != "service.name" && tag != "resource.service.name" {
        return Err(GotelError::NotFound("unsupported tag".to_string()));
    }
    let services = state.store.list_services(&state.cancel).await?;
    Ok(Json(services))
}

/// `/api/v2/search/tag/{tag}/values` — each value wrapped in `{type, value}`.
pub async fn tag_values_v2(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> GotelResult<impl IntoResponse> {
    if tag != "service.name" && tag != "resource.service.name" {
        return Err(GotelError::NotFound("unsupported tag".to_string()));
    }
    let services = state.store.list_services(&state.cancel).await?;
    let values: Vec<_> = services
        .into_iter()
        .map(|name| json!({ "type": "string", "value": name }))
        .collect();
    Ok(Json(json!({ "tagValues": values })))
}

#[derive(Debug, Deserialize, Default)]
pub struct SpanListParams {
    pub service: Option<String>,
    pub limit: Option<u32>,
}

/// `/api/spans`.
pub async fn list_spans(
    State(state): State<AppState>,
    Query(params): Query<SpanListParams>,
) -> GotelResult<impl IntoResponse> {
    let filter = SpanFilter {
        service: params.service,
        limit: clamp_limit(params.limit, 100, 1_000),
        ..Default::default()
    };
    let spans = state.store.query_spans(&state.cancel, filter).await?;
    Ok(Json(spans))
}

/// `/api/exceptions`.
pub async fn list_exceptions(State(state): State<AppState>) -> GotelResult<impl IntoResponse> {
    let filter = SpanFilter {
        status_code: Some(2),
        limit: 1_000,
        ..Default::default()
    };
    let spans = state.store.query_spans(&state.cancel, filter).await?;

    let mut records = Vec::new();
    for span in &spans {
        let exception_events: Vec<_> = span.events.iter().filter(|e| e.is_exception()).collect();
        if exception_events.is_empty() {
            records.push(json!({
                "trace_id": span.trace_id,
                "span_id": span.span_id,
                "service_name": span.service_name,
                "exception_type": serde_json::Value::Null,
                "message": span.status.message,
                "stack_trace": serde_json::Value::Null,
                "timestamp_ms": span.start_time_unix_nano / 1_000_000,
                "severity": "critical",
            }));
            continue;
        }
        for event in exception_events {
            let get_attr = |key: &str| {
                event
                    .attributes
                    .get(key)
                    .map(crate::store::models::attribute_to_display_string)
            };
            records.push(json!({
                "trace_id": span.trace_id,
                "span_id": span.span_id,
                "service_name": span.service_name,
                "exception_type": get_attr("exception.type"),
                "message": get_attr("exception.message"),
                "stack_trace": get_attr("exception.stacktrace"),
                "timestamp_ms": event.time_unix_nano / 1_000_000,
                "severity": "critical",
            }));
        }
    }
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logfmt_extracts_service_name_and_trims_quotes() {
        let tags = r#"env=prod service.name="checkout-svc" region=us"#;
        assert_eq!(parse_logfmt_service(tags), Some("checkout-svc".to_string()));
    }

    #[test]
    fn logfmt_falls_back_to_resource_prefixed_key() {
        let tags = r#"resource.service.name=checkout-svc"#;
        assert_eq!(parse_logfmt_service(tags), Some("checkout-svc".to_string()));
    }

    #[test]
    fn traceql_fragment_extracts_quoted_service_name() {
        let q = r#"{ resource.service.name = "checkout-svc" && span.http.status_code = 500 }"#;
        assert_eq!(parse_traceql_service(q), Some("checkout-svc".to_string()));
    }

    #[test]
    fn wildcard_service_is_discarded() {
        assert_eq!(discard_wildcard(Some("*".to_string())), None);
        assert_eq!(discard_wildcard(Some(".*".to_string())), None);
        assert_eq!(discard_wildcard(Some("checkout".to_string())), Some("checkout".to_string()));
    }
}
