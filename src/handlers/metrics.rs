//! Graphite-compatible metric endpoints (spec §4.5, component C5).

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::GotelResult;
use crate::graphite::{self, Expr};
use crate::sanitize::escape_like_pattern;
use crate::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct FindParams {
    pub query: Option<String>,
    pub q: Option<String>,
}

/// `/metrics/find`.
pub async fn metrics_find(
    State(state): State<AppState>,
    Query(params): Query<FindParams>,
) -> GotelResult<impl IntoResponse> {
    let raw_query = params.query.or(params.q).unwrap_or_default();
    if raw_query.is_empty() {
        return Ok(Json(json!([])));
    }

    let expr = Expr::parse(&raw_query);
    let pattern = expr.base_pattern();
    let depth = pattern.split('.').count();

    let like = escape_like_pattern(pattern);
    let points = state
        .store
        .query_metrics(&state.cancel, &like, None, None, 10_000)
        .await?;

    let names: Vec<String> = points.into_iter().map(|p| p.name).collect();
    let nodes = graphite::distinct_nodes_at_depth(&names, depth);

    let aliased: Vec<String> = nodes.iter().map(|n| expr.rename(n)).collect();
    let body: Vec<_> = aliased
        .into_iter()
        .map(|name| {
            json!({
                "text": name,
                "id": name,
                "expandable": false,
                "allowChildren": false,
            })
        })
        .collect();
    Ok(Json(body))
}

#[derive(Debug, Default)]
struct RenderParams {
    target: Vec<String>,
    from: Option<i64>,
    until: Option<i64>,
}

/// Parses a `x-www-form-urlencoded`-shaped string, collecting every
/// `target=` occurrence into a `Vec` — `serde_urlencoded` (what axum's
/// `Query`/`Form` extractors use) collapses repeated keys to the last one,
/// which loses all but one target, so repeated params are parsed by hand.
fn parse_render_params(raw: &str) -> RenderParams {
    let mut params = RenderParams::default();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key).unwrap_or_default().into_owned();
        let value = urlencoding::decode(value).unwrap_or_default().into_owned();
        match key.as_str() {
            "target" => params.target.push(value),
            "from" => params.from = value.parse().ok(),
            "until" => params.until = value.parse().ok(),
            _ => {}
        }
    }
    params
}

/// `/render`. GET query params and POST form bodies both carry the same
/// `x-www-form-urlencoded` shape (spec §4.5 "accepts ... repeatable query
/// parameter; also form-encoded body on POST/PUT").
pub async fn render(
    State(state): State<AppState>,
    axum::extract::RawQuery(raw): axum::extract::RawQuery,
) -> GotelResult<impl IntoResponse> {
    let params = parse_render_params(raw.as_deref().unwrap_or(""));
    render_targets(&state, &params.target, params.from, params.until).await
}

pub async fn render_form(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> GotelResult<impl IntoResponse> {
    let raw = String::from_utf8_lossy(&body);
    let params = parse_render_params(&raw);
    render_targets(&state, &params.target, params.from, params.until).await
}

async fn render_targets(
    state: &AppState,
    targets: &[String],
    from: Option<i64>,
    until: Option<i64>,
) -> GotelResult<impl IntoResponse> {
    let mut series = Vec::new();
    for target in targets {
        let expr = Expr::parse(target);
        let pattern = expr.base_pattern();
        let pattern_depth = graphite::segment_count(pattern);
        let like = escape_like_pattern(pattern);

        let points = state
            .store
            .query_metrics(&state.cancel, &like, from, until, 100_000)
            .await?;

        // Loosened wildcard semantics: keep a metric if its own segment
        // count is >= the pattern's (spec §4.5 "Render").
        let points: Vec<_> = points
            .into_iter()
            .filter(|p| graphite::segment_count(&p.name) >= pattern_depth)
            .collect();

        let mut by_name: BTreeMap<String, Vec<(f64, i64)>> = BTreeMap::new();
        for point in points {
            by_name
                .entry(point.name.clone())
                .or_default()
                .push((point.value, point.timestamp));
        }

        for (name, mut datapoints) in by_name {
            datapoints.sort_by_key(|(_, ts)| *ts);
            let series_name = expr.rename(&name);
            series.push(json!({
                "target": series_name,
                "datapoints": datapoints
                    .into_iter()
                    .map(|(v, ts)| json!([v, ts]))
                    .collect::<Vec<_>>(),
            }));
        }
    }
    Ok(Json(series))
}
