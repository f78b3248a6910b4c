//! End-to-end ingest → store → query scenarios.
//!
//! Run with: `cargo test --test ingest_and_query_test`

use std::collections::BTreeMap;
use std::sync::Arc;

use gotel_core::config::GotelConfig;
use gotel_core::ingest::{Ingestor, RawSpan, ResourceGroup, ScopeGroup};
use gotel_core::store::{AttributeValue, InstrumentationScope, SpanEvent, SpanFilter, Store};
use tokio_util::sync::CancellationToken;

async fn open_store() -> (Arc<Store>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().join("gotel.db")).await.unwrap());
    (store, dir)
}

fn resource_group(service: &str, spans: Vec<RawSpan>) -> ResourceGroup {
    let mut resource = BTreeMap::new();
    resource.insert("service.name".to_string(), AttributeValue::String(service.to_string()));
    ResourceGroup {
        resource,
        scope_groups: vec![ScopeGroup { scope: InstrumentationScope::default(), spans }],
    }
}

fn raw_span(trace_id: &str, span_id: &str, parent: &str, name: &str, start: i64, end: i64, status: i32) -> RawSpan {
    RawSpan {
        trace_id: trace_id.to_string(),
        span_id: span_id.to_string(),
        parent_span_id: parent.to_string(),
        name: name.to_string(),
        kind: "server".to_string(),
        start_time_unix_nano: start,
        end_time_unix_nano: end,
        status_code: status,
        status_message: String::new(),
        attributes: BTreeMap::new(),
        events: Vec::new(),
        links: Vec::new(),
    }
}

// S1 — Round trip.
#[tokio::test]
async fn round_trip_preserves_raw_tags_and_sanitised_metric_path() {
    let (store, _dir) = open_store().await;
    let ingestor = Ingestor::new(store.clone(), GotelConfig::default());
    let cancel = CancellationToken::new();

    let trace_id = "0".repeat(31) + "1";
    let span = raw_span(&trace_id, "s1", "", "GET /cart/items", 1_000_000_000, 1_100_000_000, 1);
    let group = resource_group("checkout API/v1", vec![span]);
    ingestor.ingest(&cancel, vec![group]).await.unwrap();

    let stats = store.stats(&cancel).await.unwrap();
    assert_eq!(stats.span_count, 1);
    assert_eq!(stats.metric_count, 2); // span_count + duration_ms, no errors

    let spans = store.query_trace_by_id(&cancel, &trace_id).await.unwrap();
    assert_eq!(spans.len(), 1);

    let points = store
        .query_metrics(&cancel, "otel.checkout_API_v1.GET__cart_items.span_count", None, None, 10)
        .await
        .unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].tags.get("service").unwrap(), "checkout API/v1");
    assert_eq!(points[0].tags.get("span").unwrap(), "GET /cart/items");
}

// S2 — Error event.
#[tokio::test]
async fn exception_event_is_extracted_with_typed_attributes() {
    let (store, _dir) = open_store().await;
    let ingestor = Ingestor::new(store.clone(), GotelConfig::default());
    let cancel = CancellationToken::new();

    let mut event_attrs = BTreeMap::new();
    event_attrs.insert("exception.type".to_string(), AttributeValue::String("RuntimeError".to_string()));
    event_attrs.insert("exception.message".to_string(), AttributeValue::String("x".to_string()));
    event_attrs.insert("exception.stacktrace".to_string(), AttributeValue::String("...".to_string()));

    let mut span = raw_span("t1", "s1", "", "op", 0, 10, 2);
    span.events.push(SpanEvent { name: "exception".to_string(), time_unix_nano: 5, attributes: event_attrs });

    let group = resource_group("svc", vec![span]);
    ingestor.ingest(&cancel, vec![group]).await.unwrap();

    let spans = store
        .query_spans(&cancel, SpanFilter { status_code: Some(2), limit: 10, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(spans.len(), 1);
    let exception_events: Vec<_> = spans[0].events.iter().filter(|e| e.is_exception()).collect();
    assert_eq!(exception_events.len(), 1);
}

// S3 — Disabled metrics.
#[tokio::test]
async fn disabled_metric_emission_keeps_spans_only() {
    let (store, _dir) = open_store().await;
    let mut config = GotelConfig::default();
    config.send_metrics = false;
    let ingestor = Ingestor::new(store.clone(), config);
    let cancel = CancellationToken::new();

    let group = resource_group("svc", vec![raw_span("t1", "s1", "", "op", 0, 10, 1)]);
    ingestor.ingest(&cancel, vec![group]).await.unwrap();

    let stats = store.stats(&cancel).await.unwrap();
    assert_eq!(stats.span_count, 1);
    assert_eq!(stats.metric_count, 0);
}

// S5 — Search wildcard.
#[tokio::test]
async fn search_with_wildcard_service_returns_all_matching_spans() {
    use gotel_core::store::TraceSearchFilter;

    let (store, _dir) = open_store().await;
    let ingestor = Ingestor::new(store.clone(), GotelConfig::default());
    let cancel = CancellationToken::new();

    let spans = vec![
        raw_span("t1", "a", "", "search-operation", 0, 10, 1),
        raw_span("t2", "b", "", "search-operation", 0, 10, 1),
        raw_span("t3", "c", "", "search-operation", 0, 10, 1),
    ];
    let group = resource_group("search-service", spans);
    ingestor.ingest(&cancel, vec![group]).await.unwrap();

    let empty_filter = TraceSearchFilter { limit: 20, ..Default::default() };
    let all = store.search_traces(&cancel, empty_filter).await.unwrap();
    assert_eq!(all.len(), 3);

    let scoped = TraceSearchFilter {
        service: Some("search-service".to_string()),
        operation: Some("search-operation".to_string()),
        limit: 20,
        ..Default::default()
    };
    let scoped_results = store.search_traces(&cancel, scoped).await.unwrap();
    assert_eq!(scoped_results.len(), 3);
}

// S6 — Root vs child.
#[tokio::test]
async fn trace_summary_uses_root_span_name_and_full_span_count() {
    use gotel_core::store::TraceSearchFilter;

    let (store, _dir) = open_store().await;
    let ingestor = Ingestor::new(store.clone(), GotelConfig::default());
    let cancel = CancellationToken::new();

    let spans = vec![
        raw_span("t1", "root", "", "root-operation", 0, 100, 1),
        raw_span("t1", "c1", "root", "child-a", 10, 40, 1),
        raw_span("t1", "c2", "root", "child-b", 20, 60, 1),
        raw_span("t1", "c3", "root", "child-c", 30, 90, 1),
    ];
    let group = resource_group("svc", spans);
    ingestor.ingest(&cancel, vec![group]).await.unwrap();

    let summaries = store
        .search_traces(&cancel, TraceSearchFilter { limit: 20, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].span_count, 4);
    assert_eq!(summaries[0].root_trace_name, "root-operation");
    assert!(summaries[0].duration_ms > 0.0);
}
