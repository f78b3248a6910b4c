//! The ingestion path (spec §4.2, component C2): turns a batch of
//! resource/scope/span groups into durable span rows plus per-operation
//! aggregated metric points, written through the store in one transaction.
//!
//! Grounded on the teacher's log-and-skip idiom for per-item marshalling
//! failures (`retention_enforcer`/`handlers` unwrap individual rows with
//! `.ok()`/`unwrap_or(Value::Null)` rather than failing a whole batch); here
//! each bad span or tag map is logged and dropped while the rest proceeds,
//! per spec §4.2 "Failure semantics".

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::GotelConfig;
use crate::sanitize::sanitise;
use crate::store::{
    AttributeValue, Attributes, InstrumentationScope, MetricPoint, SpanEvent, SpanKind, SpanLink,
    SpanRecord, SpanStatus, Store, StoreError, StoreResult, StatusCode,
};

/// One resource group as handed in by the external receiver (spec §4.2
/// point 1): a resource attribute map plus its scope groups.
#[derive(Debug, Clone, Default)]
pub struct ResourceGroup {
    pub resource: Attributes,
    pub scope_groups: Vec<ScopeGroup>,
}

#[derive(Debug, Clone, Default)]
pub struct ScopeGroup {
    pub scope: InstrumentationScope,
    pub spans: Vec<RawSpan>,
}

/// A span as received, before it is turned into the canonical [`SpanRecord`].
#[derive(Debug, Clone)]
pub struct RawSpan {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub name: String,
    pub kind: String,
    pub start_time_unix_nano: i64,
    pub end_time_unix_nano: i64,
    pub status_code: i32,
    pub status_message: String,
    pub attributes: Attributes,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
}

/// Accumulates per-(service, operation) counters within one scope group
/// (spec §4.2 point 2-3).
#[derive(Debug, Default)]
struct Aggregator {
    span_name_raw: String,
    count: u64,
    total_duration_ms: f64,
    error_count: u64,
}

pub struct Ingestor {
    store: Arc<Store>,
    config: GotelConfig,
}

impl Ingestor {
    pub fn new(store: Arc<Store>, config: GotelConfig) -> Self {
        Self { store, config }
    }

    /// Consumes one batch of resource groups, building the span list and the
    /// metric point list and handing both to the store in a single write.
    pub async fn ingest(
        &self,
        cancel: &CancellationToken,
        resource_groups: Vec<ResourceGroup>,
    ) -> StoreResult<()> {
        let mut spans = Vec::new();
        let mut metrics = Vec::new();
        let now = now_epoch_secs();

        for group in resource_groups {
            let service_name_raw = match group.resource.get("service.name") {
                Some(AttributeValue::String(s)) if !s.is_empty() => s.clone(),
                _ => "unknown".to_string(),
            };
            let service_name_metric = sanitise(&service_name_raw);

            for scope_group in group.scope_groups {
                let mut aggregators: BTreeMap<String, Aggregator> = BTreeMap::new();

                for raw in scope_group.spans {
                    if self.config.store_traces {
                        match build_span_record(&raw, &group.resource, &scope_group.scope) {
                            Ok(record) => spans.push(record),
                            Err(e) => {
                                tracing::warn!(
                                    trace_id = %raw.trace_id,
                                    span_id = %raw.span_id,
                                    error = %e,
                                    "skipping span that failed to marshal",
                                );
                            }
                        }
                    }

                    if self.config.send_metrics {
                        let span_name_metric = sanitise(&raw.name);
                        let duration_ms =
                            (raw.end_time_unix_nano - raw.start_time_unix_nano).max(0) as f64
                                / 1_000_000.0;
                        let agg = aggregators.entry(span_name_metric).or_default();
                        agg.span_name_raw = raw.name.clone();
                        agg.count += 1;
                        agg.total_duration_ms += duration_ms;
                        if raw.status_code == 2 {
                            agg.error_count += 1;
                        }
                    }
                }

                if self.config.send_metrics {
                    for (span_name_metric, agg) in aggregators {
                        let prefix = self
                            .config
                            .metric_prefix(&service_name_metric, &span_name_metric);
                        let tags = || {
                            let mut m = BTreeMap::new();
                            m.insert("service".to_string(), service_name_raw.clone());
                            m.insert("span".to_string(), agg.span_name_raw.clone());
                            m
                        };
                        metrics.push(MetricPoint {
                            name: format!("{prefix}.span_count"),
                            value: agg.count as f64,
                            timestamp: now,
                            tags: tags(),
                        });
                        if agg.count > 0 {
                            metrics.push(MetricPoint {
                                name: format!("{prefix}.duration_ms"),
                                value: agg.total_duration_ms / agg.count as f64,
                                timestamp: now,
                                tags: tags(),
                            });
                        }
                        if agg.error_count > 0 {
                            metrics.push(MetricPoint {
                                name: format!("{prefix}.error_count"),
                                value: agg.error_count as f64,
                                timestamp: now,
                                tags: tags(),
                            });
                        }
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        self.store.insert_batch(cancel, spans, metrics).await
    }
}

fn build_span_record(
    raw: &RawSpan,
    resource: &Attributes,
    scope: &InstrumentationScope,
) -> Result<SpanRecord, String> {
    if raw.trace_id.is_empty() || raw.span_id.is_empty() {
        return Err("missing trace_id or span_id".to_string());
    }
    Ok(SpanRecord {
        trace_id: raw.trace_id.clone(),
        span_id: raw.span_id.clone(),
        parent_span_id: raw.parent_span_id.clone(),
        service_name: match resource.get("service.name") {
            Some(AttributeValue::String(s)) if !s.is_empty() => s.clone(),
            _ => "unknown".to_string(),
        },
        span_name: raw.name.clone(),
        kind: SpanKind::parse_case_insensitive(&raw.kind),
        start_time_unix_nano: raw.start_time_unix_nano,
        end_time_unix_nano: raw.end_time_unix_nano,
        duration_ns: SpanRecord::clamped_duration_ns(raw.start_time_unix_nano, raw.end_time_unix_nano),
        status: SpanStatus {
            code: StatusCode(raw.status_code),
            message: raw.status_message.clone(),
        },
        resource: resource.clone(),
        scope: scope.clone(),
        attributes: raw.attributes.clone(),
        events: raw.events.clone(),
        links: raw.links.clone(),
    })
}

fn now_epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::InstrumentationScope as Scope;

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
            attributes: Attributes::new(),
            events: Vec::new(),
            links: Vec::new(),
        }
    }

    async fn new_ingestor() -> (Ingestor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db")).await.unwrap();
        let config = GotelConfig::default();
        (Ingestor::new(Arc::new(store), config), dir)
    }

    #[tokio::test]
    async fn span_missing_ids_is_skipped_not_fatal() {
        let (ingestor, _dir) = new_ingestor().await;
        let cancel = CancellationToken::new();
        let good = raw_span("t1", "s1", "", "good-op", 0, 10_000_000, 1);
        let bad = raw_span("", "", "", "bad-op", 0, 1, 1);
        let mut resource = Attributes::new();
        resource.insert("service.name".to_string(), AttributeValue::String("svc".to_string()));
        let group = ResourceGroup {
            resource,
            scope_groups: vec![ScopeGroup {
                scope: Scope::default(),
                spans: vec![good, bad],
            }],
        };
        ingestor.ingest(&cancel, vec![group]).await.unwrap();

        let stats = ingestor.store.stats(&cancel).await.unwrap();
        assert_eq!(stats.span_count, 1);
    }

    #[tokio::test]
    async fn duration_ms_metric_is_average_over_count() {
        let (ingestor, _dir) = new_ingestor().await;
        let cancel = CancellationToken::new();
        let mut resource = Attributes::new();
        resource.insert("service.name".to_string(), AttributeValue::String("svc".to_string()));
        let spans = vec![
            raw_span("t1", "a", "", "op", 0, 10_000_000, 1),
            raw_span("t1", "b", "a", "op", 0, 30_000_000, 1),
        ];
        let group = ResourceGroup {
            resource,
            scope_groups: vec![ScopeGroup { scope: Scope::default(), spans }],
        };
        ingestor.ingest(&cancel, vec![group]).await.unwrap();

        let points = ingestor
            .store
            .query_metrics(&cancel, "otel.svc.op.duration_ms", None, None, 10)
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert!((points[0].value - 20.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn error_count_metric_omitted_when_zero() {
        let (ingestor, _dir) = new_ingestor().await;
        let cancel = CancellationToken::new();
        let mut resource = Attributes::new();
        resource.insert("service.name".to_string(), AttributeValue::String("svc".to_string()));
        let group = ResourceGroup {
            resource,
            scope_groups: vec![ScopeGroup {
                scope: Scope::default(),
                spans: vec![raw_span("t1", "a", "", "op", 0, 1, 1)],
            }],
        };
        ingestor.ingest(&cancel, vec![group]).await.unwrap();

        let points = ingestor
            .store
            .query_metrics(&cancel, "otel.svc.op.error_count", None, None, 10)
            .await
            .unwrap();
        assert!(points.is_empty());
    }
}
