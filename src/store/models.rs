use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A dynamically-typed attribute value, per the design note in spec §9:
/// spans arrive as heterogeneous attribute maps, represented here with a
/// tagged-variant value at the API boundary and persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    Int(i64),
    Double(f64),
    Bytes(Vec<u8>),
    Array(Vec<AttributeValue>),
    Map(BTreeMap<String, AttributeValue>),
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// One of the six span kinds recognised by the Tempo conversion table (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
    Unspecified,
}

impl SpanKind {
    pub fn parse_case_insensitive(raw: &str) -> SpanKind {
        match raw.to_ascii_lowercase().as_str() {
            "internal" => SpanKind::Internal,
            "server" => SpanKind::Server,
            "client" => SpanKind::Client,
            "producer" => SpanKind::Producer,
            "consumer" => SpanKind::Consumer,
            _ => SpanKind::Unspecified,
        }
    }

    pub fn tempo_name(self) -> &'static str {
        match self {
            SpanKind::Internal => "SPAN_KIND_INTERNAL",
            SpanKind::Server => "SPAN_KIND_SERVER",
            SpanKind::Client => "SPAN_KIND_CLIENT",
            SpanKind::Producer => "SPAN_KIND_PRODUCER",
            SpanKind::Consumer => "SPAN_KIND_CONSUMER",
            SpanKind::Unspecified => "SPAN_KIND_UNSPECIFIED",
        }
    }
}

/// `status.code` as carried in the span blob: 0 unset, 1 ok, 2 error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const UNSET: StatusCode = StatusCode(0);
    pub const OK: StatusCode = StatusCode(1);
    pub const ERROR: StatusCode = StatusCode(2);

    /// §6 conversion table: 1 → OK, 2 → ERROR, anything else → UNSET.
    /// This resolves spec §9's "Open question — status code semantics" in
    /// favour of the newer 1→OK mapping.
    pub fn tempo_name(self) -> &'static str {
        match self.0 {
            1 => "STATUS_CODE_OK",
            2 => "STATUS_CODE_ERROR",
            _ => "STATUS_CODE_UNSET",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanStatus {
    pub code: StatusCode,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub time_unix_nano: i64,
    #[serde(default)]
    pub attributes: Attributes,
}

impl SpanEvent {
    /// An event is recognised as an exception event if its name
    /// case-insensitively contains "exception" (spec §3 invariants).
    pub fn is_exception(&self) -> bool {
        self.name.to_ascii_lowercase().contains("exception")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanLink {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub trace_state: String,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentationScope {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// The canonical span shape: the authoritative on-disk form is this struct
/// serialised to JSON in the `spans.data` column. Every indexed column is a
/// deterministic projection of this blob (spec §3 invariants).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default)]
    pub parent_span_id: String,
    pub service_name: String,
    pub span_name: String,
    pub kind: SpanKind,
    pub start_time_unix_nano: i64,
    pub end_time_unix_nano: i64,
    pub duration_ns: i64,
    pub status: SpanStatus,
    #[serde(default)]
    pub resource: Attributes,
    #[serde(default)]
    pub scope: InstrumentationScope,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub events: Vec<SpanEvent>,
    #[serde(default)]
    pub links: Vec<SpanLink>,
}

impl SpanRecord {
    /// `duration_ns = end - start`, clamped to >= 0 (spec §3 invariant).
    pub fn clamped_duration_ns(start: i64, end: i64) -> i64 {
        (end - start).max(0)
    }

    pub fn resource_string(&self, key: &str) -> Option<String> {
        match self.resource.get(key) {
            Some(AttributeValue::String(s)) => Some(s.clone()),
            Some(other) => Some(attribute_to_display_string(other)),
            None => None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_empty() || is_all_zero_hex(&self.parent_span_id)
    }
}

pub fn is_all_zero_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c == '0')
}

pub fn attribute_to_display_string(v: &AttributeValue) -> String {
    match v {
        AttributeValue::String(s) => s.clone(),
        AttributeValue::Bool(b) => b.to_string(),
        AttributeValue::Int(i) => i.to_string(),
        AttributeValue::Double(d) => d.to_string(),
        AttributeValue::Bytes(b) => hex_encode(b),
        AttributeValue::Array(_) | AttributeValue::Map(_) => {
            serde_json::to_string(v).unwrap_or_default()
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// One row per (metric name, timestamp) emission (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub timestamp: i64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Filter accepted by `Store::query_spans` (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct SpanFilter {
    pub service: Option<String>,
    pub operation: Option<String>,
    pub min_start_ns: Option<i64>,
    pub max_start_ns: Option<i64>,
    pub status_code: Option<i32>,
    pub min_duration_ms: Option<f64>,
    pub max_duration_ms: Option<f64>,
    pub limit: u32,
    pub offset: u32,
}

/// Filter accepted by `Store::search_traces` (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct TraceSearchFilter {
    pub service: Option<String>,
    pub operation: Option<String>,
    pub min_start_ns: Option<i64>,
    pub max_start_ns: Option<i64>,
    pub limit: u32,
}

/// A trace summary derived at query time (spec §3), never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSummary {
    pub trace_id: String,
    pub root_service_name: String,
    pub root_trace_name: String,
    pub start_time_unix_nano: i64,
    pub duration_ms: f64,
    pub span_count: u64,
    pub status_code: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreStats {
    pub span_count: u64,
    pub metric_count: u64,
    pub trace_count: u64,
    pub service_count: u64,
}
