//! Conversion of stored span records into the Tempo OTLP-JSON envelope
//! (spec §4.4, §6 conversion table).
//!
//! Grounded on the teacher's `handlers/traces.rs::assemble_trace`, which
//! groups flat span rows into a nested resource/scope/span tree; the tree
//! shape here is the Tempo wire shape instead of the teacher's UI-oriented
//! `SpanNode` tree.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::store::{AttributeValue, SpanKind, SpanRecord, StatusCode};

/// Groups spans by `(resource, scope)` identity and renders the Tempo
/// envelope: a list of `resourceSpans`, each with a `scopeSpans` list.
pub fn spans_to_envelope(spans: &[SpanRecord]) -> Value {
    // Keyed by a stable string form of the resource+scope so spans from the
    // same resource/scope pair land in the same group, in first-seen order.
    let mut groups: Vec<(String, String, Vec<&SpanRecord>)> = Vec::new();

    for span in spans {
        let resource_key = resource_key(span);
        let scope_key = format!("{}\u{0}{}", span.scope.name, span.scope.version);
        if let Some(entry) = groups
            .iter_mut()
            .find(|(rk, sk, _)| *rk == resource_key && *sk == scope_key)
        {
            entry.2.push(span);
        } else {
            groups.push((resource_key, scope_key, vec![span]));
        }
    }

    // Re-group by resource only, to nest scopeSpans under one resourceSpans entry.
    let mut by_resource: Vec<(String, &BTreeMap<String, AttributeValue>, Vec<(&str, &str, Vec<&SpanRecord>)>)> =
        Vec::new();
    for (resource_key, scope_key, group_spans) in &groups {
        let resource = &group_spans[0].resource;
        let (name, version) = split_scope_key(scope_key);
        if let Some(entry) = by_resource.iter_mut().find(|(rk, _, _)| rk == resource_key) {
            entry.2.push((name, version, group_spans.clone()));
        } else {
            by_resource.push((
                resource_key.clone(),
                resource,
                vec![(name, version, group_spans.clone())],
            ));
        }
    }

    let resource_spans: Vec<Value> = by_resource
        .into_iter()
        .map(|(_, resource, scope_groups)| {
            json!({
                "resource": { "attributes": attributes_to_tempo(resource) },
                "scopeSpans": scope_groups
                    .into_iter()
                    .map(|(name, version, spans)| {
                        json!({
                            "scope": { "name": name, "version": version },
                            "spans": spans.iter().map(|s| span_to_tempo(s)).collect::<Vec<_>>(),
                        })
                    })
                    .collect::<Vec<_>>(),
            })
        })
        .collect();

    json!({ "resourceSpans": resource_spans, "batches": resource_spans })
}

fn resource_key(span: &SpanRecord) -> String {
    serde_json::to_string(&span.resource).unwrap_or_default()
}

fn split_scope_key(key: &str) -> (&str, &str) {
    key.split_once('\u{0}').unwrap_or((key, ""))
}

/// Renders one span into the Tempo-shaped span object (spec §6 conversion
/// table).
pub fn span_to_tempo(span: &SpanRecord) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("traceId".to_string(), json!(span.trace_id));
    obj.insert("spanId".to_string(), json!(span.span_id));
    if !span.is_root() {
        obj.insert("parentSpanId".to_string(), json!(span.parent_span_id));
    }
    obj.insert("name".to_string(), json!(span.span_name));
    obj.insert("kind".to_string(), json!(span.kind.tempo_name()));
    obj.insert(
        "startTimeUnixNano".to_string(),
        json!(span.start_time_unix_nano.to_string()),
    );
    obj.insert(
        "endTimeUnixNano".to_string(),
        json!(span.end_time_unix_nano.to_string()),
    );
    obj.insert(
        "status".to_string(),
        json!({
            "code": span.status.code.tempo_name(),
            "message": span.status.message,
        }),
    );
    obj.insert("attributes".to_string(), attributes_to_tempo(&span.attributes));
    obj.insert(
        "events".to_string(),
        json!(span
            .events
            .iter()
            .map(|e| {
                json!({
                    "name": e.name,
                    "timeUnixNano": e.time_unix_nano.to_string(),
                    "attributes": attributes_to_tempo(&e.attributes),
                })
            })
            .collect::<Vec<_>>()),
    );
    obj.insert(
        "links".to_string(),
        json!(span
            .links
            .iter()
            .map(|l| {
                json!({
                    "traceId": l.trace_id,
                    "spanId": l.span_id,
                    "attributes": attributes_to_tempo(&l.attributes),
                })
            })
            .collect::<Vec<_>>()),
    );
    Value::Object(obj)
}

/// Attribute maps render as a key-sorted array of `{key, value}` (spec §6
/// "Attribute arrays are sorted ascending by key for determinism").
fn attributes_to_tempo(attrs: &BTreeMap<String, AttributeValue>) -> Value {
    json!(attrs
        .iter()
        .map(|(k, v)| json!({ "key": k, "value": attribute_value_to_tempo(v) }))
        .collect::<Vec<_>>())
}

fn attribute_value_to_tempo(v: &AttributeValue) -> Value {
    match v {
        AttributeValue::String(s) => json!({ "stringValue": s }),
        AttributeValue::Bool(b) => json!({ "boolValue": b }),
        AttributeValue::Int(i) => json!({ "intValue": i.to_string() }),
        AttributeValue::Double(d) => {
            if d.fract() == 0.0 {
                json!({ "intValue": (*d as i64).to_string() })
            } else {
                json!({ "doubleValue": d })
            }
        }
        AttributeValue::Bytes(b) => {
            json!({ "stringValue": b.iter().map(|b| format!("{b:02x}")).collect::<String>() })
        }
        AttributeValue::Array(_) | AttributeValue::Map(_) => {
            json!({ "stringValue": serde_json::to_string(v).unwrap_or_default() })
        }
    }
}

pub fn status_code_tempo_name(code: StatusCode) -> &'static str {
    code.tempo_name()
}

pub fn span_kind_tempo_name(kind: SpanKind) -> &'static str {
    kind.tempo_name()
}
