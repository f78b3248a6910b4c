//! Metric-name sanitisation and Graphite-glob-to-SQL-LIKE translation.
//!
//! Generalises the glob-to-SQL translation the teacher does ad hoc in
//! `retention_enforcer::build_metric_where` (`name.replace('*', "%").replace('?', "_")`)
//! by also escaping pre-existing `%`/`_` so operation names that already
//! contain underscores keep exact-character matching.

/// Characters that get collapsed to `_` when building a metric path from a
/// raw service/span name. Tag values are never run through this.
const SANITISE_CHARS: &[char] = &[' ', '/', '\\', ':', '=', ';', '(', ')', '[', ']', '{', '}'];

/// Sanitise a raw name for use in a dot-delimited metric path.
/// Idempotent: `sanitise(sanitise(s)) == sanitise(s)`.
pub fn sanitise(raw: &str) -> String {
    raw.chars()
        .map(|c| if SANITISE_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Translate a Graphite-style wildcard pattern (`*`, `?`) into a SQL `LIKE`
/// pattern, escaping any pre-existing `%`/`_` in the input so they match
/// literally. Callers must append `ESCAPE '\\'` to the query.
pub fn escape_like_pattern(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for c in query.chars() {
        match c {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' => out.push_str("\\%"),
            '_' => out.push_str("\\_"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out
}
