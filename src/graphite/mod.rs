//! Graphite-compatible `aliasByNode`/`aliasSub` parsing and evaluation
//! (spec §4.5, component C5).
//!
//! Pure parsing/evaluation lives here, the way the teacher keeps PromQL
//! evaluation (`promql.rs`) separate from the ClickHouse-facing handler code
//! in `handlers/metrics.rs` — this module never touches the store.

use regex::Regex;

const MAX_REGEX_LEN: usize = 512;

/// A parsed Graphite target expression: a literal wildcard pattern,
/// optionally wrapped in one level of `aliasByNode`/`aliasSub` (which may
/// themselves nest one level, per spec §4.5).
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(String),
    AliasByNode(Box<Expr>, Vec<i64>),
    AliasSub(Box<Expr>, String, String),
}

impl Expr {
    /// Parses a raw target string. Anything that doesn't look like a
    /// recognised function call is treated as a literal wildcard pattern —
    /// "not a function call" is not an error (spec §4.5 failure semantics).
    pub fn parse(raw: &str) -> Expr {
        let trimmed = raw.trim();
        match parse_call(trimmed) {
            Some((name, args)) if name == "aliasByNode" && !args.is_empty() => {
                let inner = Expr::parse(&args[0]);
                let indices = args[1..]
                    .iter()
                    .filter_map(|a| a.trim().parse::<i64>().ok())
                    .collect();
                Expr::AliasByNode(Box::new(inner), indices)
            }
            Some((name, args)) if name == "aliasSub" && args.len() >= 3 => {
                let inner = Expr::parse(&args[0]);
                Expr::AliasSub(Box::new(inner), args[1].trim().to_string(), args[2].trim().to_string())
            }
            _ => Expr::Literal(trimmed.to_string()),
        }
    }

    /// The innermost literal wildcard pattern, used to drive the store query.
    pub fn base_pattern(&self) -> &str {
        match self {
            Expr::Literal(s) => s,
            Expr::AliasByNode(inner, _) => inner.base_pattern(),
            Expr::AliasSub(inner, _, _) => inner.base_pattern(),
        }
    }

    /// Applies this expression's alias transforms (innermost first) to a
    /// concrete metric name returned by the store.
    pub fn rename(&self, metric_name: &str) -> String {
        match self {
            Expr::Literal(_) => metric_name.to_string(),
            Expr::AliasByNode(inner, indices) => alias_by_node(&inner.rename(metric_name), indices),
            Expr::AliasSub(inner, search, replace) => {
                alias_sub(&inner.rename(metric_name), search, replace)
            }
        }
    }
}

fn alias_by_node(name: &str, indices: &[i64]) -> String {
    let parts: Vec<&str> = name.split('.').collect();
    let len = parts.len() as i64;
    let selected: Vec<&str> = indices
        .iter()
        .filter_map(|&i| {
            let idx = if i < 0 { len + i } else { i };
            if idx >= 0 && idx < len {
                Some(parts[idx as usize])
            } else {
                None
            }
        })
        .collect();
    if selected.is_empty() {
        name.to_string()
    } else {
        selected.join(".")
    }
}

fn alias_sub(name: &str, pattern: &str, replacement: &str) -> String {
    if pattern.len() > MAX_REGEX_LEN {
        return name.to_string();
    }
    match Regex::new(pattern) {
        Ok(re) => re.replace_all(name, replacement).into_owned(),
        Err(_) => name.to_string(),
    }
}

/// Parses `name(arg1, arg2, ...)`, honouring parenthesis depth when
/// splitting arguments so nested calls parse correctly. Returns `None` if
/// `raw` isn't shaped like a call.
fn parse_call(raw: &str) -> Option<(String, Vec<String>)> {
    let open = raw.find('(')?;
    if !raw.ends_with(')') {
        return None;
    }
    let name = raw[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    let inner = &raw[open + 1..raw.len() - 1];
    Some((name.to_string(), split_top_level_commas(inner)))
}

/// Splits `s` on top-level commas, treating parenthesis nesting as
/// non-splittable (spec §4.5 "Top-level comma splitting").
fn split_top_level_commas(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Number of dot-separated segments, used by the render path's loosened
/// wildcard filter (spec §4.5 "a metric is only kept if its segment count
/// is >= the pattern's segment count").
pub fn segment_count(s: &str) -> usize {
    s.split('.').count()
}

/// Selects distinct nodes at `depth` (number of dot-separated segments in
/// the original query) from a list of concrete metric names, sorted
/// ascending (spec §4.5 "Find").
pub fn distinct_nodes_at_depth(names: &[String], depth: usize) -> Vec<String> {
    let mut nodes: Vec<String> = names
        .iter()
        .map(|name| {
            name.splitn(depth + 1, '.')
                .take(depth)
                .collect::<Vec<_>>()
                .join(".")
        })
        .collect();
    nodes.sort();
    nodes.dedup();
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_round_trips() {
        let expr = Expr::parse("otel.*.checkout.duration_ms");
        assert_eq!(expr.base_pattern(), "otel.*.checkout.duration_ms");
        assert_eq!(expr.rename("otel.svc.checkout.duration_ms"), "otel.svc.checkout.duration_ms");
    }

    #[test]
    fn alias_by_node_selects_and_joins() {
        let expr = Expr::parse("aliasByNode(otel.*.checkout.duration_ms, 1, 2)");
        assert_eq!(expr.base_pattern(), "otel.*.checkout.duration_ms");
        assert_eq!(expr.rename("otel.svc.checkout.duration_ms"), "svc.checkout");
    }

    #[test]
    fn alias_by_node_negative_index_counts_from_end() {
        let expr = Expr::parse("aliasByNode(otel.*.checkout.duration_ms, -1)");
        assert_eq!(expr.rename("otel.svc.checkout.duration_ms"), "duration_ms");
    }

    #[test]
    fn alias_by_node_out_of_range_is_skipped_and_empty_falls_back() {
        let expr = Expr::parse("aliasByNode(otel.svc.op, 99)");
        assert_eq!(expr.rename("otel.svc.op"), "otel.svc.op");
    }

    #[test]
    fn alias_sub_applies_regex_replacement() {
        let expr = Expr::parse("aliasSub(otel.*.checkout.duration_ms, duration_ms$, latency)");
        assert_eq!(expr.rename("otel.svc.checkout.duration_ms"), "otel.svc.checkout.latency");
    }

    #[test]
    fn alias_sub_oversized_regex_is_left_unchanged() {
        let huge = "a".repeat(600);
        let expr = Expr::parse(&format!("aliasSub(otel.svc.op, {huge}, x)"));
        assert_eq!(expr.rename("otel.svc.op"), "otel.svc.op");
    }

    #[test]
    fn alias_sub_invalid_regex_is_left_unchanged() {
        let expr = Expr::parse("aliasSub(otel.svc.op, (unterminated, x)");
        assert_eq!(expr.rename("otel.svc.op"), "otel.svc.op");
    }

    #[test]
    fn nested_alias_sub_over_alias_by_node_composes() {
        let expr = Expr::parse("aliasSub(aliasByNode(otel.*.checkout.duration_ms, 1, 2), \\., _)");
        assert_eq!(expr.base_pattern(), "otel.*.checkout.duration_ms");
        assert_eq!(expr.rename("otel.svc.checkout.duration_ms"), "svc_checkout");
    }

    #[test]
    fn malformed_function_call_falls_back_to_literal() {
        let expr = Expr::parse("aliasByNode(otel.svc.op");
        assert_eq!(expr.base_pattern(), "aliasByNode(otel.svc.op");
    }

    #[test]
    fn distinct_nodes_respects_query_depth() {
        let names = vec![
            "otel.svc.a.duration_ms".to_string(),
            "otel.svc.b.duration_ms".to_string(),
            "otel.svc.a.span_count".to_string(),
        ];
        let nodes = distinct_nodes_at_depth(&names, 3);
        assert_eq!(nodes, vec!["otel.svc.a", "otel.svc.b"]);
    }
}
