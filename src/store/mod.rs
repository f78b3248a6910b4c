//! The embedded relational store (spec §4.1, component C1).
//!
//! Generalises the teacher's `config_db::ConfigDb` — a `rusqlite::Connection`
//! wrapped in a `Mutex`, opened with WAL journalling and idempotent
//! migrations — into the primary store for spans and metrics, adding the
//! process-local read/write gate and cancellation plumbing spec §4.1/§5
//! call for.

pub mod migrations;
pub mod models;

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub use models::{
    AttributeValue, Attributes, InstrumentationScope, MetricPoint, SpanEvent, SpanFilter,
    SpanKind, SpanLink, SpanRecord, SpanStatus, StatusCode, StoreStats, TraceSearchFilter,
    TraceSummary,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Embedded relational store: one writer, a handful of readers, serialised
/// in-process by `rw_gate` on top of SQLite's own WAL-mode file-level
/// serialisation (spec §5 "Concurrency discipline").
pub struct Store {
    conn: Arc<StdMutex<Connection>>,
    rw_gate: Arc<RwLock<()>>,
}

impl Store {
    /// Opens the file with WAL journalling, NORMAL sync, a 5s busy timeout,
    /// and a ~64 MiB page cache; creates the schema idempotently.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> StoreResult<Connection> {
            let conn = Connection::open(&path)?;
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\
                 PRAGMA synchronous=NORMAL;\
                 PRAGMA busy_timeout=5000;\
                 PRAGMA cache_size=-65536;",
            )?;
            migrations::run(&conn)?;
            Ok(conn)
        })
        .await
        .expect("store open task panicked")?;

        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
            rw_gate: Arc::new(RwLock::new(())),
        })
    }

    async fn with_read<F, R>(&self, cancel: &CancellationToken, f: F) -> StoreResult<R>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let _guard = self.rw_gate.read().await;
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("store mutex poisoned");
            f(&conn)
        })
        .await
        .expect("store read task panicked")
        .map_err(StoreError::from)
    }

    async fn with_write<F, R>(&self, cancel: &CancellationToken, f: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let _guard = self.rw_gate.write().await;
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().expect("store mutex poisoned");
            f(&mut conn)
        })
        .await
        .expect("store write task panicked")
        .map_err(StoreError::from)
    }

    /// Writes spans and metrics in one transaction: either everything
    /// commits or nothing does (spec §4.1, §8 property 1).
    pub async fn insert_batch(
        &self,
        cancel: &CancellationToken,
        spans: Vec<SpanRecord>,
        metrics: Vec<MetricPoint>,
    ) -> StoreResult<()> {
        self.with_write(cancel, move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("INSERT INTO spans (data) VALUES (?1)")?;
                for span in &spans {
                    let json = serde_json::to_string(span).map_err(to_sqlite_err)?;
                    stmt.execute(params![json])?;
                }
            }
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO metrics (name, value, timestamp, tags) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for point in &metrics {
                    let tags_json = serde_json::to_string(&point.tags).map_err(to_sqlite_err)?;
                    stmt.execute(params![point.name, point.value, point.timestamp, tags_json])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// All spans with the given trace id, ordered by start time ascending.
    pub async fn query_trace_by_id(
        &self,
        cancel: &CancellationToken,
        trace_id: &str,
    ) -> StoreResult<Vec<SpanRecord>> {
        let trace_id = trace_id.to_string();
        let blobs = self
            .with_read(cancel, move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT data FROM spans WHERE trace_id = ?1 ORDER BY start_time_unix_nano ASC",
                )?;
                let rows = stmt.query_map(params![trace_id], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<String>>>()
            })
            .await?;
        decode_spans(blobs)
    }

    /// Spans matching `filter`, ordered by start time descending.
    pub async fn query_spans(
        &self,
        cancel: &CancellationToken,
        filter: SpanFilter,
    ) -> StoreResult<Vec<SpanRecord>> {
        let (where_clause, mut sql_params) = build_span_where(&filter);
        let sql = format!(
            "SELECT data FROM spans {where_clause} \
             ORDER BY start_time_unix_nano DESC LIMIT ?{n} OFFSET ?{n1}",
            n = sql_params.len() + 1,
            n1 = sql_params.len() + 2,
        );
        sql_params.push(SqlValue::Integer(filter.limit as i64));
        sql_params.push(SqlValue::Integer(filter.offset as i64));

        let blobs = self
            .with_read(cancel, move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(rusqlite::params_from_iter(sql_params.iter()), |row| {
                    row.get::<_, String>(0)
                })?;
                rows.collect::<rusqlite::Result<Vec<String>>>()
            })
            .await?;
        decode_spans(blobs)
    }

    /// Trace summaries grouped by trace id, honouring service/operation/
    /// time-range filters (spec §4.1 "search_traces algorithm").
    pub async fn search_traces(
        &self,
        cancel: &CancellationToken,
        filter: TraceSearchFilter,
    ) -> StoreResult<Vec<TraceSummary>> {
        let (filter_clause, mut sql_params) = build_trace_search_where(&filter);
        let limit_idx = sql_params.len() + 1;
        let sql = format!(
            "WITH filtered AS (
                SELECT trace_id, service_name, span_name, parent_span_id,
                       start_time_unix_nano, end_time_unix_nano, status_code
                FROM spans
                {filter_clause}
            ),
            ranked AS (
                SELECT trace_id, service_name, span_name,
                    ROW_NUMBER() OVER (
                        PARTITION BY trace_id
                        ORDER BY
                            CASE WHEN parent_span_id IS NULL OR parent_span_id = ''
                                      OR parent_span_id = '0000000000000000'
                                 THEN 0 ELSE 1 END ASC,
                            start_time_unix_nano ASC
                    ) AS rn
                FROM filtered
            ),
            roots AS (
                SELECT trace_id, service_name AS root_service_name, span_name AS root_trace_name
                FROM ranked WHERE rn = 1
            ),
            agg AS (
                SELECT trace_id,
                    MIN(start_time_unix_nano) AS start_ns,
                    MAX(end_time_unix_nano) AS end_ns,
                    COUNT(*) AS span_count,
                    MAX(status_code) AS status_code
                FROM filtered
                GROUP BY trace_id
            )
            SELECT agg.trace_id, roots.root_service_name, roots.root_trace_name,
                   agg.start_ns, agg.end_ns, agg.span_count, agg.status_code
            FROM agg JOIN roots ON roots.trace_id = agg.trace_id
            ORDER BY agg.start_ns DESC
            LIMIT ?{limit_idx}"
        );
        sql_params.push(SqlValue::Integer(filter.limit as i64));

        self.with_read(cancel, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(sql_params.iter()), |row| {
                let start_ns: i64 = row.get(3)?;
                let end_ns: i64 = row.get(4)?;
                let duration_ms = ((end_ns - start_ns) as f64 / 1_000_000.0).max(0.0);
                Ok(TraceSummary {
                    trace_id: row.get(0)?,
                    root_service_name: row.get(1)?,
                    root_trace_name: row.get(2)?,
                    start_time_unix_nano: start_ns,
                    duration_ms,
                    span_count: row.get::<_, i64>(5)? as u64,
                    status_code: row.get(6)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<TraceSummary>>>()
        })
        .await
    }

    /// Metric points whose name matches `like_pattern` (already translated
    /// via `sanitize::escape_like_pattern`), within `[min_ts, max_ts]`,
    /// ordered by timestamp ascending.
    pub async fn query_metrics(
        &self,
        cancel: &CancellationToken,
        like_pattern: &str,
        min_ts: Option<i64>,
        max_ts: Option<i64>,
        limit: u32,
    ) -> StoreResult<Vec<MetricPoint>> {
        let mut conditions = vec!["name LIKE ?1 ESCAPE '\\'".to_string()];
        let mut sql_params = vec![SqlValue::Text(like_pattern.to_string())];
        if let Some(min_ts) = min_ts {
            conditions.push(format!("timestamp >= ?{}", sql_params.len() + 1));
            sql_params.push(SqlValue::Integer(min_ts));
        }
        if let Some(max_ts) = max_ts {
            conditions.push(format!("timestamp <= ?{}", sql_params.len() + 1));
            sql_params.push(SqlValue::Integer(max_ts));
        }
        let limit_idx = sql_params.len() + 1;
        let sql = format!(
            "SELECT name, value, timestamp, tags FROM metrics WHERE {} \
             ORDER BY timestamp ASC LIMIT ?{limit_idx}",
            conditions.join(" AND "),
        );
        sql_params.push(SqlValue::Integer(limit as i64));

        self.with_read(cancel, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(sql_params.iter()), |row| {
                let tags_json: String = row.get(3)?;
                let tags = serde_json::from_str(&tags_json).unwrap_or_default();
                Ok(MetricPoint {
                    name: row.get(0)?,
                    value: row.get(1)?,
                    timestamp: row.get(2)?,
                    tags,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<MetricPoint>>>()
        })
        .await
    }

    /// Distinct service names, sorted ascending.
    pub async fn list_services(&self, cancel: &CancellationToken) -> StoreResult<Vec<String>> {
        self.with_read(cancel, |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT service_name FROM spans \
                 WHERE service_name IS NOT NULL ORDER BY service_name ASC",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
        })
        .await
    }

    /// Distinct operation names for a service, sorted ascending.
    pub async fn list_operations(
        &self,
        cancel: &CancellationToken,
        service: &str,
    ) -> StoreResult<Vec<String>> {
        let service = service.to_string();
        self.with_read(cancel, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT span_name FROM spans \
                 WHERE service_name = ?1 AND span_name IS NOT NULL ORDER BY span_name ASC",
            )?;
            let rows = stmt.query_map(params![service], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
        })
        .await
    }

    pub async fn stats(&self, cancel: &CancellationToken) -> StoreResult<StoreStats> {
        self.with_read(cancel, |conn| {
            let span_count: i64 = conn.query_row("SELECT COUNT(*) FROM spans", [], |r| r.get(0))?;
            let metric_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM metrics", [], |r| r.get(0))?;
            let trace_count: i64 = conn.query_row(
                "SELECT COUNT(DISTINCT trace_id) FROM spans",
                [],
                |r| r.get(0),
            )?;
            let service_count: i64 = conn.query_row(
                "SELECT COUNT(DISTINCT service_name) FROM spans",
                [],
                |r| r.get(0),
            )?;
            Ok(StoreStats {
                span_count: span_count as u64,
                metric_count: metric_count as u64,
                trace_count: trace_count as u64,
                service_count: service_count as u64,
            })
        })
        .await
    }

    /// Deletes `spans` rows with `created_at < cutoff` and `metrics` rows
    /// with `timestamp < cutoff`, in two statements within an implicit
    /// transaction (spec §4.3). Returns total rows deleted.
    pub async fn cleanup(&self, retention: Duration) -> StoreResult<u64> {
        // Retention runs on a coarse timer; a cancellation mid-sweep would
        // leave retention partially applied with no correctness benefit, so
        // this method (unlike the read/write query paths) does not accept a
        // token — the caller's shutdown suppresses the *next* tick instead
        // (spec §4.3 "On shutdown: return without logging").
        let cutoff = now_epoch_secs() - retention.as_secs() as i64;
        self.with_write(&CancellationToken::new(), move |conn| {
            let tx = conn.transaction()?;
            let spans_deleted = tx.execute("DELETE FROM spans WHERE created_at < ?1", params![cutoff])?;
            let metrics_deleted =
                tx.execute("DELETE FROM metrics WHERE timestamp < ?1", params![cutoff])?;
            tx.commit()?;
            Ok((spans_deleted + metrics_deleted) as u64)
        })
        .await
    }

    /// Forces a WAL truncation; called on shutdown.
    pub async fn checkpoint(&self) -> StoreResult<()> {
        self.with_write(&CancellationToken::new(), |conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
        })
        .await
    }

    /// Consumes the store, releasing the connection. Callers sharing the
    /// store via `Arc` must unwrap it first; `main` does this once both the
    /// retention loop and the gateway have exited.
    pub fn close(self) {
        drop(self);
    }
}

fn now_epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn to_sqlite_err(e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

fn decode_spans(blobs: Vec<String>) -> StoreResult<Vec<SpanRecord>> {
    blobs
        .into_iter()
        .map(|blob| serde_json::from_str(&blob).map_err(StoreError::from))
        .collect()
}

/// Builds the WHERE clause and bound parameters for `query_spans`.
fn build_span_where(filter: &SpanFilter) -> (String, Vec<SqlValue>) {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if let Some(service) = &filter.service {
        conditions.push(format!("service_name = ?{}", params.len() + 1));
        params.push(SqlValue::Text(service.clone()));
    }
    if let Some(operation) = &filter.operation {
        conditions.push(format!("span_name = ?{}", params.len() + 1));
        params.push(SqlValue::Text(operation.clone()));
    }
    if let Some(min_start_ns) = filter.min_start_ns {
        conditions.push(format!("start_time_unix_nano >= ?{}", params.len() + 1));
        params.push(SqlValue::Integer(min_start_ns));
    }
    if let Some(max_start_ns) = filter.max_start_ns {
        conditions.push(format!("start_time_unix_nano <= ?{}", params.len() + 1));
        params.push(SqlValue::Integer(max_start_ns));
    }
    if let Some(status_code) = filter.status_code {
        conditions.push(format!("status_code = ?{}", params.len() + 1));
        params.push(SqlValue::Integer(status_code as i64));
    }
    if let Some(min_ms) = filter.min_duration_ms {
        conditions.push(format!("duration_ns >= ?{}", params.len() + 1));
        params.push(SqlValue::Real(min_ms * 1_000_000.0));
    }
    if let Some(max_ms) = filter.max_duration_ms {
        conditions.push(format!("duration_ns <= ?{}", params.len() + 1));
        params.push(SqlValue::Real(max_ms * 1_000_000.0));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    (clause, params)
}

fn build_trace_search_where(filter: &TraceSearchFilter) -> (String, Vec<SqlValue>) {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if let Some(service) = &filter.service {
        conditions.push(format!("service_name = ?{}", params.len() + 1));
        params.push(SqlValue::Text(service.clone()));
    }
    if let Some(operation) = &filter.operation {
        conditions.push(format!("span_name = ?{}", params.len() + 1));
        params.push(SqlValue::Text(operation.clone()));
    }
    if let Some(min_start_ns) = filter.min_start_ns {
        conditions.push(format!("start_time_unix_nano >= ?{}", params.len() + 1));
        params.push(SqlValue::Integer(min_start_ns));
    }
    if let Some(max_start_ns) = filter.max_start_ns {
        conditions.push(format!("start_time_unix_nano <= ?{}", params.len() + 1));
        params.push(SqlValue::Integer(max_start_ns));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    (clause, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{Attributes, InstrumentationScope, SpanStatus};

    fn test_span(trace_id: &str, span_id: &str, parent: &str, name: &str, start: i64, end: i64) -> SpanRecord {
        SpanRecord {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            parent_span_id: parent.to_string(),
            service_name: "search-service".to_string(),
            span_name: name.to_string(),
            kind: SpanKind::Server,
            start_time_unix_nano: start,
            end_time_unix_nano: end,
            duration_ns: (end - start).max(0),
            status: SpanStatus { code: StatusCode::OK, message: String::new() },
            resource: Attributes::new(),
            scope: InstrumentationScope::default(),
            attributes: Attributes::new(),
            events: Vec::new(),
            links: Vec::new(),
        }
    }

    async fn open_temp() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let store = Store::open(&path).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn atomicity_batch_is_all_or_nothing() {
        let (store, _dir) = open_temp().await;
        let cancel = CancellationToken::new();
        let spans = vec![test_span("t1", "s1", "", "root-operation", 10, 20)];
        let metrics = vec![MetricPoint {
            name: "otel.svc.op.span_count".to_string(),
            value: 1.0,
            timestamp: 100,
            tags: Default::default(),
        }];
        store.insert_batch(&cancel, spans, metrics).await.unwrap();
        let stats = store.stats(&cancel).await.unwrap();
        assert_eq!(stats.span_count, 1);
        assert_eq!(stats.metric_count, 1);
    }

    #[tokio::test]
    async fn root_representative_prefers_true_root_over_earlier_child() {
        let (store, _dir) = open_temp().await;
        let cancel = CancellationToken::new();
        // R (parent=root, t=10), A (parent=R, t=5) — A starts earlier but isn't root.
        let spans = vec![
            test_span("trace-1", "R", "", "R", 10, 50),
            test_span("trace-1", "A", "R", "A", 5, 15),
        ];
        store.insert_batch(&cancel, spans, vec![]).await.unwrap();

        let summaries = store
            .search_traces(&cancel, TraceSearchFilter { limit: 20, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].root_trace_name, "R");
        assert_eq!(summaries[0].span_count, 2);
    }

    #[tokio::test]
    async fn cleanup_is_monotone() {
        let (store, _dir) = open_temp().await;
        let cancel = CancellationToken::new();
        let spans = vec![test_span("t1", "s1", "", "op", 1, 2)];
        store.insert_batch(&cancel, spans, vec![]).await.unwrap();

        let deleted_first = store.cleanup(Duration::from_secs(0)).await.unwrap();
        assert_eq!(deleted_first, 1);
        let deleted_second = store.cleanup(Duration::from_secs(0)).await.unwrap();
        assert_eq!(deleted_second, 0);
    }

    #[tokio::test]
    async fn like_pattern_escaping_matches_literal_underscore() {
        let (store, _dir) = open_temp().await;
        let cancel = CancellationToken::new();
        let metrics = vec![
            MetricPoint { name: "a_b.c".to_string(), value: 1.0, timestamp: 1, tags: Default::default() },
            MetricPoint { name: "aXb.c".to_string(), value: 1.0, timestamp: 1, tags: Default::default() },
        ];
        store.insert_batch(&cancel, vec![], metrics).await.unwrap();

        let pattern = crate::sanitize::escape_like_pattern("a_b.*");
        let results = store.query_metrics(&cancel, &pattern, None, None, 100).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "a_b.c");
    }

    #[tokio::test]
    async fn question_mark_wildcard_matches_single_char_variants_only() {
        let (store, _dir) = open_temp().await;
        let cancel = CancellationToken::new();
        let metrics = vec![
            MetricPoint { name: "otel.service.operation.metric".to_string(), value: 1.0, timestamp: 1, tags: Default::default() },
            MetricPoint { name: "otel.service.operZtion.metric".to_string(), value: 1.0, timestamp: 1, tags: Default::default() },
            MetricPoint { name: "otel.service.operXXtion.metric".to_string(), value: 1.0, timestamp: 1, tags: Default::default() },
        ];
        store.insert_batch(&cancel, vec![], metrics).await.unwrap();

        let pattern = crate::sanitize::escape_like_pattern("otel.service.oper?tion.metric");
        let mut results = store
            .query_metrics(&cancel, &pattern, None, None, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect::<Vec<_>>();
        results.sort();
        assert_eq!(results, vec!["otel.service.operZtion.metric", "otel.service.operation.metric"]);
    }
}
