//! Ordered list of idempotent DDL statements that bring a fresh or existing
//! database file up to the current schema (spec §4.1 "Schema (logical)").
//! Same `&[&str]`-of-idempotent-statements shape as the teacher's
//! `migrations.rs::MIGRATIONS`, adapted from ClickHouse DDL to SQLite, with
//! virtual generated columns standing in for the teacher's per-query
//! `JSONExtractString` calls — new indexed fields are added here by
//! declaring a new generated column, never by writing to it directly.

pub const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS spans (
        id                      INTEGER PRIMARY KEY AUTOINCREMENT,
        data                    TEXT NOT NULL,
        created_at              INTEGER NOT NULL DEFAULT (CAST(strftime('%s','now') AS INTEGER)),
        trace_id                TEXT GENERATED ALWAYS AS (json_extract(data, '$.trace_id')) VIRTUAL,
        span_id                 TEXT GENERATED ALWAYS AS (json_extract(data, '$.span_id')) VIRTUAL,
        parent_span_id          TEXT GENERATED ALWAYS AS (json_extract(data, '$.parent_span_id')) VIRTUAL,
        service_name            TEXT GENERATED ALWAYS AS (json_extract(data, '$.service_name')) VIRTUAL,
        span_name               TEXT GENERATED ALWAYS AS (json_extract(data, '$.span_name')) VIRTUAL,
        start_time_unix_nano    INTEGER GENERATED ALWAYS AS (json_extract(data, '$.start_time_unix_nano')) VIRTUAL,
        end_time_unix_nano      INTEGER GENERATED ALWAYS AS (json_extract(data, '$.end_time_unix_nano')) VIRTUAL,
        duration_ns             INTEGER GENERATED ALWAYS AS (json_extract(data, '$.duration_ns')) VIRTUAL,
        status_code             INTEGER GENERATED ALWAYS AS (json_extract(data, '$.status.code')) VIRTUAL,
        service_version         TEXT GENERATED ALWAYS AS (json_extract(data, '$.resource."service.version"')) VIRTUAL,
        deployment_environment  TEXT GENERATED ALWAYS AS (json_extract(data, '$.resource."deployment.environment"')) VIRTUAL,
        scope_name              TEXT GENERATED ALWAYS AS (json_extract(data, '$.scope.name')) VIRTUAL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_spans_trace_id ON spans(trace_id)",
    "CREATE INDEX IF NOT EXISTS idx_spans_service_name ON spans(service_name)",
    "CREATE INDEX IF NOT EXISTS idx_spans_span_name ON spans(span_name)",
    "CREATE INDEX IF NOT EXISTS idx_spans_start_time ON spans(start_time_unix_nano)",
    "CREATE INDEX IF NOT EXISTS idx_spans_status_code ON spans(status_code)",
    "CREATE INDEX IF NOT EXISTS idx_spans_service_span ON spans(service_name, span_name)",
    "CREATE INDEX IF NOT EXISTS idx_spans_created_at ON spans(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_spans_service_version ON spans(service_version)",
    "CREATE INDEX IF NOT EXISTS idx_spans_deployment_environment ON spans(deployment_environment)",
    "CREATE INDEX IF NOT EXISTS idx_spans_scope_name ON spans(scope_name)",
    r#"
    CREATE TABLE IF NOT EXISTS metrics (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        name       TEXT NOT NULL,
        value      REAL NOT NULL,
        timestamp  INTEGER NOT NULL,
        tags       TEXT NOT NULL DEFAULT '{}',
        service    TEXT GENERATED ALWAYS AS (json_extract(tags, '$.service')) VIRTUAL,
        span       TEXT GENERATED ALWAYS AS (json_extract(tags, '$.span')) VIRTUAL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_metrics_name ON metrics(name)",
    "CREATE INDEX IF NOT EXISTS idx_metrics_timestamp ON metrics(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_metrics_name_timestamp ON metrics(name, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_metrics_service ON metrics(service)",
];

pub fn run(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    for stmt in MIGRATIONS {
        conn.execute_batch(stmt)?;
    }
    Ok(())
}
