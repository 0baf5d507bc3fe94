//! SQL schema for the Tabula SQLite databases.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Numeric store DDL; idempotent thanks to `IF NOT EXISTS`.
pub const STORE_SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- Replaced wholesale per user on every successful ingestion.
-- Rows are never updated individually.
CREATE TABLE IF NOT EXISTS observations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     TEXT NOT NULL,
    column_name TEXT NOT NULL,
    value       REAL NOT NULL
);

-- One row per user: the most recent computation.
CREATE TABLE IF NOT EXISTS computed_results (
    user_id     TEXT PRIMARY KEY,
    column_name TEXT NOT NULL,
    operation   TEXT NOT NULL,
    query_text  TEXT NOT NULL,
    result,                        -- untyped: NULL, INTEGER, REAL or TEXT
    computed_at TEXT NOT NULL      -- ISO 8601 UTC
);

CREATE INDEX IF NOT EXISTS observations_user_column_idx
    ON observations(user_id, column_name);

PRAGMA user_version = 1;
";

/// Broker DDL. Jobs stay here from enqueue until they reach a terminal
/// outcome; rowid order is enqueue order.
pub const BROKER_SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS queued_jobs (
    job_id       TEXT PRIMARY KEY,
    file_path    TEXT NOT NULL,
    user_id      TEXT NOT NULL,
    enqueued_at  TEXT NOT NULL,              -- ISO 8601 UTC
    available_at INTEGER NOT NULL,           -- unix millis; leases push it forward
    attempts     INTEGER NOT NULL DEFAULT 0, -- deliveries so far
    last_error   TEXT
);

CREATE INDEX IF NOT EXISTS queued_jobs_available_idx
    ON queued_jobs(available_at);
";

/// Result backend DDL for the given schema (`main` or an attached database).
pub fn results_schema(schema: &str) -> String {
  format!(
    "
PRAGMA {schema}.journal_mode = WAL;

CREATE TABLE IF NOT EXISTS {schema}.job_results (
    job_id       TEXT PRIMARY KEY,
    outcome_json TEXT NOT NULL,              -- serialised JobOutcome
    finished_at  INTEGER NOT NULL            -- unix millis
);

CREATE INDEX IF NOT EXISTS {schema}.job_results_finished_idx
    ON job_results(finished_at);
"
  )
}
