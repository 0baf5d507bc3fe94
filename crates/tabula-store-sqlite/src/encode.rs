//! Encoding and decoding helpers between Tabula domain types and the values
//! stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings, except queue scheduling columns
//! which hold unix milliseconds so they can be compared in SQL. Job ids are
//! hyphenated lowercase UUIDs. Job outcomes are compact JSON.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use tabula_core::{
  job::{Job, JobId, JobOutcome},
  result::{AggregateValue, ComputedResult},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── JobId ───────────────────────────────────────────────────────────────────

pub fn encode_job_id(id: JobId) -> String { id.to_string() }

pub fn decode_job_id(s: &str) -> Result<JobId> { Ok(Uuid::parse_str(s)?.into()) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── AggregateValue ──────────────────────────────────────────────────────────

pub fn encode_value(v: &AggregateValue) -> Value {
  match v {
    AggregateValue::Null => Value::Null,
    AggregateValue::Integer(i) => Value::Integer(*i),
    AggregateValue::Real(r) => Value::Real(*r),
    AggregateValue::Text(t) => Value::Text(t.clone()),
  }
}

pub fn decode_value(v: Value) -> AggregateValue {
  match v {
    Value::Null => AggregateValue::Null,
    Value::Integer(i) => AggregateValue::Integer(i),
    Value::Real(r) => AggregateValue::Real(r),
    Value::Text(t) => AggregateValue::Text(t),
    Value::Blob(b) => AggregateValue::Text(String::from_utf8_lossy(&b).into_owned()),
  }
}

// ─── JobOutcome ──────────────────────────────────────────────────────────────

pub fn encode_outcome(outcome: &JobOutcome) -> Result<String> {
  Ok(serde_json::to_string(outcome)?)
}

pub fn decode_outcome(s: &str) -> Result<JobOutcome> { Ok(serde_json::from_str(s)?) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `computed_results` row.
pub struct RawComputedResult {
  pub user_id:     String,
  pub column_name: String,
  pub operation:   String,
  pub query_text:  String,
  pub result:      Value,
  pub computed_at: String,
}

impl RawComputedResult {
  pub fn into_result(self) -> Result<ComputedResult> {
    Ok(ComputedResult {
      user_id:     self.user_id,
      column_name: self.column_name,
      operation:   self.operation,
      query_text:  self.query_text,
      result:      decode_value(self.result),
      computed_at: decode_dt(&self.computed_at)?,
    })
  }
}

/// Raw values read directly from a `queued_jobs` row.
pub struct RawJob {
  pub job_id:      String,
  pub file_path:   String,
  pub user_id:     String,
  pub enqueued_at: String,
  pub attempts:    u32,
}

impl RawJob {
  pub fn into_job(self) -> Result<Job> {
    Ok(Job {
      job_id:      decode_job_id(&self.job_id)?,
      file_path:   PathBuf::from(self.file_path),
      user_id:     self.user_id,
      enqueued_at: decode_dt(&self.enqueued_at)?,
      attempts:    self.attempts,
    })
  }
}
