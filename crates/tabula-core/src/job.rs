//! Ingestion jobs: the unit of work carried by the task queue.
//!
//! A job is created when a file is uploaded and is consumed by an ingestion
//! worker. Delivery is at-least-once, so everything a job does must be safe
//! to repeat.

use std::{fmt, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Identity ────────────────────────────────────────────────────────────────

/// Opaque job handle returned to the uploader.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
  pub fn new() -> Self { Self(Uuid::new_v4()) }
}

impl Default for JobId {
  fn default() -> Self { Self::new() }
}

impl From<Uuid> for JobId {
  fn from(id: Uuid) -> Self { Self(id) }
}

impl fmt::Display for JobId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.hyphenated().fmt(f)
  }
}

impl FromStr for JobId {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Uuid::parse_str(s)
      .map(Self)
      .map_err(|_| Error::InvalidJobId(s.to_owned()))
  }
}

// ─── Payload ─────────────────────────────────────────────────────────────────

/// What a producer hands to [`crate::queue::JobQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
  /// Where the uploaded file was stored.
  pub file_path: PathBuf,
  pub user_id:   String,
}

/// A job as delivered to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
  pub job_id:      JobId,
  pub file_path:   PathBuf,
  pub user_id:     String,
  pub enqueued_at: DateTime<Utc>,
  /// Number of deliveries including the current one.
  pub attempts:    u32,
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// The value reported by a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
  pub user_id: String,
  /// Numeric column names in the file's left-to-right order.
  pub columns: Vec<String>,
}

/// Terminal outcome recorded in the result backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobOutcome {
  Succeeded { result: IngestReport },
  Failed { error: String },
}

/// What [`crate::queue::JobQueue::poll`] reports for a known job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
  /// Queued or being processed; `attempts` counts deliveries so far.
  Pending { attempts: u32 },
  Succeeded { result: IngestReport },
  Failed { error: String },
}

impl JobStatus {
  pub fn is_terminal(&self) -> bool { !matches!(self, Self::Pending { .. }) }
}

impl From<JobOutcome> for JobStatus {
  fn from(outcome: JobOutcome) -> Self {
    match outcome {
      JobOutcome::Succeeded { result } => Self::Succeeded { result },
      JobOutcome::Failed { error } => Self::Failed { error },
    }
  }
}
