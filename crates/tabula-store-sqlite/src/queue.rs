//! [`SqliteQueue`]: a durable task queue on SQLite.
//!
//! The broker (`queued_jobs`) and the result backend (`job_results`) may live
//! in the same file or in two files; in the latter case the result database
//! is ATTACHed to the broker connection as schema `results`. Several worker
//! processes may share the files: claims run in `IMMEDIATE` transactions so
//! only one of them wins each job.

use std::{path::Path, time::Duration};

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use tabula_core::{
  job::{Job, JobId, JobOutcome, JobPayload, JobStatus},
  queue::JobQueue,
};
use tracing::{debug, warn};

use crate::{
  Error, Result,
  encode::{RawJob, decode_outcome, encode_dt, encode_job_id, encode_outcome},
  schema::{BROKER_SCHEMA, results_schema},
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of deliveries before a job is failed for good.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// ─── Queue ───────────────────────────────────────────────────────────────────

/// A task queue backed by SQLite.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteQueue {
  conn:         tokio_rusqlite::Connection,
  /// Schema holding `job_results`: `main` or `results`.
  results:      &'static str,
  max_attempts: u32,
}

impl SqliteQueue {
  /// Open the broker at `broker` and the result backend at `result_backend`.
  /// Passing the same path for both keeps everything in one file.
  pub async fn open(
    broker: impl AsRef<Path>,
    result_backend: impl AsRef<Path>,
    max_attempts: u32,
  ) -> Result<Self> {
    let broker = broker.as_ref();
    let result_backend = result_backend.as_ref();
    let conn = tokio_rusqlite::Connection::open(broker).await?;

    if broker == result_backend {
      Self::init(conn, None, max_attempts).await
    } else {
      let attach = result_backend.to_string_lossy().into_owned();
      Self::init(conn, Some(attach), max_attempts).await
    }
  }

  /// Open an in-memory queue for tests.
  pub async fn open_in_memory(max_attempts: u32) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, None, max_attempts).await
  }

  async fn init(
    conn: tokio_rusqlite::Connection,
    attach: Option<String>,
    max_attempts: u32,
  ) -> Result<Self> {
    let results = if attach.is_some() { "results" } else { "main" };

    conn
      .call(move |conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        if let Some(path) = attach {
          conn.execute("ATTACH DATABASE ?1 AS results", rusqlite::params![path])?;
        }
        conn.execute_batch(BROKER_SCHEMA)?;
        conn.execute_batch(&results_schema(results))?;
        Ok(())
      })
      .await?;

    Ok(Self { conn, results, max_attempts: max_attempts.max(1) })
  }
}

/// Record `outcome` in the result backend and drop the job from the broker.
/// Runs inside the caller's transaction.
fn finish_tx(
  tx: &rusqlite::Transaction<'_>,
  results: &str,
  job_id: &str,
  outcome_json: &str,
) -> rusqlite::Result<()> {
  tx.execute(
    &format!(
      "INSERT OR REPLACE INTO {results}.job_results (job_id, outcome_json, finished_at)
       VALUES (?1, ?2, ?3)"
    ),
    rusqlite::params![job_id, outcome_json, Utc::now().timestamp_millis()],
  )?;
  tx.execute("DELETE FROM queued_jobs WHERE job_id = ?1", rusqlite::params![job_id])?;
  Ok(())
}

fn exhausted(attempts: u32, last_error: Option<String>) -> JobOutcome {
  let error = match last_error {
    Some(e) => format!("delivery attempts exhausted after {attempts} tries: {e}"),
    None => format!("delivery attempts exhausted after {attempts} tries"),
  };
  JobOutcome::Failed { error }
}

fn json_err(e: serde_json::Error) -> tokio_rusqlite::Error {
  tokio_rusqlite::Error::Other(Box::new(e))
}

fn millis(d: Duration) -> i64 { i64::try_from(d.as_millis()).unwrap_or(i64::MAX) }

// ─── JobQueue impl ───────────────────────────────────────────────────────────

impl JobQueue for SqliteQueue {
  type Error = Error;

  async fn enqueue(&self, payload: JobPayload) -> Result<JobId> {
    let job_id = JobId::new();
    let now = Utc::now();

    let id_str = encode_job_id(job_id);
    let path_str = payload.file_path.to_string_lossy().into_owned();
    let user_id = payload.user_id;
    let at_str = encode_dt(now);
    let available_at = now.timestamp_millis();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO queued_jobs (job_id, file_path, user_id, enqueued_at, available_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![id_str, path_str, user_id, at_str, available_at],
        )?;
        Ok(())
      })
      .await?;

    debug!(%job_id, "job enqueued");
    Ok(job_id)
  }

  async fn poll(&self, job_id: JobId) -> Result<Option<JobStatus>> {
    let id_str = encode_job_id(job_id);
    let results = self.results;

    let (outcome, attempts): (Option<String>, Option<u32>) = self
      .conn
      .call(move |conn| {
        let outcome: Option<String> = conn
          .query_row(
            &format!("SELECT outcome_json FROM {results}.job_results WHERE job_id = ?1"),
            rusqlite::params![id_str],
            |r| r.get(0),
          )
          .optional()?;
        if outcome.is_some() {
          return Ok((outcome, None));
        }

        let attempts: Option<u32> = conn
          .query_row(
            "SELECT attempts FROM queued_jobs WHERE job_id = ?1",
            rusqlite::params![id_str],
            |r| r.get(0),
          )
          .optional()?;
        Ok((None, attempts))
      })
      .await?;

    if let Some(json) = outcome {
      return Ok(Some(decode_outcome(&json)?.into()));
    }
    Ok(attempts.map(|attempts| JobStatus::Pending { attempts }))
  }

  async fn claim(&self, lease: Duration) -> Result<Option<Job>> {
    let results = self.results;
    let max_attempts = self.max_attempts;
    let now = Utc::now().timestamp_millis();
    let lease_until = now.saturating_add(millis(lease));

    let raw: Option<RawJob> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        loop {
          let row = tx
            .query_row(
              "SELECT job_id, file_path, user_id, enqueued_at, attempts, last_error
               FROM queued_jobs
               WHERE available_at <= ?1
               ORDER BY rowid
               LIMIT 1",
              rusqlite::params![now],
              |row| {
                Ok((
                  RawJob {
                    job_id:      row.get(0)?,
                    file_path:   row.get(1)?,
                    user_id:     row.get(2)?,
                    enqueued_at: row.get(3)?,
                    attempts:    row.get(4)?,
                  },
                  row.get::<_, Option<String>>(5)?,
                ))
              },
            )
            .optional()?;

          let Some((mut job, last_error)) = row else {
            tx.commit()?;
            return Ok(None);
          };

          // A lease that keeps expiring means the worker keeps dying.
          if job.attempts >= max_attempts {
            let outcome = exhausted(job.attempts, last_error);
            let json = serde_json::to_string(&outcome).map_err(json_err)?;
            finish_tx(&tx, results, &job.job_id, &json)?;
            continue;
          }

          job.attempts += 1;
          tx.execute(
            "UPDATE queued_jobs SET attempts = ?2, available_at = ?3 WHERE job_id = ?1",
            rusqlite::params![job.job_id, job.attempts, lease_until],
          )?;
          tx.commit()?;
          return Ok(Some(job));
        }
      })
      .await?;

    raw.map(RawJob::into_job).transpose()
  }

  async fn complete(&self, job_id: JobId, outcome: JobOutcome) -> Result<()> {
    let id_str = encode_job_id(job_id);
    let json = encode_outcome(&outcome)?;
    let results = self.results;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        finish_tx(&tx, results, &id_str, &json)?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(())
  }

  async fn retry(&self, job_id: JobId, error: String, backoff: Duration) -> Result<bool> {
    let id_str = encode_job_id(job_id);
    let results = self.results;
    let max_attempts = self.max_attempts;
    let available_at = Utc::now().timestamp_millis().saturating_add(millis(backoff));

    let requeued = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let attempts: Option<u32> = tx
          .query_row(
            "SELECT attempts FROM queued_jobs WHERE job_id = ?1",
            rusqlite::params![id_str],
            |r| r.get(0),
          )
          .optional()?;

        let requeued = match attempts {
          // Already finished elsewhere; nothing to hand back.
          None => false,
          Some(attempts) if attempts >= max_attempts => {
            let json =
              serde_json::to_string(&exhausted(attempts, Some(error))).map_err(json_err)?;
            finish_tx(&tx, results, &id_str, &json)?;
            false
          }
          Some(_) => {
            tx.execute(
              "UPDATE queued_jobs SET available_at = ?2, last_error = ?3 WHERE job_id = ?1",
              rusqlite::params![id_str, available_at, error],
            )?;
            true
          }
        };

        tx.commit()?;
        Ok(requeued)
      })
      .await?;

    if !requeued {
      warn!(%job_id, "job will not be redelivered");
    }
    Ok(requeued)
  }

  async fn purge_results(&self, before: DateTime<Utc>) -> Result<usize> {
    let results = self.results;
    let cutoff = before.timestamp_millis();

    let purged = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          &format!("DELETE FROM {results}.job_results WHERE finished_at < ?1"),
          rusqlite::params![cutoff],
        )?)
      })
      .await?;

    Ok(purged)
  }
}
