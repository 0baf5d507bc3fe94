//! The `JobQueue` trait: a durable, at-least-once task queue with a result
//! backend.
//!
//! Producers call [`JobQueue::enqueue`] and later [`JobQueue::poll`]. Workers
//! loop over [`JobQueue::claim`] and finish each delivery with either
//! [`JobQueue::complete`] or [`JobQueue::retry`]. A claimed job that is never
//! finished becomes visible again once its lease expires.

use std::{future::Future, time::Duration};

use chrono::{DateTime, Utc};

use crate::job::{Job, JobId, JobOutcome, JobPayload, JobStatus};

pub trait JobQueue: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Persist a new job and return its handle.
  fn enqueue(
    &self,
    payload: JobPayload,
  ) -> impl Future<Output = Result<JobId, Self::Error>> + Send + '_;

  /// Current status of a job, or `None` if the id is unknown (never issued,
  /// or its result has been purged).
  fn poll(
    &self,
    job_id: JobId,
  ) -> impl Future<Output = Result<Option<JobStatus>, Self::Error>> + Send + '_;

  /// Take the oldest available job and hide it from other workers for
  /// `lease`. Returns `None` when nothing is available.
  fn claim(
    &self,
    lease: Duration,
  ) -> impl Future<Output = Result<Option<Job>, Self::Error>> + Send + '_;

  /// Record a terminal outcome and remove the job from the broker.
  fn complete(
    &self,
    job_id: JobId,
    outcome: JobOutcome,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Hand a claimed job back for redelivery after `backoff`. Once the job has
  /// used up its delivery attempts it is failed with `error` instead.
  ///
  /// Returns `true` if the job will be redelivered.
  fn retry(
    &self,
    job_id: JobId,
    error: String,
    backoff: Duration,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Delete terminal results recorded before `before`. Returns the number
  /// removed.
  fn purge_results(
    &self,
    before: DateTime<Utc>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}
