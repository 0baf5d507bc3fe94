//! The ingestion worker and its pool.
//!
//! A worker repeatedly claims a job, reads the file, replaces the user's
//! observations, and records the outcome. File and parse errors fail the job;
//! store errors hand it back to the queue. Because a job may be delivered
//! more than once, processing is a pure function of the file and the user:
//! running it twice leaves the same observations as running it once.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tabula_core::{
  job::{IngestReport, Job, JobOutcome},
  queue::JobQueue,
  store::NumericStore,
};
use tokio::{sync::watch, task::JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::{error::IngestError, reader::read_table};

/// Tuning for a worker loop.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
  /// How long a claimed job stays hidden from other workers.
  pub lease:            Duration,
  /// Delay before a job that hit a store error is redelivered.
  pub retry_backoff:    Duration,
  /// Sleep between claims when the queue is empty.
  pub poll_interval:    Duration,
  /// Age after which finished job results are purged. `None` keeps them.
  pub result_retention: Option<Duration>,
}

impl Default for WorkerOptions {
  fn default() -> Self {
    Self {
      lease:            Duration::from_secs(300),
      retry_backoff:    Duration::from_secs(5),
      poll_interval:    Duration::from_millis(500),
      result_retention: Some(Duration::from_secs(24 * 60 * 60)),
    }
  }
}

pub struct IngestionWorker<S, J> {
  store:   Arc<S>,
  queue:   Arc<J>,
  options: WorkerOptions,
}

impl<S, J> IngestionWorker<S, J>
where
  S: NumericStore + 'static,
  J: JobQueue + 'static,
{
  pub fn new(store: Arc<S>, queue: Arc<J>, options: WorkerOptions) -> Self {
    Self { store, queue, options }
  }

  /// Parse the job's file and replace the user's observations with its
  /// numeric columns.
  #[instrument(skip_all, fields(job_id = %job.job_id, user_id = %job.user_id, attempt = job.attempts))]
  pub async fn process(&self, job: &Job) -> Result<IngestReport, IngestError> {
    let path = job.file_path.clone();
    let table = tokio::task::spawn_blocking(move || read_table(&path)).await??;

    let columns = table.numeric_columns();
    let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    if names.is_empty() {
      info!(rows = table.rows(), "file has no numeric columns");
    }

    let inserted = self
      .store
      .replace_observations(job.user_id.clone(), columns)
      .await
      .map_err(|e| IngestError::Store(Box::new(e)))?;

    info!(columns = ?names, inserted, "observations replaced");
    Ok(IngestReport { user_id: job.user_id.clone(), columns: names })
  }

  /// Claim and finish at most one job. Returns `true` if a job was handled.
  pub async fn run_once(&self) -> Result<bool, J::Error> {
    let Some(job) = self.queue.claim(self.options.lease).await? else {
      return Ok(false);
    };

    match self.process(&job).await {
      Ok(report) => {
        self
          .queue
          .complete(job.job_id, JobOutcome::Succeeded { result: report })
          .await?;
      }
      Err(e) if e.is_retryable() => {
        warn!(job_id = %job.job_id, attempt = job.attempts, error = %e, "ingestion failed, retrying");
        self
          .queue
          .retry(job.job_id, e.to_string(), self.options.retry_backoff)
          .await?;
      }
      Err(e) => {
        warn!(job_id = %job.job_id, error = %e, "ingestion failed");
        self
          .queue
          .complete(job.job_id, JobOutcome::Failed { error: e.to_string() })
          .await?;
      }
    }
    Ok(true)
  }

  /// Loop over [`Self::run_once`] until `shutdown` flips to `true`. An
  /// in-flight job is always finished first.
  pub async fn run(self: Arc<Self>, id: usize, mut shutdown: watch::Receiver<bool>) {
    debug!(worker = id, "worker started");
    while !*shutdown.borrow() {
      let idle = match self.run_once().await {
        Ok(handled) => !handled,
        Err(e) => {
          error!(worker = id, error = %e, "queue error");
          true
        }
      };
      if idle {
        tokio::select! {
          _ = tokio::time::sleep(self.options.poll_interval) => {}
          _ = shutdown.changed() => {}
        }
      }
    }
    debug!(worker = id, "worker stopped");
  }

  /// Drop job results older than the configured retention.
  pub async fn purge_expired(&self) -> Result<usize, J::Error> {
    let Some(retention) = self.options.result_retention else {
      return Ok(0);
    };
    let cutoff = chrono::Duration::from_std(retention)
      .ok()
      .and_then(|age| Utc::now().checked_sub_signed(age));
    let Some(cutoff) = cutoff else {
      return Ok(0);
    };
    let purged = self.queue.purge_results(cutoff).await?;
    if purged > 0 {
      info!(purged, "expired job results purged");
    }
    Ok(purged)
  }
}

/// `concurrency` worker loops plus a janitor purging old job results.
pub struct WorkerPool {
  tasks:    JoinSet<()>,
  shutdown: watch::Sender<bool>,
}

impl WorkerPool {
  pub fn spawn<S, J>(worker: Arc<IngestionWorker<S, J>>, concurrency: usize) -> Self
  where
    S: NumericStore + 'static,
    J: JobQueue + 'static,
  {
    let (shutdown, rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    for id in 0..concurrency.max(1) {
      tasks.spawn(Arc::clone(&worker).run(id, rx.clone()));
    }

    let mut janitor_rx = rx;
    tasks.spawn(async move {
      let mut tick = tokio::time::interval(Duration::from_secs(60));
      loop {
        tokio::select! {
          _ = tick.tick() => {
            if let Err(e) = worker.purge_expired().await {
              error!(error = %e, "purging job results failed");
            }
          }
          _ = janitor_rx.changed() => break,
        }
      }
    });

    info!(concurrency, "ingestion workers started");
    Self { tasks, shutdown }
  }

  /// Signal every loop to stop and wait for in-flight jobs to finish.
  pub async fn shutdown(mut self) {
    let _ = self.shutdown.send(true);
    while let Some(res) = self.tasks.join_next().await {
      if let Err(e) = res {
        error!(error = %e, "worker task panicked");
      }
    }
    info!("ingestion workers stopped");
  }
}
