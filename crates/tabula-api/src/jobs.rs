//! `GET /jobs/{job_id}`: poll an ingestion job.
//!
//! 400 for a malformed id, 404 for an id that was never issued or whose
//! result has been purged.

use axum::{
  Json,
  extract::{Path, State},
};
use serde::Serialize;
use tabula_core::{
  job::{JobId, JobStatus},
  queue::JobQueue,
  store::NumericStore,
};
use tabula_query::QuerySynthesizer;

use crate::{AppState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct JobView {
  pub job_id: JobId,
  #[serde(flatten)]
  pub status: JobStatus,
}

pub async fn handler<S, Q, J>(
  State(state): State<AppState<S, Q, J>>,
  Path(job_id): Path<String>,
) -> Result<Json<JobView>, ApiError>
where
  S: NumericStore,
  Q: QuerySynthesizer,
  J: JobQueue,
{
  let job_id: JobId = job_id
    .parse()
    .map_err(|e: tabula_core::Error| ApiError::BadRequest(e.to_string()))?;

  let status = state
    .queue
    .poll(job_id)
    .await
    .map_err(ApiError::backend)?
    .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))?;

  Ok(Json(JobView { job_id, status }))
}
