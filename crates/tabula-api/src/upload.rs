//! `POST /upload`: multipart fields `file` and optional `user_id`.
//!
//! Responds `202 Accepted` with `{user_id, message, job_id}` once the file is
//! stored and queued. Parsing happens later, in a worker.

use axum::{
  Json,
  extract::{Multipart, State},
  http::StatusCode,
  response::IntoResponse,
};
use bytes::Bytes;
use serde::Serialize;
use tabula_core::{job::JobId, queue::JobQueue, store::NumericStore};
use tabula_ingest::{DEFAULT_USER_ID, submit_job};
use tabula_query::QuerySynthesizer;

use crate::{AppState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
  pub user_id: String,
  pub message: &'static str,
  pub job_id:  JobId,
}

pub async fn handler<S, Q, J>(
  State(state): State<AppState<S, Q, J>>,
  mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError>
where
  S: NumericStore,
  Q: QuerySynthesizer,
  J: JobQueue,
{
  let mut file: Option<(String, Bytes)> = None;
  let mut user_id: Option<String> = None;

  while let Some(field) = multipart.next_field().await? {
    let name = field.name().map(str::to_owned);
    match name.as_deref() {
      Some("file") => {
        let file_name = field.file_name().unwrap_or_default().to_owned();
        file = Some((file_name, field.bytes().await?));
      }
      Some("user_id") => user_id = Some(field.text().await?),
      _ => {}
    }
  }

  let Some((file_name, bytes)) = file else {
    return Err(ApiError::BadRequest("No file part in the request.".into()));
  };
  let user_id = user_id
    .map(|u| u.trim().to_owned())
    .filter(|u| !u.is_empty())
    .unwrap_or_else(|| DEFAULT_USER_ID.to_owned());

  let job_id = submit_job(&state.uploads, state.queue.as_ref(), bytes, &file_name, &user_id).await?;

  Ok((
    StatusCode::ACCEPTED,
    Json(UploadResponse {
      user_id,
      message: "File uploaded successfully. Processing is underway in the background.",
      job_id,
    }),
  ))
}
