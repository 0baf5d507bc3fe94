//! `POST /compute`: body `{"column": .., "operation": .., "user_id": ..}`.
//!
//! A missing or blank field is a 400 before anything runs. Everything after
//! that answers 200 with `{query_text, result}`; failures show up in the
//! result text.

use axum::{
  Json,
  extract::{State, rejection::JsonRejection},
};
use serde::Deserialize;
use tabula_core::{aggregate::AggregateRequest, queue::JobQueue, store::NumericStore};
use tabula_query::{ComputeOutcome, QuerySynthesizer};

use crate::{AppState, error::ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct ComputeBody {
  pub column:    Option<String>,
  pub operation: Option<String>,
  pub user_id:   Option<String>,
}

pub async fn handler<S, Q, J>(
  State(state): State<AppState<S, Q, J>>,
  body: Result<Json<ComputeBody>, JsonRejection>,
) -> Result<Json<ComputeOutcome>, ApiError>
where
  S: NumericStore,
  Q: QuerySynthesizer,
  J: JobQueue,
{
  let Json(body) = body.map_err(|e| ApiError::BadRequest(format!("Invalid JSON payload: {e}")))?;

  let request = AggregateRequest::new(
    body.column.unwrap_or_default(),
    body.operation.unwrap_or_default(),
    body.user_id.unwrap_or_default(),
  )
  .map_err(|e| ApiError::BadRequest(e.to_string()))?;

  Ok(Json(state.aggregator.compute(&request).await))
}
