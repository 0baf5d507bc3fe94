//! Per-user read endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/results/{user_id}` | Latest computed result; 404 if none |
//! | `GET`  | `/users/{user_id}/columns` | Columns with stored observations |

use axum::{
  Json,
  extract::{Path, State},
};
use serde::Serialize;
use tabula_core::{queue::JobQueue, result::ComputedResult, store::NumericStore};
use tabula_query::QuerySynthesizer;

use crate::{AppState, error::ApiError};

/// `GET /results/{user_id}`
pub async fn latest<S, Q, J>(
  State(state): State<AppState<S, Q, J>>,
  Path(user_id): Path<String>,
) -> Result<Json<ComputedResult>, ApiError>
where
  S: NumericStore,
  Q: QuerySynthesizer,
  J: JobQueue,
{
  state
    .aggregator
    .latest_result(&user_id)
    .await
    .map_err(ApiError::backend)?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("no result for user {user_id}")))
}

#[derive(Debug, Serialize)]
pub struct ColumnsView {
  pub user_id: String,
  pub columns: Vec<String>,
}

/// `GET /users/{user_id}/columns`
pub async fn columns<S, Q, J>(
  State(state): State<AppState<S, Q, J>>,
  Path(user_id): Path<String>,
) -> Result<Json<ColumnsView>, ApiError>
where
  S: NumericStore,
  Q: QuerySynthesizer,
  J: JobQueue,
{
  let columns = state
    .aggregator
    .columns(&user_id)
    .await
    .map_err(ApiError::backend)?;
  Ok(Json(ColumnsView { user_id, columns }))
}
