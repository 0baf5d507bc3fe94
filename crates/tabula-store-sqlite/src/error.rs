//! Error type for `tabula-store-sqlite`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// An aggregate read did not finish within its time budget.
  #[error("query timed out after {0:?}")]
  Timeout(Duration),

  /// A statement handed to the read path would modify the database.
  #[error("statement is not read-only")]
  NotReadOnly,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
