//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  extract::multipart::MultipartError,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("upload too large: {0}")]
  PayloadTooLarge(String),

  #[error("multipart error: {0}")]
  Multipart(#[from] MultipartError),

  /// The store, the queue or the upload directory failed.
  #[error("backend error: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  pub fn backend(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Backend(Box::new(e))
  }
}

impl From<tabula_ingest::Error> for ApiError {
  fn from(e: tabula_ingest::Error) -> Self {
    use tabula_ingest::Error as E;
    match e {
      E::MissingFileName => Self::BadRequest("No selected file.".into()),
      E::DisallowedExtension(_) => Self::BadRequest(e.to_string()),
      E::TooLarge { .. } => Self::PayloadTooLarge(e.to_string()),
      E::Io(_) | E::Queue(_) => Self::backend(e),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::PayloadTooLarge(m) => (StatusCode::PAYLOAD_TOO_LARGE, m.clone()),
      ApiError::Multipart(e) => (e.status(), e.body_text()),
      ApiError::Backend(e) => {
        tracing::error!(error = %e, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
