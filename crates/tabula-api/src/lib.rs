//! JSON REST API for Tabula.
//!
//! Exposes an axum [`Router`] for uploads, job status and aggregate
//! computation. Transport concerns (tracing, TLS) are the caller's
//! responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", tabula_api::api_router(state))
//! ```

pub mod compute;
pub mod error;
pub mod jobs;
pub mod results;
pub mod upload;

use std::sync::Arc;

use axum::{
  Router,
  extract::DefaultBodyLimit,
  routing::{get, post},
};
use tabula_core::{queue::JobQueue, store::NumericStore};
use tabula_ingest::UploadArea;
use tabula_query::{Aggregator, QuerySynthesizer};

pub use error::ApiError;

/// Room for multipart framing and the `user_id` field on top of the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct AppState<S, Q, J> {
  pub aggregator: Arc<Aggregator<S, Q>>,
  pub queue:      Arc<J>,
  pub uploads:    Arc<UploadArea>,
}

impl<S, Q, J> Clone for AppState<S, Q, J> {
  fn clone(&self) -> Self {
    Self {
      aggregator: Arc::clone(&self.aggregator),
      queue:      Arc::clone(&self.queue),
      uploads:    Arc::clone(&self.uploads),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, Q, J>(state: AppState<S, Q, J>) -> Router<()>
where
  S: NumericStore + 'static,
  Q: QuerySynthesizer + 'static,
  J: JobQueue + 'static,
{
  let body_limit = state.uploads.max_bytes().saturating_add(MULTIPART_OVERHEAD);

  Router::new()
    .route(
      "/upload",
      post(upload::handler::<S, Q, J>).layer(DefaultBodyLimit::max(body_limit)),
    )
    .route("/jobs/{job_id}", get(jobs::handler::<S, Q, J>))
    .route("/compute", post(compute::handler::<S, Q, J>))
    .route("/results/{user_id}", get(results::latest::<S, Q, J>))
    .route("/users/{user_id}/columns", get(results::columns::<S, Q, J>))
    .with_state(state)
}
