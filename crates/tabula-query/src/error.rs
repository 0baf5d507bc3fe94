//! Error types for `tabula-query`.
//!
//! Neither error ever reaches a caller of
//! [`Aggregator::compute`](crate::Aggregator::compute): synthesis errors
//! trigger the fallback template and execution errors become
//! [`UNSUPPORTED_QUERY`].

use tabula_core::query::QueryRejection;
use thiserror::Error;

/// Result text used when a query cannot be executed.
pub const UNSUPPORTED_QUERY: &str = "This query is not supported by the database.";

#[derive(Debug, Error)]
pub enum SynthesisError {
  #[error("no query synthesizer is configured")]
  Unavailable,

  #[error("synthesizer request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("synthesizer returned {status}: {body}")]
  Status { status: u16, body: String },

  #[error("synthesizer reply contained no query")]
  EmptyReply,

  #[error("synthesized query rejected: {0}")]
  Rejected(#[from] QueryRejection),
}

#[derive(Debug, Error)]
pub enum QueryExecutionError {
  #[error("query rejected: {0}")]
  Rejected(#[from] QueryRejection),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}
