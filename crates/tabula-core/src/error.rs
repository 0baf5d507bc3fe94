//! Error types for `tabula-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A required request field was absent or blank.
  #[error("missing required field: {0}")]
  MissingField(&'static str),

  #[error("invalid job id: {0:?}")]
  InvalidJobId(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
