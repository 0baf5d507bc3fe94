//! Error types for `tabula-ingest`.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while accepting an upload and queueing it.
#[derive(Debug, Error)]
pub enum Error {
  #[error("no file name given")]
  MissingFileName,

  #[error("file type not allowed: {0:?}")]
  DisallowedExtension(String),

  #[error("upload of {limit} bytes exceeded")]
  TooLarge { limit: usize },

  #[error("could not store upload: {0}")]
  Io(#[from] std::io::Error),

  #[error("queue error: {0}")]
  Queue(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a single ingestion job failed.
///
/// [`IngestError::Store`] is transient and goes back to the queue; every
/// other variant is terminal and is recorded as the job's failure.
#[derive(Debug, Error)]
pub enum IngestError {
  #[error("error reading the file {path}: {source}")]
  FileAccess {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("error parsing the file: {0}")]
  Parse(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("reader task failed: {0}")]
  Reader(#[from] tokio::task::JoinError),
}

impl IngestError {
  pub fn is_retryable(&self) -> bool { matches!(self, Self::Store(_)) }
}

impl From<csv::Error> for IngestError {
  fn from(e: csv::Error) -> Self { Self::Parse(e.to_string()) }
}

impl From<calamine::Error> for IngestError {
  fn from(e: calamine::Error) -> Self { Self::Parse(e.to_string()) }
}
