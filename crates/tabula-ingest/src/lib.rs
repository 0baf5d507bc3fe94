//! File ingestion for Tabula.
//!
//! Uploads land in an [`UploadArea`] and are queued with [`submit_job`]. An
//! [`IngestionWorker`] (usually several, inside a [`WorkerPool`]) claims each
//! job, reads the file with [`read_table`], and replaces the user's
//! observations with the file's numeric columns.

pub mod error;
pub mod reader;
pub mod table;
pub mod upload;
pub mod worker;

pub use error::{Error, IngestError, Result};
pub use reader::read_table;
pub use upload::{DEFAULT_USER_ID, UploadArea, submit_job};
pub use worker::{IngestionWorker, WorkerOptions, WorkerPool};
