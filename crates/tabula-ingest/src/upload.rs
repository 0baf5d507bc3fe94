//! The upload area and job submission.
//!
//! Uploaded bytes are stored under their SHA-256 digest, so two uploads with
//! the same name never overwrite each other and a re-upload of identical
//! content reuses the stored file.

use std::{
  io::Write as _,
  path::{Path, PathBuf},
};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tabula_core::{
  job::{JobId, JobPayload},
  queue::JobQueue,
};
use tracing::info;

use crate::{Error, Result};

/// User id applied when an upload does not name one.
pub const DEFAULT_USER_ID: &str = "default_user";

/// Where uploads are written and which of them are accepted.
#[derive(Debug, Clone)]
pub struct UploadArea {
  dir:                PathBuf,
  /// Lowercase, without the leading dot.
  allowed_extensions: Vec<String>,
  max_bytes:          usize,
}

impl UploadArea {
  pub fn new<I, S>(dir: impl Into<PathBuf>, allowed_extensions: I, max_bytes: usize) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let allowed_extensions = allowed_extensions
      .into_iter()
      .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
      .filter(|e| !e.is_empty())
      .collect();
    Self { dir: dir.into(), allowed_extensions, max_bytes }
  }

  pub fn dir(&self) -> &Path { &self.dir }

  pub fn max_bytes(&self) -> usize { self.max_bytes }

  /// The lowercase extension of `file_name` if it is allowed.
  pub fn accept(&self, file_name: &str) -> Result<String> {
    // Only the final path component counts; clients may send full paths.
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base.is_empty() {
      return Err(Error::MissingFileName);
    }

    let ext = base
      .rsplit_once('.')
      .map(|(_, ext)| ext.to_ascii_lowercase())
      .unwrap_or_default();
    if ext.is_empty() || !self.allowed_extensions.contains(&ext) {
      return Err(Error::DisallowedExtension(base.to_owned()));
    }
    Ok(ext)
  }

  /// Validate and store an upload, returning the stored path.
  pub async fn save(&self, file_name: &str, bytes: Bytes) -> Result<PathBuf> {
    let ext = self.accept(file_name)?;
    if bytes.len() > self.max_bytes {
      return Err(Error::TooLarge { limit: self.max_bytes });
    }

    let digest = hex::encode(Sha256::digest(&bytes));
    let target = self.dir.join(format!("{digest}.{ext}"));
    let dir = self.dir.clone();

    let stored = target.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
      std::fs::create_dir_all(&dir)?;
      if stored.exists() {
        return Ok(());
      }
      // Write beside the target and rename, so readers never see a partial
      // file.
      let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
      tmp.write_all(&bytes)?;
      tmp.persist(&stored).map_err(|e| e.error)?;
      Ok(())
    })
    .await
    .map_err(std::io::Error::other)??;

    Ok(target)
  }
}

/// Store `file_bytes` and enqueue an ingestion job for it.
///
/// A blank `user_id` falls back to [`DEFAULT_USER_ID`].
pub async fn submit_job<J: JobQueue>(
  uploads: &UploadArea,
  queue: &J,
  file_bytes: Bytes,
  file_name: &str,
  user_id: &str,
) -> Result<JobId> {
  let user_id = match user_id.trim() {
    "" => DEFAULT_USER_ID,
    id => id,
  };

  let file_path = uploads.save(file_name, file_bytes).await?;
  let job_id = queue
    .enqueue(JobPayload { file_path: file_path.clone(), user_id: user_id.to_owned() })
    .await
    .map_err(|e| Error::Queue(Box::new(e)))?;

  info!(%job_id, user_id, path = %file_path.display(), "upload queued for ingestion");
  Ok(job_id)
}

#[cfg(test)]
mod tests {
  use tabula_core::job::JobStatus;
  use tabula_store_sqlite::SqliteQueue;

  use super::*;

  fn area(dir: &Path) -> UploadArea { UploadArea::new(dir, ["csv", ".XLSX"], 1024) }

  #[test]
  fn extensions_are_checked_case_insensitively() {
    let a = area(Path::new("/tmp"));
    assert_eq!(a.accept("data.CSV").unwrap(), "csv");
    assert_eq!(a.accept("book.xlsx").unwrap(), "xlsx");
    assert!(matches!(a.accept("notes.txt"), Err(Error::DisallowedExtension(_))));
    assert!(matches!(a.accept("csv"), Err(Error::DisallowedExtension(_))));
    assert!(matches!(a.accept(""), Err(Error::MissingFileName)));
    assert!(matches!(a.accept("dir/"), Err(Error::MissingFileName)));
  }

  #[tokio::test]
  async fn identical_content_is_stored_once() {
    let dir = tempfile::tempdir().unwrap();
    let a = area(dir.path());

    let first = a.save("one.csv", Bytes::from_static(b"x\n1\n")).await.unwrap();
    let second = a.save("two.csv", Bytes::from_static(b"x\n1\n")).await.unwrap();
    let other = a.save("one.csv", Bytes::from_static(b"x\n2\n")).await.unwrap();

    assert_eq!(first, second);
    assert_ne!(first, other);
    assert_eq!(std::fs::read(&first).unwrap(), b"x\n1\n");
  }

  #[tokio::test]
  async fn oversized_upload_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let a = UploadArea::new(dir.path(), ["csv"], 4);
    let err = a.save("a.csv", Bytes::from_static(b"12345")).await.unwrap_err();
    assert!(matches!(err, Error::TooLarge { limit: 4 }));
  }

  #[tokio::test]
  async fn submit_queues_a_pending_job() {
    let dir = tempfile::tempdir().unwrap();
    let queue = SqliteQueue::open_in_memory(3).await.unwrap();

    let job_id = submit_job(&area(dir.path()), &queue, Bytes::from_static(b"a\n1\n"), "a.csv", "")
      .await
      .unwrap();

    assert_eq!(queue.poll(job_id).await.unwrap(), Some(JobStatus::Pending { attempts: 0 }));
    let job = queue.claim(std::time::Duration::from_secs(60)).await.unwrap().unwrap();
    assert_eq!(job.user_id, DEFAULT_USER_ID);
    assert!(job.file_path.starts_with(dir.path()));
  }

  #[tokio::test]
  async fn rejected_upload_queues_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let queue = SqliteQueue::open_in_memory(3).await.unwrap();

    let err = submit_job(&area(dir.path()), &queue, Bytes::from_static(b"x"), "a.exe", "u1")
      .await
      .unwrap_err();

    assert!(matches!(err, Error::DisallowedExtension(_)));
    assert!(queue.claim(std::time::Duration::from_secs(60)).await.unwrap().is_none());
  }
}
