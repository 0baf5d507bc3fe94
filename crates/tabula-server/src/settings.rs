//! Server configuration.
//!
//! Values come from an optional TOML file overlaid with `TABULA_*`
//! environment variables. Every key has a default, so an empty environment
//! starts a working single-machine setup.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::Deserialize;
use tabula_ingest::{UploadArea, WorkerOptions};
use tabula_query::ChatConfig;
use tabula_store_sqlite::DEFAULT_MAX_ATTEMPTS;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                     String,
  pub port:                     u16,
  /// Numeric store, e.g. `sqlite://tabula.db`.
  pub database_url:             String,
  /// Task queue broker.
  pub broker_url:               String,
  /// Where finished job outcomes are kept. May equal `broker_url`.
  pub result_backend_url:       String,
  pub upload_dir:               PathBuf,
  pub allowed_extensions:       Vec<String>,
  pub max_upload_bytes:         usize,
  pub worker_concurrency:       usize,
  pub lease_secs:               u64,
  pub max_attempts:             u32,
  pub retry_backoff_secs:       u64,
  pub poll_interval_ms:         u64,
  /// `0` keeps job results forever.
  pub result_retention_secs:    u64,
  pub query_timeout_ms:         u64,
  /// Base URL of an OpenAI-compatible API. Unset disables synthesis.
  pub synthesizer_url:          Option<String>,
  pub synthesizer_model:        String,
  pub synthesizer_api_key:      Option<String>,
  pub synthesizer_timeout_secs: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                     "127.0.0.1".into(),
      port:                     5000,
      database_url:             "sqlite://tabula.db".into(),
      broker_url:               "sqlite://tabula-queue.db".into(),
      result_backend_url:       "sqlite://tabula-queue.db".into(),
      upload_dir:               PathBuf::from("uploads"),
      allowed_extensions:       vec!["csv".into(), "xlsx".into()],
      max_upload_bytes:         16 * 1024 * 1024,
      worker_concurrency:       2,
      lease_secs:               300,
      max_attempts:             DEFAULT_MAX_ATTEMPTS,
      retry_backoff_secs:       5,
      poll_interval_ms:         500,
      result_retention_secs:    24 * 60 * 60,
      query_timeout_ms:         5_000,
      synthesizer_url:          None,
      synthesizer_model:        "llama-3.1-8b-instant".into(),
      synthesizer_api_key:      None,
      synthesizer_timeout_secs: 10,
    }
  }
}

impl ServerConfig {
  /// Read `path` (if it exists) and then the environment.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("TABULA")
          .try_parsing(true)
          .list_separator(",")
          .with_list_parse_key("allowed_extensions"),
      )
      .build()?
      .try_deserialize()
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  pub fn upload_area(&self) -> UploadArea {
    UploadArea::new(
      expand_tilde(&self.upload_dir),
      &self.allowed_extensions,
      self.max_upload_bytes,
    )
  }

  pub fn worker_options(&self) -> WorkerOptions {
    WorkerOptions {
      lease:            Duration::from_secs(self.lease_secs),
      retry_backoff:    Duration::from_secs(self.retry_backoff_secs),
      poll_interval:    Duration::from_millis(self.poll_interval_ms),
      result_retention: (self.result_retention_secs > 0)
        .then(|| Duration::from_secs(self.result_retention_secs)),
    }
  }

  pub fn query_timeout(&self) -> Duration { Duration::from_millis(self.query_timeout_ms) }

  pub fn chat_config(&self) -> Option<ChatConfig> {
    let base_url = self.synthesizer_url.as_deref()?.trim();
    if base_url.is_empty() {
      return None;
    }
    Some(ChatConfig {
      base_url: base_url.to_owned(),
      model:    self.synthesizer_model.clone(),
      api_key:  self.synthesizer_api_key.clone().filter(|k| !k.is_empty()),
      timeout:  Duration::from_secs(self.synthesizer_timeout_secs),
    })
  }
}

/// Turn a `sqlite://` / `sqlite:` URL (or a bare path) into a file path.
pub fn sqlite_path(url: &str) -> PathBuf {
  let path = url
    .strip_prefix("sqlite://")
    .or_else(|| url.strip_prefix("sqlite:"))
    .unwrap_or(url);
  expand_tilde(Path::new(path))
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
