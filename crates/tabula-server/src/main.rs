//! tabula server binary.
//!
//! Reads `tabula.toml` (or the path given with `--config`) plus `TABULA_*`
//! environment variables, opens the SQLite store and task queue, and then
//! either serves the HTTP API (`serve`, the default) or only runs ingestion
//! workers (`worker`). Any number of processes may share the same files.

mod settings;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use axum::Router;
use clap::{Parser, Subcommand};
use settings::{ServerConfig, sqlite_path};
use tabula_api::AppState;
use tabula_ingest::{IngestionWorker, WorkerPool};
use tabula_query::{Aggregator, ChatSynthesizer};
use tabula_store_sqlite::{SqliteQueue, SqliteStore};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Tabula ingestion and aggregation server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "tabula.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the HTTP API, with in-process ingestion workers.
  Serve {
    /// Number of in-process workers; `0` leaves ingestion to `tabula worker`.
    /// Defaults to `worker_concurrency`.
    #[arg(long)]
    workers: Option<usize>,
  },
  /// Run ingestion workers only.
  Worker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let cfg = ServerConfig::load(&cli.config)
    .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;

  let store = open_store(&cfg).await?;
  let queue = open_queue(&cfg).await?;

  match cli.command.unwrap_or(Command::Serve { workers: None }) {
    Command::Serve { workers } => {
      serve(&cfg, store, queue, workers.unwrap_or(cfg.worker_concurrency)).await
    }
    Command::Worker => work(&cfg, store, queue).await,
  }
}

async fn open_store(cfg: &ServerConfig) -> anyhow::Result<Arc<SqliteStore>> {
  let path = sqlite_path(&cfg.database_url);
  create_parent(&path)?;
  let store = SqliteStore::open(&path)
    .await
    .with_context(|| format!("failed to open store at {path:?}"))?;
  Ok(Arc::new(store))
}

async fn open_queue(cfg: &ServerConfig) -> anyhow::Result<Arc<SqliteQueue>> {
  let broker = sqlite_path(&cfg.broker_url);
  let results = sqlite_path(&cfg.result_backend_url);
  create_parent(&broker)?;
  create_parent(&results)?;
  let queue = SqliteQueue::open(&broker, &results, cfg.max_attempts)
    .await
    .with_context(|| format!("failed to open task queue at {broker:?}"))?;
  Ok(Arc::new(queue))
}

fn create_parent(path: &std::path::Path) -> anyhow::Result<()> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create directory {parent:?}"))?;
  }
  Ok(())
}

fn start_workers(
  cfg: &ServerConfig,
  store: Arc<SqliteStore>,
  queue: Arc<SqliteQueue>,
  concurrency: usize,
) -> WorkerPool {
  let worker = IngestionWorker::new(store, queue, cfg.worker_options());
  WorkerPool::spawn(Arc::new(worker), concurrency)
}

async fn serve(
  cfg: &ServerConfig,
  store: Arc<SqliteStore>,
  queue: Arc<SqliteQueue>,
  workers: usize,
) -> anyhow::Result<()> {
  let synthesizer = cfg
    .chat_config()
    .map(ChatSynthesizer::new)
    .transpose()
    .context("failed to build query synthesizer")?;
  if synthesizer.is_none() {
    tracing::info!("no synthesizer configured; queries use the built-in template");
  }

  let state = AppState {
    aggregator: Arc::new(Aggregator::new(store.clone(), synthesizer, cfg.query_timeout())),
    queue:      queue.clone(),
    uploads:    Arc::new(cfg.upload_area()),
  };

  let app = Router::new()
    .nest("/api", tabula_api::api_router(state))
    .layer(TraceLayer::new_for_http());

  let pool = (workers > 0).then(|| start_workers(cfg, store, queue, workers));

  let address = cfg.address();
  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  if let Some(pool) = pool {
    pool.shutdown().await;
  }
  Ok(())
}

async fn work(
  cfg: &ServerConfig,
  store: Arc<SqliteStore>,
  queue: Arc<SqliteQueue>,
) -> anyhow::Result<()> {
  let pool = start_workers(cfg, store, queue, cfg.worker_concurrency);
  shutdown_signal().await;
  pool.shutdown().await;
  Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!(error = %e, "failed to listen for Ctrl-C");
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut sig) => {
        sig.recv().await;
      }
      Err(e) => {
        tracing::error!(error = %e, "failed to listen for SIGTERM");
        std::future::pending::<()>().await;
      }
    }
  };
  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {}
    _ = terminate => {}
  }
  tracing::info!("shutting down");
}
