//! SQLite backend for Tabula.
//!
//! Provides the numeric store ([`SqliteStore`]) and the durable task queue
//! ([`SqliteQueue`]). Both wrap [`tokio_rusqlite`] so all database access runs
//! on a dedicated thread without blocking the async runtime.

mod encode;
mod queue;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use queue::{DEFAULT_MAX_ATTEMPTS, SqliteQueue};
pub use store::SqliteStore;
