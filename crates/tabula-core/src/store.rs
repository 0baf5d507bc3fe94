//! The `NumericStore` trait.
//!
//! Implemented by storage backends (e.g. `tabula-store-sqlite`). The ingestion
//! worker and the aggregation service depend on this abstraction, not on any
//! concrete backend.

use std::{future::Future, time::Duration};

use crate::{
  aggregate::AggregateQuery,
  observation::{ColumnSeries, Observation},
  result::{AggregateValue, ComputedResult},
};

/// Per-user numeric observations plus the latest computed result per user.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait NumericStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Observations ──────────────────────────────────────────────────────

  /// Delete every observation for `user_id`, then insert one observation per
  /// value of every series, as a single transaction. Returns the number of
  /// rows inserted.
  ///
  /// Either the whole replacement commits or nothing changes, so repeating
  /// the call with the same input converges on the same state.
  fn replace_observations(
    &self,
    user_id: String,
    columns: Vec<ColumnSeries>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// All observations for a user in insertion order.
  fn list_observations(
    &self,
    user_id: String,
  ) -> impl Future<Output = Result<Vec<Observation>, Self::Error>> + Send + '_;

  /// Distinct column names for a user, in the order they were first stored.
  fn column_names(
    &self,
    user_id: String,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  // ── Aggregation ───────────────────────────────────────────────────────

  /// Execute a validated aggregate read-only. The read is abandoned after
  /// `timeout`.
  fn aggregate(
    &self,
    query: AggregateQuery,
    timeout: Duration,
  ) -> impl Future<Output = Result<AggregateValue, Self::Error>> + Send + '_;

  // ── Computed results ──────────────────────────────────────────────────

  /// Insert or overwrite the single result row for `result.user_id`.
  fn upsert_result(
    &self,
    result: ComputedResult,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_result(
    &self,
    user_id: String,
  ) -> impl Future<Output = Result<Option<ComputedResult>, Self::Error>> + Send + '_;
}
