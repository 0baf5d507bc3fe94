//! The aggregation service.
//!
//! A computation moves through received → synthesizing → executing →
//! persisting → responded. Only a malformed request can fail it, and that is
//! caught earlier by [`AggregateRequest::new`]. Later failures degrade the
//! result text instead.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::Serialize;
use tabula_core::{
  aggregate::AggregateRequest,
  query::validate_query,
  result::{AggregateValue, ComputedResult},
  store::NumericStore,
};
use tracing::{debug, info, warn};

use crate::{
  error::{QueryExecutionError, UNSUPPORTED_QUERY},
  synthesizer::{GuardedSynthesizer, QuerySynthesizer},
};

/// What a computation returns to its caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputeOutcome {
  pub query_text: String,
  pub result:     AggregateValue,
  /// `false` when the result could not be stored; `result` then carries the
  /// database error.
  #[serde(skip)]
  pub persisted:  bool,
}

pub struct Aggregator<S, Q> {
  store:         Arc<S>,
  synthesizer:   GuardedSynthesizer<Q>,
  query_timeout: Duration,
}

impl<S, Q> Aggregator<S, Q>
where
  S: NumericStore,
  Q: QuerySynthesizer,
{
  pub fn new(store: Arc<S>, synthesizer: Q, query_timeout: Duration) -> Self {
    Self { store, synthesizer: GuardedSynthesizer::new(synthesizer), query_timeout }
  }

  /// Compute `request`, store it as the user's latest result, and return it.
  pub async fn compute(&self, request: &AggregateRequest) -> ComputeOutcome {
    let user_id = request.user_id();
    info!(
      stage = "received",
      user_id,
      column = request.column(),
      operation = request.operation(),
      "aggregate requested"
    );

    info!(stage = "synthesizing", user_id);
    let query_text = self.synthesizer.query_for(request).await;
    info!(stage = "executing", user_id, query = %query_text);

    let result = match self.execute(&query_text, request).await {
      Ok(value) => value,
      Err(e) => {
        warn!(stage = "executing", user_id, error = %e, "query not executed");
        AggregateValue::Text(UNSUPPORTED_QUERY.to_owned())
      }
    };

    let record = ComputedResult {
      user_id:     user_id.to_owned(),
      column_name: request.column().to_owned(),
      operation:   request.operation().to_owned(),
      query_text:  query_text.clone(),
      result:      result.clone(),
      computed_at: Utc::now(),
    };

    debug!(stage = "persisting", user_id);
    let (result, persisted) = match self.store.upsert_result(record).await {
      Ok(()) => (result, true),
      Err(e) => {
        warn!(stage = "persisting", user_id, error = %e, "result not stored");
        (result.annotate(format!("Database error: {e}")), false)
      }
    };

    info!(stage = "responded", user_id, %result, persisted);
    ComputeOutcome { query_text, result, persisted }
  }

  async fn execute(
    &self,
    query_text: &str,
    request: &AggregateRequest,
  ) -> Result<AggregateValue, QueryExecutionError> {
    let query = validate_query(query_text, request)?;
    self
      .store
      .aggregate(query, self.query_timeout)
      .await
      .map_err(|e| QueryExecutionError::Store(Box::new(e)))
  }

  /// The user's most recent computation, if any.
  pub async fn latest_result(&self, user_id: &str) -> Result<Option<ComputedResult>, S::Error> {
    self.store.get_result(user_id.to_owned()).await
  }

  /// Columns the user can aggregate, in the order they were ingested.
  pub async fn columns(&self, user_id: &str) -> Result<Vec<String>, S::Error> {
    self.store.column_names(user_id.to_owned()).await
  }
}
