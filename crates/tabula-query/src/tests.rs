//! Aggregation tests against an in-memory SQLite store with scripted
//! synthesizers.

use std::{sync::Arc, time::Duration};

use axum::{Json, Router, http::StatusCode, routing::post};
use serde_json::{Value, json};
use tabula_core::{
  aggregate::{AggregateQuery, AggregateRequest, fallback_query},
  observation::{ColumnSeries, Observation},
  result::{AggregateValue, ComputedResult},
  store::NumericStore,
};
use tabula_store_sqlite::SqliteStore;
use thiserror::Error;
use tracing_test::traced_test;

use crate::{
  Aggregator, ChatConfig, ChatSynthesizer, GuardedSynthesizer, QuerySynthesizer, SynthesisError,
  UNSUPPORTED_QUERY,
};

const TIMEOUT: Duration = Duration::from_secs(5);

// ─── Fixtures ────────────────────────────────────────────────────────────────

/// Always answers with the same text.
struct Scripted(&'static str);

impl QuerySynthesizer for Scripted {
  async fn synthesize<'a>(&'a self, _: &'a AggregateRequest) -> Result<String, SynthesisError> {
    Ok(self.0.to_owned())
  }
}

/// A store whose result writes always fail.
struct ReadOnlyResults(SqliteStore);

#[derive(Debug, Error)]
enum ReadOnlyError {
  #[error("results table is locked")]
  Locked,
  #[error(transparent)]
  Inner(#[from] tabula_store_sqlite::Error),
}

impl NumericStore for ReadOnlyResults {
  type Error = ReadOnlyError;

  async fn replace_observations(
    &self,
    user_id: String,
    columns: Vec<ColumnSeries>,
  ) -> Result<usize, ReadOnlyError> {
    Ok(self.0.replace_observations(user_id, columns).await?)
  }

  async fn list_observations(&self, user_id: String) -> Result<Vec<Observation>, ReadOnlyError> {
    Ok(self.0.list_observations(user_id).await?)
  }

  async fn column_names(&self, user_id: String) -> Result<Vec<String>, ReadOnlyError> {
    Ok(self.0.column_names(user_id).await?)
  }

  async fn aggregate(
    &self,
    query: AggregateQuery,
    timeout: Duration,
  ) -> Result<AggregateValue, ReadOnlyError> {
    Ok(self.0.aggregate(query, timeout).await?)
  }

  async fn upsert_result(&self, _: ComputedResult) -> Result<(), ReadOnlyError> {
    Err(ReadOnlyError::Locked)
  }

  async fn get_result(&self, user_id: String) -> Result<Option<ComputedResult>, ReadOnlyError> {
    Ok(self.0.get_result(user_id).await?)
  }
}

/// A store whose aggregate reads never finish in time.
struct StalledReads(SqliteStore);

#[derive(Debug, Error)]
enum StalledError {
  #[error("query timed out after {0:?}")]
  TimedOut(Duration),
  #[error(transparent)]
  Inner(#[from] tabula_store_sqlite::Error),
}

impl NumericStore for StalledReads {
  type Error = StalledError;

  async fn replace_observations(
    &self,
    user_id: String,
    columns: Vec<ColumnSeries>,
  ) -> Result<usize, StalledError> {
    Ok(self.0.replace_observations(user_id, columns).await?)
  }

  async fn list_observations(&self, user_id: String) -> Result<Vec<Observation>, StalledError> {
    Ok(self.0.list_observations(user_id).await?)
  }

  async fn column_names(&self, user_id: String) -> Result<Vec<String>, StalledError> {
    Ok(self.0.column_names(user_id).await?)
  }

  async fn aggregate(
    &self,
    _: AggregateQuery,
    timeout: Duration,
  ) -> Result<AggregateValue, StalledError> {
    tokio::time::sleep(timeout).await;
    Err(StalledError::TimedOut(timeout))
  }

  async fn upsert_result(&self, result: ComputedResult) -> Result<(), StalledError> {
    Ok(self.0.upsert_result(result).await?)
  }

  async fn get_result(&self, user_id: String) -> Result<Option<ComputedResult>, StalledError> {
    Ok(self.0.get_result(user_id).await?)
  }
}

/// `u1` has ages 10, 20, 30 and heights 1.5, 1.7; `u2` has a single age.
async fn seeded() -> Arc<SqliteStore> {
  let store = SqliteStore::open_in_memory().await.unwrap();
  store
    .replace_observations("u1".into(), vec![
      ColumnSeries::new("age", vec![10.0, 20.0, 30.0]),
      ColumnSeries::new("height", vec![1.5, 1.7]),
    ])
    .await
    .unwrap();
  store
    .replace_observations("u2".into(), vec![ColumnSeries::new("age", vec![99.0])])
    .await
    .unwrap();
  Arc::new(store)
}

fn request(column: &str, operation: &str, user: &str) -> AggregateRequest {
  AggregateRequest::new(column, operation, user).unwrap()
}

fn without_synthesizer(store: Arc<SqliteStore>) -> Aggregator<SqliteStore, Option<Scripted>> {
  Aggregator::new(store, None, TIMEOUT)
}

// ─── Fallback and synthesis ──────────────────────────────────────────────────

#[tokio::test]
async fn falls_back_to_the_template_without_a_synthesizer() {
  let store = seeded().await;
  let agg = without_synthesizer(store.clone());
  let req = request("age", "avg", "u1");

  let out = agg.compute(&req).await;

  assert_eq!(
    out.query_text,
    "SELECT avg(value) FROM observations WHERE column_name = 'age' AND user_id = 'u1';"
  );
  assert_eq!(out.result, AggregateValue::Real(20.0));
  assert!(out.persisted);

  let stored = store.get_result("u1".into()).await.unwrap().unwrap();
  assert_eq!(stored.result, AggregateValue::Real(20.0));
  assert_eq!(stored.query_text, out.query_text);
  assert_eq!(stored.operation, "avg");
}

#[tokio::test]
async fn valid_synthesized_query_is_used() {
  let text = "select AVG(value) as mean from observations where user_id = 'u1' and column_name = 'age'";
  let agg = Aggregator::new(seeded().await, Scripted(text), TIMEOUT);

  let out = agg.compute(&request("age", "average", "u1")).await;

  assert_eq!(out.query_text, text);
  assert_eq!(out.result, AggregateValue::Real(20.0));
}

#[tokio::test]
async fn query_for_another_user_is_replaced_by_the_template() {
  let text = "SELECT AVG(value) FROM observations WHERE column_name = 'age' AND user_id = 'u2';";
  let agg = Aggregator::new(seeded().await, Scripted(text), TIMEOUT);
  let req = request("age", "avg", "u1");

  let out = agg.compute(&req).await;

  assert_eq!(out.query_text, fallback_query(&req));
  assert_eq!(out.result, AggregateValue::Real(20.0));
}

#[tokio::test]
async fn query_on_another_table_is_replaced_by_the_template() {
  let text = "SELECT AVG(value) FROM computed_results WHERE column_name = 'age' AND user_id = 'u1';";
  let agg = Aggregator::new(seeded().await, Scripted(text), TIMEOUT);
  let req = request("age", "avg", "u1");

  assert_eq!(agg.compute(&req).await.query_text, fallback_query(&req));
}

#[tokio::test]
async fn destructive_reply_is_replaced_by_the_template() {
  let text = "DELETE FROM observations WHERE user_id = 'u1';";
  let store = seeded().await;
  let agg = Aggregator::new(store.clone(), Scripted(text), TIMEOUT);
  let req = request("age", "count", "u1");

  let out = agg.compute(&req).await;

  assert_eq!(out.query_text, fallback_query(&req));
  assert_eq!(out.result, AggregateValue::Integer(3));
  assert_eq!(store.list_observations("u1".into()).await.unwrap().len(), 5);
}

#[tokio::test]
async fn wrong_function_is_replaced_by_the_template() {
  let text = "SELECT AVG(value) FROM observations WHERE column_name = 'age' AND user_id = 'u1';";
  let agg = Aggregator::new(seeded().await, Scripted(text), TIMEOUT);

  let out = agg.compute(&request("age", "sum", "u1")).await;

  assert!(out.query_text.starts_with("SELECT sum(value)"));
  assert_eq!(out.result, AggregateValue::Real(60.0));
}

#[tokio::test]
async fn template_escapes_quotes() {
  let agg = without_synthesizer(seeded().await);
  let out = agg.compute(&request("it's", "max", "o'brien")).await;

  assert_eq!(
    out.query_text,
    "SELECT max(value) FROM observations WHERE column_name = 'it''s' AND user_id = 'o''brien';"
  );
  assert_eq!(out.result, AggregateValue::Null);
}

// ─── Degraded results ────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_operation_yields_the_sentinel_and_is_stored() {
  let store = seeded().await;
  let agg = without_synthesizer(store.clone());

  let out = agg.compute(&request("age", "median", "u1")).await;

  assert!(out.query_text.starts_with("SELECT median(value)"));
  assert_eq!(out.result, AggregateValue::Text(UNSUPPORTED_QUERY.into()));
  let stored = store.get_result("u1".into()).await.unwrap().unwrap();
  assert_eq!(stored.result, out.result);
}

#[tokio::test]
async fn failed_persist_annotates_the_result() {
  let store = Arc::new(ReadOnlyResults(SqliteStore::open_in_memory().await.unwrap()));
  store
    .replace_observations("u1".into(), vec![ColumnSeries::new("age", vec![10.0, 20.0, 30.0])])
    .await
    .unwrap();
  let agg = Aggregator::new(store.clone(), None::<Scripted>, TIMEOUT);

  let out = agg.compute(&request("age", "avg", "u1")).await;

  assert!(!out.persisted);
  assert_eq!(
    out.result,
    AggregateValue::Text("20.0 (Database error: results table is locked)".into())
  );
  assert!(out.query_text.starts_with("SELECT avg(value)"));
  assert!(store.get_result("u1".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn timed_out_query_yields_the_sentinel_and_is_stored() {
  let store = Arc::new(StalledReads(SqliteStore::open_in_memory().await.unwrap()));
  let agg = Aggregator::new(store.clone(), None::<Scripted>, Duration::from_millis(10));

  let out = agg.compute(&request("age", "avg", "u1")).await;

  assert_eq!(out.result, AggregateValue::Text(UNSUPPORTED_QUERY.into()));
  assert!(out.persisted);
  let stored = store.get_result("u1".into()).await.unwrap().unwrap();
  assert_eq!(stored.result, out.result);
  assert_eq!(stored.query_text, out.query_text);
}

#[tokio::test]
#[traced_test]
async fn every_stage_is_logged() {
  let agg = without_synthesizer(seeded().await);
  agg.compute(&request("age", "avg", "u1")).await;

  for stage in ["received", "synthesizing", "executing", "persisting", "responded"] {
    assert!(logs_contain(stage), "no log for stage {stage}");
  }
}

#[tokio::test]
async fn aggregate_over_missing_column_is_null() {
  let agg = without_synthesizer(seeded().await);
  let out = agg.compute(&request("weight", "avg", "u1")).await;
  assert_eq!(out.result, AggregateValue::Null);
}

// ─── Persistence ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_compute_overwrites_the_first() {
  let store = seeded().await;
  let agg = without_synthesizer(store.clone());

  agg.compute(&request("age", "avg", "u1")).await;
  agg.compute(&request("height", "max", "u1")).await;

  let latest = agg.latest_result("u1").await.unwrap().unwrap();
  assert_eq!(latest.column_name, "height");
  assert_eq!(latest.operation, "max");
  assert_eq!(latest.result, AggregateValue::Real(1.7));
}

#[tokio::test]
async fn columns_are_listed_in_ingestion_order() {
  let agg = without_synthesizer(seeded().await);
  assert_eq!(agg.columns("u1").await.unwrap(), ["age", "height"]);
  assert!(agg.columns("nobody").await.unwrap().is_empty());
}

// ─── Chat synthesizer ────────────────────────────────────────────────────────

/// Serve `status` and `reply` from a local chat-completions endpoint; returns
/// the base URL.
async fn chat_endpoint(status: StatusCode, reply: &'static str) -> String {
  let app = Router::new().route(
    "/v1/chat/completions",
    post(move |Json(body): Json<Value>| async move {
      assert_eq!(body["model"], "test-model");
      assert_eq!(body["messages"][1]["role"], "user");
      let reply = json!({ "choices": [{ "message": { "role": "assistant", "content": reply } }] });
      (status, Json(reply))
    }),
  );
  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
  format!("http://{addr}/v1")
}

fn chat(base_url: String) -> ChatSynthesizer {
  ChatSynthesizer::new(ChatConfig {
    base_url,
    model: "test-model".into(),
    api_key: Some("secret".into()),
    timeout: Duration::from_secs(5),
  })
  .unwrap()
}

#[tokio::test]
async fn chat_reply_is_extracted() {
  let url = chat_endpoint(
    StatusCode::OK,
    "```sql\nSELECT SUM(value) FROM observations WHERE column_name = 'age' AND user_id = 'u1';\n```",
  )
  .await;
  let req = request("age", "sum", "u1");

  let text = chat(url).synthesize(&req).await.unwrap();
  assert_eq!(
    text,
    "SELECT SUM(value) FROM observations WHERE column_name = 'age' AND user_id = 'u1';"
  );

  let url = chat_endpoint(
    StatusCode::OK,
    "SELECT SUM(value) FROM observations WHERE user_id = 'u1' AND column_name = 'age'",
  )
  .await;
  let agg = Aggregator::new(seeded().await, chat(url), TIMEOUT);
  assert_eq!(agg.compute(&req).await.result, AggregateValue::Real(60.0));
}

#[tokio::test]
async fn chat_error_status_falls_back() {
  let url = chat_endpoint(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
  let req = request("age", "min", "u1");

  let err = chat(url.clone()).synthesize(&req).await.unwrap_err();
  assert!(matches!(err, SynthesisError::Status { status: 500, .. }));

  let guarded = GuardedSynthesizer::new(chat(url));
  assert_eq!(guarded.query_for(&req).await, fallback_query(&req));
}

#[tokio::test]
async fn chat_reply_without_a_query_falls_back() {
  let url = chat_endpoint(StatusCode::OK, "I'm not able to help with that.").await;
  let req = request("age", "min", "u1");

  let err = chat(url.clone()).synthesize(&req).await.unwrap_err();
  assert!(matches!(err, SynthesisError::EmptyReply));

  let agg = Aggregator::new(seeded().await, chat(url), TIMEOUT);
  assert_eq!(agg.compute(&req).await.result, AggregateValue::Real(10.0));
}
