//! Query synthesis: turning an [`AggregateRequest`] into query text.
//!
//! [`ChatSynthesizer`] asks an OpenAI-compatible chat-completions endpoint to
//! write the query. Its output is untrusted; [`GuardedSynthesizer`] validates
//! it and substitutes the fallback template on any failure, so callers always
//! get a non-empty query.

use std::{future::Future, time::Duration};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tabula_core::{
  aggregate::{AggregateRequest, OBSERVATIONS_TABLE, fallback_query},
  query::validate_query,
};
use tracing::{debug, warn};

use crate::error::SynthesisError;

// ─── Trait ───────────────────────────────────────────────────────────────────

pub trait QuerySynthesizer: Send + Sync {
  /// Produce query text for `request`. The text is validated by the caller.
  fn synthesize<'a>(
    &'a self,
    request: &'a AggregateRequest,
  ) -> impl Future<Output = Result<String, SynthesisError>> + Send + 'a;
}

/// `None` is a synthesizer that is never available.
impl<S: QuerySynthesizer> QuerySynthesizer for Option<S> {
  async fn synthesize<'a>(&'a self, request: &'a AggregateRequest) -> Result<String, SynthesisError> {
    match self {
      Some(inner) => inner.synthesize(request).await,
      None => Err(SynthesisError::Unavailable),
    }
  }
}

// ─── Chat completions ────────────────────────────────────────────────────────

/// Connection settings for a chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatConfig {
  /// Base URL; `/chat/completions` is appended.
  pub base_url: String,
  pub model:    String,
  pub api_key:  Option<String>,
  pub timeout:  Duration,
}

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct ChatSynthesizer {
  client: Client,
  config: ChatConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
  model:       &'a str,
  messages:    [ChatMessage<'a>; 2],
  temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
  role:    &'a str,
  content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
  choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
  message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
  #[serde(default)]
  content: Option<String>,
}

const SYSTEM_PROMPT: &str = "SQL code only, no explanation or other text.";

impl ChatSynthesizer {
  pub fn new(config: ChatConfig) -> Result<Self, SynthesisError> {
    let client = Client::builder().timeout(config.timeout).build()?;
    Ok(Self { client, config })
  }

  fn url(&self) -> String {
    format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
  }

  fn prompt(request: &AggregateRequest) -> String {
    format!(
      "Write a SQLite query that computes the {op} of the column '{col}' for user_id '{user}'. \
       The table {OBSERVATIONS_TABLE} has the columns id, user_id, column_name and value; \
       each row holds one value of the column named in column_name. \
       Return ONLY the query, starting with SELECT, with no additional text.",
      op = request.operation(),
      col = request.column(),
      user = request.user_id(),
    )
  }
}

impl QuerySynthesizer for ChatSynthesizer {
  async fn synthesize<'a>(&'a self, request: &'a AggregateRequest) -> Result<String, SynthesisError> {
    let prompt = Self::prompt(request);
    let body = ChatRequest {
      model:       &self.config.model,
      messages:    [
        ChatMessage { role: "system", content: SYSTEM_PROMPT },
        ChatMessage { role: "user", content: &prompt },
      ],
      temperature: 0.0,
    };

    let mut req = self.client.post(self.url()).json(&body);
    if let Some(key) = &self.config.api_key {
      req = req.bearer_auth(key);
    }
    let resp = req.send().await?;

    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      return Err(SynthesisError::Status { status: status.as_u16(), body });
    }

    let reply: ChatResponse = resp.json().await?;
    let content = reply
      .choices
      .into_iter()
      .next()
      .and_then(|c| c.message.content)
      .unwrap_or_default();
    debug!(reply = %content, "synthesizer replied");

    extract_sql(&content).ok_or(SynthesisError::EmptyReply)
  }
}

/// Pull the statement out of a model reply: code fences are dropped, and the
/// text runs from the first `SELECT` through the first `;` (or to the end).
pub fn extract_sql(reply: &str) -> Option<String> {
  let unfenced: String = reply
    .lines()
    .filter(|line| !line.trim_start().starts_with("```"))
    .collect::<Vec<_>>()
    .join("\n");

  let start = unfenced.to_ascii_lowercase().find("select")?;
  let rest = &unfenced[start..];
  let sql = match rest.find(';') {
    Some(end) => &rest[..=end],
    None => rest,
  };
  let sql = sql.trim();
  (!sql.is_empty()).then(|| sql.to_owned())
}

// ─── Guard ───────────────────────────────────────────────────────────────────

/// Wraps a synthesizer so that only validated text, or the fallback
/// template, comes out.
pub struct GuardedSynthesizer<S> {
  inner: S,
}

impl<S: QuerySynthesizer> GuardedSynthesizer<S> {
  pub fn new(inner: S) -> Self { Self { inner } }

  /// Always returns non-empty query text.
  pub async fn query_for(&self, request: &AggregateRequest) -> String {
    match self.try_synthesize(request).await {
      Ok(text) => text,
      Err(SynthesisError::Unavailable) => fallback_query(request),
      Err(e) => {
        warn!(stage = "synthesizing", error = %e, "using fallback query");
        fallback_query(request)
      }
    }
  }

  async fn try_synthesize(&self, request: &AggregateRequest) -> Result<String, SynthesisError> {
    let text = self.inner.synthesize(request).await?;
    let text = text.trim();
    if text.is_empty() {
      return Err(SynthesisError::EmptyReply);
    }
    validate_query(text, request)?;
    Ok(text.to_owned())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plain_reply_is_taken_as_is() {
    assert_eq!(
      extract_sql("SELECT AVG(value) FROM observations;").as_deref(),
      Some("SELECT AVG(value) FROM observations;")
    );
  }

  #[test]
  fn fences_and_chatter_are_removed() {
    let reply = "Sure! Here it is:\n```sql\nselect sum(value)\nfrom observations;\n```\nEnjoy.";
    assert_eq!(
      extract_sql(reply).as_deref(),
      Some("select sum(value)\nfrom observations;")
    );
  }

  #[test]
  fn second_statement_is_cut_off() {
    assert_eq!(
      extract_sql("SELECT 1; DROP TABLE observations;").as_deref(),
      Some("SELECT 1;")
    );
  }

  #[test]
  fn reply_without_select_yields_nothing() {
    assert_eq!(extract_sql("I cannot help with that."), None);
    assert_eq!(extract_sql(""), None);
  }

  #[test]
  fn prompt_names_the_request() {
    let req = AggregateRequest::new("age", "average", "u1").unwrap();
    let prompt = ChatSynthesizer::prompt(&req);
    assert!(prompt.contains("average"));
    assert!(prompt.contains("'age'"));
    assert!(prompt.contains("'u1'"));
  }
}
