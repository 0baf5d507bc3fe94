//! Aggregate requests, the closed set of executable aggregate functions, and
//! the canonical fallback query template.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Name of the observations table as it appears in query text.
pub const OBSERVATIONS_TABLE: &str = "observations";

// ─── Functions ───────────────────────────────────────────────────────────────

/// Aggregate functions that may be executed against the store. Anything
/// outside this set is refused, whoever wrote the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
  Sum,
  Avg,
  Min,
  Max,
  Count,
  /// Like `SUM` but always real and `0.0` over no rows.
  Total,
}

impl AggregateFn {
  pub const ALL: [Self; 6] = [
    Self::Sum,
    Self::Avg,
    Self::Min,
    Self::Max,
    Self::Count,
    Self::Total,
  ];

  /// Case-insensitive lookup of a SQL function keyword.
  pub fn from_keyword(keyword: &str) -> Option<Self> {
    Self::ALL
      .into_iter()
      .find(|f| f.keyword().eq_ignore_ascii_case(keyword.trim()))
  }

  pub fn keyword(self) -> &'static str {
    match self {
      Self::Sum => "SUM",
      Self::Avg => "AVG",
      Self::Min => "MIN",
      Self::Max => "MAX",
      Self::Count => "COUNT",
      Self::Total => "TOTAL",
    }
  }
}

impl fmt::Display for AggregateFn {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.keyword())
  }
}

// ─── Request ─────────────────────────────────────────────────────────────────

/// A validated `(column, operation, user)` tuple.
///
/// `operation` is free text: it is handed to the synthesizer (which may
/// understand words like "mean") and to the fallback template unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRequest {
  column:    String,
  operation: String,
  user_id:   String,
}

impl AggregateRequest {
  /// Returns [`Error::MissingField`] for the first blank field.
  pub fn new(
    column: impl Into<String>,
    operation: impl Into<String>,
    user_id: impl Into<String>,
  ) -> Result<Self> {
    let column = column.into();
    let operation = operation.into();
    let user_id = user_id.into();

    if column.trim().is_empty() {
      return Err(Error::MissingField("column"));
    }
    if operation.trim().is_empty() {
      return Err(Error::MissingField("operation"));
    }
    if user_id.trim().is_empty() {
      return Err(Error::MissingField("user_id"));
    }

    Ok(Self { column, operation, user_id })
  }

  pub fn column(&self) -> &str { &self.column }

  pub fn operation(&self) -> &str { &self.operation }

  pub fn user_id(&self) -> &str { &self.user_id }

  /// The requested function, if the operation names one directly.
  pub fn known_function(&self) -> Option<AggregateFn> {
    AggregateFn::from_keyword(&self.operation)
  }
}

// ─── Executable query ────────────────────────────────────────────────────────

/// A query that has passed validation. Stores execute this, never the text
/// it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateQuery {
  pub function: AggregateFn,
  pub column:   String,
  pub user_id:  String,
}

// ─── Fallback template ───────────────────────────────────────────────────────

/// The canonical query used whenever synthesis is unavailable or its output
/// is rejected. Always non-empty.
pub fn fallback_query(request: &AggregateRequest) -> String {
  format!(
    "SELECT {op}(value) FROM {OBSERVATIONS_TABLE} WHERE column_name = {col} AND user_id = {user};",
    op = request.operation().trim(),
    col = quote_literal(request.column()),
    user = quote_literal(request.user_id()),
  )
}

/// Render `s` as a single-quoted SQL string literal.
pub fn quote_literal(s: &str) -> String { format!("'{}'", s.replace('\'', "''")) }
