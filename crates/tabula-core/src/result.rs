//! Computed results: the latest aggregate outcome retained per user.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single scalar produced by an aggregate query, or the text that stands
/// in for one when execution or persistence failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggregateValue {
  /// No rows, or an aggregate over nothing (e.g. `AVG` of zero rows).
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
}

impl AggregateValue {
  /// Append a diagnostic note, turning the value into text.
  pub fn annotate(&self, note: impl fmt::Display) -> Self {
    Self::Text(format!("{self} ({note})"))
  }
}

impl fmt::Display for AggregateValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Null => f.write_str("null"),
      Self::Integer(i) => write!(f, "{i}"),
      // Keep a trailing `.0` so reals never read as integers.
      Self::Real(r) if r.is_finite() && r.fract() == 0.0 => write!(f, "{r:.1}"),
      Self::Real(r) => write!(f, "{r}"),
      Self::Text(t) => f.write_str(t),
    }
  }
}

/// The stored outcome of the most recent computation for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedResult {
  pub user_id:     String,
  pub column_name: String,
  pub operation:   String,
  pub query_text:  String,
  pub result:      AggregateValue,
  pub computed_at: DateTime<Utc>,
}
