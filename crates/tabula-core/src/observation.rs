//! Observations: the numeric readings extracted from uploaded files.
//!
//! The full set for a user is replaced wholesale on every successful
//! ingestion. Individual observations are never updated.

use serde::{Deserialize, Serialize};

/// One numeric reading belonging to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
  /// Store-generated; increases in insertion order.
  pub id:          i64,
  pub user_id:     String,
  pub column_name: String,
  pub value:       f64,
}

/// The present values of one numeric column, in file row order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSeries {
  pub name:   String,
  pub values: Vec<f64>,
}

impl ColumnSeries {
  pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
    Self { name: name.into(), values }
  }
}
