//! In-memory tables produced by the readers, and numeric column selection.
//!
//! Both readers reduce every cell to a [`Cell`] as they go, so a table only
//! remembers what column selection needs: whether a cell is missing, a
//! number, or something else.

use std::collections::HashSet;

use tabula_core::observation::ColumnSeries;

use crate::error::IngestError;

/// Cell texts treated as missing (after trimming).
pub const MISSING_MARKERS: &[&str] = &[
  "", "NA", "N/A", "NaN", "nan", "null", "NULL", "None", "#N/A", "-NaN", "n/a", "<NA>",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
  Missing,
  Number(f64),
  /// Text, booleans, dates: anything that makes a column non-numeric.
  Other,
}

impl Cell {
  /// Classify a textual cell.
  pub fn parse(text: &str) -> Self {
    let text = text.trim();
    if MISSING_MARKERS.contains(&text) {
      return Self::Missing;
    }
    match text.parse::<f64>() {
      Ok(v) if v.is_nan() => Self::Missing,
      Ok(v) => Self::Number(v),
      Err(_) => Self::Other,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
  pub name:  String,
  pub cells: Vec<Cell>,
}

/// A parsed file: named columns of equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
  columns: Vec<Column>,
}

impl Table {
  /// Start a table from a header row. Blank names become `Unnamed: i`;
  /// repeated names get `.1`, `.2`, ... suffixes.
  pub fn with_header<I, S>(header: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut seen = HashSet::new();
    let columns = header
      .into_iter()
      .enumerate()
      .map(|(i, name)| {
        let name = name.as_ref().trim();
        let base = if name.is_empty() { format!("Unnamed: {i}") } else { name.to_owned() };

        let mut candidate = base.clone();
        let mut n = 0;
        while !seen.insert(candidate.clone()) {
          n += 1;
          candidate = format!("{base}.{n}");
        }
        Column { name: candidate, cells: Vec::new() }
      })
      .collect();

    Self { columns }
  }

  /// Append a data row. Short rows are padded with missing cells; a row
  /// wider than the header is an error.
  pub fn push_row(&mut self, row: impl IntoIterator<Item = Cell>) -> Result<(), IngestError> {
    let width = self.columns.len();
    let row_no = self.rows() + 1;
    let mut filled = 0;
    for cell in row {
      let Some(column) = self.columns.get_mut(filled) else {
        return Err(IngestError::Parse(format!(
          "row {row_no} has more fields than the {width} header columns"
        )));
      };
      column.cells.push(cell);
      filled += 1;
    }
    for column in &mut self.columns[filled..] {
      column.cells.push(Cell::Missing);
    }
    Ok(())
  }

  pub fn columns(&self) -> &[Column] { &self.columns }

  /// Number of data rows.
  pub fn rows(&self) -> usize { self.columns.first().map_or(0, |c| c.cells.len()) }

  /// Columns whose present cells are all numbers and that have at least one
  /// present cell, in header order. Missing cells are skipped.
  pub fn numeric_columns(&self) -> Vec<ColumnSeries> {
    self
      .columns
      .iter()
      .filter(|c| !c.cells.contains(&Cell::Other))
      .filter_map(|c| {
        let values: Vec<f64> = c
          .cells
          .iter()
          .filter_map(|cell| match cell {
            Cell::Number(v) => Some(*v),
            _ => None,
          })
          .collect();
        (!values.is_empty()).then(|| ColumnSeries::new(c.name.clone(), values))
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn names(t: &Table) -> Vec<&str> { t.columns().iter().map(|c| c.name.as_str()).collect() }

  #[test]
  fn cells_are_classified() {
    assert_eq!(Cell::parse(" 10 "), Cell::Number(10.0));
    assert_eq!(Cell::parse("-1.5e3"), Cell::Number(-1500.0));
    assert_eq!(Cell::parse("NA"), Cell::Missing);
    assert_eq!(Cell::parse("  "), Cell::Missing);
    assert_eq!(Cell::parse("<NA>"), Cell::Missing);
    assert_eq!(Cell::parse("alice"), Cell::Other);
    assert_eq!(Cell::parse("true"), Cell::Other);
    assert_eq!(Cell::parse("2024-01-01"), Cell::Other);
  }

  #[test]
  fn header_names_are_made_unique() {
    let t = Table::with_header(["a", "", "a", "b", "a"]);
    assert_eq!(names(&t), ["a", "Unnamed: 1", "a.1", "b", "a.2"]);
  }

  #[test]
  fn suffixes_skip_names_already_taken() {
    let t = Table::with_header(["a", "a.1", "a"]);
    assert_eq!(names(&t), ["a", "a.1", "a.2"]);
  }

  #[test]
  fn short_rows_are_padded_and_long_rows_rejected() {
    let mut t = Table::with_header(["a", "b"]);
    t.push_row([Cell::Number(1.0)]).unwrap();
    assert_eq!(t.columns()[1].cells, [Cell::Missing]);

    let err = t
      .push_row([Cell::Number(1.0), Cell::Number(2.0), Cell::Number(3.0)])
      .unwrap_err();
    assert!(matches!(err, IngestError::Parse(_)));
  }

  #[test]
  fn numeric_columns_keep_order_and_skip_the_rest() {
    let mut t = Table::with_header(["age", "name", "empty", "score", "mixed"]);
    t.push_row([
      Cell::Number(10.0),
      Cell::Other,
      Cell::Missing,
      Cell::Missing,
      Cell::Number(1.0),
    ])
    .unwrap();
    t.push_row([
      Cell::Number(20.0),
      Cell::Other,
      Cell::Missing,
      Cell::Number(0.5),
      Cell::Other,
    ])
    .unwrap();

    assert_eq!(t.numeric_columns(), vec![
      ColumnSeries::new("age", vec![10.0, 20.0]),
      ColumnSeries::new("score", vec![0.5]),
    ]);
  }

  #[test]
  fn header_only_table_has_no_numeric_columns() {
    let t = Table::with_header(["a", "b"]);
    assert_eq!(t.rows(), 0);
    assert!(t.numeric_columns().is_empty());
  }
}
