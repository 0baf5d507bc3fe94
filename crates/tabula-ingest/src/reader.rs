//! Tabular file readers.
//!
//! `.csv` files go through the `csv` crate; every other extension is handed
//! to `calamine`, which reads the first worksheet of xlsx/xlsm/xls/ods
//! workbooks. Both produce a [`Table`] whose first row is the header.

use std::{fs::File, io::Read, path::Path};

use calamine::{Data, Reader as _, open_workbook_auto};

use crate::{
  error::IngestError,
  table::{Cell, Table},
};

/// Read `path` into a table, choosing the reader by file extension.
///
/// Blocking; call from `spawn_blocking` inside async code.
pub fn read_table(path: &Path) -> Result<Table, IngestError> {
  let file = File::open(path)
    .map_err(|source| IngestError::FileAccess { path: path.to_owned(), source })?;

  let is_csv = path
    .extension()
    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

  if is_csv { read_csv(file) } else { read_spreadsheet(path) }
}

/// Parse CSV text with a header row.
pub fn read_csv(input: impl Read) -> Result<Table, IngestError> {
  let mut reader = csv::ReaderBuilder::new()
    .has_headers(true)
    .flexible(true)
    .from_reader(input);

  let header = reader.headers()?.clone();
  if header.is_empty() {
    return Err(IngestError::Parse("no columns to parse from file".into()));
  }

  let mut table = Table::with_header(header.iter());
  for record in reader.records() {
    let record = record?;
    table.push_row(record.iter().map(Cell::parse))?;
  }
  Ok(table)
}

fn read_spreadsheet(path: &Path) -> Result<Table, IngestError> {
  let mut workbook = open_workbook_auto(path)?;
  let range = workbook
    .worksheet_range_at(0)
    .ok_or_else(|| IngestError::Parse("workbook has no worksheets".into()))??;

  let mut rows = range.rows();
  let Some(header) = rows.next() else {
    return Err(IngestError::Parse("no columns to parse from file".into()));
  };

  let mut table = Table::with_header(header.iter().map(|c| c.to_string()));
  for row in rows {
    table.push_row(row.iter().map(spreadsheet_cell))?;
  }
  Ok(table)
}

fn spreadsheet_cell(data: &Data) -> Cell {
  match data {
    Data::Empty | Data::Error(_) => Cell::Missing,
    Data::Int(i) => Cell::Number(*i as f64),
    Data::Float(f) if f.is_nan() => Cell::Missing,
    Data::Float(f) => Cell::Number(*f),
    // Numbers stored as text are still numbers.
    Data::String(s) => Cell::parse(s),
    _ => Cell::Other,
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write as _;

  use tabula_core::observation::ColumnSeries;

  use super::*;

  fn csv(text: &str) -> Result<Table, IngestError> { read_csv(text.as_bytes()) }

  #[test]
  fn picks_numeric_columns_from_csv() {
    let table = csv("age,name,score\n10,alice,1.5\n20,bob,\n30,carol,NA\n").unwrap();
    assert_eq!(table.numeric_columns(), vec![
      ColumnSeries::new("age", vec![10.0, 20.0, 30.0]),
      ColumnSeries::new("score", vec![1.5]),
    ]);
  }

  #[test]
  fn all_missing_column_is_dropped() {
    let table = csv("a,b\n1,\n2,NaN\n").unwrap();
    assert_eq!(table.numeric_columns(), vec![ColumnSeries::new("a", vec![1.0, 2.0])]);
  }

  #[test]
  fn one_text_value_makes_a_column_non_numeric() {
    let table = csv("a,b\n1,2\n3,x\n").unwrap();
    assert_eq!(table.numeric_columns(), vec![ColumnSeries::new("a", vec![1.0, 3.0])]);
  }

  #[test]
  fn ragged_short_rows_are_padded() {
    let table = csv("a,b\n1,2\n3\n").unwrap();
    assert_eq!(table.numeric_columns(), vec![
      ColumnSeries::new("a", vec![1.0, 3.0]),
      ColumnSeries::new("b", vec![2.0]),
    ]);
  }

  #[test]
  fn rows_longer_than_the_header_fail() {
    assert!(matches!(csv("a,b\n1,2,3\n"), Err(IngestError::Parse(_))));
  }

  #[test]
  fn empty_input_fails() {
    assert!(matches!(csv(""), Err(IngestError::Parse(_))));
  }

  #[test]
  fn header_without_rows_has_no_columns() {
    let table = csv("a,b\n").unwrap();
    assert!(table.numeric_columns().is_empty());
  }

  #[test]
  fn invalid_utf8_fails_to_parse() {
    assert!(matches!(read_csv(&b"a,b\n\xff\xfe,1\n"[..]), Err(IngestError::Parse(_))));
  }

  #[test]
  fn missing_file_is_a_file_access_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_table(&dir.path().join("nope.csv")).unwrap_err();
    assert!(matches!(err, IngestError::FileAccess { .. }));
    assert!(!err.is_retryable());
  }

  #[test]
  fn reads_csv_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.CSV");
    std::fs::File::create(&path)
      .unwrap()
      .write_all(b"x\n1\n2\n")
      .unwrap();

    let table = read_table(&path).unwrap();
    assert_eq!(table.numeric_columns(), vec![ColumnSeries::new("x", vec![1.0, 2.0])]);
  }

  #[test]
  fn reads_first_worksheet_of_a_workbook() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.xlsx");

    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, name) in ["age", "name", "flag", "score"].into_iter().enumerate() {
      sheet.write_string(0, col as u16, name).unwrap();
    }
    for (row, (age, name, flag)) in
      [(10, "alice", true), (20, "bob", false), (30, "carol", true)].into_iter().enumerate()
    {
      let row = row as u32 + 1;
      sheet.write_number(row, 0, age).unwrap();
      sheet.write_string(row, 1, name).unwrap();
      sheet.write_boolean(row, 2, flag).unwrap();
    }
    // `score` has a gap and a number stored as text.
    sheet.write_number(1, 3, 1.5).unwrap();
    sheet.write_string(3, 3, "2.5").unwrap();
    workbook.save(&path).unwrap();

    let table = read_table(&path).unwrap();
    assert_eq!(table.numeric_columns(), vec![
      ColumnSeries::new("age", vec![10.0, 20.0, 30.0]),
      ColumnSeries::new("score", vec![1.5, 2.5]),
    ]);
  }

  #[test]
  fn spreadsheet_cells_map_to_table_cells() {
    assert!(matches!(spreadsheet_cell(&Data::Empty), Cell::Missing));
    assert!(matches!(
      spreadsheet_cell(&Data::Error(calamine::CellErrorType::NA)),
      Cell::Missing
    ));
    assert!(matches!(spreadsheet_cell(&Data::Float(f64::NAN)), Cell::Missing));
    assert!(matches!(spreadsheet_cell(&Data::Int(7)), Cell::Number(n) if n == 7.0));
    assert!(matches!(spreadsheet_cell(&Data::Float(0.5)), Cell::Number(n) if n == 0.5));
    assert!(matches!(spreadsheet_cell(&Data::String("12".into())), Cell::Number(n) if n == 12.0));
    assert!(matches!(spreadsheet_cell(&Data::String("NA".into())), Cell::Missing));
    assert!(matches!(spreadsheet_cell(&Data::String("x".into())), Cell::Other));
    assert!(matches!(spreadsheet_cell(&Data::Bool(true)), Cell::Other));
  }

  #[test]
  fn garbage_spreadsheet_fails_to_parse() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.xlsx");
    std::fs::write(&path, b"this is not a workbook").unwrap();

    assert!(matches!(read_table(&path), Err(IngestError::Parse(_))));
  }
}
