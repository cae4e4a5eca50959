//! Spreadsheet and delimited-text tables
//!
//! Everything exported by the pipelines goes through [`Sheet`] and
//! [`write_xlsx`]. Reading accepts xlsx/xls/ods workbooks (first worksheet)
//! and comma or tab separated text.

use std::path::Path;

use calamine::{open_workbook_auto, DataType, Reader};
use rust_xlsxwriter::Workbook;

use crate::error::{DgeError, Result};

/// Longest worksheet name Excel accepts
const MAX_SHEET_NAME: usize = 31;

/// One table cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    pub fn text<S: Into<String>>(value: S) -> Self {
        Cell::Text(value.into())
    }

    /// Parse text the way a typed reader would: empty stays empty,
    /// numeric text becomes a number.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Empty;
        }
        match trimmed.parse::<f64>() {
            Ok(v) => Cell::Number(v),
            Err(_) => Cell::Text(trimmed.trim_matches('"').to_string()),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Number(v) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    format!("{}", *v as i64)
                } else {
                    format!("{}", v)
                }
            }
            Cell::Empty => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty) || matches!(self, Cell::Number(v) if v.is_nan())
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<Option<String>> for Cell {
    fn from(value: Option<String>) -> Self {
        value.map(Cell::Text).unwrap_or(Cell::Empty)
    }
}

/// A named table with a header row
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new<S: Into<String>>(name: S, header: Vec<String>) -> Self {
        Self {
            name: name.into(),
            header,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.header.len() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} cells per row in sheet '{}'", self.header.len(), self.name),
                got: row.len().to_string(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Insert a column before position `at`; `values` must have one cell per row
    pub fn insert_column(&mut self, at: usize, header: &str, values: Vec<Cell>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} cells for column '{}'", self.rows.len(), header),
                got: values.len().to_string(),
            });
        }
        let at = at.min(self.header.len());
        self.header.insert(at, header.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            let pos = at.min(row.len());
            row.insert(pos, value);
        }
        Ok(())
    }
}

fn sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if "[]:*?/\\".contains(c) { '_' } else { c })
        .take(MAX_SHEET_NAME)
        .collect();
    if cleaned.is_empty() {
        "Sheet1".to_string()
    } else {
        cleaned
    }
}

/// Write one sheet to an .xlsx file, replacing any existing file.
/// NaN becomes an empty cell and the infinities become `Inf`/`-Inf` text.
pub fn write_xlsx<P: AsRef<Path>>(sheet: &Sheet, path: P) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name(&sheet.name))?;

    for (col, title) in sheet.header.iter().enumerate() {
        worksheet.write_string(0, col as u16, title)?;
    }
    for (r, row) in sheet.rows.iter().enumerate() {
        let excel_row = (r + 1) as u32;
        for (c, cell) in row.iter().enumerate() {
            let col = c as u16;
            match cell {
                Cell::Text(s) => {
                    worksheet.write_string(excel_row, col, s)?;
                }
                Cell::Number(v) if v.is_nan() => {}
                Cell::Number(v) if v.is_infinite() => {
                    worksheet.write_string(excel_row, col, if *v > 0.0 { "Inf" } else { "-Inf" })?;
                }
                Cell::Number(v) => {
                    worksheet.write_number(excel_row, col, *v)?;
                }
                Cell::Empty => {}
            }
        }
    }

    workbook.save(path.as_ref())?;
    log::debug!("Wrote {} rows to {}", sheet.n_rows(), path.as_ref().display());
    Ok(())
}

fn convert_cell(value: &DataType) -> Cell {
    match value {
        DataType::Empty => Cell::Empty,
        DataType::Float(v) => Cell::Number(*v),
        DataType::Int(v) => Cell::Number(*v as f64),
        DataType::Bool(b) => Cell::Text(b.to_string()),
        DataType::String(s) => {
            if s.trim().is_empty() {
                Cell::Empty
            } else {
                Cell::Text(s.clone())
            }
        }
        other => Cell::Text(other.to_string()),
    }
}

/// Read the first worksheet of a workbook. The first non-empty row is the header.
pub fn read_xlsx<P: AsRef<Path>>(path: P) -> Result<Sheet> {
    let path = path.as_ref();
    let mut workbook = open_workbook_auto(path)?;
    let name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| DgeError::EmptyData {
            reason: format!("{} contains no worksheets", path.display()),
        })?;
    let range = workbook.worksheet_range_at(0).ok_or_else(|| DgeError::EmptyData {
        reason: format!("{} contains no worksheets", path.display()),
    })??;

    let mut rows = range
        .rows()
        .map(|r| r.iter().map(convert_cell).collect::<Vec<_>>())
        .filter(|r| !r.iter().all(Cell::is_empty));
    let header = rows.next().ok_or_else(|| DgeError::EmptyData {
        reason: format!("worksheet '{}' in {} has no header row", name, path.display()),
    })?;
    let header: Vec<String> = header.iter().map(Cell::as_text).collect();
    let rows: Vec<Vec<Cell>> = rows.collect();

    log::debug!("Read {} rows x {} columns from {}", rows.len(), header.len(), path.display());
    Ok(Sheet { name, header, rows })
}

/// Read comma or tab separated text. The delimiter follows the extension,
/// with `.txt` treated as tab separated.
pub fn read_delimited<P: AsRef<Path>>(path: P) -> Result<Sheet> {
    let path = path.as_ref();
    let delimiter = match extension(path).as_str() {
        "csv" => b',',
        _ => b'\t',
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut records = reader.records();
    let header: Vec<String> = match records.next() {
        Some(record) => record?.iter().map(|s| s.trim().trim_matches('"').to_string()).collect(),
        None => {
            return Err(DgeError::EmptyData {
                reason: format!("{} is empty", path.display()),
            })
        }
    };
    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        rows.push(record.iter().map(Cell::parse).collect());
    }

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Sheet { name, header, rows })
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Read any supported table, choosing the reader by file extension
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<Sheet> {
    let path = path.as_ref();
    match extension(path).as_str() {
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => read_xlsx(path),
        "csv" | "tsv" | "txt" => read_delimited(path),
        other => Err(DgeError::InvalidInput {
            reason: format!("unsupported table format '.{}' for {}", other, path.display()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_xlsx_round_trip_keeps_rows_and_blanks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.xlsx");
        let mut sheet = Sheet::new("results", vec!["gene".into(), "padj".into(), "entrez".into()]);
        sheet.push_row(vec!["TP53".into(), 0.01.into(), Cell::text("7157")]).unwrap();
        sheet.push_row(vec!["FAKE1".into(), f64::NAN.into(), Cell::Empty]).unwrap();
        sheet.push_row(vec!["BIG".into(), f64::INFINITY.into(), Cell::Empty]).unwrap();
        write_xlsx(&sheet, &path).unwrap();

        let back = read_xlsx(&path).unwrap();
        assert_eq!(back.header, sheet.header);
        assert_eq!(back.n_rows(), 3);
        assert_eq!(back.rows[0][1], Cell::Number(0.01));
        assert!(back.rows[1][1].is_empty());
        assert_eq!(back.rows[2][1], Cell::Text("Inf".into()));
    }

    #[test]
    fn test_push_row_rejects_ragged_rows() {
        let mut sheet = Sheet::new("x", vec!["a".into(), "b".into()]);
        assert!(sheet.push_row(vec![Cell::Empty]).is_err());
    }

    #[test]
    fn test_insert_column() {
        let mut sheet = Sheet::new("x", vec!["ID".into(), "s1".into()]);
        sheet.push_row(vec!["p1".into(), 1.0.into()]).unwrap();
        sheet.insert_column(1, "Gene Symbol", vec![Cell::text("ACTB")]).unwrap();
        assert_eq!(sheet.header, vec!["ID", "Gene Symbol", "s1"]);
        assert_eq!(sheet.rows[0][1], Cell::text("ACTB"));
        assert!(sheet.insert_column(0, "bad", vec![]).is_err());
    }

    #[test]
    fn test_read_delimited_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counts.tsv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "gene\ts1\ts2").unwrap();
        writeln!(f, "A\t1\t2").unwrap();
        writeln!(f, "B\t\tNA").unwrap();
        drop(f);

        let sheet = read_table(&path).unwrap();
        assert_eq!(sheet.header, vec!["gene", "s1", "s2"]);
        assert_eq!(sheet.rows[0][2], Cell::Number(2.0));
        assert_eq!(sheet.rows[1][1], Cell::Empty);
        assert_eq!(sheet.rows[1][2], Cell::Text("NA".into()));
        assert!(read_table(dir.path().join("x.parquet")).is_err());
    }

    #[test]
    fn test_sheet_name_is_sanitised() {
        assert_eq!(sheet_name("a/b:c"), "a_b_c");
        assert_eq!(sheet_name(&"x".repeat(40)).len(), MAX_SHEET_NAME);
    }
}
