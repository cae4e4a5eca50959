//! Expression and count matrices from tables whose first column holds row IDs

use std::path::Path;

use ndarray::Array2;

use super::spreadsheet::{read_table, Cell, Sheet};
use crate::data::{CountMatrix, ExpressionMatrix};
use crate::error::{DgeError, Result};

/// Text that stands for a missing value
fn is_missing_token(s: &str) -> bool {
    matches!(s.trim(), "" | "NA" | "NaN" | "nan" | "null" | "NULL" | "#N/A")
}

/// Build a matrix from a sheet: header cells after the first are sample
/// IDs, the first cell of each row is the feature ID, the rest must be
/// numeric or missing.
pub fn expression_from_sheet(sheet: &Sheet) -> Result<ExpressionMatrix> {
    if sheet.header.len() < 2 {
        return Err(DgeError::InvalidExpressionMatrix {
            reason: format!("sheet '{}' needs an ID column and at least one sample column", sheet.name),
        });
    }
    let sample_ids: Vec<String> = sheet.header[1..].to_vec();
    let n_samples = sample_ids.len();
    let n_rows = sheet.n_rows();
    if n_rows == 0 {
        return Err(DgeError::EmptyData {
            reason: format!("sheet '{}' has no data rows", sheet.name),
        });
    }

    let mut feature_ids = Vec::with_capacity(n_rows);
    let mut values = Array2::from_elem((n_rows, n_samples), f64::NAN);
    for (i, row) in sheet.rows.iter().enumerate() {
        if row.len() > n_samples + 1 && row[n_samples + 1..].iter().any(|c| !c.is_empty()) {
            return Err(DgeError::InvalidExpressionMatrix {
                reason: format!("row {} has {} cells, expected {}", i + 2, row.len(), n_samples + 1),
            });
        }
        let id = row.first().map(Cell::as_text).unwrap_or_default();
        if id.is_empty() {
            return Err(DgeError::InvalidExpressionMatrix {
                reason: format!("row {} has no identifier", i + 2),
            });
        }
        for j in 0..n_samples {
            values[[i, j]] = match row.get(j + 1).unwrap_or(&Cell::Empty) {
                Cell::Number(v) => *v,
                Cell::Empty => f64::NAN,
                Cell::Text(s) if is_missing_token(s) => f64::NAN,
                Cell::Text(s) => s.trim().parse::<f64>().map_err(|_| DgeError::InvalidExpressionMatrix {
                    reason: format!(
                        "non-numeric value '{}' for '{}' in sample '{}'",
                        s, id, sample_ids[j]
                    ),
                })?,
            };
        }
        feature_ids.push(id);
    }

    ExpressionMatrix::new(values, feature_ids, sample_ids)
}

/// Read a table from disk as an expression matrix
pub fn read_expression_table<P: AsRef<Path>>(path: P) -> Result<ExpressionMatrix> {
    let path = path.as_ref();
    let sheet = read_table(path)?;
    let matrix = expression_from_sheet(&sheet)?;
    log::info!(
        "Loaded {} features x {} samples from {}",
        matrix.n_features(),
        matrix.n_samples(),
        path.display()
    );
    Ok(matrix)
}

/// Read a table from disk as integer counts, rounding non-integers when asked
pub fn read_count_table<P: AsRef<Path>>(path: P, round: bool) -> Result<CountMatrix> {
    let matrix = read_expression_table(path)?;
    CountMatrix::from_expression(&matrix, round)
}

/// Matrix as a sheet with the row IDs in the first column
pub fn matrix_to_sheet(name: &str, id_header: &str, matrix: &ExpressionMatrix) -> Sheet {
    let mut header = vec![id_header.to_string()];
    header.extend(matrix.sample_ids().iter().cloned());
    let rows = matrix
        .feature_ids()
        .iter()
        .zip(matrix.values().rows())
        .map(|(id, values)| {
            std::iter::once(Cell::text(id.as_str()))
                .chain(values.iter().map(|&v| Cell::Number(v)))
                .collect()
        })
        .collect();
    Sheet {
        name: name.to_string(),
        header,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(rows: Vec<Vec<Cell>>) -> Sheet {
        Sheet {
            name: "counts".into(),
            header: vec!["gene".into(), "s1".into(), "s2".into()],
            rows,
        }
    }

    #[test]
    fn test_expression_from_sheet_parses_missing() {
        let m = expression_from_sheet(&sheet(vec![
            vec!["A".into(), 1.0.into(), Cell::text("2.5")],
            vec!["B".into(), Cell::text("NA"), Cell::Empty],
        ]))
        .unwrap();
        assert_eq!(m.feature_ids(), &["A".to_string(), "B".to_string()]);
        assert_eq!(m.values()[[0, 1]], 2.5);
        assert!(m.values()[[1, 0]].is_nan());
        assert_eq!(m.count_non_finite(), 2);
    }

    #[test]
    fn test_non_numeric_and_ragged_rows_fail() {
        let bad = sheet(vec![vec!["A".into(), Cell::text("high"), 1.0.into()]]);
        assert!(expression_from_sheet(&bad).is_err());
        let ragged = sheet(vec![vec!["A".into(), 1.0.into(), 2.0.into(), 3.0.into()]]);
        assert!(expression_from_sheet(&ragged).is_err());
        assert!(expression_from_sheet(&sheet(vec![])).is_err());
    }

    #[test]
    fn test_matrix_to_sheet_keeps_ids() {
        let m = expression_from_sheet(&sheet(vec![vec!["A".into(), 1.0.into(), 2.0.into()]])).unwrap();
        let s = matrix_to_sheet("out", "ID", &m);
        assert_eq!(s.header, vec!["ID", "s1", "s2"]);
        assert_eq!(s.rows[0][0], Cell::Text("A".into()));
        assert_eq!(s.rows[0][2], Cell::Number(2.0));
    }
}
