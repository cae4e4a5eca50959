//! Continuous expression values (microarray intensities or any numeric table)

use ndarray::{Array2, ArrayView2};

use crate::error::{DgeError, Result};

/// Features in rows, samples in columns. Missing values are NaN.
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    values: Array2<f64>,
    feature_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl ExpressionMatrix {
    pub fn new(values: Array2<f64>, feature_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_features, n_samples) = values.dim();
        if feature_ids.len() != n_features {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} feature IDs", n_features),
                got: format!("{} feature IDs", feature_ids.len()),
            });
        }
        if sample_ids.len() != n_samples {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }
        if n_features == 0 || n_samples == 0 {
            return Err(DgeError::InvalidExpressionMatrix {
                reason: format!("matrix is empty ({} x {})", n_features, n_samples),
            });
        }
        Ok(Self {
            values,
            feature_ids,
            sample_ids,
        })
    }

    pub fn n_features(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.values.ncols()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Same IDs, new values of identical shape
    pub fn with_values(&self, values: Array2<f64>) -> Result<Self> {
        if values.dim() != self.values.dim() {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{:?}", self.values.dim()),
                got: format!("{:?}", values.dim()),
            });
        }
        Ok(Self {
            values,
            feature_ids: self.feature_ids.clone(),
            sample_ids: self.sample_ids.clone(),
        })
    }

    pub fn count_non_finite(&self) -> usize {
        self.values.iter().filter(|v| !v.is_finite()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_expression_matrix_allows_missing() {
        let m = ExpressionMatrix::new(array![[1.0, f64::NAN], [2.0, 4.0]], ids("p", 2), ids("s", 2))
            .unwrap();
        assert_eq!(m.count_non_finite(), 1);
    }

    #[test]
    fn test_dimension_checks() {
        assert!(ExpressionMatrix::new(array![[1.0, 2.0]], ids("p", 2), ids("s", 2)).is_err());
        assert!(ExpressionMatrix::new(array![[1.0, 2.0]], ids("p", 1), ids("s", 3)).is_err());

        let m = ExpressionMatrix::new(array![[1.0, 2.0]], ids("p", 1), ids("s", 2)).unwrap();
        assert!(m.with_values(array![[1.0], [2.0]]).is_err());
        assert_eq!(m.with_values(array![[5.0, 6.0]]).unwrap().values()[[0, 1]], 6.0);
    }
}
