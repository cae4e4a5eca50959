//! log2 transform of expression intensities with missing-value filling

use serde::{Deserialize, Serialize};

use crate::data::ExpressionMatrix;
use crate::error::Result;
use crate::stats::quantile;

/// When to apply log2 before filling missing values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTransformMode {
    /// Always take log2
    Always,
    /// Take log2 only when the value distribution looks unlogged
    Auto,
    /// Leave values on their current scale
    Never,
}

impl Default for LogTransformMode {
    fn default() -> Self {
        LogTransformMode::Always
    }
}

/// Result of [`log2_fill`]
#[derive(Debug, Clone)]
pub struct LogTransformed {
    pub matrix: ExpressionMatrix,
    pub transformed: bool,
    /// Cells that were NaN or infinite after the transform and set to the fill value
    pub n_filled: usize,
}

/// Quantile heuristic for raw intensities: a large 99th percentile, or a
/// wide positive range, means the data are not yet on a log scale.
pub fn looks_unlogged(matrix: &ExpressionMatrix) -> bool {
    let values: Vec<f64> = matrix.values().iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return false;
    }
    let q = |p: f64| quantile(&values, p);
    q(0.99) > 100.0 || (q(1.0) - q(0.0) > 50.0 && q(0.25) > 0.0)
}

/// Apply log2 elementwise, then replace every non-finite value with `fill`.
/// Zero and negative intensities become -Inf/NaN under the log and are
/// filled like missing values. Shape and IDs are preserved.
pub fn log2_fill(matrix: &ExpressionMatrix, mode: LogTransformMode, fill: f64) -> Result<LogTransformed> {
    let transformed = match mode {
        LogTransformMode::Always => true,
        LogTransformMode::Never => false,
        LogTransformMode::Auto => {
            let unlogged = looks_unlogged(matrix);
            if !unlogged {
                log::info!("Expression values already look log-scaled; skipping log2");
            }
            unlogged
        }
    };

    let mut values = matrix.values().to_owned();
    if transformed {
        values.mapv_inplace(f64::log2);
    }
    let mut n_filled = 0;
    values.mapv_inplace(|v| {
        if v.is_finite() {
            v
        } else {
            n_filled += 1;
            fill
        }
    });
    log::debug!(
        "log2 transform {}: {} undefined values set to {}",
        if transformed { "applied" } else { "skipped" },
        n_filled,
        fill
    );

    Ok(LogTransformed {
        matrix: matrix.with_values(values)?,
        transformed,
        n_filled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn matrix(values: ndarray::Array2<f64>) -> ExpressionMatrix {
        let (r, c) = values.dim();
        ExpressionMatrix::new(
            values,
            (0..r).map(|i| format!("p{}", i)).collect(),
            (0..c).map(|i| format!("s{}", i)).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_log2_fill_keeps_shape_and_leaves_no_nan() {
        let m = matrix(array![[8.0, f64::NAN, 0.0], [1.0, -3.0, 1024.0]]);
        let out = log2_fill(&m, LogTransformMode::Always, 0.0).unwrap();
        assert_eq!(out.matrix.values().dim(), (2, 3));
        assert_eq!(out.matrix.count_non_finite(), 0);
        assert_eq!(out.n_filled, 3);
        assert_eq!(out.matrix.values()[[0, 0]], 3.0);
        assert_eq!(out.matrix.values()[[1, 2]], 10.0);
        assert_eq!(out.matrix.feature_ids(), m.feature_ids());
    }

    #[test]
    fn test_auto_mode_detects_scale() {
        let raw = matrix(array![[120.0, 3000.0], [15.0, 8000.0]]);
        assert!(looks_unlogged(&raw));
        assert!(log2_fill(&raw, LogTransformMode::Auto, 0.0).unwrap().transformed);

        let logged = matrix(array![[6.5, 11.2], [3.9, f64::NAN]]);
        let out = log2_fill(&logged, LogTransformMode::Auto, 0.0).unwrap();
        assert!(!out.transformed);
        assert_eq!(out.matrix.values()[[0, 1]], 11.2);
        assert_eq!(out.matrix.values()[[1, 1]], 0.0);
    }
}
