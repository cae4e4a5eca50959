//! Size factor estimation using the median of ratios method

use ndarray::{Array1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::CountDataSet;
use crate::error::{DgeError, Result};
use crate::stats::median;

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeFactorMethod {
    /// Median of ratios against the geometric mean of genes with no zeros
    Ratio,
    /// Geometric mean over positive counts only, for sparse data
    PosCounts,
}

impl Default for SizeFactorMethod {
    fn default() -> Self {
        SizeFactorMethod::Ratio
    }
}

/// Estimate size factors and store them (with normalized counts) on the dataset
pub fn estimate_size_factors(dds: &mut CountDataSet, method: SizeFactorMethod) -> Result<()> {
    let counts = dds.counts().counts();
    let size_factors = match method {
        SizeFactorMethod::Ratio => median_of_ratios(counts)?,
        SizeFactorMethod::PosCounts => poscounts(counts)?,
    };
    log::debug!(
        "Size factors ({:?}): {:?}",
        method,
        size_factors.iter().map(|s| format!("{:.3}", s)).collect::<Vec<_>>()
    );
    dds.set_size_factors(size_factors)
}

/// Ratios of each sample to a per-gene reference, restricted to genes with
/// a finite positive log reference.
fn ratios_to_reference(counts: ArrayView2<f64>, log_geo_means: &[f64]) -> Result<Array1<f64>> {
    let n_samples = counts.ncols();
    let mut size_factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let ratios: Vec<f64> = log_geo_means
            .iter()
            .enumerate()
            .filter(|(i, lg)| lg.is_finite() && counts[[*i, j]] > 0.0)
            .map(|(i, lg)| (counts[[i, j]].ln() - lg).exp())
            .collect();
        let sf = median(&ratios);
        if !sf.is_finite() || sf <= 0.0 {
            return Err(DgeError::SizeFactorFailed {
                reason: format!("no usable ratios for sample {}", j + 1),
            });
        }
        size_factors[j] = sf;
    }
    Ok(size_factors)
}

fn median_of_ratios(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let n_samples = counts.ncols() as f64;
    let log_geo_means: Vec<f64> = counts
        .axis_iter(Axis(0))
        .map(|row| {
            if row.iter().all(|&x| x > 0.0) {
                row.iter().map(|&x| x.ln()).sum::<f64>() / n_samples
            } else {
                f64::NEG_INFINITY
            }
        })
        .collect();
    if log_geo_means.iter().all(|lg| !lg.is_finite()) {
        return Err(DgeError::SizeFactorFailed {
            reason: "every gene contains at least one zero; use the poscounts method".to_string(),
        });
    }
    ratios_to_reference(counts, &log_geo_means)
}

fn poscounts(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let n_samples = counts.ncols() as f64;
    // The log sum over positive counts is divided by the total sample count.
    let log_geo_means: Vec<f64> = counts
        .axis_iter(Axis(0))
        .map(|row| {
            if row.iter().any(|&x| x > 0.0) {
                row.iter().filter(|&&x| x > 0.0).map(|x| x.ln()).sum::<f64>() / n_samples
            } else {
                f64::NEG_INFINITY
            }
        })
        .collect();
    let size_factors = ratios_to_reference(counts, &log_geo_means)?;
    let log_center = size_factors.iter().map(|s| s.ln()).sum::<f64>() / size_factors.len() as f64;
    Ok(size_factors.mapv(|s| s / log_center.exp()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use ndarray::array;

    fn dataset(counts: ndarray::Array2<f64>) -> CountDataSet {
        let n_genes = counts.nrows();
        let samples: Vec<String> = (1..=4).map(|i| format!("s{}", i)).collect();
        let genes: Vec<String> = (1..=n_genes).map(|i| format!("g{}", i)).collect();
        let cm = CountMatrix::new(counts, genes, samples.clone()).unwrap();
        let mut meta = SampleMetadata::new(samples);
        meta.add_condition("c", vec!["a".into(), "a".into(), "b".into(), "b".into()])
            .unwrap();
        CountDataSet::new(cm, meta, "c", "a").unwrap()
    }

    #[test]
    fn test_size_factors_track_depth() {
        let mut dds = dataset(array![
            [10.0, 20.0, 10.0, 40.0],
            [30.0, 60.0, 30.0, 120.0],
            [5.0, 10.0, 5.0, 20.0]
        ]);
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        let sf = dds.size_factors().unwrap();
        assert!((sf[1] / sf[0] - 2.0).abs() < 1e-10);
        assert!((sf[3] / sf[0] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn test_ratio_fails_when_all_genes_have_zeros() {
        let mut dds = dataset(array![[0.0, 20.0, 10.0, 40.0], [30.0, 0.0, 30.0, 120.0]]);
        assert!(estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).is_err());

        estimate_size_factors(&mut dds, SizeFactorMethod::PosCounts).unwrap();
        let sf = dds.size_factors().unwrap();
        let geo = (sf.iter().map(|s| s.ln()).sum::<f64>() / 4.0).exp();
        assert!((geo - 1.0).abs() < 1e-10);
    }
}
