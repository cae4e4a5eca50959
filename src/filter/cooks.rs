//! Cook's distance outlier detection, filtering and count replacement
//!
//! cooks = PearsonResSq / p * h / (1 - h)^2, where the Pearson residual
//! uses a robust method-of-moments dispersion rather than the fitted one
//! so that an outlier cannot mask itself by inflating the dispersion.

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::data::CountDataSet;
use crate::error::{DgeError, Result};
use crate::glm::{design_cells, nb_variance};
use crate::io::DESeqResults;
use crate::stats::trimmed_mean;

/// Floor on the robust dispersion
const MIN_ROBUST_DISP: f64 = 0.04;
/// Cells need this many samples to contribute to outlier calls
const MIN_CELL_FOR_COOKS: usize = 3;

/// Trim fraction and consistency scale for a cell of `n` samples
fn trim_and_scale(n: usize) -> (f64, f64) {
    if n <= 3 {
        (1.0 / 3.0, 2.04)
    } else if n <= 23 {
        (1.0 / 4.0, 1.86)
    } else {
        (1.0 / 8.0, 1.51)
    }
}

fn trimmed_variance(values: &[f64], trim: f64, scale: f64) -> f64 {
    let center = trimmed_mean(values, trim);
    let sq: Vec<f64> = values.iter().map(|v| (v - center).powi(2)).collect();
    scale * trimmed_mean(&sq, trim)
}

/// Sample count of each sample's design cell
fn cell_sizes(cells: &[usize]) -> Vec<usize> {
    cells.iter().map(|c| cells.iter().filter(|d| *d == c).count()).collect()
}

/// Per-gene dispersion from trimmed variances. With a cell of at least three
/// samples the largest within-cell variance is used, otherwise the variance
/// across all samples.
pub fn robust_method_of_moments_disp(normalized: ArrayView2<f64>, design: &Array2<f64>) -> Vec<f64> {
    let cells = design_cells(design);
    let n_cells = cells.iter().copied().max().map_or(0, |m| m + 1);
    let members: Vec<Vec<usize>> = (0..n_cells)
        .map(|c| (0..cells.len()).filter(|&j| cells[j] == c).collect())
        .filter(|m: &Vec<usize>| m.len() >= MIN_CELL_FOR_COOKS)
        .collect();

    normalized
        .rows()
        .into_iter()
        .map(|row| {
            let values = row.to_vec();
            let variance = if members.is_empty() {
                trimmed_variance(&values, 1.0 / 8.0, 1.51)
            } else {
                members
                    .iter()
                    .map(|m| {
                        let cell: Vec<f64> = m.iter().map(|&j| values[j]).collect();
                        let (trim, scale) = trim_and_scale(cell.len());
                        trimmed_variance(&cell, trim, scale)
                    })
                    .fold(0.0, f64::max)
            };
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            if mean > 0.0 {
                ((variance - mean) / (mean * mean)).max(MIN_ROBUST_DISP)
            } else {
                MIN_ROBUST_DISP
            }
        })
        .collect()
}

/// Cook's distance of every gene and sample from the current GLM fit
pub fn cooks_distance(dds: &CountDataSet) -> Result<Array2<f64>> {
    let missing = |what: &str| DgeError::InvalidInput {
        reason: format!("{} required for Cook's distances", what),
    };
    let mu = dds.fitted_mu().ok_or_else(|| missing("A GLM fit"))?;
    let hat = dds.hat_diagonals().ok_or_else(|| missing("Hat diagonals"))?;
    let normalized = dds.normalized_counts().ok_or_else(|| missing("Normalized counts"))?;
    let design = dds.design_matrix();
    let p = design.ncols() as f64;
    let dispersions = robust_method_of_moments_disp(normalized.view(), design);
    let counts = dds.counts().counts();
    let (n_genes, n_samples) = counts.dim();

    let rows: Vec<Vec<f64>> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let alpha = dispersions[i];
            (0..n_samples)
                .map(|j| {
                    let m = mu[[i, j]];
                    let h = hat[[i, j]];
                    let variance = nb_variance(m, alpha);
                    let pearson_sq = (counts[[i, j]] - m).powi(2) / variance;
                    if h.is_finite() && h < 1.0 && pearson_sq.is_finite() {
                        pearson_sq / p * h / (1.0 - h).powi(2)
                    } else {
                        f64::NAN
                    }
                })
                .collect()
        })
        .collect();

    let mut cooks = Array2::zeros((n_genes, n_samples));
    for (i, row) in rows.into_iter().enumerate() {
        for (j, v) in row.into_iter().enumerate() {
            cooks[[i, j]] = v;
        }
    }
    Ok(cooks)
}

/// 99% quantile of F(p, m - p)
pub fn cooks_cutoff(n_samples: usize, n_coefs: usize) -> f64 {
    if n_samples <= n_coefs {
        return f64::INFINITY;
    }
    FisherSnedecor::new(n_coefs as f64, (n_samples - n_coefs) as f64)
        .map(|f| f.inverse_cdf(0.99))
        .unwrap_or(f64::INFINITY)
}

/// Samples whose design cell has at least `min_replicates` members
pub fn replaceable_samples(design: &Array2<f64>, min_replicates: usize) -> Vec<bool> {
    cell_sizes(&design_cells(design))
        .into_iter()
        .map(|n| n >= min_replicates)
        .collect()
}

/// Samples that take part in outlier calls: members of cells with at least
/// three samples, minus those whose counts may have been replaced.
pub fn samples_for_cooks(design: &Array2<f64>, replaceable: Option<&[bool]>) -> Vec<bool> {
    cell_sizes(&design_cells(design))
        .into_iter()
        .enumerate()
        .map(|(j, n)| n >= MIN_CELL_FOR_COOKS && !replaceable.map_or(false, |r| r[j]))
        .collect()
}

/// Largest Cook's distance of each gene over the selected samples, with the
/// sample it occurs in. NaN when no sample is selected.
pub fn max_cooks(cooks: &Array2<f64>, use_sample: &[bool]) -> Vec<(f64, Option<usize>)> {
    cooks
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .filter(|(j, c)| use_sample[*j] && c.is_finite())
                .fold((f64::NAN, None), |best, (j, &c)| {
                    if best.1.is_none() || c > best.0 {
                        (c, Some(j))
                    } else {
                        best
                    }
                })
        })
        .collect()
}

/// Replace counts with Cook's distance above `cutoff` in replaceable samples
/// by the 20% trimmed mean of the gene's normalized counts times the
/// sample's size factor, truncated to an integer. Returns the genes changed.
pub fn replace_outliers(
    dds: &mut CountDataSet,
    cooks: &Array2<f64>,
    cutoff: f64,
    min_replicates: usize,
) -> Result<Vec<usize>> {
    let replaceable = replaceable_samples(dds.design_matrix(), min_replicates);
    dds.set_replaceable(replaceable.clone())?;
    if !replaceable.iter().any(|&r| r) {
        return Ok(Vec::new());
    }

    let size_factors = dds
        .size_factors()
        .ok_or_else(|| DgeError::InvalidInput {
            reason: "Size factors required for outlier replacement".to_string(),
        })?
        .to_vec();
    let mut replacements = Vec::new();
    if let Some(normalized) = dds.normalized_counts() {
        for (i, row) in normalized.rows().into_iter().enumerate() {
            let outliers: Vec<usize> = (0..row.len())
                .filter(|&j| replaceable[j] && cooks[[i, j]] > cutoff)
                .collect();
            if outliers.is_empty() {
                continue;
            }
            let trim_base_mean = trimmed_mean(&row.to_vec(), 0.2);
            for j in outliers {
                replacements.push((i, j, (trim_base_mean * size_factors[j]).floor()));
            }
        }
    }

    let mut genes: Vec<usize> = Vec::new();
    for (i, j, value) in replacements {
        dds.replace_count(i, j, value)?;
        if genes.last() != Some(&i) {
            genes.push(i);
        }
    }
    log::info!(
        "Replaced outlier counts in {} genes (Cook's cutoff {:.3}, {} replaceable samples)",
        genes.len(),
        cutoff,
        replaceable.iter().filter(|&&r| r).count()
    );
    Ok(genes)
}

/// Remove p-values of genes whose largest Cook's distance exceeds the cutoff.
///
/// For a two-level comparison the gene is kept when at least three samples
/// have a higher count than the outlier, since a single low outlier cannot
/// create a spurious difference.
pub fn filter_by_cooks(
    results: &mut DESeqResults,
    max_cooks: &[(f64, Option<usize>)],
    counts: ArrayView2<f64>,
    cutoff: f64,
    two_level: bool,
) -> usize {
    let mut n_filtered = 0;
    for (i, &(value, sample)) in max_cooks.iter().enumerate() {
        results.max_cooks[i] = value;
        let (true, Some(j)) = (value > cutoff, sample) else {
            continue;
        };
        if two_level {
            let out_count = counts[[i, j]];
            if counts.row(i).iter().filter(|&&c| c > out_count).count() >= 3 {
                continue;
            }
        }
        results.pvalues[i] = f64::NAN;
        results.padj[i] = f64::NAN;
        n_filtered += 1;
    }
    log::debug!("Cook's distance filtering removed p-values for {} genes", n_filtered);
    n_filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Contrast;
    use ndarray::array;

    fn two_group_design(n_a: usize, n_b: usize) -> Array2<f64> {
        Array2::from_shape_fn((n_a + n_b, 2), |(j, k)| if k == 0 || j >= n_a { 1.0 } else { 0.0 })
    }

    #[test]
    fn test_cutoff_matches_f_quantile() {
        // qf(0.99, 2, 13) = 6.700965
        assert!((cooks_cutoff(15, 2) - 6.700965).abs() < 1e-4);
        assert!(cooks_cutoff(2, 2).is_infinite());
    }

    #[test]
    fn test_replaceable_and_cooks_samples() {
        let design = two_group_design(12, 3);
        let replaceable = replaceable_samples(&design, 7);
        assert!(replaceable[..12].iter().all(|&r| r));
        assert!(replaceable[12..].iter().all(|&r| !r));

        let used = samples_for_cooks(&design, Some(&replaceable));
        assert_eq!(used.iter().filter(|&&u| u).count(), 3);
        assert!(samples_for_cooks(&design, None).iter().all(|&u| u));
    }

    #[test]
    fn test_robust_disp_floor() {
        let design = two_group_design(3, 3);
        let normalized = array![[10.0, 10.0, 10.0, 20.0, 20.0, 20.0], [0.0, 0.0, 0.0, 0.0, 0.0, 0.0]];
        let disp = robust_method_of_moments_disp(normalized.view(), &design);
        assert_eq!(disp, vec![MIN_ROBUST_DISP, MIN_ROBUST_DISP]);
    }

    #[test]
    fn test_filter_keeps_low_outlier_in_two_level_design() {
        let mut res = DESeqResults::new(vec!["hi".into(), "lo".into()], Contrast::new("c", "b", "a"));
        res.pvalues = vec![0.01, 0.01];
        let counts = array![[5.0, 6.0, 5.0, 500.0], [0.0, 50.0, 60.0, 55.0]];
        let maxc = vec![(20.0, Some(3)), (20.0, Some(0))];
        let n = filter_by_cooks(&mut res, &maxc, counts.view(), 5.0, true);
        assert_eq!(n, 1);
        assert!(res.pvalues[0].is_nan());
        assert_eq!(res.pvalues[1], 0.01);
        assert_eq!(res.max_cooks[1], 20.0);
    }

    #[test]
    fn test_max_cooks_respects_sample_mask() {
        let cooks = array![[1.0, 9.0, 2.0], [f64::NAN, 0.5, 0.1]];
        let m = max_cooks(&cooks, &[true, false, true]);
        assert_eq!(m[0], (2.0, Some(2)));
        assert_eq!(m[1], (0.1, Some(2)));
        assert!(max_cooks(&cooks, &[false, false, false])[0].0.is_nan());
    }
}
