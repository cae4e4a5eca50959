//! Independent filtering on mean expression
//!
//! Low-count genes have little power. The p-value adjustment is repeated
//! with increasing baseMean cutoffs and the cutoff chosen is the first one
//! whose rejection count comes close to the smoothed maximum.

use crate::io::DESeqResults;
use crate::stats::{median, quantile};
use crate::testing::benjamini_hochberg;

const N_THETA: usize = 50;
/// Smoother span for the rejection curve
const LOWESS_SPAN: f64 = 0.2;
const LOWESS_ITERATIONS: usize = 3;

/// Outcome of [`independent_filtering`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterThreshold {
    /// Quantile of baseMean used as the cutoff
    pub theta: f64,
    pub cutoff: f64,
    pub rejections: usize,
}

/// Replace `results.padj` with the adjustment at the chosen baseMean cutoff.
/// Genes below the cutoff get NaN.
pub fn independent_filtering(results: &mut DESeqResults, alpha: f64) -> Option<FilterThreshold> {
    let n = results.n_genes();
    if n == 0 {
        return None;
    }
    let means: Vec<f64> = results.base_means.iter().copied().filter(|m| m.is_finite()).collect();
    if means.is_empty() {
        results.padj = benjamini_hochberg(&results.pvalues);
        return None;
    }

    let lower = results.base_means.iter().filter(|&&m| m == 0.0 || !m.is_finite()).count() as f64 / n as f64;
    let upper = if lower < 0.95 { 0.95 } else { 1.0 };
    let thetas: Vec<f64> = (0..N_THETA)
        .map(|i| lower + (upper - lower) * i as f64 / (N_THETA - 1) as f64)
        .collect();
    let cutoffs: Vec<f64> = thetas.iter().map(|&t| quantile(&means, t)).collect();

    let adjusted: Vec<Vec<f64>> = cutoffs
        .iter()
        .map(|&cutoff| {
            let filtered: Vec<f64> = results
                .pvalues
                .iter()
                .zip(&results.base_means)
                .map(|(&p, &m)| if m >= cutoff { p } else { f64::NAN })
                .collect();
            benjamini_hochberg(&filtered)
        })
        .collect();
    let rejections: Vec<usize> = adjusted
        .iter()
        .map(|padj| padj.iter().filter(|&&p| p < alpha).count())
        .collect();

    let best = choose_theta(&thetas, &rejections);
    log::info!(
        "Independent filtering: baseMean cutoff {:.3} (quantile {:.3}), {} rejections at alpha {}",
        cutoffs[best],
        thetas[best],
        rejections[best],
        alpha
    );

    let threshold = FilterThreshold {
        theta: thetas[best],
        cutoff: cutoffs[best],
        rejections: rejections[best],
    };
    results.padj = adjusted.into_iter().nth(best).unwrap_or_default();
    Some(threshold)
}

/// First theta whose rejections exceed the lowess maximum minus the RMSE
/// of the fit, relaxing to 90% and 80% of the maximum when none does.
/// With ten or fewer rejections at best, no filtering is applied.
fn choose_theta(thetas: &[f64], rejections: &[usize]) -> usize {
    if rejections.iter().copied().max().unwrap_or(0) <= 10 {
        return 0;
    }
    let y: Vec<f64> = rejections.iter().map(|&r| r as f64).collect();
    let fit = lowess(thetas, &y, LOWESS_SPAN, LOWESS_ITERATIONS);
    let max_fit = fit.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let residuals: Vec<f64> = y
        .iter()
        .zip(&fit)
        .filter(|(&r, _)| r > 0.0)
        .map(|(r, f)| r - f)
        .collect();
    let rmse = if residuals.is_empty() {
        0.0
    } else {
        (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt()
    };

    [max_fit - rmse, 0.9 * max_fit, 0.8 * max_fit]
        .iter()
        .find_map(|&thresh| y.iter().position(|&r| r > thresh))
        .unwrap_or(0)
}

/// Locally weighted linear regression with tricube weights and bisquare
/// robustness iterations. `x` must be sorted.
pub(crate) fn lowess(x: &[f64], y: &[f64], span: f64, iterations: usize) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return y.to_vec();
    }
    let ns = ((span * n as f64 + 1e-7) as usize).clamp(2, n);
    let mut robustness = vec![1.0; n];
    let mut fitted = vec![0.0; n];

    for iter in 0..=iterations {
        for i in 0..n {
            let mut distances: Vec<f64> = x.iter().map(|&xj| (xj - x[i]).abs()).collect();
            distances.sort_by(|a, b| a.total_cmp(b));
            let h = distances[ns - 1];

            let weights: Vec<f64> = x
                .iter()
                .zip(&robustness)
                .map(|(&xj, &rw)| {
                    let d = (xj - x[i]).abs();
                    let w = if h <= 0.0 {
                        if d == 0.0 {
                            1.0
                        } else {
                            0.0
                        }
                    } else if d <= 0.001 * h {
                        1.0
                    } else if d < 0.999 * h {
                        (1.0 - (d / h).powi(3)).powi(3)
                    } else {
                        0.0
                    };
                    w * rw
                })
                .collect();
            fitted[i] = weighted_line_at(x, y, &weights, x[i]).unwrap_or(y[i]);
        }

        if iter == iterations {
            break;
        }
        let abs_res: Vec<f64> = y.iter().zip(&fitted).map(|(a, b)| (a - b).abs()).collect();
        let cmad = 6.0 * median(&abs_res);
        let mean_abs = abs_res.iter().sum::<f64>() / n as f64;
        if cmad < 1e-7 * mean_abs || cmad == 0.0 {
            break;
        }
        for (rw, r) in robustness.iter_mut().zip(&abs_res) {
            let u = r / cmad;
            *rw = if u < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
        }
    }
    fitted
}

fn weighted_line_at(x: &[f64], y: &[f64], w: &[f64], at: f64) -> Option<f64> {
    let sw: f64 = w.iter().sum();
    if sw <= 0.0 {
        return None;
    }
    let xm = x.iter().zip(w).map(|(a, b)| a * b).sum::<f64>() / sw;
    let ym = y.iter().zip(w).map(|(a, b)| a * b).sum::<f64>() / sw;
    let sxx: f64 = x.iter().zip(w).map(|(a, b)| b * (a - xm).powi(2)).sum();
    let sxy: f64 = x.iter().zip(y).zip(w).map(|((a, c), b)| b * (a - xm) * (c - ym)).sum();
    if sxx <= 1e-12 * sw {
        return Some(ym);
    }
    Some(ym + sxy / sxx * (at - xm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Contrast;

    #[test]
    fn test_filtering_drops_low_count_genes() {
        let n = 200;
        let mut res = DESeqResults::new(
            (0..n).map(|i| format!("g{}", i)).collect(),
            Contrast::new("condition", "career", "normal"),
        );
        // Low-mean genes carry noise p-values; high-mean genes are only
        // rejected once the low half stops diluting the adjustment
        res.base_means = (0..n).map(|i| (i + 1) as f64).collect();
        res.pvalues = (0..n)
            .map(|i| if i < 100 { 0.3 + 0.7 * ((i * 37) % 100) as f64 / 100.0 } else { 0.06 })
            .collect();

        let chosen = independent_filtering(&mut res, 0.1).unwrap();
        assert!(chosen.theta > 0.0);
        assert!(chosen.rejections >= 100);
        assert!(res.padj[0].is_nan());
        assert!(res.padj[150] < 0.1);
    }

    #[test]
    fn test_few_rejections_means_no_filter() {
        let mut res = DESeqResults::new(vec!["a".into(), "b".into(), "c".into()], Contrast::new("c", "x", "y"));
        res.base_means = vec![1.0, 10.0, 100.0];
        res.pvalues = vec![0.5, 0.01, 0.2];
        let chosen = independent_filtering(&mut res, 0.1).unwrap();
        assert_eq!(chosen.theta, 0.0);
        assert!(res.padj.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_lowess_follows_line_and_resists_outlier() {
        let x: Vec<f64> = (0..11).map(|i| i as f64 / 10.0).collect();
        let y: Vec<f64> = (0..11).map(|i| if i == 3 { 50.0 } else { 10.0 + 2.0 * i as f64 }).collect();
        let plain = lowess(&x, &y, 0.5, 0);
        let robust = lowess(&x, &y, 0.5, 3);
        assert!((robust[3] - 16.0).abs() <= (plain[3] - 16.0).abs());
        assert!((robust[8] - 26.0).abs() < 1.0);
    }
}
