//! MAP (maximum a posteriori) dispersion estimation
//!
//! Gene-wise estimates are shrunk toward the fitted trend with a normal
//! prior on log dispersion. The prior width is estimated from the spread of
//! the gene-wise estimates around the trend, less the sampling variance
//! expected from the residual degrees of freedom.

use ndarray::{Array1, Array2};
use rayon::prelude::*;

use super::gene_wise::max_dispersion;
use super::likelihood::{CoxReidPosterior, LogNormalPrior};
use super::DispersionParams;
use crate::data::CountDataSet;
use crate::error::{DgeError, Result};
use crate::stats::{mad, trigamma};

/// Smallest allowed prior variance on log dispersion
pub const MIN_PRIOR_VAR: f64 = 0.25;

/// Returns (prior variance, variance of log dispersion residuals).
///
/// Residuals come from genes whose gene-wise estimate is at least
/// 100 * min_disp. With fewer than three residual degrees of freedom the
/// prior falls back to its floor.
pub fn estimate_prior_variance(
    gene_dispersions: &[f64],
    trended_dispersions: &[f64],
    n_samples: usize,
    n_coefs: usize,
    min_disp: f64,
) -> (f64, f64) {
    let residuals: Vec<f64> = gene_dispersions
        .iter()
        .zip(trended_dispersions)
        .filter(|(&g, &t)| g.is_finite() && g >= 100.0 * min_disp && t.is_finite() && t > 0.0)
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect();

    if residuals.len() < 3 {
        return (MIN_PRIOR_VAR, MIN_PRIOR_VAR);
    }
    let var_log_disp_ests = mad(&residuals).powi(2);

    if n_samples <= n_coefs + 3 {
        log::debug!(
            "Only {} residual degrees of freedom; dispersion prior variance set to {}",
            n_samples.saturating_sub(n_coefs),
            MIN_PRIOR_VAR
        );
        return (MIN_PRIOR_VAR, var_log_disp_ests);
    }

    let df = (n_samples - n_coefs) as f64;
    let expected = trigamma(df / 2.0);
    let prior_var = (var_log_disp_ests - expected).max(MIN_PRIOR_VAR);
    log::debug!(
        "Dispersion prior: varLogDispEsts={:.4}, expected sampling var={:.4}, prior var={:.4}",
        var_log_disp_ests,
        expected,
        prior_var
    );
    (prior_var, var_log_disp_ests)
}

/// Posterior mode for one gene. Starts at the gene-wise estimate unless it
/// sits more than a decade below the trend.
pub(crate) fn map_dispersion(
    counts: &[f64],
    mu: &[f64],
    design: &Array2<f64>,
    gene_disp: f64,
    trend_disp: f64,
    prior_var: f64,
    params: &DispersionParams,
) -> f64 {
    if !gene_disp.is_finite() {
        return f64::NAN;
    }
    let max_disp = max_dispersion(counts.len());
    let prior = LogNormalPrior {
        mean: trend_disp.ln(),
        var: prior_var,
    };
    let start = if gene_disp > 0.1 * trend_disp {
        gene_disp
    } else {
        trend_disp
    };

    let posterior = CoxReidPosterior::new(counts, mu, design, Some(prior));
    let search = posterior.line_search(start.ln(), params);
    let disp = if search.converged {
        search.log_alpha.exp()
    } else {
        posterior.grid_search(params.min_disp, max_disp)
    };
    disp.clamp(params.min_disp, max_disp)
}

/// Whether the gene-wise estimate lies so far above the trend that it
/// should be kept unshrunk
pub(crate) fn is_dispersion_outlier(gene_disp: f64, trend_disp: f64, var_log_disp_ests: f64, outlier_sd: f64) -> bool {
    gene_disp.is_finite()
        && gene_disp > 0.0
        && trend_disp > 0.0
        && gene_disp.ln() - trend_disp.ln() > outlier_sd * var_log_disp_ests.sqrt()
}

/// Shrink every gene's dispersion toward the trend. Reuses the expected
/// counts stored by gene-wise estimation.
pub fn estimate_map_dispersions(dds: &mut CountDataSet, params: &DispersionParams) -> Result<()> {
    let missing = |what: &str| DgeError::DispersionEstimationFailed {
        gene_id: "N/A".to_string(),
        reason: format!("{} required before MAP estimation", what),
    };
    let gene = dds.gene_dispersions().ok_or_else(|| missing("Gene-wise dispersions"))?;
    let trended = dds.trended_dispersions().ok_or_else(|| missing("Trended dispersions"))?;
    let mu = dds.mu().ok_or_else(|| missing("Expected counts"))?;

    let counts = dds.counts().counts();
    let design = dds.design_matrix();
    let (n_samples, n_coefs) = design.dim();

    let (prior_var, var_log_disp_ests) = estimate_prior_variance(
        &gene.to_vec(),
        &trended.to_vec(),
        n_samples,
        n_coefs,
        params.min_disp,
    );

    let fitted: Vec<(f64, bool)> = (0..dds.n_genes())
        .into_par_iter()
        .map(|i| {
            let y = counts.row(i).to_vec();
            let m = mu.row(i).to_vec();
            let map = map_dispersion(&y, &m, design, gene[i], trended[i], prior_var, params);
            if is_dispersion_outlier(gene[i], trended[i], var_log_disp_ests, params.outlier_sd) {
                (gene[i], true)
            } else {
                (map, false)
            }
        })
        .collect();

    let (dispersions, outliers): (Vec<f64>, Vec<bool>) = fitted.into_iter().unzip();
    log::info!(
        "MAP dispersions: prior variance {:.4}, {} genes kept at their gene-wise estimate",
        prior_var,
        outliers.iter().filter(|&&o| o).count()
    );

    dds.set_dispersion_prior(prior_var, var_log_disp_ests);
    dds.set_map_dispersions(Array1::from_vec(dispersions), outliers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_prior_variance_floor_and_spread() {
        let trend = vec![0.1; 50];
        let tight: Vec<f64> = (0..50).map(|i| 0.1 * (1.0 + 0.01 * (i % 5) as f64)).collect();
        let (pv, _) = estimate_prior_variance(&tight, &trend, 20, 2, 1e-8);
        assert_eq!(pv, MIN_PRIOR_VAR);

        let wide: Vec<f64> = (0..50).map(|i| 0.1 * ((i % 10) as f64 - 4.5).exp()).collect();
        let (pv, var) = estimate_prior_variance(&wide, &trend, 20, 2, 1e-8);
        assert!(var > 1.0);
        assert!(pv > MIN_PRIOR_VAR && pv < var);

        // Few residual degrees of freedom
        let (pv, _) = estimate_prior_variance(&wide, &trend, 4, 2, 1e-8);
        assert_eq!(pv, MIN_PRIOR_VAR);
    }

    #[test]
    fn test_map_moves_toward_trend() {
        let x = array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let counts = [40.0, 160.0, 90.0, 300.0, 80.0, 200.0];
        let mu = [96.67, 96.67, 96.67, 193.33, 193.33, 193.33];
        let params = DispersionParams::default();
        let gene = 0.3;
        let trend = 0.02;
        let map = map_dispersion(&counts, &mu, &x, gene, trend, 0.5, &params);
        assert!(map < gene && map > trend, "map={}", map);
        assert!(map_dispersion(&counts, &mu, &x, f64::NAN, trend, 0.5, &params).is_nan());
    }

    #[test]
    fn test_outlier_rule() {
        assert!(is_dispersion_outlier(1.0, 0.01, 0.5, 2.0));
        assert!(!is_dispersion_outlier(0.02, 0.01, 0.5, 2.0));
        assert!(!is_dispersion_outlier(f64::NAN, 0.01, 0.5, 2.0));
    }
}
