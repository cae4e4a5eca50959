//! Gene-wise dispersion estimation using the Cox-Reid adjusted profile likelihood

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;

use super::likelihood::CoxReidPosterior;
use super::DispersionParams;
use crate::data::CountDataSet;
use crate::error::{DgeError, Result};
use crate::glm::{fit_single_gene, is_group_design, GlmFitParams, MIN_MU};
use crate::linalg::{solve_symmetric, weighted_cross_product};

/// Upper bound on any dispersion estimate for a dataset with `n_samples`
pub(crate) fn max_dispersion(n_samples: usize) -> f64 {
    (n_samples as f64).max(10.0)
}

/// Mean of 1/size factor, used by the moments estimator
pub(crate) fn mean_inverse_size_factor(size_factors: &[f64]) -> f64 {
    size_factors.iter().map(|&s| 1.0 / s).sum::<f64>() / size_factors.len() as f64
}

/// Estimate a dispersion for every gene and keep the expected counts used
/// to do so; MAP shrinkage reuses them.
pub fn estimate_gene_dispersions(dds: &mut CountDataSet, params: &DispersionParams) -> Result<()> {
    let size_factors = dds
        .size_factors()
        .ok_or_else(|| DgeError::DispersionEstimationFailed {
            gene_id: "N/A".to_string(),
            reason: "Size factors must be estimated first".to_string(),
        })?
        .to_vec();

    let counts = dds.counts().counts();
    let design = dds.design_matrix();
    let (n_genes, n_samples) = counts.dim();
    let xim = mean_inverse_size_factor(&size_factors);
    let group_design = is_group_design(design);

    let results: Vec<(f64, Vec<f64>)> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let gene_counts = counts.row(i).to_vec();
            gene_dispersion(&gene_counts, &size_factors, design, xim, group_design, params)
        })
        .collect();

    let mut dispersions = Array1::zeros(n_genes);
    let mut mu = Array2::zeros((n_genes, n_samples));
    for (i, (disp, gene_mu)) in results.into_iter().enumerate() {
        dispersions[i] = disp;
        mu.row_mut(i).assign(&ArrayView1::from(&gene_mu));
    }

    let n_zero = dispersions.iter().filter(|d| d.is_nan()).count();
    log::debug!(
        "Gene-wise dispersions: {} genes estimated, {} all-zero genes skipped",
        n_genes - n_zero,
        n_zero
    );

    dds.set_gene_dispersions(dispersions)?;
    dds.set_mu(mu)
}

/// One gene: start from the smaller of two moment estimates, maximise the
/// Cox-Reid likelihood, and fall back to a grid when the line search stalls.
/// Returns NaN with zero means for genes without any counts.
pub(crate) fn gene_dispersion(
    counts: &[f64],
    size_factors: &[f64],
    design: &Array2<f64>,
    xim: f64,
    group_design: bool,
    params: &DispersionParams,
) -> (f64, Vec<f64>) {
    let n = counts.len();
    if counts.iter().all(|&c| c == 0.0) {
        return (f64::NAN, vec![0.0; n]);
    }

    let min_disp = params.min_disp;
    let max_disp = max_dispersion(n);
    let normalized: Vec<f64> = counts
        .iter()
        .zip(size_factors)
        .map(|(&c, &s)| c / s)
        .collect();

    let rough = rough_disp_estimate(&normalized, design);
    let moments = moments_disp_estimate(&normalized, xim);
    let alpha_init = rough.min(moments).clamp(min_disp, max_disp);

    let mu: Vec<f64> = if group_design {
        linear_model_fit(&normalized, design)
            .iter()
            .zip(size_factors)
            .map(|(&m, &s)| (m * s).max(MIN_MU))
            .collect()
    } else {
        fit_single_gene(
            ArrayView1::from(counts),
            design,
            ArrayView1::from(size_factors),
            alpha_init,
            &GlmFitParams::default(),
        )
        .mu
    };

    let posterior = CoxReidPosterior::new(counts, &mu, design, None);
    let search = posterior.line_search(alpha_init.ln(), params);

    let no_increase = search.final_lp < search.initial_lp + search.initial_lp.abs() / 1e6;
    let mut disp = if no_increase {
        alpha_init
    } else {
        search.log_alpha.exp()
    };

    let converged = search.iterations < params.maxit && search.iterations != 1;
    if !converged && disp > min_disp * 10.0 {
        disp = posterior.grid_search(min_disp, max_disp);
    }

    (disp.clamp(min_disp, max_disp), mu)
}

/// Least squares fitted values of `y` on the design
fn linear_model_fit(y: &[f64], design: &Array2<f64>) -> Vec<f64> {
    let xtx = weighted_cross_product(design, &vec![1.0; y.len()]);
    let xty = design.t().dot(&ArrayView1::from(y));
    let beta = solve_symmetric(&xtx, &xty);
    design.dot(&beta).to_vec()
}

/// sum(((y - mu)^2 - mu) / mu^2) / (m - p), with mu from the linear model
/// floored at 1
fn rough_disp_estimate(normalized: &[f64], design: &Array2<f64>) -> f64 {
    let (m, p) = design.dim();
    let sum: f64 = linear_model_fit(normalized, design)
        .iter()
        .zip(normalized)
        .map(|(&fit, &y)| {
            let mu = fit.max(1.0);
            ((y - mu).powi(2) - mu) / (mu * mu)
        })
        .sum();
    (sum / (m - p) as f64).max(0.0)
}

/// (variance - xim * mean) / mean^2 on normalized counts
fn moments_disp_estimate(normalized: &[f64], xim: f64) -> f64 {
    let n = normalized.len() as f64;
    let mean = normalized.iter().sum::<f64>() / n;
    let var = normalized.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    if mean > 0.0 {
        (var - xim * mean) / (mean * mean)
    } else {
        f64::INFINITY
    }
}
