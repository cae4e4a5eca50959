//! Dispersion estimation for negative binomial models

mod gene_wise;
mod likelihood;
mod map;
mod trend;

pub use gene_wise::estimate_gene_dispersions;
pub use map::{estimate_map_dispersions, estimate_prior_variance, MIN_PRIOR_VAR};
pub use trend::{fit_dispersion_trend, DispersionTrend, TrendFitMethod};

use ndarray::ArrayView1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::CountDataSet;
use crate::error::{DgeError, Result};
use crate::glm::is_group_design;

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionParams {
    /// Lower bound on every dispersion estimate
    pub min_disp: f64,
    /// Line search stops once the log posterior improves by less than this
    pub disp_tol: f64,
    /// Initial step size for the line search
    pub kappa_0: f64,
    pub maxit: usize,
    /// Gene-wise estimates this many SDs above the trend are not shrunk
    pub outlier_sd: f64,
    pub fit_type: TrendFitMethod,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
            fit_type: TrendFitMethod::Parametric,
        }
    }
}

/// Gene-wise estimates, trend and MAP shrinkage in one call
pub fn estimate_dispersions(dds: &mut CountDataSet, params: &DispersionParams) -> Result<()> {
    estimate_gene_dispersions(dds, params)?;
    fit_dispersion_trend(dds, params.fit_type, params.min_disp)?;
    estimate_map_dispersions(dds, params)
}

/// Re-estimate the dispersions of `genes` after their counts changed.
/// The trend and the prior variance from the full fit are reused.
pub fn refit_dispersions(dds: &mut CountDataSet, genes: &[usize], params: &DispersionParams) -> Result<()> {
    if genes.is_empty() {
        return Ok(());
    }
    let missing = || DgeError::DispersionEstimationFailed {
        gene_id: "N/A".to_string(),
        reason: "a full dispersion fit is required before refitting genes".to_string(),
    };
    let trend = *dds.dispersion_trend().ok_or_else(missing)?;
    let prior_var = dds.dispersion_prior_var().ok_or_else(missing)?;
    let var_log_disp_ests = dds.var_log_disp_ests().ok_or_else(missing)?;
    let size_factors = dds.size_factors().ok_or_else(missing)?.to_vec();
    let normalized = dds.normalized_counts().ok_or_else(missing)?;

    let counts = dds.counts().counts();
    let design = dds.design_matrix();
    let xim = gene_wise::mean_inverse_size_factor(&size_factors);
    let group_design = is_group_design(design);

    let refits: Vec<(f64, f64, f64, bool, Vec<f64>)> = genes
        .par_iter()
        .map(|&i| {
            let y = counts.row(i).to_vec();
            let (gene_disp, mu) =
                gene_wise::gene_dispersion(&y, &size_factors, design, xim, group_design, params);
            let mean = normalized.row(i).mean().unwrap_or(0.0);
            let trended = trend.evaluate(mean);
            let outlier = map::is_dispersion_outlier(gene_disp, trended, var_log_disp_ests, params.outlier_sd);
            let final_disp = if outlier {
                gene_disp
            } else {
                map::map_dispersion(&y, &mu, design, gene_disp, trended, prior_var, params)
            };
            (gene_disp, trended, final_disp, outlier, mu)
        })
        .collect();

    let mut gene_all = dds.gene_dispersions().ok_or_else(missing)?.clone();
    let mut trended_all = dds.trended_dispersions().ok_or_else(missing)?.clone();
    let mut map_all = dds.dispersions().ok_or_else(missing)?.clone();
    let mut outliers_all = dds.dispersion_outliers().ok_or_else(missing)?.clone();
    let mut mu_all = dds.mu().ok_or_else(missing)?.clone();

    for (&i, (gene_disp, trended, final_disp, outlier, mu)) in genes.iter().zip(refits) {
        gene_all[i] = gene_disp;
        trended_all[i] = trended;
        map_all[i] = final_disp;
        outliers_all[i] = outlier;
        mu_all.row_mut(i).assign(&ArrayView1::from(&mu));
    }
    log::debug!("Refitted dispersions for {} genes", genes.len());

    dds.set_gene_dispersions(gene_all)?;
    dds.set_trended_dispersions(trend, trended_all)?;
    dds.set_map_dispersions(map_all, outliers_all)?;
    dds.set_mu(mu_all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use ndarray::Array2;

    /// 60 genes over 8 samples with a spread of means and deterministic noise
    pub(crate) fn simulated_dataset() -> CountDataSet {
        let n_genes = 60;
        let n_samples = 8;
        let depth = [1.0, 1.2, 0.8, 1.1, 0.9, 1.3, 1.0, 0.7];
        let noise = [0.7, 1.3, 1.0, 0.85, 1.2, 0.9, 1.1, 0.95];
        let counts = Array2::from_shape_fn((n_genes, n_samples), |(i, j)| {
            let base = 5.0 + 20.0 * (i as f64);
            let effect = if j >= 4 && i % 6 == 0 { 3.0 } else { 1.0 };
            let wobble = noise[(i + j) % 8];
            (base * depth[j] * effect * wobble).round()
        });
        let samples: Vec<String> = (1..=n_samples).map(|j| format!("s{}", j)).collect();
        let genes: Vec<String> = (1..=n_genes).map(|i| format!("gene{}", i)).collect();
        let cm = CountMatrix::new(counts, genes, samples.clone()).unwrap();
        let mut meta = SampleMetadata::new(samples);
        let condition = (0..n_samples)
            .map(|j| if j < 4 { "control" } else { "treated" }.to_string())
            .collect();
        meta.add_condition("condition", condition).unwrap();
        let mut dds = CountDataSet::new(cm, meta, "condition", "control").unwrap();
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        dds
    }

    #[test]
    fn test_estimate_dispersions_end_to_end() {
        let mut dds = simulated_dataset();
        estimate_dispersions(&mut dds, &DispersionParams::default()).unwrap();
        let disp = dds.dispersions().unwrap();
        assert_eq!(disp.len(), 60);
        assert!(disp.iter().all(|d| d.is_finite() && *d > 0.0));
        assert!(dds.dispersion_trend().is_some());
        assert!(dds.dispersion_prior_var().unwrap() >= MIN_PRIOR_VAR);
    }

    #[test]
    fn test_refit_only_touches_listed_genes() {
        let mut dds = simulated_dataset();
        let params = DispersionParams::default();
        estimate_dispersions(&mut dds, &params).unwrap();
        let before = dds.dispersions().unwrap().clone();

        dds.replace_count(10, 0, 4000.0).unwrap();
        refit_dispersions(&mut dds, &[10], &params).unwrap();
        let after = dds.dispersions().unwrap();
        assert!(after[10] > before[10]);
        for i in (0..60).filter(|&i| i != 10) {
            assert_eq!(after[i], before[i]);
        }
    }
}
