//! Count data plus every intermediate produced by the negative binomial fit

use ndarray::{Array1, Array2};

use super::{CountMatrix, SampleMetadata};
use crate::dispersion::DispersionTrend;
use crate::error::{DgeError, Result};
use crate::glm::{treatment_design, DesignInfo};

/// Counts, sample annotation and a treatment-coded design on one factor.
/// Estimation steps fill in the optional fields in order.
#[derive(Debug, Clone)]
pub struct CountDataSet {
    counts: CountMatrix,
    sample_metadata: SampleMetadata,
    design_matrix: Array2<f64>,
    design_info: DesignInfo,

    size_factors: Option<Array1<f64>>,
    normalized_counts: Option<Array2<f64>>,

    gene_dispersions: Option<Array1<f64>>,
    trended_dispersions: Option<Array1<f64>>,
    map_dispersions: Option<Array1<f64>>,
    dispersion_trend: Option<DispersionTrend>,
    dispersion_prior_var: Option<f64>,
    var_log_disp_ests: Option<f64>,
    dispersion_outliers: Option<Vec<bool>>,
    /// Expected counts used while estimating gene-wise dispersions
    mu: Option<Array2<f64>>,

    coefficients: Option<Array2<f64>>,
    standard_errors: Option<Array2<f64>>,
    hat_diagonals: Option<Array2<f64>>,
    fitted_mu: Option<Array2<f64>>,
    converged: Option<Vec<bool>>,
    deviance: Option<Array1<f64>>,

    /// Samples in cells large enough for outlier replacement
    replaceable: Option<Vec<bool>>,
    /// Genes whose counts were replaced and refitted
    replaced_genes: Vec<usize>,
}

fn check_len(what: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} {}", expected, what),
            got: format!("{}", got),
        });
    }
    Ok(())
}

impl CountDataSet {
    /// Pair counts with metadata and build the design `~ variable` with
    /// `reference` as the baseline level.
    pub fn new(
        counts: CountMatrix,
        sample_metadata: SampleMetadata,
        variable: &str,
        reference: &str,
    ) -> Result<Self> {
        sample_metadata.check_alignment(counts.sample_ids())?;
        let values = sample_metadata.condition(variable).ok_or_else(|| {
            DgeError::InvalidDesignMatrix {
                reason: format!("Design variable '{}' not found in metadata", variable),
            }
        })?;
        let (design_matrix, design_info) = treatment_design(values, variable, reference)?;
        if design_matrix.nrows() <= design_matrix.ncols() {
            return Err(DgeError::InvalidDesignMatrix {
                reason: "the number of samples must exceed the number of coefficients".to_string(),
            });
        }

        Ok(Self {
            counts,
            sample_metadata,
            design_matrix,
            design_info,
            size_factors: None,
            normalized_counts: None,
            gene_dispersions: None,
            trended_dispersions: None,
            map_dispersions: None,
            dispersion_trend: None,
            dispersion_prior_var: None,
            var_log_disp_ests: None,
            dispersion_outliers: None,
            mu: None,
            coefficients: None,
            standard_errors: None,
            hat_diagonals: None,
            fitted_mu: None,
            converged: None,
            deviance: None,
            replaceable: None,
            replaced_genes: Vec::new(),
        })
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn sample_metadata(&self) -> &SampleMetadata {
        &self.sample_metadata
    }

    pub fn design_matrix(&self) -> &Array2<f64> {
        &self.design_matrix
    }

    pub fn design_info(&self) -> &DesignInfo {
        &self.design_info
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    pub fn normalized_counts(&self) -> Option<&Array2<f64>> {
        self.normalized_counts.as_ref()
    }

    pub fn gene_dispersions(&self) -> Option<&Array1<f64>> {
        self.gene_dispersions.as_ref()
    }

    pub fn trended_dispersions(&self) -> Option<&Array1<f64>> {
        self.trended_dispersions.as_ref()
    }

    /// Final (MAP) dispersions used for testing
    pub fn dispersions(&self) -> Option<&Array1<f64>> {
        self.map_dispersions.as_ref()
    }

    pub fn dispersion_trend(&self) -> Option<&DispersionTrend> {
        self.dispersion_trend.as_ref()
    }

    pub fn dispersion_prior_var(&self) -> Option<f64> {
        self.dispersion_prior_var
    }

    pub fn var_log_disp_ests(&self) -> Option<f64> {
        self.var_log_disp_ests
    }

    pub fn dispersion_outliers(&self) -> Option<&Vec<bool>> {
        self.dispersion_outliers.as_ref()
    }

    pub fn mu(&self) -> Option<&Array2<f64>> {
        self.mu.as_ref()
    }

    pub fn coefficients(&self) -> Option<&Array2<f64>> {
        self.coefficients.as_ref()
    }

    pub fn standard_errors(&self) -> Option<&Array2<f64>> {
        self.standard_errors.as_ref()
    }

    pub fn hat_diagonals(&self) -> Option<&Array2<f64>> {
        self.hat_diagonals.as_ref()
    }

    pub fn fitted_mu(&self) -> Option<&Array2<f64>> {
        self.fitted_mu.as_ref()
    }

    pub fn converged(&self) -> Option<&Vec<bool>> {
        self.converged.as_ref()
    }

    pub fn deviance(&self) -> Option<&Array1<f64>> {
        self.deviance.as_ref()
    }

    pub fn replaceable(&self) -> Option<&Vec<bool>> {
        self.replaceable.as_ref()
    }

    pub fn replaced_genes(&self) -> &[usize] {
        &self.replaced_genes
    }

    pub fn has_size_factors(&self) -> bool {
        self.size_factors.is_some()
    }

    pub fn has_dispersions(&self) -> bool {
        self.map_dispersions.is_some()
    }

    pub fn has_glm_fit(&self) -> bool {
        self.coefficients.is_some()
    }

    pub fn set_size_factors(&mut self, size_factors: Array1<f64>) -> Result<()> {
        check_len("size factors", self.n_samples(), size_factors.len())?;
        if size_factors.iter().any(|&x| !x.is_finite() || x <= 0.0) {
            return Err(DgeError::InvalidInput {
                reason: "size factors must be positive finite values".to_string(),
            });
        }
        self.size_factors = Some(size_factors);
        self.compute_normalized_counts();
        Ok(())
    }

    pub fn set_gene_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        check_len("dispersions", self.n_genes(), dispersions.len())?;
        self.gene_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn set_trended_dispersions(&mut self, trend: DispersionTrend, values: Array1<f64>) -> Result<()> {
        check_len("dispersions", self.n_genes(), values.len())?;
        self.dispersion_trend = Some(trend);
        self.trended_dispersions = Some(values);
        Ok(())
    }

    pub fn set_map_dispersions(&mut self, dispersions: Array1<f64>, outliers: Vec<bool>) -> Result<()> {
        check_len("dispersions", self.n_genes(), dispersions.len())?;
        check_len("outlier flags", self.n_genes(), outliers.len())?;
        self.map_dispersions = Some(dispersions);
        self.dispersion_outliers = Some(outliers);
        Ok(())
    }

    pub fn set_dispersion_prior(&mut self, prior_var: f64, var_log_disp_ests: f64) {
        self.dispersion_prior_var = Some(prior_var);
        self.var_log_disp_ests = Some(var_log_disp_ests);
    }

    pub fn set_mu(&mut self, mu: Array2<f64>) -> Result<()> {
        if mu.dim() != (self.n_genes(), self.n_samples()) {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{}x{} mu matrix", self.n_genes(), self.n_samples()),
                got: format!("{}x{}", mu.nrows(), mu.ncols()),
            });
        }
        self.mu = Some(mu);
        Ok(())
    }

    /// Store the GLM fit for every gene
    pub fn set_glm_fit(
        &mut self,
        coefficients: Array2<f64>,
        standard_errors: Array2<f64>,
        hat_diagonals: Array2<f64>,
        fitted_mu: Array2<f64>,
        converged: Vec<bool>,
        deviance: Array1<f64>,
    ) -> Result<()> {
        let (g, s, p) = (self.n_genes(), self.n_samples(), self.design_matrix.ncols());
        if coefficients.dim() != (g, p) || standard_errors.dim() != (g, p) {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{}x{} coefficients", g, p),
                got: format!("{:?}", coefficients.dim()),
            });
        }
        if hat_diagonals.dim() != (g, s) || fitted_mu.dim() != (g, s) {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{}x{} per-sample fit values", g, s),
                got: format!("{:?}", hat_diagonals.dim()),
            });
        }
        check_len("convergence flags", g, converged.len())?;
        check_len("deviances", g, deviance.len())?;
        self.coefficients = Some(coefficients);
        self.standard_errors = Some(standard_errors);
        self.hat_diagonals = Some(hat_diagonals);
        self.fitted_mu = Some(fitted_mu);
        self.converged = Some(converged);
        self.deviance = Some(deviance);
        Ok(())
    }

    pub fn set_replaceable(&mut self, replaceable: Vec<bool>) -> Result<()> {
        check_len("replaceable flags", self.n_samples(), replaceable.len())?;
        self.replaceable = Some(replaceable);
        Ok(())
    }

    pub fn set_replaced_genes(&mut self, genes: Vec<usize>) {
        self.replaced_genes = genes;
    }

    /// Replace a count and keep the normalized matrix in sync
    pub fn replace_count(&mut self, gene_idx: usize, sample_idx: usize, value: f64) -> Result<()> {
        self.counts.replace_count(gene_idx, sample_idx, value)?;
        if let (Some(norm), Some(sf)) = (self.normalized_counts.as_mut(), self.size_factors.as_ref()) {
            norm[[gene_idx, sample_idx]] = value / sf[sample_idx];
        }
        Ok(())
    }

    fn compute_normalized_counts(&mut self) {
        if let Some(sf) = &self.size_factors {
            let mut normalized = self.counts.counts().to_owned();
            for (j, &s) in sf.iter().enumerate() {
                normalized.column_mut(j).mapv_inplace(|c| c / s);
            }
            self.normalized_counts = Some(normalized);
        }
    }
}
