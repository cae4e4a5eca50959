//! rust_dge: differential expression for microarray and RNA-seq count data
//!
//! Two analyses share one toolkit:
//!
//! - microarray series from GEO are log2 transformed and compared with a
//!   moderated linear model (`limma`), one contrast at a time;
//! - count matrices are normalized by size factors and compared with a
//!   negative binomial GLM and Wald test, with Cook's distance outlier
//!   handling and independent filtering.
//!
//! # Example
//!
//! ```ignore
//! use rust_dge::prelude::*;
//!
//! let counts = read_count_table("counts.xlsx", true)?;
//! let metadata = SampleMetadata::from_group_sizes(
//!     counts.sample_ids(),
//!     "condition",
//!     &[GroupSpec::new("career", 12), GroupSpec::new("normal", 3)],
//! )?;
//! let mut dds = CountDataSet::new(counts, metadata, "condition", "normal")?;
//! run_deseq(&mut dds, &DeseqParams::default())?;
//! let res = results(&dds, &Contrast::new("condition", "career", "normal"), &ResultsParams::default())?;
//! ```

pub mod annotation;
pub mod cli;
pub mod config;
pub mod data;
pub mod dispersion;
pub mod error;
pub mod filter;
pub mod geo;
pub mod glm;
pub mod io;
pub mod limma;
pub mod linalg;
pub mod normalization;
pub mod pipeline;
pub mod remote;
pub mod stats;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{CountsConfig, MicroarrayConfig};
    pub use crate::data::{CountDataSet, CountMatrix, ExpressionMatrix, GroupSpec, SampleMetadata};
    pub use crate::dispersion::{estimate_dispersions, DispersionParams, TrendFitMethod};
    pub use crate::error::{DgeError, Result};
    pub use crate::filter::{independent_filtering, split_significant, RegulationSplit};
    pub use crate::glm::{fit_glm, group_means_design, DesignInfo, GlmFitParams};
    pub use crate::io::{read_count_table, read_expression_table, write_xlsx, Contrast, DESeqResults, Sheet};
    pub use crate::limma::{contrasts_fit, ebayes, lm_fit, make_contrast, top_table, EbayesParams, SortBy};
    pub use crate::normalization::{estimate_size_factors, log2_fill, LogTransformMode, SizeFactorMethod};
    pub use crate::pipeline::{run_counts_pipeline, run_microarray_pipeline};
    pub use crate::testing::{benjamini_hochberg, results, wald_test, ResultsParams};
    pub use crate::{run_deseq, DeseqParams};
}

use serde::{Deserialize, Serialize};

use crate::data::CountDataSet;
use crate::dispersion::{estimate_dispersions, refit_dispersions, DispersionParams};
use crate::error::Result;
use crate::filter::{cooks_cutoff, cooks_distance, replace_outliers};
use crate::glm::{fit_glm, refit_glm, GlmFitParams};
use crate::normalization::{estimate_size_factors, SizeFactorMethod};

/// Settings for [`run_deseq`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeseqParams {
    pub size_factor_method: SizeFactorMethod,
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
    /// Outlier counts are replaced in design cells with at least this many
    /// samples; `None` disables replacement
    pub min_replicates_for_replace: Option<usize>,
}

impl Default for DeseqParams {
    fn default() -> Self {
        Self {
            size_factor_method: SizeFactorMethod::Ratio,
            dispersion: DispersionParams::default(),
            glm: GlmFitParams::default(),
            min_replicates_for_replace: Some(7),
        }
    }
}

/// Size factors, dispersions and the negative binomial fit, followed by
/// outlier replacement and a refit of the affected genes
pub fn run_deseq(dds: &mut CountDataSet, params: &DeseqParams) -> Result<()> {
    // Size factors supplied by the caller are kept
    if !dds.has_size_factors() {
        estimate_size_factors(dds, params.size_factor_method)?;
    }
    estimate_dispersions(dds, &params.dispersion)?;
    fit_glm(dds, &params.glm)?;

    let Some(min_replicates) = params.min_replicates_for_replace else {
        return Ok(());
    };
    let cooks = cooks_distance(dds)?;
    let cutoff = cooks_cutoff(dds.n_samples(), dds.design_matrix().ncols());
    let replaced = replace_outliers(dds, &cooks, cutoff, min_replicates)?;
    if !replaced.is_empty() {
        refit_dispersions(dds, &replaced, &params.dispersion)?;
        refit_glm(dds, &replaced, &params.glm)?;
    }
    dds.set_replaced_genes(replaced);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use ndarray::{array, Array2};

    fn dataset(counts: Array2<f64>, n_normal: usize) -> CountDataSet {
        let n_samples = counts.ncols();
        let samples: Vec<String> = (1..=n_samples).map(|j| format!("s{}", j)).collect();
        let genes: Vec<String> = (1..=counts.nrows()).map(|i| format!("gene{}", i)).collect();
        let cm = CountMatrix::new(counts, genes, samples.clone()).unwrap();
        let meta = SampleMetadata::from_group_sizes(
            &samples,
            "condition",
            &[GroupSpec::new("career", n_samples - n_normal), GroupSpec::new("normal", n_normal)],
        )
        .unwrap();
        CountDataSet::new(cm, meta, "condition", "normal").unwrap()
    }

    #[test]
    fn test_full_pipeline() {
        // Overdispersed replicates: career first, normal last
        let counts = array![
            [300.0, 400.0, 520.0, 100.0, 130.0, 75.0],
            [500.0, 650.0, 375.0, 650.0, 375.0, 500.0],
            [98.0, 56.0, 75.0, 225.0, 300.0, 390.0],
            [38.0, 50.0, 65.0, 50.0, 65.0, 38.0],
            [200.0, 260.0, 150.0, 260.0, 150.0, 200.0],
            [390.0, 225.0, 300.0, 112.0, 150.0, 195.0],
            [75.0, 100.0, 130.0, 400.0, 520.0, 300.0],
            [80.0, 104.0, 60.0, 104.0, 60.0, 80.0],
            [780.0, 450.0, 600.0, 450.0, 600.0, 780.0],
            [375.0, 500.0, 650.0, 250.0, 325.0, 188.0],
            [150.0, 195.0, 112.0, 195.0, 112.0, 150.0],
            [325.0, 188.0, 250.0, 188.0, 250.0, 325.0],
        ];
        let mut dds = dataset(counts, 3);
        run_deseq(&mut dds, &DeseqParams::default()).unwrap();
        assert!(dds.replaced_genes().is_empty());

        let disp = dds.dispersions().unwrap();
        assert!(disp.iter().all(|&d| d.is_finite() && d > 0.0));
        assert!(dds.gene_dispersions().unwrap().iter().filter(|&&d| d > 0.05).count() >= 4);

        let res = results(&dds, &Contrast::new("condition", "career", "normal"), &ResultsParams::default()).unwrap();
        assert_eq!(res.n_genes(), 12);
        assert!(res.log2_fold_changes[0] > 1.0);
        assert!(res.log2_fold_changes[2] < -1.0);
        assert!(res.padj[0] < 0.05);
        assert!(res.log2_fold_changes[1].abs() < 0.5);
    }

    /// One extreme count in a career sample of gene index 7
    fn outlier_counts() -> Array2<f64> {
        Array2::from_shape_fn((40, 11), |(i, j)| {
            let base = 50.0 + 25.0 * i as f64;
            let wobble = [1.0, 0.9, 1.1, 0.95, 1.05, 1.0, 0.92, 1.08, 1.0, 0.97, 1.03][j];
            if i == 7 && j == 2 {
                base * 60.0
            } else {
                (base * wobble).round()
            }
        })
    }

    #[test]
    fn test_outlier_in_large_group_is_replaced() {
        // 8 career samples make the career cell replaceable at 7 replicates
        let mut dds = dataset(outlier_counts(), 3);
        run_deseq(&mut dds, &DeseqParams::default()).unwrap();
        assert!(dds.replaced_genes().contains(&7));
        assert!(dds.counts().counts()[[7, 2]] < 225.0 * 2.0);

        let mut untouched = dataset(outlier_counts(), 3);
        let no_replace = DeseqParams {
            min_replicates_for_replace: None,
            ..DeseqParams::default()
        };
        run_deseq(&mut untouched, &no_replace).unwrap();
        assert!(untouched.replaced_genes().is_empty());
        assert_eq!(untouched.counts().counts()[[7, 2]], 225.0 * 60.0);
    }
}
