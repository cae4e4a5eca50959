//! Hypothesis tests and multiple testing adjustment

mod fdr;
mod pvalue;
mod wald;

pub use fdr::benjamini_hochberg;
pub use pvalue::{normal_pvalue, t_pvalue};
pub use wald::wald_test;

use serde::{Deserialize, Serialize};

use crate::data::CountDataSet;
use crate::error::Result;
use crate::filter::{cooks_cutoff, cooks_distance, filter_by_cooks, independent_filtering, max_cooks, samples_for_cooks};
use crate::io::{Contrast, DESeqResults};

/// Options for [`results`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsParams {
    /// Target FDR for independent filtering
    pub alpha: f64,
    /// Remove p-values of genes with a Cook's distance above this value.
    /// `None` uses the 99% quantile of F(p, m - p).
    pub cooks_cutoff: Option<f64>,
    pub cooks_filter: bool,
    pub independent_filtering: bool,
}

impl Default for ResultsParams {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            cooks_cutoff: None,
            cooks_filter: true,
            independent_filtering: true,
        }
    }
}

/// Wald test for `contrast` followed by Cook's distance filtering and
/// adjustment of the p-values, optionally with independent filtering.
pub fn results(dds: &CountDataSet, contrast: &Contrast, params: &ResultsParams) -> Result<DESeqResults> {
    let mut res = wald_test(dds, contrast)?;

    if params.cooks_filter {
        let design = dds.design_matrix();
        let cooks = cooks_distance(dds)?;
        let used = samples_for_cooks(design, dds.replaceable().map(|r| r.as_slice()));
        let maxima = max_cooks(&cooks, &used);
        let cutoff = params
            .cooks_cutoff
            .unwrap_or_else(|| cooks_cutoff(dds.n_samples(), design.ncols()));
        let two_level = design.ncols() == 2;
        let n = filter_by_cooks(&mut res, &maxima, dds.counts().counts(), cutoff, two_level);
        if n > 0 {
            log::info!("{} genes flagged as count outliers (Cook's distance > {:.3})", n, cutoff);
        }
    }

    if params.independent_filtering {
        independent_filtering(&mut res, params.alpha);
    } else {
        res.padj = benjamini_hochberg(&res.pvalues);
    }
    Ok(res)
}
