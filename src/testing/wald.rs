//! Wald test on a fitted negative binomial GLM

use std::f64::consts::LN_2;

use ndarray::Axis;

use super::pvalue::normal_pvalue;
use crate::data::CountDataSet;
use crate::error::{DgeError, Result};
use crate::glm::contrast_coefficient;
use crate::io::{Contrast, DESeqResults};

/// Test the coefficient comparing `contrast.numerator` with
/// `contrast.denominator`. Fold changes and standard errors are reported
/// on the log2 scale; genes with only zero counts get NaN statistics.
/// `padj` is filled by [`super::results`].
pub fn wald_test(dds: &CountDataSet, contrast: &Contrast) -> Result<DESeqResults> {
    let info = dds.design_info();
    if contrast.variable != info.variable {
        return Err(DgeError::InvalidContrast {
            reason: format!(
                "contrast variable '{}' is not the design variable '{}'",
                contrast.variable, info.variable
            ),
        });
    }
    let coefficients = dds.coefficients().ok_or_else(|| DgeError::InvalidContrast {
        reason: "GLM must be fitted before testing".to_string(),
    })?;
    let standard_errors = dds.standard_errors().ok_or_else(|| DgeError::InvalidContrast {
        reason: "Standard errors not available".to_string(),
    })?;
    let normalized = dds.normalized_counts().ok_or_else(|| DgeError::InvalidContrast {
        reason: "Size factors must be estimated before testing".to_string(),
    })?;
    let (coef_idx, sign) = contrast_coefficient(info, &contrast.numerator, &contrast.denominator)?;

    let mut res = DESeqResults::new(dds.counts().gene_ids().to_vec(), contrast.clone());
    res.base_means = normalized.mean_axis(Axis(1)).map(|m| m.to_vec()).unwrap_or_default();
    if let Some(disp) = dds.dispersions() {
        res.dispersions = disp.to_vec();
    }

    for i in 0..dds.n_genes() {
        if res.base_means[i] == 0.0 {
            continue;
        }
        let beta = coefficients[[i, coef_idx]] * sign;
        let se = standard_errors[[i, coef_idx]];
        res.log2_fold_changes[i] = beta / LN_2;
        res.lfc_se[i] = se / LN_2;
        res.stat[i] = beta / se;
        res.pvalues[i] = normal_pvalue(res.stat[i]);
    }
    Ok(res)
}
