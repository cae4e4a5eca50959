//! Empirical Bayes moderation of gene-wise variances
//!
//! The residual variances are modelled as scaled F draws around a common
//! prior; each gene's variance is shrunk towards the prior estimate and
//! the moderated t statistic uses the posterior variance with the prior
//! degrees of freedom added to the residual ones.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::function::gamma::digamma;

use super::lm_fit::LinearModelFit;
use crate::error::{DgeError, Result};
use crate::stats::{median, trigamma, trigamma_inverse};
use crate::testing::t_pvalue;

/// Options for [`ebayes`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EbayesParams {
    /// Assumed proportion of differentially expressed genes
    pub proportion: f64,
    /// Bounds on the prior standard deviation of the coefficients
    pub stdev_coef_lim: (f64, f64),
}

impl Default for EbayesParams {
    fn default() -> Self {
        Self {
            proportion: 0.01,
            stdev_coef_lim: (0.1, 4.0),
        }
    }
}

/// A contrast fit with moderated statistics
#[derive(Debug, Clone)]
pub struct EbayesFit {
    pub fit: LinearModelFit,
    pub s2_prior: f64,
    pub df_prior: f64,
    pub s2_post: Vec<f64>,
    pub df_total: Vec<f64>,
    /// Moderated t, features x coefficients
    pub t: Array2<f64>,
    pub p_value: Array2<f64>,
    /// Prior variance of non-zero coefficients, per coefficient
    pub var_prior: Vec<f64>,
    /// Log-odds of differential expression
    pub lods: Array2<f64>,
}

/// Fit a scaled F distribution to sample variances `x` with `df1` degrees
/// of freedom by matching moments of log(x). Returns (scale, df2).
pub fn fit_f_dist(x: &[f64], df1: &[f64]) -> (f64, f64) {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(df1)
        .filter(|(v, d)| v.is_finite() && d.is_finite() && **v > -1e-15 && **d > 1e-15)
        .map(|(&v, &d)| (v.max(0.0), d))
        .collect();
    let n = pairs.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    if n == 1 {
        return (pairs[0].0, 0.0);
    }

    let mut m = median(&pairs.iter().map(|p| p.0).collect::<Vec<_>>());
    if m == 0.0 {
        log::warn!("More than half of residual variances are exactly zero: eBayes unreliable");
        m = 1.0;
    }
    let e: Vec<f64> = pairs
        .iter()
        .map(|&(v, d)| v.max(1e-5 * m).ln() - digamma(d / 2.0) + (d / 2.0).ln())
        .collect();
    let emean = e.iter().sum::<f64>() / n as f64;
    let mean_trigamma = pairs.iter().map(|&(_, d)| trigamma(d / 2.0)).sum::<f64>() / n as f64;
    let evar = e.iter().map(|v| (v - emean).powi(2)).sum::<f64>() / (n - 1) as f64 - mean_trigamma;

    if evar > 0.0 {
        let df2 = 2.0 * trigamma_inverse(evar);
        let s20 = (emean + digamma(df2 / 2.0) - (df2 / 2.0).ln()).exp();
        (s20, df2)
    } else {
        (emean.exp(), f64::INFINITY)
    }
}

/// Posterior variances: the df-weighted average of each variance and the prior
pub fn squeeze_var(var: &[f64], df: &[f64], s2_prior: f64, df_prior: f64) -> Vec<f64> {
    var.iter()
        .zip(df)
        .map(|(&v, &d)| {
            if df_prior.is_infinite() {
                s2_prior
            } else if df_prior.is_nan() || !v.is_finite() {
                v
            } else {
                (d * v + df_prior * s2_prior) / (d + df_prior)
            }
        })
        .collect()
}

/// Prior variance of the non-null coefficients, estimated from the largest
/// `proportion / 2` of the moderated t statistics.
pub fn tmixture(t: &[f64], stdev_unscaled: &[f64], df: &[f64], proportion: f64, v0_lim: Option<(f64, f64)>) -> f64 {
    let mut rows: Vec<(f64, f64, f64)> = t
        .iter()
        .zip(stdev_unscaled)
        .zip(df)
        .filter(|((t, s), _)| t.is_finite() && s.is_finite())
        .map(|((&t, &s), &d)| (t.abs(), s, d))
        .collect();
    let n_genes = rows.len();
    let n_target = (proportion / 2.0 * n_genes as f64).ceil() as usize;
    if n_target < 1 {
        return f64::NAN;
    }
    let p = (n_target as f64 / n_genes as f64).max(proportion);
    let max_df = rows.iter().map(|r| r.2).fold(f64::NEG_INFINITY, f64::max);
    for row in rows.iter_mut().filter(|r| r.2 < max_df) {
        let tail = t_pvalue(row.0, row.2) / 2.0;
        row.0 = t_quantile_upper(tail, max_df);
        row.2 = max_df;
    }
    rows.sort_by(|a, b| b.0.total_cmp(&a.0));

    let v0: Vec<f64> = rows
        .iter()
        .take(n_target)
        .enumerate()
        .map(|(r, &(t, s, _))| {
            let p0 = t_pvalue(t, max_df);
            let p_target = ((r as f64 + 0.5) / n_genes as f64 - (1.0 - p) * p0) / p;
            let mut v = 0.0;
            if p_target > p0 {
                let q_target = t_quantile_upper(p_target / 2.0, max_df);
                v = s * s * ((t / q_target).powi(2) - 1.0);
            }
            match v0_lim {
                Some((lo, hi)) => v.clamp(lo, hi),
                None => v,
            }
        })
        .collect();
    v0.iter().sum::<f64>() / v0.len() as f64
}

/// Upper-tail quantile of Student's t
fn t_quantile_upper(tail: f64, df: f64) -> f64 {
    if df.is_infinite() {
        return statrs::distribution::Normal::new(0.0, 1.0)
            .map(|n| n.inverse_cdf(1.0 - tail))
            .unwrap_or(f64::NAN);
    }
    StudentsT::new(0.0, 1.0, df)
        .map(|d| d.inverse_cdf(1.0 - tail))
        .unwrap_or(f64::NAN)
}

/// Moderated t statistics, p-values and B statistics for every coefficient
pub fn ebayes(fit: &LinearModelFit, params: &EbayesParams) -> Result<EbayesFit> {
    if !(params.proportion > 0.0 && params.proportion < 1.0) {
        return Err(DgeError::InvalidInput {
            reason: format!("proportion must lie in (0, 1), got {}", params.proportion),
        });
    }
    if fit.df_residual.iter().all(|&d| d <= 0.0) {
        return Err(DgeError::InvalidInput {
            reason: "no residual degrees of freedom in linear model fit".to_string(),
        });
    }

    let var: Vec<f64> = fit.sigma.iter().map(|s| s * s).collect();
    let (s2_prior, df_prior) = fit_f_dist(&var, &fit.df_residual);
    let s2_post = squeeze_var(&var, &fit.df_residual, s2_prior, df_prior);
    let df_pooled: f64 = fit.df_residual.iter().filter(|d| d.is_finite()).sum();
    let df_total: Vec<f64> = fit
        .df_residual
        .iter()
        .map(|&d| (d + df_prior).min(df_pooled))
        .collect();
    log::info!("eBayes prior: s2 = {:.4}, df = {:.3}", s2_prior, df_prior);

    let (n, p) = fit.coefficients.dim();
    let t = Array2::from_shape_fn((n, p), |(i, j)| {
        fit.coefficients[[i, j]] / fit.stdev_unscaled[[i, j]] / s2_post[i].sqrt()
    });
    let p_value = Array2::from_shape_fn((n, p), |(i, j)| t_pvalue(t[[i, j]], df_total[i]));

    let (lo, hi) = params.stdev_coef_lim;
    let v0_lim = (lo * lo / s2_prior, hi * hi / s2_prior);
    let var_prior: Vec<f64> = (0..p)
        .map(|j| {
            let v = tmixture(
                &t.column(j).to_vec(),
                &fit.stdev_unscaled.column(j).to_vec(),
                &df_total,
                params.proportion,
                Some(v0_lim),
            );
            if v.is_finite() {
                v
            } else {
                log::warn!("Estimation of var.prior failed: set to default value");
                1.0 / s2_prior
            }
        })
        .collect();

    let log_prior_odds = (params.proportion / (1.0 - params.proportion)).ln();
    let lods = Array2::from_shape_fn((n, p), |(i, j)| {
        let s2u = fit.stdev_unscaled[[i, j]].powi(2);
        let r = (s2u + var_prior[j]) / s2u;
        let t2 = t[[i, j]].powi(2);
        let kernel = if df_prior > 1e6 {
            t2 * (1.0 - 1.0 / r) / 2.0
        } else {
            let d = df_total[i];
            (1.0 + d) / 2.0 * ((t2 + d) / (t2 / r + d)).ln()
        };
        log_prior_odds - r.ln() / 2.0 + kernel
    });

    Ok(EbayesFit {
        fit: fit.clone(),
        s2_prior,
        df_prior,
        s2_post,
        df_total,
        t,
        p_value,
        var_prior,
        lods,
    })
}
