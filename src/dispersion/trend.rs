//! Dispersion trend fitting

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::data::CountDataSet;
use crate::error::{DgeError, Result};
use crate::stats::trimmed_mean;

/// Method for fitting the dispersion-mean trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendFitMethod {
    /// dispersion = asymptDisp + extraPois / mean, falling back to Mean
    Parametric,
    /// A single trimmed mean of the gene-wise estimates
    Mean,
}

impl Default for TrendFitMethod {
    fn default() -> Self {
        TrendFitMethod::Parametric
    }
}

/// A fitted dispersion trend; kept on the dataset so that refits of
/// individual genes can reuse it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispersionTrend {
    Parametric { asympt_disp: f64, extra_pois: f64 },
    Mean { value: f64 },
}

impl DispersionTrend {
    /// Trended dispersion at a mean normalized count
    pub fn evaluate(&self, mean: f64) -> f64 {
        match *self {
            DispersionTrend::Parametric {
                asympt_disp,
                extra_pois,
            } => {
                if mean > 0.0 {
                    asympt_disp + extra_pois / mean
                } else {
                    asympt_disp
                }
            }
            DispersionTrend::Mean { value } => value,
        }
    }
}

/// Fit a trend to the gene-wise dispersions as a function of mean expression
pub fn fit_dispersion_trend(dds: &mut CountDataSet, method: TrendFitMethod, min_disp: f64) -> Result<()> {
    let gene_dispersions = dds.gene_dispersions().ok_or_else(|| DgeError::TrendFittingFailed {
        reason: "Gene-wise dispersions must be estimated first".to_string(),
    })?;
    let normalized = dds.normalized_counts().ok_or_else(|| DgeError::TrendFittingFailed {
        reason: "Normalized counts required for trend fitting".to_string(),
    })?;

    let n_samples = dds.n_samples() as f64;
    let means: Vec<f64> = normalized.rows().into_iter().map(|row| row.sum() / n_samples).collect();
    let dispersions = gene_dispersions.to_vec();

    let trend = match method {
        TrendFitMethod::Parametric => match fit_parametric_trend(&means, &dispersions) {
            Ok(trend) => trend,
            Err(e) => {
                log::warn!("{}; using the mean dispersion as the trend instead", e);
                fit_mean_trend(&dispersions, min_disp)?
            }
        },
        TrendFitMethod::Mean => fit_mean_trend(&dispersions, min_disp)?,
    };
    log::info!("Dispersion trend: {:?}", trend);

    let trended: Array1<f64> = means.iter().map(|&m| trend.evaluate(m)).collect();
    dds.set_trended_dispersions(trend, trended)
}

/// Trimmed mean (0.1% each side) of estimates above the floor
fn fit_mean_trend(dispersions: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let usable: Vec<f64> = dispersions
        .iter()
        .copied()
        .filter(|&d| d.is_finite() && d > 10.0 * min_disp)
        .collect();
    if usable.is_empty() {
        return Err(DgeError::TrendFittingFailed {
            reason: "all gene-wise dispersions are within 2 orders of magnitude of the minimum".to_string(),
        });
    }
    Ok(DispersionTrend::Mean {
        value: trimmed_mean(&usable, 0.001),
    })
}

/// Iterated Gamma GLM of dispersion on 1/mean, dropping genes whose
/// residual dispersion/fit leaves (1e-4, 15) before each refit.
fn fit_parametric_trend(means: &[f64], dispersions: &[f64]) -> Result<DispersionTrend> {
    let data: Vec<(f64, f64)> = means
        .iter()
        .zip(dispersions)
        .filter(|(&m, &d)| m > 0.0 && d.is_finite() && d > 1e-6)
        .map(|(&m, &d)| (m, d))
        .collect();
    if data.len() < 3 {
        return Err(DgeError::TrendFittingFailed {
            reason: "not enough genes for a parametric dispersion fit".to_string(),
        });
    }

    let mut coefs = (0.1_f64, 1.0_f64);
    for iter in 0..11 {
        let old = coefs;
        let good: Vec<(f64, f64)> = data
            .iter()
            .copied()
            .filter(|&(m, d)| {
                let fitted = old.0 + old.1 / m;
                let residual = d / fitted;
                fitted > 0.0 && residual > 1e-4 && residual < 15.0
            })
            .collect();
        if good.len() < 3 {
            return Err(DgeError::TrendFittingFailed {
                reason: "too few genes with usable residuals in the parametric fit".to_string(),
            });
        }

        let (new_coefs, glm_converged) = gamma_glm_identity(&good, coefs);
        coefs = new_coefs;
        log::debug!(
            "Parametric trend iteration {}: {} genes, a0={:.6}, a1={:.6}",
            iter + 1,
            good.len(),
            coefs.0,
            coefs.1
        );

        if !(coefs.0 > 0.0 && coefs.1 > 0.0) {
            return Err(DgeError::TrendFittingFailed {
                reason: format!(
                    "parametric dispersion fit gave non-positive coefficients (a0={:.4}, a1={:.4})",
                    coefs.0, coefs.1
                ),
            });
        }

        let change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        if change < 1e-6 && glm_converged {
            return Ok(DispersionTrend::Parametric {
                asympt_disp: coefs.0,
                extra_pois: coefs.1,
            });
        }
    }

    Err(DgeError::TrendFittingFailed {
        reason: "parametric dispersion fit did not converge".to_string(),
    })
}

fn gamma_deviance(data: &[(f64, f64)], a0: f64, a1: f64) -> f64 {
    data.iter()
        .map(|&(m, d)| {
            let mu = (a0 + a1 / m).max(1e-8);
            2.0 * (-(d / mu).ln() + (d - mu) / mu)
        })
        .sum()
}

/// IRLS for a Gamma family GLM with identity link, y ~ 1 + x with x = 1/mean.
/// Returns the coefficients and whether the deviance converged.
fn gamma_glm_identity(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let (mut a0, mut a1) = start;
    let mut dev_old = gamma_deviance(data, a0, a1);

    for _ in 0..25 {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(m, d) in data {
            let x = 1.0 / m;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * d;
            swxx += w * x * x;
            swxz += w * x * d;
        }
        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-300 {
            return ((a0, a1), false);
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = gamma_deviance(data, a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parametric_trend_recovers_curve() {
        let means: Vec<f64> = (1..=200).map(|i| i as f64 * 5.0).collect();
        // Multiplicative noise that averages out on the log scale
        let dispersions: Vec<f64> = means
            .iter()
            .enumerate()
            .map(|(i, &m)| (0.05 + 2.0 / m) * if i % 2 == 0 { 1.2 } else { 1.0 / 1.2 })
            .collect();
        match fit_parametric_trend(&means, &dispersions).unwrap() {
            DispersionTrend::Parametric {
                asympt_disp,
                extra_pois,
            } => {
                assert!((asympt_disp - 0.05).abs() < 0.01, "a0={}", asympt_disp);
                assert!((extra_pois - 2.0).abs() < 0.4, "a1={}", extra_pois);
            }
            other => panic!("unexpected trend {:?}", other),
        }
    }

    #[test]
    fn test_mean_trend_ignores_floor_values() {
        let trend = fit_mean_trend(&[1e-8, 0.1, 0.2, 0.3, f64::NAN], 1e-8).unwrap();
        assert!((trend.evaluate(50.0) - 0.2).abs() < 1e-12);
        assert!(fit_mean_trend(&[1e-8, 1e-8], 1e-8).is_err());
    }

    #[test]
    fn test_evaluate_parametric() {
        let trend = DispersionTrend::Parametric {
            asympt_disp: 0.1,
            extra_pois: 2.0,
        };
        assert!((trend.evaluate(4.0) - 0.6).abs() < 1e-12);
        assert_eq!(trend.evaluate(0.0), 0.1);
    }
}
