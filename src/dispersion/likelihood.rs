//! Cox-Reid adjusted negative binomial log posterior for one gene, and the
//! two optimisers run on it: an Armijo line search and a fallback grid.

use ndarray::Array2;
use statrs::function::gamma::{digamma, ln_gamma};

use super::DispersionParams;
use crate::linalg::{log_det_symmetric, try_invert_symmetric, weighted_cross_product};

/// Hard bounds on proposals in log dispersion space
const MIN_LOG_ALPHA_HARD: f64 = -30.0;
const MAX_LOG_ALPHA_HARD: f64 = 10.0;
/// Armijo sufficient-increase constant
const EPSILON: f64 = 1e-4;
const GRID_POINTS: usize = 20;

/// Normal prior on log dispersion centred on the trend
#[derive(Debug, Clone, Copy)]
pub(crate) struct LogNormalPrior {
    pub mean: f64,
    pub var: f64,
}

/// Outcome of [`CoxReidPosterior::line_search`]
#[derive(Debug, Clone, Copy)]
pub(crate) struct LineSearch {
    pub log_alpha: f64,
    pub initial_lp: f64,
    pub final_lp: f64,
    pub iterations: usize,
    pub converged: bool,
}

pub(crate) struct CoxReidPosterior<'a> {
    counts: &'a [f64],
    mu: &'a [f64],
    design: &'a Array2<f64>,
    prior: Option<LogNormalPrior>,
}

impl<'a> CoxReidPosterior<'a> {
    pub fn new(
        counts: &'a [f64],
        mu: &'a [f64],
        design: &'a Array2<f64>,
        prior: Option<LogNormalPrior>,
    ) -> Self {
        Self {
            counts,
            mu,
            design,
            prior,
        }
    }

    fn cr_weights(&self, alpha: f64) -> Vec<f64> {
        self.mu
            .iter()
            .map(|&m| 1.0 / (1.0 / m.max(1e-10) + alpha))
            .collect()
    }

    pub fn log_posterior(&self, log_alpha: f64) -> f64 {
        let alpha = log_alpha.exp();
        let alpha_inv = 1.0 / alpha;
        let lgamma_inv = ln_gamma(alpha_inv);

        let ll: f64 = self
            .counts
            .iter()
            .zip(self.mu)
            .map(|(&y, &m)| {
                let m = m.max(1e-10);
                ln_gamma(y + alpha_inv) - lgamma_inv
                    - y * (m + alpha_inv).ln()
                    - alpha_inv * (1.0 + m * alpha).ln()
            })
            .sum();

        let b = weighted_cross_product(self.design, &self.cr_weights(alpha));
        let cr = log_det_symmetric(&b).map(|ld| -0.5 * ld).unwrap_or(0.0);

        let prior = self
            .prior
            .map(|p| -0.5 * (log_alpha - p.mean).powi(2) / p.var)
            .unwrap_or(0.0);

        ll + cr + prior
    }

    /// Derivative with respect to log(alpha)
    pub fn d_log_posterior(&self, log_alpha: f64) -> f64 {
        let alpha = log_alpha.exp();
        let alpha_inv = 1.0 / alpha;
        let digamma_inv = digamma(alpha_inv);

        let ll_sum: f64 = self
            .counts
            .iter()
            .zip(self.mu)
            .map(|(&y, &m)| {
                let m = m.max(1e-10);
                digamma_inv + (1.0 + m * alpha).ln() - m * alpha / (1.0 + m * alpha)
                    - digamma(y + alpha_inv)
                    + y / (m + alpha_inv)
            })
            .sum();
        let ll_part = ll_sum * alpha_inv * alpha_inv;

        // d/dalpha of -0.5 log|B| with B = X'WX and dW = -W^2
        let w = self.cr_weights(alpha);
        let dw: Vec<f64> = w.iter().map(|wi| -wi * wi).collect();
        let b = weighted_cross_product(self.design, &w);
        let db = weighted_cross_product(self.design, &dw);
        let cr_part = match try_invert_symmetric(&b) {
            Some(b_inv) => -0.5 * (&b_inv * &db.t()).sum(),
            None => 0.0,
        };

        let prior = self
            .prior
            .map(|p| -(log_alpha - p.mean) / p.var)
            .unwrap_or(0.0);

        (ll_part + cr_part) * alpha + prior
    }

    /// Backtracking gradient ascent with the Armijo rule
    pub fn line_search(&self, log_alpha_init: f64, params: &DispersionParams) -> LineSearch {
        let min_log_alpha = (params.min_disp / 10.0).ln();
        let mut a = log_alpha_init.clamp(MIN_LOG_ALPHA_HARD, MAX_LOG_ALPHA_HARD);
        let initial_lp = self.log_posterior(a);
        let mut lp = initial_lp;
        let mut dlp = self.d_log_posterior(a);
        let mut kappa = params.kappa_0;
        let mut accepted = 0usize;

        for iter in 0..params.maxit {
            let raw = a + kappa * dlp;
            if raw < MIN_LOG_ALPHA_HARD {
                kappa = (MIN_LOG_ALPHA_HARD - a) / dlp;
            }
            if raw > MAX_LOG_ALPHA_HARD {
                kappa = (MAX_LOG_ALPHA_HARD - a) / dlp;
            }
            let proposal = a + kappa * dlp;
            let lp_proposal = self.log_posterior(proposal);

            if -lp_proposal <= -lp - kappa * EPSILON * dlp * dlp {
                accepted += 1;
                a = proposal;
                let change = lp_proposal - lp;
                lp = lp_proposal;
                if change < params.disp_tol || a < min_log_alpha {
                    return LineSearch {
                        log_alpha: a,
                        initial_lp,
                        final_lp: lp,
                        iterations: iter + 1,
                        converged: true,
                    };
                }
                dlp = self.d_log_posterior(a);
                kappa = (kappa * 1.1).min(params.kappa_0);
                if accepted % 5 == 0 {
                    kappa /= 2.0;
                }
            } else {
                kappa /= 2.0;
            }
        }

        LineSearch {
            log_alpha: a,
            initial_lp,
            final_lp: lp,
            iterations: params.maxit,
            converged: false,
        }
    }

    /// Coarse grid over [min_disp, max_disp] in log space, then a fine grid
    /// one coarse step either side of the best point. Returns the dispersion.
    pub fn grid_search(&self, min_disp: f64, max_disp: f64) -> f64 {
        let lo = min_disp.ln();
        let hi = max_disp.ln();
        let delta = (hi - lo) / (GRID_POINTS - 1) as f64;
        let best_on = |start: f64, step: f64| -> f64 {
            (0..GRID_POINTS)
                .map(|i| start + i as f64 * step)
                .map(|la| (la, self.log_posterior(la)))
                .fold((start, f64::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                })
                .0
        };
        let coarse = best_on(lo, delta);
        let fine_step = 2.0 * delta / (GRID_POINTS - 1) as f64;
        best_on(coarse - delta, fine_step).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn design() -> Array2<f64> {
        array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]]
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let counts = [12.0, 30.0, 7.0, 55.0, 80.0, 41.0];
        let mu = [16.3, 16.3, 16.3, 58.7, 58.7, 58.7];
        let x = design();
        for prior in [None, Some(LogNormalPrior { mean: -2.0, var: 0.5 })] {
            let post = CoxReidPosterior::new(&counts, &mu, &x, prior);
            for &la in &[-3.0, -1.0, 0.5] {
                let h = 1e-5;
                let fd = (post.log_posterior(la + h) - post.log_posterior(la - h)) / (2.0 * h);
                let an = post.d_log_posterior(la);
                assert!((fd - an).abs() < 1e-4 * (1.0 + an.abs()), "la={} fd={} an={}", la, fd, an);
            }
        }
    }

    #[test]
    fn test_line_search_and_grid_agree() {
        let counts = [12.0, 30.0, 7.0, 55.0, 80.0, 41.0];
        let mu = [16.3, 16.3, 16.3, 58.7, 58.7, 58.7];
        let x = design();
        let post = CoxReidPosterior::new(&counts, &mu, &x, None);
        let params = DispersionParams::default();
        let ls = post.line_search((0.1f64).ln(), &params);
        assert!(ls.converged);
        assert!(ls.final_lp >= ls.initial_lp);
        let grid = post.grid_search(1e-8, 10.0);
        assert!((ls.log_alpha - grid.ln()).abs() < 0.15, "{} vs {}", ls.log_alpha.exp(), grid);
    }
}
