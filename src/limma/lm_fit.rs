//! Gene-wise ordinary least squares fits

use ndarray::{Array1, Array2};
use rayon::prelude::*;

use crate::data::ExpressionMatrix;
use crate::error::{DgeError, Result};
use crate::linalg::{try_invert_symmetric, weighted_cross_product};

/// Linear model fitted to every row of an expression matrix
#[derive(Debug, Clone)]
pub struct LinearModelFit {
    pub feature_ids: Vec<String>,
    pub coef_names: Vec<String>,
    /// features x coefficients
    pub coefficients: Array2<f64>,
    /// Square roots of the diagonal of (X'X)^-1, per feature
    pub stdev_unscaled: Array2<f64>,
    /// Residual standard deviation
    pub sigma: Vec<f64>,
    pub df_residual: Vec<f64>,
    /// Average expression of each feature over its observed samples
    pub amean: Vec<f64>,
    /// (X'X)^-1 for the full design
    pub cov_coefficients: Array2<f64>,
}

impl LinearModelFit {
    pub fn n_features(&self) -> usize {
        self.feature_ids.len()
    }

    pub fn n_coefs(&self) -> usize {
        self.coef_names.len()
    }
}

struct RowFit {
    coefficients: Vec<f64>,
    stdev_unscaled: Vec<f64>,
    sigma: f64,
    df: f64,
    amean: f64,
}

/// Least squares on the observed samples of one row. Coefficients whose
/// design column has no observed support are NaN.
fn fit_row(y: &[f64], design: &Array2<f64>) -> RowFit {
    let p = design.ncols();
    let observed: Vec<usize> = (0..y.len()).filter(|&j| y[j].is_finite()).collect();
    let amean = if observed.is_empty() {
        f64::NAN
    } else {
        observed.iter().map(|&j| y[j]).sum::<f64>() / observed.len() as f64
    };
    let mut fit = RowFit {
        coefficients: vec![f64::NAN; p],
        stdev_unscaled: vec![f64::NAN; p],
        sigma: f64::NAN,
        df: 0.0,
        amean,
    };

    let columns: Vec<usize> = (0..p)
        .filter(|&k| observed.iter().any(|&j| design[[j, k]] != 0.0))
        .collect();
    if columns.is_empty() || observed.len() < columns.len() {
        return fit;
    }
    let x = Array2::from_shape_fn((observed.len(), columns.len()), |(r, c)| design[[observed[r], columns[c]]]);
    let xtx = weighted_cross_product(&x, &vec![1.0; observed.len()]);
    let Some(xtx_inv) = try_invert_symmetric(&xtx) else {
        return fit;
    };
    let yo = Array1::from_iter(observed.iter().map(|&j| y[j]));
    let beta = xtx_inv.dot(&x.t().dot(&yo));

    let residuals = &yo - &x.dot(&beta);
    let df = (observed.len() - columns.len()) as f64;
    for (c, &k) in columns.iter().enumerate() {
        fit.coefficients[k] = beta[c];
        fit.stdev_unscaled[k] = xtx_inv[[c, c]].sqrt();
    }
    fit.df = df;
    if df > 0.0 {
        fit.sigma = (residuals.mapv(|r| r * r).sum() / df).sqrt();
    }
    fit
}

/// Fit `design` to every row of `matrix`. Rows with missing values are
/// fitted on their observed samples only.
pub fn lm_fit(matrix: &ExpressionMatrix, design: &Array2<f64>, coef_names: Vec<String>) -> Result<LinearModelFit> {
    let values = matrix.values();
    let (n_features, n_samples) = values.dim();
    if design.nrows() != n_samples {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} design rows", n_samples),
            got: format!("{}", design.nrows()),
        });
    }
    if coef_names.len() != design.ncols() {
        return Err(DgeError::DimensionMismatch {
            expected: format!("{} coefficient names", design.ncols()),
            got: format!("{}", coef_names.len()),
        });
    }
    let cov_coefficients = try_invert_symmetric(&weighted_cross_product(design, &vec![1.0; n_samples]))
        .ok_or_else(|| DgeError::InvalidDesignMatrix {
            reason: "design matrix is not of full column rank".to_string(),
        })?;

    let fits: Vec<RowFit> = (0..n_features)
        .into_par_iter()
        .map(|i| fit_row(&values.row(i).to_vec(), design))
        .collect();

    let p = design.ncols();
    let mut coefficients = Array2::from_elem((n_features, p), f64::NAN);
    let mut stdev_unscaled = Array2::from_elem((n_features, p), f64::NAN);
    let mut sigma = Vec::with_capacity(n_features);
    let mut df_residual = Vec::with_capacity(n_features);
    let mut amean = Vec::with_capacity(n_features);
    for (i, fit) in fits.into_iter().enumerate() {
        for k in 0..p {
            coefficients[[i, k]] = fit.coefficients[k];
            stdev_unscaled[[i, k]] = fit.stdev_unscaled[k];
        }
        sigma.push(fit.sigma);
        df_residual.push(fit.df);
        amean.push(fit.amean);
    }
    log::info!("Fitted linear models for {} features on {} coefficients", n_features, p);

    Ok(LinearModelFit {
        feature_ids: matrix.feature_ids().to_vec(),
        coef_names,
        coefficients,
        stdev_unscaled,
        sigma,
        df_residual,
        amean,
        cov_coefficients,
    })
}
