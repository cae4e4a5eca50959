//! Small dense linear algebra on symmetric positive (semi)definite systems
//!
//! Design matrices here have a handful of columns, so a plain Cholesky
//! factorisation is all the GLM, dispersion and linear model code needs.

use ndarray::{Array1, Array2};

/// Pivot floor used when a system is only semidefinite
const PIVOT_FLOOR: f64 = 1e-12;

/// Lower-triangular Cholesky factor. Non-positive pivots are replaced by
/// `floor` when given, otherwise the factorisation fails.
fn factor(a: &Array2<f64>, floor: Option<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return None;
    }
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if !(sum > 0.0) {
                    sum = floor?;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Strict Cholesky factor, `None` if `a` is not positive definite
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    factor(a, None)
}

fn solve_with_factor(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[[i, j]] * y[j];
        }
        y[i] = sum / l[[i, i]];
    }
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[[j, i]] * x[j];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solve `a x = b`, flooring pivots so the solve always succeeds
pub fn solve_symmetric(a: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    match factor(a, Some(PIVOT_FLOOR)) {
        Some(l) => solve_with_factor(&l, b),
        None => Array1::from_elem(b.len(), f64::NAN),
    }
}

/// Inverse of a symmetric matrix, with the same pivot flooring as [`solve_symmetric`]
pub fn invert_symmetric(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let mut inv = Array2::<f64>::from_elem((n, n), f64::NAN);
    if let Some(l) = factor(a, Some(PIVOT_FLOOR)) {
        for i in 0..n {
            let mut e = Array1::<f64>::zeros(n);
            e[i] = 1.0;
            inv.column_mut(i).assign(&solve_with_factor(&l, &e));
        }
    }
    inv
}

/// Inverse of a strictly positive definite matrix
pub fn try_invert_symmetric(a: &Array2<f64>) -> Option<Array2<f64>> {
    let l = cholesky(a)?;
    let n = a.nrows();
    let mut inv = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        let mut e = Array1::<f64>::zeros(n);
        e[i] = 1.0;
        inv.column_mut(i).assign(&solve_with_factor(&l, &e));
    }
    Some(inv)
}

/// log(det(a)) for a positive definite matrix
pub fn log_det_symmetric(a: &Array2<f64>) -> Option<f64> {
    let l = cholesky(a)?;
    Some(2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>())
}

/// X' W X for a diagonal weight vector
pub fn weighted_cross_product(x: &Array2<f64>, weights: &[f64]) -> Array2<f64> {
    let p = x.ncols();
    let mut out = Array2::<f64>::zeros((p, p));
    for (i, row) in x.outer_iter().enumerate() {
        let w = weights[i];
        for j in 0..p {
            let wx = w * row[j];
            for k in j..p {
                out[[j, k]] += wx * row[k];
            }
        }
    }
    for j in 0..p {
        for k in 0..j {
            out[[j, k]] = out[[k, j]];
        }
    }
    out
}
