//! Statistical utility functions shared across modules
//!
//! Robust location/scale summaries, sample quantiles and the polygamma
//! functions needed by the dispersion prior and empirical Bayes moderation.

use ndarray::{Array2, ArrayView2, Axis};

/// Consistency constant that makes the MAD estimate sigma for normal data
const MAD_SCALE: f64 = 1.4826;

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted
}

/// Median ignoring NaN; NaN when nothing is left
pub fn median(values: &[f64]) -> f64 {
    let sorted = sorted_finite(values);
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Median absolute deviation scaled to be consistent for normal data
pub fn mad(values: &[f64]) -> f64 {
    let center = median(values);
    let deviations: Vec<f64> = values
        .iter()
        .filter(|v| !v.is_nan())
        .map(|&v| (v - center).abs())
        .collect();
    MAD_SCALE * median(&deviations)
}

/// Sample quantile with linear interpolation between order statistics
/// (the "type 7" definition).
pub fn quantile(values: &[f64], prob: f64) -> f64 {
    let sorted = sorted_finite(values);
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let h = (n as f64 - 1.0) * prob.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Mean after dropping `trim` of the observations from each end
pub fn trimmed_mean(values: &[f64], trim: f64) -> f64 {
    let sorted = sorted_finite(values);
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if trim >= 0.5 {
        return median(&sorted);
    }
    let lo = (n as f64 * trim).floor() as usize;
    let hi = n - lo;
    let kept = &sorted[lo..hi];
    kept.iter().sum::<f64>() / kept.len() as f64
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance (n - 1 denominator)
pub fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Trigamma function psi'(x) for x > 0
pub fn trigamma(x: f64) -> f64 {
    if x.is_nan() || x <= 0.0 {
        return f64::NAN;
    }
    if x.is_infinite() {
        return 0.0;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 6.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    acc + inv
        + inv2 / 2.0
        + inv * inv2 * (1.0 / 6.0 - inv2 * (1.0 / 30.0 - inv2 * (1.0 / 42.0 - inv2 / 30.0)))
}

/// Tetragamma function psi''(x) for x > 0
pub fn tetragamma(x: f64) -> f64 {
    if x.is_nan() || x <= 0.0 {
        return f64::NAN;
    }
    if x.is_infinite() {
        return 0.0;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 10.0 {
        acc -= 2.0 / (x * x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    let inv4 = inv2 * inv2;
    acc - inv2 - inv2 * inv - inv4 / 2.0
        + inv4 * inv2 * (1.0 / 6.0 - inv2 * (1.0 / 6.0 - inv2 * 3.0 / 10.0))
}

/// Solve trigamma(y) = x for y by Newton iteration on 1/trigamma
pub fn trigamma_inverse(x: f64) -> f64 {
    if x.is_nan() || x < 0.0 {
        return f64::NAN;
    }
    if x > 1e7 {
        return 1.0 / x.sqrt();
    }
    if x < 1e-6 {
        return 1.0 / x;
    }
    let mut y = 0.5 + 1.0 / x;
    for _ in 0..50 {
        let tri = trigamma(y);
        let dif = tri * (1.0 - tri / x) / tetragamma(y);
        y += dif;
        if -dif / y < 1e-8 {
            break;
        }
    }
    y
}

/// Pearson correlation of two equal-length slices
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return f64::NAN;
    }
    let mx = mean(&x[..n]);
    let my = mean(&y[..n]);
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for i in 0..n {
        let dx = x[i] - mx;
        let dy = y[i] - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return f64::NAN;
    }
    sxy / (sxx * syy).sqrt()
}

/// Pairwise Pearson correlation between the columns of `data`
pub fn column_correlation(data: ArrayView2<f64>) -> Array2<f64> {
    let columns: Vec<Vec<f64>> = data.axis_iter(Axis(1)).map(|c| c.to_vec()).collect();
    let n = columns.len();
    let mut cor = Array2::<f64>::eye(n);
    for i in 0..n {
        for j in (i + 1)..n {
            let r = pearson_correlation(&columns[i], &columns[j]);
            cor[[i, j]] = r;
            cor[[j, i]] = r;
        }
    }
    cor
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_median_and_mad() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[]).is_nan());
        // deviations from 3: 2,1,0,1,2 -> median 1
        assert!((mad(&[1.0, 2.0, 3.0, 4.0, 5.0]) - 1.4826).abs() < 1e-12);
    }

    #[test]
    fn test_quantile_type7() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&x, 0.0), 1.0);
        assert_eq!(quantile(&x, 1.0), 5.0);
        assert!((quantile(&x, 0.1) - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_trimmed_mean() {
        let x = [1.0, 2.0, 3.0, 4.0, 100.0];
        assert!((trimmed_mean(&x, 0.2) - 3.0).abs() < 1e-12);
        assert!((trimmed_mean(&x, 0.0) - 22.0).abs() < 1e-12);
    }

    #[test]
    fn test_polygamma_values() {
        // trigamma(1) = pi^2 / 6, tetragamma(1) = -2 * zeta(3)
        let pi2_6 = std::f64::consts::PI.powi(2) / 6.0;
        assert!((trigamma(1.0) - pi2_6).abs() < 1e-9);
        assert!((tetragamma(1.0) + 2.0 * 1.2020569031595942).abs() < 1e-8);
        assert!((trigamma(0.5) - std::f64::consts::PI.powi(2) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_trigamma_inverse_roundtrip() {
        for &y in &[0.3, 1.0, 2.5, 10.0, 150.0] {
            let x = trigamma(y);
            assert!((trigamma_inverse(x) - y).abs() / y < 1e-6, "y = {}", y);
        }
    }

    #[test]
    fn test_column_correlation() {
        let m = array![[1.0, 2.0, -1.0], [2.0, 4.0, -2.0], [3.0, 6.0, -3.5]];
        let cor = column_correlation(m.view());
        assert_eq!(cor.dim(), (3, 3));
        assert!((cor[[0, 1]] - 1.0).abs() < 1e-12);
        assert!(cor[[0, 2]] < -0.99);
        assert_eq!(cor[[2, 2]], 1.0);
        assert_eq!(cor[[1, 0]], cor[[0, 1]]);
    }
}
