//! Two-sided p-values from test statistics

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Two-sided p-value of a standard normal statistic
pub fn normal_pvalue(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    match Normal::new(0.0, 1.0) {
        Ok(normal) => 2.0 * normal.cdf(-z.abs()),
        Err(_) => f64::NAN,
    }
}

/// Two-sided p-value of a t statistic with `df` degrees of freedom.
/// Infinite `df` falls back to the normal distribution.
pub fn t_pvalue(t: f64, df: f64) -> f64 {
    if !t.is_finite() || df.is_nan() || df <= 0.0 {
        return f64::NAN;
    }
    if df.is_infinite() {
        return normal_pvalue(t);
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => 2.0 * dist.cdf(-t.abs()),
        Err(_) => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_pvalue() {
        assert!((normal_pvalue(2.0) - normal_pvalue(-2.0)).abs() < 1e-12);
        assert!((normal_pvalue(0.0) - 1.0).abs() < 1e-12);
        assert!((normal_pvalue(1.959964) - 0.05).abs() < 1e-6);
        assert!(normal_pvalue(f64::NAN).is_nan());
    }

    #[test]
    fn test_t_pvalue() {
        // Heavier tails with few degrees of freedom
        assert!(t_pvalue(2.0, 3.0) > normal_pvalue(2.0));
        assert!((t_pvalue(2.0, 1e6) - normal_pvalue(2.0)).abs() < 1e-4);
        assert_eq!(t_pvalue(2.0, f64::INFINITY), normal_pvalue(2.0));
        assert!(t_pvalue(2.0, 0.0).is_nan());
    }
}
