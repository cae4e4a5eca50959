//! Benjamini-Hochberg false discovery rate adjustment

/// Step-up BH adjustment. NaN p-values stay NaN and do not count towards
/// the number of tests.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let n = pvalues.len();
    let mut indices: Vec<usize> = (0..n).filter(|&i| !pvalues[i].is_nan()).collect();
    let m = indices.len();
    let mut padj = vec![f64::NAN; n];
    if m == 0 {
        return padj;
    }
    indices.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));

    let mut cummin = f64::INFINITY;
    for (rank, &i) in indices.iter().enumerate().rev() {
        let adj = (pvalues[i] * m as f64 / (rank + 1) as f64).min(1.0);
        cummin = cummin.min(adj);
        padj[i] = cummin;
    }
    padj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bh_known_values() {
        // p.adjust(c(0.01, 0.04, 0.03, 0.02), "BH") = 0.04 0.04 0.04 0.04
        let padj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.02]);
        for p in padj {
            assert!((p - 0.04).abs() < 1e-12);
        }
        // p.adjust(c(0.001, 0.01, 0.5), "BH") = 0.003 0.015 0.5
        let padj = benjamini_hochberg(&[0.001, 0.01, 0.5]);
        assert!((padj[0] - 0.003).abs() < 1e-12);
        assert!((padj[1] - 0.015).abs() < 1e-12);
        assert!((padj[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_bh_with_nan() {
        let padj = benjamini_hochberg(&[0.01, f64::NAN, 0.02]);
        assert!(padj[1].is_nan());
        assert!((padj[0] - 0.02).abs() < 1e-12);
        assert!((padj[2] - 0.02).abs() < 1e-12);
        assert!(benjamini_hochberg(&[f64::NAN]).iter().all(|p| p.is_nan()));
        assert!(benjamini_hochberg(&[]).is_empty());
    }
}
