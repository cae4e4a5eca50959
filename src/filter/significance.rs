//! Splitting results into significant, up- and down-regulated tables

use crate::io::DESeqResults;

/// Significant genes ordered by padj, and the two directional subsets
#[derive(Debug, Clone)]
pub struct RegulationSplit {
    pub significant: DESeqResults,
    /// log2 fold change above the threshold
    pub up: DESeqResults,
    /// log2 fold change below minus the threshold
    pub down: DESeqResults,
}

/// Order by padj, keep padj < `padj_cutoff`, then split on `lfc_threshold`.
/// Genes with |LFC| at or below the threshold are in neither direction.
pub fn split_significant(results: &DESeqResults, padj_cutoff: f64, lfc_threshold: f64) -> RegulationSplit {
    let ordered: Vec<usize> = results
        .padj_order()
        .into_iter()
        .filter(|&i| results.padj[i] < padj_cutoff)
        .collect();
    let up: Vec<usize> = ordered
        .iter()
        .copied()
        .filter(|&i| results.log2_fold_changes[i] > lfc_threshold)
        .collect();
    let down: Vec<usize> = ordered
        .iter()
        .copied()
        .filter(|&i| results.log2_fold_changes[i] < -lfc_threshold)
        .collect();
    log::info!(
        "{} genes with padj < {}: {} up, {} down (|log2FC| > {})",
        ordered.len(),
        padj_cutoff,
        up.len(),
        down.len(),
        lfc_threshold
    );

    RegulationSplit {
        significant: results.select(&ordered),
        up: results.select(&up),
        down: results.select(&down),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Contrast;

    #[test]
    fn test_split() {
        let mut res = DESeqResults::new(
            ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect(),
            Contrast::new("condition", "career", "normal"),
        );
        res.padj = vec![0.01, 0.2, 0.001, 0.04, f64::NAN];
        res.log2_fold_changes = vec![2.0, 3.0, -1.5, 0.5, 4.0];

        let split = split_significant(&res, 0.05, 1.0);
        assert_eq!(split.significant.gene_ids, vec!["c", "a", "d"]);
        assert_eq!(split.up.gene_ids, vec!["a"]);
        assert_eq!(split.down.gene_ids, vec!["c"]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut res = DESeqResults::new(vec!["x".into(), "y".into()], Contrast::new("c", "a", "b"));
        res.padj = vec![0.01, 0.01];
        res.log2_fold_changes = vec![1.0, -1.0];
        let split = split_significant(&res, 0.05, 1.0);
        assert_eq!(split.significant.n_genes(), 2);
        assert_eq!(split.up.n_genes(), 0);
        assert_eq!(split.down.n_genes(), 0);
    }
}
