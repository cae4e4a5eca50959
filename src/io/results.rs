//! Negative binomial test results

use serde::{Deserialize, Serialize};

use super::spreadsheet::{Cell, Sheet};

/// Per-gene results of the negative binomial Wald test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DESeqResults {
    pub gene_ids: Vec<String>,
    /// Mean of normalized counts over all samples
    pub base_means: Vec<f64>,
    pub log2_fold_changes: Vec<f64>,
    /// Standard error of the log2 fold change
    pub lfc_se: Vec<f64>,
    /// Wald statistic
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
    /// Benjamini-Hochberg adjusted p-values
    pub padj: Vec<f64>,
    /// Final (MAP) dispersions
    pub dispersions: Vec<f64>,
    /// Largest Cook's distance over the samples used for outlier calls
    pub max_cooks: Vec<f64>,
    pub contrast: Contrast,
}

/// A comparison of two levels of one metadata column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contrast {
    pub variable: String,
    pub numerator: String,
    pub denominator: String,
}

impl Contrast {
    pub fn new(variable: &str, numerator: &str, denominator: &str) -> Self {
        Self {
            variable: variable.to_string(),
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        }
    }
}

impl std::fmt::Display for Contrast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} vs {}", self.variable, self.numerator, self.denominator)
    }
}

/// Column headers of an exported results table, after the ID column
pub const RESULT_COLUMNS: [&str; 6] = ["baseMean", "log2FoldChange", "lfcSE", "stat", "pvalue", "padj"];

impl DESeqResults {
    /// Results with every statistic unset
    pub fn new(gene_ids: Vec<String>, contrast: Contrast) -> Self {
        let n = gene_ids.len();
        Self {
            gene_ids,
            base_means: vec![f64::NAN; n],
            log2_fold_changes: vec![f64::NAN; n],
            lfc_se: vec![f64::NAN; n],
            stat: vec![f64::NAN; n],
            pvalues: vec![f64::NAN; n],
            padj: vec![f64::NAN; n],
            dispersions: vec![f64::NAN; n],
            max_cooks: vec![f64::NAN; n],
            contrast,
        }
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    /// Rows in the given order; indices may repeat or be a subset
    pub fn select(&self, indices: &[usize]) -> Self {
        let pick = |v: &[f64]| indices.iter().map(|&i| v[i]).collect::<Vec<f64>>();
        Self {
            gene_ids: indices.iter().map(|&i| self.gene_ids[i].clone()).collect(),
            base_means: pick(&self.base_means),
            log2_fold_changes: pick(&self.log2_fold_changes),
            lfc_se: pick(&self.lfc_se),
            stat: pick(&self.stat),
            pvalues: pick(&self.pvalues),
            padj: pick(&self.padj),
            dispersions: pick(&self.dispersions),
            max_cooks: pick(&self.max_cooks),
            contrast: self.contrast.clone(),
        }
    }

    /// Indices sorted by adjusted p-value, NaN last, ties kept in input order
    pub fn padj_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.n_genes()).collect();
        order.sort_by(|&a, &b| {
            let (pa, pb) = (self.padj[a], self.padj[b]);
            match (pa.is_nan(), pb.is_nan()) {
                (true, true) => std::cmp::Ordering::Equal,
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                (false, false) => pa.total_cmp(&pb),
            }
        });
        order
    }

    pub fn order_by_padj(&self) -> Self {
        self.select(&self.padj_order())
    }

    /// Table with the gene IDs first, then [`RESULT_COLUMNS`]
    pub fn to_sheet(&self, name: &str) -> Sheet {
        let mut header = vec![String::new()];
        header.extend(RESULT_COLUMNS.iter().map(|c| c.to_string()));
        let rows = (0..self.n_genes())
            .map(|i| {
                vec![
                    Cell::text(self.gene_ids[i].as_str()),
                    Cell::Number(self.base_means[i]),
                    Cell::Number(self.log2_fold_changes[i]),
                    Cell::Number(self.lfc_se[i]),
                    Cell::Number(self.stat[i]),
                    Cell::Number(self.pvalues[i]),
                    Cell::Number(self.padj[i]),
                ]
            })
            .collect();
        Sheet {
            name: name.to_string(),
            header,
            rows,
        }
    }

    pub fn summary(&self, alpha: f64) -> ResultsSummary {
        let significant: Vec<usize> = (0..self.n_genes()).filter(|&i| self.padj[i] < alpha).collect();
        ResultsSummary {
            total_genes: self.n_genes(),
            genes_tested: self.pvalues.iter().filter(|p| p.is_finite()).count(),
            significant: significant.len(),
            upregulated: significant.iter().filter(|&&i| self.log2_fold_changes[i] > 0.0).count(),
            downregulated: significant.iter().filter(|&&i| self.log2_fold_changes[i] < 0.0).count(),
            cooks_outliers: self
                .pvalues
                .iter()
                .zip(&self.base_means)
                .filter(|(p, m)| p.is_nan() && **m > 0.0)
                .count(),
            alpha,
        }
    }
}

/// Counts reported after testing
#[derive(Debug, Clone)]
pub struct ResultsSummary {
    pub total_genes: usize,
    pub genes_tested: usize,
    pub significant: usize,
    pub upregulated: usize,
    pub downregulated: usize,
    /// Expressed genes left without a p-value by outlier filtering
    pub cooks_outliers: usize,
    pub alpha: f64,
}

impl std::fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Differential expression summary")?;
        writeln!(f, "Total genes: {}", self.total_genes)?;
        writeln!(f, "Genes tested: {}", self.genes_tested)?;
        writeln!(f, "Significant (padj < {}): {}", self.alpha, self.significant)?;
        writeln!(f, "  Up-regulated: {}", self.upregulated)?;
        writeln!(f, "  Down-regulated: {}", self.downregulated)?;
        write!(f, "Outliers (no p-value): {}", self.cooks_outliers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results() -> DESeqResults {
        let mut res = DESeqResults::new(
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            Contrast::new("condition", "career", "normal"),
        );
        res.padj = vec![0.2, f64::NAN, 0.001, 0.04];
        res.pvalues = vec![0.1, f64::NAN, 0.0001, 0.01];
        res.base_means = vec![10.0, 0.0, 50.0, 20.0];
        res.log2_fold_changes = vec![0.1, f64::NAN, 2.5, -1.5];
        res
    }

    #[test]
    fn test_order_by_padj_puts_nan_last() {
        let ordered = results().order_by_padj();
        assert_eq!(ordered.gene_ids, vec!["c", "d", "a", "b"]);
        assert!(ordered.padj[3].is_nan());
        assert_eq!(ordered.log2_fold_changes[0], 2.5);
    }

    #[test]
    fn test_to_sheet_shape() {
        let sheet = results().to_sheet("DEGS");
        assert_eq!(sheet.header.len(), 7);
        assert_eq!(sheet.header[2], "log2FoldChange");
        assert_eq!(sheet.n_rows(), 4);
    }

    #[test]
    fn test_summary_counts() {
        let s = results().summary(0.05);
        assert_eq!(s.significant, 2);
        assert_eq!(s.upregulated, 1);
        assert_eq!(s.downregulated, 1);
        assert_eq!(s.genes_tested, 3);
        assert_eq!(s.cooks_outliers, 0);
    }
}
