//! Count matrix representation for sequencing read counts

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use super::{deduplicate_names, ExpressionMatrix};
use crate::error::{DgeError, Result};

/// Read counts, genes in rows and samples in columns
#[derive(Debug, Clone)]
pub struct CountMatrix {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    /// Row names as read, before duplicates were renamed
    source_gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new count matrix from raw data
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }

        if sample_ids.len() != n_samples {
            return Err(DgeError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }

        if let Some(((g, s), v)) = counts
            .indexed_iter()
            .find(|(_, &x)| x < 0.0 || !x.is_finite())
        {
            return Err(DgeError::InvalidCountMatrix {
                reason: format!(
                    "count for gene '{}' in sample '{}' is {}; counts must be non-negative finite values",
                    gene_ids[g], sample_ids[s], v
                ),
            });
        }

        if !counts.is_empty() && counts.iter().all(|&x| x == 0.0) {
            return Err(DgeError::InvalidCountMatrix {
                reason: "All samples have 0 counts for all genes".to_string(),
            });
        }

        if counts.iter().any(|&x| x != x.round()) {
            log::warn!(
                "Some count values are not integers; the negative binomial model expects integer counts"
            );
        }

        let source_gene_ids = gene_ids.clone();
        let gene_ids = deduplicate_names(gene_ids, "gene");

        Ok(Self {
            counts,
            gene_ids,
            source_gene_ids,
            sample_ids,
        })
    }

    /// Build from a numeric table, optionally rounding fractional values
    /// (e.g. estimated counts from a quantifier) to the nearest integer.
    pub fn from_expression(matrix: &ExpressionMatrix, round: bool) -> Result<Self> {
        let mut counts = matrix.values().to_owned();
        if round {
            let fractional = counts.iter().filter(|&&x| x.is_finite() && x != x.round()).count();
            if fractional > 0 {
                log::info!("Rounded {} non-integer count values", fractional);
                counts.mapv_inplace(|x| x.round());
            }
        }
        Self::new(
            counts,
            matrix.feature_ids().to_vec(),
            matrix.sample_ids().to_vec(),
        )
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    /// Raw counts as a view
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    /// Overwrite a single count, used when outlier counts are replaced
    pub fn replace_count(&mut self, gene_idx: usize, sample_idx: usize, value: f64) -> Result<()> {
        if value < 0.0 || !value.is_finite() {
            return Err(DgeError::InvalidCountMatrix {
                reason: "Count value must be a non-negative finite number".to_string(),
            });
        }
        self.counts[[gene_idx, sample_idx]] = value;
        Ok(())
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    /// Original row name of each gene, repeats included
    pub fn source_gene_ids(&self) -> &[String] {
        &self.source_gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn gene_counts(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    /// Sum of counts per sample
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(1)).map(|col| col.sum()).collect()
    }
}
