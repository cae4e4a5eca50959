//! Pipeline settings. Defaults reproduce the fixed analysis; a JSON file
//! may override any subset of fields.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::annotation::{EnrichmentParams, HUMAN_GENE_INFO_URL};
use crate::data::GroupSpec;
use crate::dispersion::DispersionParams;
use crate::error::{DgeError, Result};
use crate::glm::GlmFitParams;
use crate::limma::{EbayesParams, SortBy};
use crate::normalization::{LogTransformMode, SizeFactorMethod};
use crate::testing::ResultsParams;

fn load_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let config = serde_json::from_str(&text)?;
    log::debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// GEO microarray comparison with a linear model and empirical Bayes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MicroarrayConfig {
    /// GEO series accession, e.g. GSE26713
    pub accession: String,
    /// Sample field holding the group of each sample
    pub group_column: String,
    /// Name the group column is exported under
    pub group_label: String,
    /// Contrast such as `B-A`; two-group data default to second minus first
    pub contrast: Option<String>,
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub log_transform: LogTransformMode,
    /// Value that replaces undefined results of the log transform
    pub fill_value: f64,
    /// Platform columns joined onto the exported tables
    pub annotation_columns: Vec<String>,
    pub annotate: bool,
    pub export_correlation: bool,
    pub ebayes: EbayesParams,
    pub sort_by: SortBy,
}

impl Default for MicroarrayConfig {
    fn default() -> Self {
        Self {
            accession: String::new(),
            group_column: "characteristics_ch1".to_string(),
            group_label: "group".to_string(),
            contrast: None,
            output_dir: PathBuf::from("."),
            cache_dir: PathBuf::from("geo_cache"),
            log_transform: LogTransformMode::Always,
            fill_value: 0.0,
            annotation_columns: vec!["Gene Symbol".to_string(), "ENTREZ_GENE_ID".to_string()],
            annotate: true,
            export_correlation: false,
            ebayes: EbayesParams::default(),
            sort_by: SortBy::B,
        }
    }
}

impl MicroarrayConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.accession.trim().is_empty() {
            return Err(DgeError::InvalidInput {
                reason: "a GEO series accession is required".to_string(),
            });
        }
        if self.group_label.trim().is_empty() {
            return Err(DgeError::InvalidInput {
                reason: "group label must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Negative binomial comparison of a local count matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CountsConfig {
    /// Count table: xlsx/xls/ods, csv or tsv with gene IDs in the first column
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Consecutive column blocks and their group names
    pub groups: Vec<GroupSpec>,
    pub condition_column: String,
    pub reference: String,
    pub comparison: String,
    pub round_counts: bool,
    pub size_factor_method: SizeFactorMethod,
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
    pub results: ResultsParams,
    /// Replace outlier counts in cells with at least this many samples
    pub min_replicates_for_replace: Option<usize>,
    pub padj_cutoff: f64,
    pub lfc_threshold: f64,
    /// Local gene_info table; downloaded to the cache when unset
    pub gene_info: Option<PathBuf>,
    pub gene_info_url: String,
    pub use_synonyms: bool,
    /// GMT gene sets; enrichment is skipped when unset
    pub gene_sets: Option<PathBuf>,
    pub enrichment: EnrichmentParams,
}

impl Default for CountsConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("counts.xlsx"),
            output_dir: PathBuf::from("DEG_results"),
            cache_dir: PathBuf::from("annotation_cache"),
            groups: vec![GroupSpec::new("career", 12), GroupSpec::new("normal", 3)],
            condition_column: "condition".to_string(),
            reference: "normal".to_string(),
            comparison: "career".to_string(),
            round_counts: true,
            size_factor_method: SizeFactorMethod::Ratio,
            dispersion: DispersionParams::default(),
            glm: GlmFitParams::default(),
            results: ResultsParams::default(),
            min_replicates_for_replace: Some(7),
            padj_cutoff: 0.05,
            lfc_threshold: 1.0,
            gene_info: None,
            gene_info_url: HUMAN_GENE_INFO_URL.to_string(),
            use_synonyms: false,
            gene_sets: None,
            enrichment: EnrichmentParams::default(),
        }
    }
}

impl CountsConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json(path)
    }

    pub fn validate(&self) -> Result<()> {
        let has = |name: &str| self.groups.iter().any(|g| g.name == name);
        if !has(&self.reference) || !has(&self.comparison) {
            return Err(DgeError::InvalidMetadata {
                reason: format!(
                    "reference '{}' and comparison '{}' must both be configured groups",
                    self.reference, self.comparison
                ),
            });
        }
        if self.reference == self.comparison {
            return Err(DgeError::InvalidContrast {
                reason: "reference and comparison groups must differ".to_string(),
            });
        }
        if self.lfc_threshold < 0.0 || !(self.padj_cutoff > 0.0 && self.padj_cutoff <= 1.0) {
            return Err(DgeError::InvalidInput {
                reason: format!(
                    "thresholds out of range: padj {} (0, 1], |log2FC| {} >= 0",
                    self.padj_cutoff, self.lfc_threshold
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let counts = CountsConfig::default();
        assert_eq!(counts.groups.iter().map(|g| g.size).sum::<usize>(), 15);
        assert_eq!(counts.reference, "normal");
        assert_eq!(counts.padj_cutoff, 0.05);
        assert!(counts.validate().is_ok());

        let micro = MicroarrayConfig::default();
        assert_eq!(micro.group_column, "characteristics_ch1");
        assert!(micro.validate().is_err());
    }

    #[test]
    fn test_partial_json_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(
            &path,
            r#"{"lfc_threshold": 2.0, "groups": [{"name": "career", "size": 4}, {"name": "normal", "size": 2}],
                "dispersion": {"outlier_sd": 3.0}}"#,
        )
        .unwrap();
        let cfg = CountsConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.lfc_threshold, 2.0);
        assert_eq!(cfg.groups[0].size, 4);
        assert_eq!(cfg.dispersion.outlier_sd, 3.0);
        assert_eq!(cfg.dispersion.maxit, 100);
        assert_eq!(cfg.output_dir, PathBuf::from("DEG_results"));

        fs::write(&path, r#"{"accession": "GSE1", "sort_by": "p"}"#).unwrap();
        let micro = MicroarrayConfig::from_json_file(&path).unwrap();
        assert_eq!(micro.sort_by, SortBy::P);
        assert!(micro.validate().is_ok());
    }

    #[test]
    fn test_invalid_reference() {
        let cfg = CountsConfig {
            reference: "healthy".to_string(),
            ..CountsConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
