//! Command-line interface for rust_dge

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{CountsConfig, MicroarrayConfig};
use crate::data::GroupSpec;
use crate::error::{DgeError, Result};
use crate::limma::SortBy;

#[derive(Parser)]
#[command(name = "rust_dge")]
#[command(version)]
#[command(about = "Differential expression for GEO microarray series and RNA-seq count matrices")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Moderated linear model comparison of a GEO series
    #[command(
        long_about = "Moderated linear model comparison of a GEO series\n\n\
            Downloads the series matrix (first platform), applies log2 and fills\n\
            undefined values, fits one mean per group, tests one contrast with\n\
            empirical Bayes moderation and writes metadata.xlsx,\n\
            counts_table_<GSE>.xlsx and Limma_output_<contrast>_<GSE>.xlsx.",
        after_long_help = "\
Examples:
  # Two groups: the contrast defaults to second level minus first
  rust_dge microarray --accession GSE26713 --group-column \"disease state:ch1\"

  # Explicit contrast and a JSON config for the remaining settings
  rust_dge microarray --accession GSE26713 --contrast \"T_ALL-normal\" --config geo.json"
    )]
    Microarray {
        /// GEO series accession (GSE...)
        #[arg(short, long)]
        accession: Option<String>,

        /// Sample field used as the group, e.g. "characteristics_ch1" or "cell type:ch1"
        #[arg(short, long)]
        group_column: Option<String>,

        /// Contrast between group coefficients, e.g. "B-A" or "(A+B)/2-C"
        #[arg(long)]
        contrast: Option<String>,

        /// Directory for the exported workbooks
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Directory where GEO downloads are kept
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Ordering of the results table
        #[arg(long, value_parser = ["B", "P", "logFC", "none"])]
        sort_by: Option<String>,

        /// Skip the platform annotation download
        #[arg(long)]
        no_annotation: bool,

        /// Also export the sample correlation matrix
        #[arg(long)]
        export_correlation: bool,

        /// JSON file with settings; command-line options take precedence
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Negative binomial comparison of a count matrix
    #[command(
        long_about = "Negative binomial comparison of a count matrix\n\n\
            Reads a genes x samples table (.xlsx, .csv or .tsv), assigns samples to\n\
            groups by position, estimates size factors and dispersions, runs the Wald\n\
            test with Cook's distance handling and independent filtering, maps the\n\
            significant genes to Entrez IDs and writes the tables to the output directory.",
        after_long_help = "\
Examples:
  # 12 career samples followed by 3 normal samples (the defaults)
  rust_dge counts --input counts.xlsx --output-dir DEG_results

  # Local gene_info file and gene sets for over-representation analysis
  rust_dge counts -i counts.csv --gene-info Homo_sapiens.gene_info.gz --gene-sets c2.gmt"
    )]
    Counts {
        /// Count matrix: first column gene symbols, one column per sample
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory for the exported workbooks (created when absent)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Group sizes in column order, e.g. "career=12,normal=3"
        #[arg(long, value_name = "NAME=SIZE,...")]
        groups: Option<String>,

        /// Baseline group
        #[arg(long)]
        reference: Option<String>,

        /// Group compared against the baseline
        #[arg(long)]
        comparison: Option<String>,

        /// Adjusted p-value cutoff for significant genes
        #[arg(long)]
        padj_cutoff: Option<f64>,

        /// Absolute log2 fold change a significant gene must exceed to count as up or down
        #[arg(long)]
        lfc_threshold: Option<f64>,

        /// NCBI gene_info table for symbol to Entrez mapping
        #[arg(long)]
        gene_info: Option<PathBuf>,

        /// GMT gene sets for over-representation analysis
        #[arg(long)]
        gene_sets: Option<PathBuf>,

        /// JSON file with settings; command-line options take precedence
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Parse "career=12,normal=3"
pub fn parse_groups(list: &str) -> Result<Vec<GroupSpec>> {
    list.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            let (name, size) = part.split_once('=').ok_or_else(|| invalid_groups(list))?;
            let size: usize = size.trim().parse().map_err(|_| invalid_groups(list))?;
            Ok(GroupSpec::new(name.trim(), size))
        })
        .collect()
}

fn invalid_groups(list: &str) -> DgeError {
    DgeError::InvalidInput {
        reason: format!("invalid group list '{}', expected NAME=SIZE,...", list),
    }
}

fn parse_sort_by(value: &str) -> SortBy {
    match value {
        "P" => SortBy::P,
        "logFC" => SortBy::LogFc,
        "none" => SortBy::None,
        _ => SortBy::B,
    }
}

/// Settings for the microarray command: the JSON file (or defaults) with
/// command-line options applied on top
pub fn microarray_config(command: &Commands) -> Result<Option<MicroarrayConfig>> {
    let Commands::Microarray {
        accession,
        group_column,
        contrast,
        output_dir,
        cache_dir,
        sort_by,
        no_annotation,
        export_correlation,
        config,
    } = command
    else {
        return Ok(None);
    };
    let mut cfg = match config {
        Some(path) => MicroarrayConfig::from_json_file(path)?,
        None => MicroarrayConfig::default(),
    };
    if let Some(v) = accession {
        cfg.accession = v.clone();
    }
    if let Some(v) = group_column {
        cfg.group_column = v.clone();
    }
    if contrast.is_some() {
        cfg.contrast = contrast.clone();
    }
    if let Some(v) = output_dir {
        cfg.output_dir = v.clone();
    }
    if let Some(v) = cache_dir {
        cfg.cache_dir = v.clone();
    }
    if let Some(v) = sort_by {
        cfg.sort_by = parse_sort_by(v);
    }
    if *no_annotation {
        cfg.annotate = false;
    }
    if *export_correlation {
        cfg.export_correlation = true;
    }
    Ok(Some(cfg))
}

/// Settings for the counts command, built the same way as [`microarray_config`]
pub fn counts_config(command: &Commands) -> Result<Option<CountsConfig>> {
    let Commands::Counts {
        input,
        output_dir,
        groups,
        reference,
        comparison,
        padj_cutoff,
        lfc_threshold,
        gene_info,
        gene_sets,
        config,
    } = command
    else {
        return Ok(None);
    };
    let mut cfg = match config {
        Some(path) => CountsConfig::from_json_file(path)?,
        None => CountsConfig::default(),
    };
    if let Some(v) = input {
        cfg.input = v.clone();
    }
    if let Some(v) = output_dir {
        cfg.output_dir = v.clone();
    }
    if let Some(v) = groups {
        cfg.groups = parse_groups(v)?;
    }
    if let Some(v) = reference {
        cfg.reference = v.clone();
    }
    if let Some(v) = comparison {
        cfg.comparison = v.clone();
    }
    if let Some(v) = padj_cutoff {
        cfg.padj_cutoff = *v;
    }
    if let Some(v) = lfc_threshold {
        cfg.lfc_threshold = *v;
    }
    if gene_info.is_some() {
        cfg.gene_info = gene_info.clone();
    }
    if gene_sets.is_some() {
        cfg.gene_sets = gene_sets.clone();
    }
    Ok(Some(cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_groups() {
        let groups = parse_groups("career=12, normal=3").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "career");
        assert_eq!(groups[1].size, 3);
        assert!(parse_groups("career:12").is_err());
        assert!(parse_groups("career=x").is_err());
    }

    #[test]
    fn test_counts_overrides() {
        let cli = Cli::parse_from([
            "rust_dge",
            "counts",
            "--input",
            "m.csv",
            "--groups",
            "a=2,b=2",
            "--reference",
            "b",
            "--comparison",
            "a",
        ]);
        let cfg = counts_config(cli.command.as_ref().unwrap()).unwrap().unwrap();
        assert_eq!(cfg.input, PathBuf::from("m.csv"));
        assert_eq!(cfg.groups.len(), 2);
        assert_eq!(cfg.reference, "b");
        assert_eq!(cfg.padj_cutoff, 0.05);
        assert!(microarray_config(cli.command.as_ref().unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_microarray_overrides() {
        let cli = Cli::parse_from([
            "rust_dge",
            "-v",
            "microarray",
            "--accession",
            "GSE26713",
            "--sort-by",
            "P",
            "--no-annotation",
        ]);
        assert!(cli.verbose);
        let cfg = microarray_config(cli.command.as_ref().unwrap()).unwrap().unwrap();
        assert_eq!(cfg.accession, "GSE26713");
        assert_eq!(cfg.sort_by, SortBy::P);
        assert!(!cfg.annotate);
        assert_eq!(cfg.group_column, "characteristics_ch1");
    }
}
