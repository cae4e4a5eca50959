//! Count matrix comparison: negative binomial testing, filtering, ID
//! mapping and export

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::annotation::{enrichment_sheet, over_representation, read_gmt, GeneIdMap, IdMapping};
use crate::config::CountsConfig;
use crate::data::{CountDataSet, CountMatrix, SampleMetadata};
use crate::error::Result;
use crate::filter::{split_significant, RegulationSplit};
use crate::io::{read_count_table, write_xlsx, Contrast, DESeqResults, Sheet};
use crate::remote::RemoteClient;
use crate::testing::results;
use crate::{run_deseq, DeseqParams};

/// Tables produced by [`run_counts_pipeline`] and the files written
#[derive(Debug)]
pub struct CountsOutputs {
    pub results: DESeqResults,
    pub split: RegulationSplit,
    pub entrez_up: IdMapping,
    pub entrez_down: IdMapping,
    pub files: Vec<PathBuf>,
}

/// Row names as read, so that renamed duplicates (`TP53_1`) still map
struct SourceSymbols<'a> {
    by_id: HashMap<&'a str, &'a str>,
}

impl<'a> SourceSymbols<'a> {
    fn new(counts: &'a CountMatrix) -> Self {
        let by_id = counts
            .gene_ids()
            .iter()
            .zip(counts.source_gene_ids())
            .map(|(id, source)| (id.as_str(), source.as_str()))
            .collect();
        Self { by_id }
    }

    fn of(&self, ids: &[String]) -> Vec<String> {
        ids.iter()
            .map(|id| self.by_id.get(id.as_str()).map_or_else(|| id.clone(), |s| s.to_string()))
            .collect()
    }
}

fn export(sheet: &Sheet, dir: &Path, file_name: &str, files: &mut Vec<PathBuf>) -> Result<()> {
    let path = dir.join(file_name);
    write_xlsx(sheet, &path)?;
    log::info!("Wrote {} ({} rows)", path.display(), sheet.n_rows());
    files.push(path);
    Ok(())
}

/// The gene_info table from the configured path, or downloaded to the cache
fn load_gene_map(config: &CountsConfig) -> Result<GeneIdMap> {
    match &config.gene_info {
        Some(path) => GeneIdMap::from_gene_info(path),
        None => {
            let remote = RemoteClient::new(&config.cache_dir)?;
            let file_name = config
                .gene_info_url
                .rsplit('/')
                .next()
                .filter(|n| !n.is_empty())
                .unwrap_or("gene_info.gz");
            GeneIdMap::from_gene_info(remote.download(&config.gene_info_url, file_name)?)
        }
    }
}

pub fn run_counts_pipeline(config: &CountsConfig) -> Result<CountsOutputs> {
    config.validate()?;
    let counts = read_count_table(&config.input, config.round_counts)?;
    let metadata = SampleMetadata::from_group_sizes(counts.sample_ids(), &config.condition_column, &config.groups)?;
    if let Some(groups) = metadata.condition(&config.condition_column) {
        for (sample, group) in metadata.sample_ids().iter().zip(groups) {
            log::debug!("Sample {} -> {}", sample, group);
        }
    }
    log::info!(
        "Groups: {}",
        config
            .groups
            .iter()
            .map(|g| format!("{} ({})", g.name, g.size))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut dds = CountDataSet::new(counts, metadata, &config.condition_column, &config.reference)?;
    let params = DeseqParams {
        size_factor_method: config.size_factor_method,
        dispersion: config.dispersion.clone(),
        glm: config.glm.clone(),
        min_replicates_for_replace: config.min_replicates_for_replace,
    };
    run_deseq(&mut dds, &params)?;

    let contrast = Contrast::new(&config.condition_column, &config.comparison, &config.reference);
    let res = results(&dds, &contrast, &config.results)?;
    log::info!("{}", res.summary(config.padj_cutoff));

    fs::create_dir_all(&config.output_dir)?;
    let dir = config.output_dir.as_path();
    let tag = &config.comparison;
    let mut files = Vec::new();

    let ordered = res.order_by_padj();
    export(&ordered.to_sheet("DEGS"), dir, &format!("DEGS_atl_{}.xlsx", tag), &mut files)?;

    let split = split_significant(&res, config.padj_cutoff, config.lfc_threshold);
    export(&split.significant.to_sheet("significant"), dir, &format!("significant_ATL_{}.xlsx", tag), &mut files)?;
    export(&split.up.to_sheet("up"), dir, &format!("transcripts_up_{}.xlsx", tag), &mut files)?;
    export(&split.down.to_sheet("down"), dir, &format!("transcripts_down_{}.xlsx", tag), &mut files)?;

    let gene_map = load_gene_map(config)?;
    let symbols = SourceSymbols::new(dds.counts());
    let entrez_up = gene_map.map_symbols(&symbols.of(&split.up.gene_ids), config.use_synonyms);
    let entrez_down = gene_map.map_symbols(&symbols.of(&split.down.gene_ids), config.use_synonyms);
    export(&entrez_up.to_sheet("entrez_up"), dir, "entrez_up.xlsx", &mut files)?;
    export(&entrez_down.to_sheet("entrez_down"), dir, "entrez_down.xlsx", &mut files)?;

    if let Some(gmt) = &config.gene_sets {
        let sets = read_gmt(gmt)?;
        let tested: Vec<String> = res
            .gene_ids
            .iter()
            .zip(&res.pvalues)
            .filter(|(_, p)| p.is_finite())
            .map(|(id, _)| id.clone())
            .collect();
        let universe_map = gene_map.map_symbols(&symbols.of(&tested), config.use_synonyms);
        let universe = universe_map.mapped_ids();
        for (label, mapping) in [("up", &entrez_up), ("down", &entrez_down)] {
            let enriched = over_representation(&mapping.mapped_ids(), &universe, &sets, &config.enrichment)?;
            export(
                &enrichment_sheet(&format!("enrichment_{}", label), &enriched),
                dir,
                &format!("enrichment_{}.xlsx", label),
                &mut files,
            )?;
        }
    }

    Ok(CountsOutputs {
        results: res,
        split,
        entrez_up,
        entrez_down,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::read_xlsx;
    use std::io::Write;

    /// 15 samples (12 career, 3 normal) with a handful of strongly shifted genes
    fn write_counts(path: &Path) {
        let mut f = fs::File::create(path).unwrap();
        let header: Vec<String> = (1..=15).map(|j| format!("S{}", j)).collect();
        writeln!(f, "gene,{}", header.join(",")).unwrap();
        for i in 0..120 {
            let base = 20.0 + (i % 17) as f64 * 15.0;
            let row: Vec<String> = (0..15)
                .map(|j| {
                    let depth = 0.8 + 0.05 * (j % 5) as f64;
                    let wiggle = 1.0 + 0.08 * (((i * 7 + j * 3) % 5) as f64 - 2.0);
                    let effect = match (i, j < 12) {
                        (0..=5, true) => 6.0,
                        (6..=11, true) => 0.15,
                        _ => 1.0,
                    };
                    format!("{}", (base * depth * wiggle * effect).round())
                })
                .collect();
            let name = match i {
                0 => "TP53".to_string(),
                6 => "A1BG".to_string(),
                _ => format!("GENE{}", i),
            };
            writeln!(f, "{},{}", name, row.join(",")).unwrap();
        }
    }

    #[test]
    fn test_end_to_end_fifteen_samples() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("counts.csv");
        write_counts(&input);
        let gene_info = dir.path().join("gene_info.tsv");
        fs::write(
            &gene_info,
            "#tax_id\tGeneID\tSymbol\tLocusTag\tSynonyms\n9606\t7157\tTP53\t-\t-\n9606\t1\tA1BG\t-\t-\n",
        )
        .unwrap();
        let gmt = dir.path().join("sets.gmt");
        fs::write(&gmt, "SET\tdesc\t7157\t1\n").unwrap();

        let config = CountsConfig {
            input,
            output_dir: dir.path().join("DEG_results"),
            gene_info: Some(gene_info),
            gene_sets: Some(gmt),
            ..CountsConfig::default()
        };
        let out = run_counts_pipeline(&config).unwrap();

        let degs = read_xlsx(config.output_dir.join("DEGS_atl_career.xlsx")).unwrap();
        assert_eq!(degs.n_rows(), 120);
        let n_sig = out.results.padj.iter().filter(|&&p| p < 0.05).count();
        assert_eq!(out.split.significant.n_genes(), n_sig);
        assert!(out.split.up.n_genes() + out.split.down.n_genes() <= n_sig);
        assert!(out.split.up.log2_fold_changes.iter().all(|&l| l > 1.0));
        assert!(out.split.down.log2_fold_changes.iter().all(|&l| l < -1.0));
        assert!(out.split.up.gene_ids.contains(&"TP53".to_string()));
        assert!(out.split.down.gene_ids.contains(&"A1BG".to_string()));

        for (name, rows) in [
            ("significant_ATL_career.xlsx", out.split.significant.n_genes()),
            ("transcripts_up_career.xlsx", out.split.up.n_genes()),
            ("transcripts_down_career.xlsx", out.split.down.n_genes()),
            ("entrez_up.xlsx", out.entrez_up.len()),
            ("entrez_down.xlsx", out.entrez_down.len()),
        ] {
            assert_eq!(read_xlsx(config.output_dir.join(name)).unwrap().n_rows(), rows, "{}", name);
        }
        assert_eq!(out.entrez_up.len(), out.split.up.n_genes());
        assert!(out.entrez_up.entrez.contains(&Some("7157".to_string())));
        assert!(config.output_dir.join("enrichment_up.xlsx").exists());
        assert_eq!(out.files.len(), 8);
    }

    #[test]
    fn test_group_sizes_must_cover_samples() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("counts.csv");
        fs::write(&input, "gene,a,b,c\nG1,1,2,3\nG2,4,5,6\n").unwrap();
        let config = CountsConfig {
            input,
            output_dir: dir.path().join("out"),
            ..CountsConfig::default()
        };
        assert!(run_counts_pipeline(&config).is_err());
        assert!(!config.output_dir.exists());
    }

    #[test]
    fn test_renamed_duplicates_map_by_source_symbol() {
        let counts = CountMatrix::new(
            ndarray::array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]],
            vec!["TP53".to_string(), "TP53".to_string(), "NOVEL1".to_string()],
            vec!["a".to_string(), "b".to_string()],
        )
        .unwrap();
        let symbols = SourceSymbols::new(&counts);
        let ids = vec!["TP53_1".to_string(), "TP53".to_string(), "NOVEL1".to_string(), "OTHER".to_string()];
        assert_eq!(symbols.of(&ids), vec!["TP53", "TP53", "NOVEL1", "OTHER"]);

        let map = GeneIdMap::from_reader("#tax_id\tGeneID\tSymbol\tLocusTag\tSynonyms\n9606\t7157\tTP53\t-\t-\n".as_bytes()).unwrap();
        let mapping = map.map_symbols(&symbols.of(&ids[..2]), false);
        assert_eq!(mapping.entrez, vec![Some("7157".to_string()), Some("7157".to_string())]);
    }
}
