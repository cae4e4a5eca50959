//! Hypergeometric over-representation of gene lists in GMT gene sets

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use statrs::distribution::{DiscreteCDF, Hypergeometric};

use crate::error::{DgeError, Result};
use crate::io::{Cell, Sheet};
use crate::testing::benjamini_hochberg;

#[derive(Debug, Clone, PartialEq)]
pub struct GeneSet {
    pub name: String,
    pub description: String,
    pub genes: Vec<String>,
}

/// Read a GMT file: name, description, then member genes, tab separated
pub fn read_gmt<P: AsRef<Path>>(path: P) -> Result<Vec<GeneSet>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let mut sets = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(name), Some(description)) = (fields.next(), fields.next()) else {
            return Err(DgeError::Annotation {
                reason: format!("{}:{}: expected name and description", path.display(), lineno + 1),
            });
        };
        let mut seen = HashSet::new();
        let genes: Vec<String> = fields
            .map(str::trim)
            .filter(|g| !g.is_empty() && seen.insert(*g))
            .map(str::to_string)
            .collect();
        sets.push(GeneSet {
            name: name.to_string(),
            description: description.to_string(),
            genes,
        });
    }
    log::info!("Read {} gene sets from {}", sets.len(), path.display());
    Ok(sets)
}

/// Size bounds on gene sets after restriction to the universe
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentParams {
    pub min_set_size: usize,
    pub max_set_size: usize,
}

impl Default for EnrichmentParams {
    fn default() -> Self {
        Self {
            min_set_size: 10,
            max_set_size: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentResult {
    pub set_name: String,
    pub description: String,
    /// Members of the set present in the universe
    pub set_size: usize,
    pub query_size: usize,
    pub overlap: usize,
    /// Observed over expected overlap
    pub fold_enrichment: f64,
    pub pvalue: f64,
    pub padj: f64,
    pub genes: Vec<String>,
}

/// Test each gene set for more overlap with `query` than expected when
/// drawing `query.len()` genes from `universe`. p = P(X >= k). Results are
/// BH adjusted across the tested sets and sorted by p-value.
pub fn over_representation(
    query: &[&str],
    universe: &[&str],
    sets: &[GeneSet],
    params: &EnrichmentParams,
) -> Result<Vec<EnrichmentResult>> {
    let universe: HashSet<&str> = universe.iter().copied().collect();
    let query: HashSet<&str> = query.iter().copied().filter(|g| universe.contains(g)).collect();
    let population = universe.len() as u64;
    let draws = query.len() as u64;
    if draws == 0 {
        return Ok(Vec::new());
    }

    let mut results = Vec::new();
    for set in sets {
        let members: Vec<&str> = set
            .genes
            .iter()
            .map(String::as_str)
            .filter(|g| universe.contains(g))
            .collect();
        if members.len() < params.min_set_size || members.len() > params.max_set_size {
            continue;
        }
        let hits: Vec<String> = members
            .iter()
            .filter(|g| query.contains(*g))
            .map(|g| g.to_string())
            .collect();
        let k = hits.len() as u64;
        let successes = members.len() as u64;
        let dist = Hypergeometric::new(population, successes, draws).map_err(|e| DgeError::Annotation {
            reason: format!("hypergeometric test for {}: {}", set.name, e),
        })?;
        let pvalue = if k == 0 { 1.0 } else { dist.sf(k - 1) };
        let expected = successes as f64 * draws as f64 / population as f64;
        results.push(EnrichmentResult {
            set_name: set.name.clone(),
            description: set.description.clone(),
            set_size: members.len(),
            query_size: query.len(),
            overlap: hits.len(),
            fold_enrichment: k as f64 / expected,
            pvalue,
            padj: f64::NAN,
            genes: hits,
        });
    }

    let padj = benjamini_hochberg(&results.iter().map(|r| r.pvalue).collect::<Vec<_>>());
    for (r, p) in results.iter_mut().zip(padj) {
        r.padj = p;
    }
    results.sort_by(|a, b| a.pvalue.total_cmp(&b.pvalue));
    log::info!(
        "Tested {} of {} gene sets; {} with padj < 0.05",
        results.len(),
        sets.len(),
        results.iter().filter(|r| r.padj < 0.05).count()
    );
    Ok(results)
}

pub fn enrichment_sheet(name: &str, results: &[EnrichmentResult]) -> Sheet {
    let header = ["ID", "Description", "SetSize", "QuerySize", "Count", "FoldEnrichment", "pvalue", "p.adjust", "geneID"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let rows = results
        .iter()
        .map(|r| {
            vec![
                Cell::text(r.set_name.as_str()),
                Cell::text(r.description.as_str()),
                Cell::Number(r.set_size as f64),
                Cell::Number(r.query_size as f64),
                Cell::Number(r.overlap as f64),
                Cell::Number(r.fold_enrichment),
                Cell::Number(r.pvalue),
                Cell::Number(r.padj),
                Cell::text(r.genes.join("/")),
            ]
        })
        .collect();
    Sheet {
        name: name.to_string(),
        header,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| i.to_string()).collect()
    }

    #[test]
    fn test_read_gmt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sets.gmt");
        fs::write(&path, "SET_A\tdesc a\t1\t2\t2\t3\n\nSET_B\thttp://x\t4\n").unwrap();
        let sets = read_gmt(&path).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].genes, vec!["1", "2", "3"]);

        fs::write(&path, "ONLY_NAME\n").unwrap();
        assert!(read_gmt(&path).is_err());
    }

    #[test]
    fn test_enriched_set_ranks_first() {
        let universe = ids(0..1000);
        let universe_refs: Vec<&str> = universe.iter().map(String::as_str).collect();
        let sets = vec![
            GeneSet { name: "HIT".into(), description: String::new(), genes: ids(0..20) },
            GeneSet { name: "MISS".into(), description: String::new(), genes: ids(500..540) },
            GeneSet { name: "TINY".into(), description: String::new(), genes: ids(0..5) },
        ];
        let query: Vec<&str> = universe_refs[..15].iter().chain(&universe_refs[900..915]).copied().collect();

        let results = over_representation(&query, &universe_refs, &sets, &EnrichmentParams::default()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].set_name, "HIT");
        assert_eq!(results[0].overlap, 15);
        assert!(results[0].pvalue < 1e-10);
        assert_eq!(results[1].overlap, 0);
        assert_eq!(results[1].pvalue, 1.0);
        assert!(results[0].padj >= results[0].pvalue);

        let sheet = enrichment_sheet("up", &results);
        assert_eq!(sheet.n_rows(), 2);
    }
}
