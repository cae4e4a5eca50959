//! Gene symbol to Entrez Gene ID mapping from NCBI `gene_info` tables

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use serde::Deserialize;

use crate::error::{DgeError, Result};
use crate::io::{Cell, Sheet};

/// Human gene_info table on the NCBI FTP site
pub const HUMAN_GENE_INFO_URL: &str =
    "https://ftp.ncbi.nlm.nih.gov/gene/DATA/GENE_INFO/Mammalia/Homo_sapiens.gene_info.gz";

/// The gene_info columns used for mapping
#[derive(Debug, Deserialize)]
struct GeneInfoRecord {
    #[serde(rename = "GeneID")]
    gene_id: String,
    #[serde(rename = "Symbol")]
    symbol: String,
    #[serde(rename = "Synonyms")]
    synonyms: String,
}

/// Symbol and synonym lookups built from a gene_info table
#[derive(Debug, Clone, Default)]
pub struct GeneIdMap {
    by_symbol: HashMap<String, String>,
    by_synonym: HashMap<String, String>,
}

impl GeneIdMap {
    /// Read a gene_info table (tab separated, `#tax_id` header), gzipped
    /// when the file name ends in `.gz`
    pub fn from_gene_info<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader: Box<dyn Read> = if path.extension().map_or(false, |e| e == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        let map = Self::from_reader(reader)?;
        log::info!(
            "Loaded {} gene symbols from {}",
            map.by_symbol.len(),
            path.display()
        );
        Ok(map)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .quoting(false)
            .from_reader(reader);
        let headers = rdr.headers()?.clone();
        for required in ["GeneID", "Symbol", "Synonyms"] {
            if !headers.iter().any(|h| h == required) {
                return Err(DgeError::Annotation {
                    reason: format!("gene_info table lacks a '{}' column", required),
                });
            }
        }

        let mut map = Self::default();
        let mut duplicates = 0usize;
        for record in rdr.deserialize() {
            let record: GeneInfoRecord = record?;
            if map.by_symbol.contains_key(&record.symbol) {
                duplicates += 1;
                log::debug!("Symbol {} maps to several GeneIDs; keeping the first", record.symbol);
            } else {
                map.by_symbol.insert(record.symbol.clone(), record.gene_id.clone());
            }
            for synonym in record.synonyms.split('|').filter(|s| !s.is_empty() && *s != "-") {
                map.by_synonym
                    .entry(synonym.to_string())
                    .or_insert_with(|| record.gene_id.clone());
            }
        }
        if duplicates > 0 {
            log::warn!("{} symbols map to more than one GeneID; the first was kept", duplicates);
        }
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    pub fn lookup(&self, symbol: &str, use_synonyms: bool) -> Option<&str> {
        self.by_symbol
            .get(symbol)
            .or_else(|| if use_synonyms { self.by_synonym.get(symbol) } else { None })
            .map(String::as_str)
    }

    /// Map every symbol; the output has one entry per input, `None` when
    /// the symbol is unknown
    pub fn map_symbols(&self, symbols: &[String], use_synonyms: bool) -> IdMapping {
        let entrez: Vec<Option<String>> = symbols
            .iter()
            .map(|s| self.lookup(s, use_synonyms).map(str::to_string))
            .collect();
        let mapping = IdMapping {
            symbols: symbols.to_vec(),
            entrez,
        };
        log::info!(
            "Mapped {} of {} symbols to Entrez IDs",
            mapping.mapped_count(),
            mapping.len()
        );
        mapping
    }
}

/// Input symbols paired with their Entrez IDs, in input order
#[derive(Debug, Clone, PartialEq)]
pub struct IdMapping {
    pub symbols: Vec<String>,
    pub entrez: Vec<Option<String>>,
}

impl IdMapping {
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn mapped_count(&self) -> usize {
        self.entrez.iter().filter(|e| e.is_some()).count()
    }

    /// Mapped IDs only, in input order
    pub fn mapped_ids(&self) -> Vec<&str> {
        self.entrez.iter().flatten().map(String::as_str).collect()
    }

    /// Two columns, symbol and ENTREZID; unmapped IDs are empty cells
    pub fn to_sheet(&self, name: &str) -> Sheet {
        Sheet {
            name: name.to_string(),
            header: vec!["SYMBOL".to_string(), "ENTREZID".to_string()],
            rows: self
                .symbols
                .iter()
                .zip(&self.entrez)
                .map(|(s, e)| vec![Cell::text(s.as_str()), Cell::from(e.clone())])
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const GENE_INFO: &str = "#tax_id\tGeneID\tSymbol\tLocusTag\tSynonyms\tdbXrefs
9606\t7157\tTP53\t-\tBCC7|LFS1|P53\tMIM:191170
9606\t1\tA1BG\t-\tA1B|ABG|GAB\t-
9606\t9999\tTP53\t-\t-\t-
";

    #[test]
    fn test_mapping_keeps_length_and_first_id() {
        let map = GeneIdMap::from_reader(GENE_INFO.as_bytes()).unwrap();
        assert_eq!(map.len(), 2);
        let symbols: Vec<String> = ["TP53", "NOPE", "P53", "A1BG"].iter().map(|s| s.to_string()).collect();

        let plain = map.map_symbols(&symbols, false);
        assert_eq!(plain.len(), 4);
        assert_eq!(plain.entrez, vec![Some("7157".into()), None, None, Some("1".into())]);
        assert_eq!(plain.mapped_count(), 2);
        assert_eq!(plain.mapped_ids(), vec!["7157", "1"]);

        let with_syn = map.map_symbols(&symbols, true);
        assert_eq!(with_syn.entrez[2].as_deref(), Some("7157"));
    }

    #[test]
    fn test_gzipped_file_and_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Homo_sapiens.gene_info.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(GENE_INFO.as_bytes()).unwrap();
        enc.finish().unwrap();

        let map = GeneIdMap::from_gene_info(&path).unwrap();
        let mapping = map.map_symbols(&["A1BG".to_string(), "XYZ".to_string()], false);
        let sheet = mapping.to_sheet("entrez_up");
        assert_eq!(sheet.n_rows(), 2);
        assert_eq!(sheet.rows[1][1], Cell::Empty);
    }

    #[test]
    fn test_missing_columns() {
        assert!(GeneIdMap::from_reader("#tax_id\tGeneID\n9606\t1\n".as_bytes()).is_err());
    }
}
