//! GEO platform (GPL) annotation tables in SOFT text form

use std::collections::HashMap;
use std::io::BufRead;

use crate::error::{DgeError, Result};

const TABLE_BEGIN: &str = "!platform_table_begin";
const TABLE_END: &str = "!platform_table_end";

/// Probe annotation table. The first column is the probe ID.
#[derive(Debug, Clone)]
pub struct PlatformTable {
    pub platform_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl PlatformTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Probe ID to the value of column `name`; empty values are skipped
    pub fn column_map(&self, name: &str) -> Option<HashMap<String, String>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .filter_map(|row| {
                    let value = row.get(idx)?;
                    (!value.is_empty()).then(|| (row[0].clone(), value.clone()))
                })
                .collect(),
        )
    }
}

/// Parse the data section of a SOFT platform record
pub fn parse_platform_soft<R: BufRead>(reader: R, platform_id: &str) -> Result<PlatformTable> {
    let mut columns: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    let mut in_table = false;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if !in_table {
            in_table = line.starts_with(TABLE_BEGIN);
            continue;
        }
        if line.starts_with(TABLE_END) {
            break;
        }
        let fields: Vec<String> = line.split('\t').map(|f| f.trim().to_string()).collect();
        match &columns {
            None => columns = Some(fields),
            Some(c) => {
                let mut row = fields;
                row.resize(c.len(), String::new());
                rows.push(row);
            }
        }
    }

    let columns = columns.ok_or_else(|| DgeError::GeoFormat {
        reason: format!("no annotation table in platform record {}", platform_id),
    })?;
    log::debug!("Platform {}: {} probes, columns {:?}", platform_id, rows.len(), columns);
    Ok(PlatformTable {
        platform_id: platform_id.to_string(),
        columns,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOFT: &str = "^PLATFORM = GPL570
!Platform_title = [HG-U133_Plus_2]
!platform_table_begin
ID\tGB_ACC\tGene Symbol\tENTREZ_GENE_ID
1007_s_at\tU48705\tDDR1 /// MIR4640\t780 /// 100616237
1053_at\tM87338\tRFC2\t5982
AFFX-1\t\t\t
!platform_table_end
";

    #[test]
    fn test_parse_platform() {
        let table = parse_platform_soft(SOFT.as_bytes(), "GPL570").unwrap();
        assert_eq!(table.columns[2], "Gene Symbol");
        assert_eq!(table.rows.len(), 3);
        let symbols = table.column_map("Gene Symbol").unwrap();
        assert_eq!(symbols["1053_at"], "RFC2");
        assert!(!symbols.contains_key("AFFX-1"));
        assert!(table.column_map("missing").is_none());
    }

    #[test]
    fn test_no_table() {
        assert!(parse_platform_soft("^PLATFORM = GPL1\n".as_bytes(), "GPL1").is_err());
    }
}
