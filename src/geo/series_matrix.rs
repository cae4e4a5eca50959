//! GEO series matrix files: `!Sample_` header lines plus a probe table

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::Array2;

use crate::data::{ExpressionMatrix, SampleMetadata};
use crate::error::{DgeError, Result};

const TABLE_BEGIN: &str = "!series_matrix_table_begin";
const TABLE_END: &str = "!series_matrix_table_end";

/// One platform's worth of a GEO series
#[derive(Debug, Clone)]
pub struct SeriesMatrix {
    pub series_id: Option<String>,
    pub platform_id: String,
    /// Samples keyed by GSM accession, one column per `!Sample_` field
    pub metadata: SampleMetadata,
    /// Probes x samples, columns named as in the table header
    pub expression: ExpressionMatrix,
}

fn split_fields(line: &str) -> Vec<String> {
    line.split('\t')
        .map(|f| f.trim().trim_matches('"').to_string())
        .collect()
}

fn parse_value(raw: &str) -> Result<f64> {
    match raw {
        "" | "null" | "NULL" | "NA" | "NaN" | "nan" => Ok(f64::NAN),
        _ => raw.parse::<f64>().map_err(|_| DgeError::GeoFormat {
            reason: format!("non-numeric expression value '{}'", raw),
        }),
    }
}

/// Column names for `!Sample_<key>` fields: repeats get `.1`, `.2`
/// suffixes, and `characteristics_chN` entries written as `key: value`
/// also give a `<key>:chN` column.
fn sample_columns(fields: Vec<(String, Vec<String>)>) -> Vec<(String, Vec<String>)> {
    let mut columns: Vec<(String, Vec<String>)> = Vec::new();
    let mut derived: Vec<(String, Vec<String>)> = Vec::new();
    for (key, values) in fields {
        let repeats = columns
            .iter()
            .filter(|(n, _)| n == &key || n.starts_with(&format!("{}.", key)))
            .count();
        let name = if repeats == 0 { key.clone() } else { format!("{}.{}", key, repeats) };

        if let Some(channel) = key.strip_prefix("characteristics_") {
            let label = values
                .iter()
                .find_map(|v| v.split_once(':').map(|(k, _)| k.trim().to_string()))
                .filter(|k| !k.is_empty());
            if let Some(label) = label {
                let column = format!("{}:{}", label, channel);
                let parsed: Vec<String> = values
                    .iter()
                    .map(|v| match v.split_once(':') {
                        Some((k, val)) if k.trim() == label => val.trim().to_string(),
                        _ => String::new(),
                    })
                    .collect();
                if !derived.iter().any(|(n, _)| *n == column) {
                    derived.push((column, parsed));
                }
            }
        }
        columns.push((name, values));
    }
    columns.extend(derived);
    columns
}

/// Parse a series matrix from any reader
pub fn parse_series_matrix<R: BufRead>(reader: R) -> Result<SeriesMatrix> {
    let mut series_id = None;
    let mut platform_id = None;
    let mut fields: Vec<(String, Vec<String>)> = Vec::new();
    let mut header: Option<Vec<String>> = None;
    let mut ids: Vec<String> = Vec::new();
    let mut values: Vec<f64> = Vec::new();
    let mut in_table = false;
    let mut table_closed = false;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if in_table {
            if line.starts_with(TABLE_END) {
                in_table = false;
                table_closed = true;
                continue;
            }
            let row = split_fields(line);
            match &header {
                None => header = Some(row),
                Some(h) => {
                    if row.len() != h.len() {
                        return Err(DgeError::GeoFormat {
                            reason: format!(
                                "probe '{}' has {} fields, header has {}",
                                row.first().map(String::as_str).unwrap_or(""),
                                row.len(),
                                h.len()
                            ),
                        });
                    }
                    ids.push(row[0].clone());
                    for raw in &row[1..] {
                        values.push(parse_value(raw)?);
                    }
                }
            }
            continue;
        }
        if line.starts_with(TABLE_BEGIN) {
            in_table = true;
        } else if let Some(rest) = line.strip_prefix("!Sample_") {
            let mut parts = split_fields(rest);
            let key = parts.remove(0);
            fields.push((key, parts));
        } else if let Some(rest) = line.strip_prefix("!Series_geo_accession") {
            series_id = split_fields(rest).into_iter().find(|s| !s.is_empty());
        } else if let Some(rest) = line.strip_prefix("!Series_platform_id") {
            platform_id = split_fields(rest).into_iter().find(|s| !s.is_empty());
        }
    }

    let header = header.ok_or_else(|| DgeError::GeoFormat {
        reason: "no expression table found".to_string(),
    })?;
    if !table_closed {
        log::warn!("Series matrix table is not terminated by {}", TABLE_END);
    }
    let sample_ids: Vec<String> = header[1..].to_vec();
    let n_samples = sample_ids.len();
    let values = Array2::from_shape_vec((ids.len(), n_samples), values).map_err(|e| DgeError::GeoFormat {
        reason: e.to_string(),
    })?;
    let expression = ExpressionMatrix::new(values, ids, sample_ids)?;

    let accessions = fields
        .iter()
        .find(|(k, _)| k == "geo_accession")
        .map(|(_, v)| v.clone())
        .ok_or_else(|| DgeError::GeoFormat {
            reason: "missing !Sample_geo_accession line".to_string(),
        })?;
    let mut metadata = SampleMetadata::new(accessions);
    for (name, column) in sample_columns(fields) {
        if column.len() != metadata.n_samples() {
            log::warn!("Skipping sample field '{}' with {} values", name, column.len());
            continue;
        }
        metadata.add_condition(&name, column)?;
    }

    let platform_id = platform_id.ok_or_else(|| DgeError::GeoFormat {
        reason: "missing !Series_platform_id line".to_string(),
    })?;
    log::debug!(
        "Parsed series matrix: platform {}, {} probes x {} samples, {} metadata columns",
        platform_id,
        expression.n_features(),
        expression.n_samples(),
        metadata.column_names().len()
    );
    Ok(SeriesMatrix {
        series_id,
        platform_id,
        metadata,
        expression,
    })
}

/// Read a series matrix file, gunzipping `.gz` files
pub fn read_series_matrix<P: AsRef<Path>>(path: P) -> Result<SeriesMatrix> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader: Box<dyn Read> = if path.extension().map_or(false, |e| e == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    parse_series_matrix(BufReader::new(reader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const SAMPLE: &str = "!Series_title\t\"Test series\"
!Series_geo_accession\t\"GSE1000\"
!Series_platform_id\t\"GPL570\"
!Sample_title\t\"ctrl rep1\"\t\"ctrl rep2\"\t\"tumor rep1\"
!Sample_geo_accession\t\"GSM1\"\t\"GSM2\"\t\"GSM3\"
!Sample_characteristics_ch1\t\"tissue: normal\"\t\"tissue: normal\"\t\"tissue: tumor\"
!Sample_characteristics_ch1\t\"age: 40\"\t\"age: 52\"\t\"age: 61\"
!series_matrix_table_begin
\"ID_REF\"\t\"GSM1\"\t\"GSM2\"\t\"GSM3\"
\"1007_s_at\"\t100.5\t120\t80
\"1053_at\"\tnull\t15.2\t30
!series_matrix_table_end
";

    #[test]
    fn test_parse_series_matrix() {
        let sm = parse_series_matrix(SAMPLE.as_bytes()).unwrap();
        assert_eq!(sm.platform_id, "GPL570");
        assert_eq!(sm.series_id.as_deref(), Some("GSE1000"));
        assert_eq!(sm.expression.feature_ids(), &["1007_s_at".to_string(), "1053_at".to_string()]);
        assert_eq!(sm.expression.sample_ids(), sm.metadata.sample_ids());
        assert!(sm.expression.values()[[1, 0]].is_nan());
        assert_eq!(sm.expression.values()[[0, 1]], 120.0);

        let meta = &sm.metadata;
        assert_eq!(meta.condition("title").unwrap()[2], "tumor rep1");
        assert_eq!(meta.condition("characteristics_ch1").unwrap()[0], "tissue: normal");
        assert_eq!(meta.condition("characteristics_ch1.1").unwrap()[1], "age: 52");
        assert_eq!(meta.condition("tissue:ch1").unwrap(), &["normal", "normal", "tumor"]);
        assert_eq!(meta.condition("age:ch1").unwrap()[2], "61");
    }

    #[test]
    fn test_read_gzipped_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GSE1000_series_matrix.txt.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(SAMPLE.as_bytes()).unwrap();
        enc.finish().unwrap();
        let sm = read_series_matrix(&path).unwrap();
        assert_eq!(sm.expression.n_features(), 2);
    }

    #[test]
    fn test_missing_table_and_bad_values() {
        assert!(parse_series_matrix("!Series_platform_id\t\"GPL1\"\n".as_bytes()).is_err());
        let bad = SAMPLE.replace("15.2", "high");
        assert!(matches!(parse_series_matrix(bad.as_bytes()), Err(DgeError::GeoFormat { .. })));
    }
}
