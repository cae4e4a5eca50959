//! GEO microarray comparison: log2 intensities, linear model, one
//! contrast, empirical Bayes and export

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;

use crate::config::MicroarrayConfig;
use crate::data::{ExpressionMatrix, SampleMetadata};
use crate::error::{DgeError, Result};
use crate::geo::{GeoClient, PlatformTable, SeriesMatrix};
use crate::glm::group_means_design;
use crate::io::{matrix_to_sheet, write_xlsx, Cell, Sheet};
use crate::limma::{contrasts_fit, ebayes, lm_fit, make_contrast, top_table, TopTable};
use crate::normalization::log2_fill;
use crate::remote::RemoteClient;
use crate::stats::{column_correlation, mean, sample_variance};

/// Tables produced by the microarray pipeline and the files written
#[derive(Debug)]
pub struct MicroarrayOutputs {
    pub expression: ExpressionMatrix,
    pub metadata: SampleMetadata,
    pub correlation: Array2<f64>,
    pub contrast: String,
    pub table: TopTable,
    pub files: Vec<PathBuf>,
}

/// Keep file names portable whatever the contrast expression contains
fn file_component(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || "-_.".contains(c) { c } else { '_' })
        .collect()
}

fn export(sheet: &Sheet, dir: &Path, file_name: &str, files: &mut Vec<PathBuf>) -> Result<()> {
    let path = dir.join(file_name);
    write_xlsx(sheet, &path)?;
    log::info!("Wrote {} ({} rows)", path.display(), sheet.n_rows());
    files.push(path);
    Ok(())
}

/// Log the weakest sample pair and samples whose mean correlation with
/// the others lies more than two SDs below the average
fn report_correlation(correlation: &Array2<f64>, sample_ids: &[String]) {
    let n = sample_ids.len();
    if n < 2 {
        return;
    }
    let mut weakest = (f64::INFINITY, 0, 0);
    for i in 0..n {
        for j in (i + 1)..n {
            let r = correlation[[i, j]];
            if r < weakest.0 {
                weakest = (r, i, j);
            }
        }
    }
    if weakest.0.is_finite() {
        log::info!(
            "Lowest sample correlation {:.4} ({} vs {})",
            weakest.0,
            sample_ids[weakest.1],
            sample_ids[weakest.2]
        );
    }

    let mean_cor: Vec<f64> = (0..n)
        .map(|i| mean(&(0..n).filter(|&j| j != i).map(|j| correlation[[i, j]]).collect::<Vec<_>>()))
        .collect();
    let center = mean(&mean_cor);
    let sd = sample_variance(&mean_cor).sqrt();
    if sd.is_finite() {
        for (id, &c) in sample_ids.iter().zip(&mean_cor) {
            if c < center - 2.0 * sd {
                log::warn!("Sample {} has low mean correlation {:.4} (average {:.4})", id, c, center);
            }
        }
    }
}

/// Probe ID to value for each configured annotation column present on the platform
fn annotation_columns(platform: Option<&PlatformTable>, columns: &[String]) -> Vec<(String, HashMap<String, String>)> {
    let Some(platform) = platform else {
        return Vec::new();
    };
    columns
        .iter()
        .filter_map(|name| match platform.column_map(name) {
            Some(map) => Some((name.clone(), map)),
            None => {
                log::warn!("Platform {} has no '{}' column; skipped", platform.platform_id, name);
                None
            }
        })
        .collect()
}

/// Download the series (first platform) and its annotation, then run the analysis
pub fn run_microarray_pipeline(config: &MicroarrayConfig) -> Result<MicroarrayOutputs> {
    config.validate()?;
    let geo = GeoClient::new(RemoteClient::new(&config.cache_dir)?);
    let series = geo.fetch_first_platform(&config.accession)?;
    let platform = if config.annotate {
        Some(geo.fetch_platform(&series.platform_id)?)
    } else {
        None
    };
    run_microarray_from_series(config, series, platform.as_ref())
}

/// The analysis on an already parsed series matrix
pub fn run_microarray_from_series(
    config: &MicroarrayConfig,
    series: SeriesMatrix,
    platform: Option<&PlatformTable>,
) -> Result<MicroarrayOutputs> {
    let id = &config.accession;
    series.metadata.check_alignment(series.expression.sample_ids())?;

    let logged = log2_fill(&series.expression, config.log_transform, config.fill_value)?;
    let expression = logged.matrix;
    let metadata = series.metadata.select_column(&config.group_column, &config.group_label)?;
    let groups = metadata
        .condition(&config.group_label)
        .ok_or_else(|| DgeError::InvalidMetadata {
            reason: format!("column '{}' missing after selection", config.group_label),
        })?
        .to_vec();

    fs::create_dir_all(&config.output_dir)?;
    let dir = config.output_dir.as_path();
    let mut files = Vec::new();

    let mut meta_sheet = Sheet::new("metadata", vec!["sample".to_string(), config.group_label.clone()]);
    for (sample, group) in metadata.sample_ids().iter().zip(&groups) {
        meta_sheet.push_row(vec![Cell::text(sample.as_str()), Cell::text(group.as_str())])?;
    }
    export(&meta_sheet, dir, "metadata.xlsx", &mut files)?;

    let correlation = column_correlation(expression.values());
    report_correlation(&correlation, expression.sample_ids());
    if config.export_correlation {
        let mut sheet = Sheet::new("correlation", std::iter::once(String::new()).chain(expression.sample_ids().iter().cloned()).collect());
        for (i, sample) in expression.sample_ids().iter().enumerate() {
            let mut row = vec![Cell::text(sample.as_str())];
            row.extend(correlation.row(i).iter().map(|&r| Cell::Number(r)));
            sheet.push_row(row)?;
        }
        export(&sheet, dir, &format!("sample_correlation_{}.xlsx", file_component(id)), &mut files)?;
    }

    let (design, coef_names) = group_means_design(&groups)?;
    let contrast_expr = match &config.contrast {
        Some(c) => c.clone(),
        None if coef_names.len() == 2 => format!("{}-{}", coef_names[1], coef_names[0]),
        None => {
            return Err(DgeError::InvalidContrast {
                reason: format!(
                    "{} groups found ({}); configure a contrast",
                    coef_names.len(),
                    coef_names.join(", ")
                ),
            })
        }
    };
    log::info!("Design groups: {}; contrast {}", coef_names.join(", "), contrast_expr);

    let fit = lm_fit(&expression, &design, coef_names.clone())?;
    let contrast = make_contrast(&contrast_expr, &coef_names)?;
    let eb = ebayes(&contrasts_fit(&fit, &contrast)?, &config.ebayes)?;
    let mut table = top_table(&eb, 0, Some(&fit), config.sort_by)?;

    let annotations = annotation_columns(platform, &config.annotation_columns);
    let mut counts_sheet = matrix_to_sheet("expression", "ID", &expression);
    for (offset, (name, values)) in annotations.iter().enumerate() {
        let column = expression
            .feature_ids()
            .iter()
            .map(|p| Cell::from(values.get(p).cloned()))
            .collect();
        counts_sheet.insert_column(1 + offset, name, column)?;
        table.attach_annotation(name, values);
    }
    export(&counts_sheet, dir, &format!("counts_table_{}.xlsx", file_component(id)), &mut files)?;
    export(
        &table.to_sheet("limma"),
        dir,
        &format!("Limma_output_{}_{}.xlsx", file_component(&contrast.name), file_component(id)),
        &mut files,
    )?;

    Ok(MicroarrayOutputs {
        expression,
        metadata,
        correlation,
        contrast: contrast.name,
        table,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{parse_platform_soft, parse_series_matrix};
    use crate::io::read_xlsx;
    use crate::normalization::LogTransformMode;

    /// Four controls and four tumors over 60 probes; probes 0-4 are higher in tumors
    fn series_text(order_ok: bool) -> String {
        let samples: Vec<String> = (1..=8).map(|j| format!("GSM{}", j)).collect();
        let mut header_samples = samples.clone();
        if !order_ok {
            header_samples.swap(0, 1);
        }
        let quoted = |v: &[String]| v.iter().map(|s| format!("\"{}\"", s)).collect::<Vec<_>>().join("\t");
        let groups: Vec<String> = (0..8)
            .map(|j| if j < 4 { "disease state: control".to_string() } else { "disease state: tumor".to_string() })
            .collect();
        let mut text = format!(
            "!Series_geo_accession\t\"GSE9999\"\n!Series_platform_id\t\"GPL1\"\n!Sample_geo_accession\t{}\n!Sample_characteristics_ch1\t{}\n!series_matrix_table_begin\n\"ID_REF\"\t{}\n",
            quoted(&samples),
            quoted(&groups),
            quoted(&header_samples)
        );
        for i in 0..60 {
            let values: Vec<String> = (0..8)
                .map(|j| {
                    let base = 200.0 + 40.0 * (i % 9) as f64;
                    let noise = 1.0 + 0.05 * (((i * 5 + j * 3) % 7) as f64 - 3.0);
                    let fold = if i < 5 && j >= 4 { 8.0 } else { 1.0 };
                    if i == 59 && j == 2 {
                        "null".to_string()
                    } else {
                        format!("{:.3}", base * noise * fold)
                    }
                })
                .collect();
            text.push_str(&format!("\"probe{}\"\t{}\n", i, values.join("\t")));
        }
        text.push_str("!series_matrix_table_end\n");
        text
    }

    fn config(dir: &Path) -> MicroarrayConfig {
        MicroarrayConfig {
            accession: "GSE9999".to_string(),
            output_dir: dir.to_path_buf(),
            group_column: "disease state:ch1".to_string(),
            export_correlation: true,
            ..MicroarrayConfig::default()
        }
    }

    #[test]
    fn test_pipeline_from_parsed_series() {
        let dir = tempfile::tempdir().unwrap();
        let series = parse_series_matrix(series_text(true).as_bytes()).unwrap();
        let platform = parse_platform_soft(
            "!platform_table_begin\nID\tGene Symbol\nprobe0\tMYC\nprobe1\tERBB2\n!platform_table_end\n".as_bytes(),
            "GPL1",
        )
        .unwrap();
        let cfg = config(dir.path());
        let out = run_microarray_from_series(&cfg, series, Some(&platform)).unwrap();

        assert_eq!(out.contrast, "tumor-control");
        assert_eq!(out.expression.values().dim(), (60, 8));
        assert!(out.expression.values().iter().all(|v| v.is_finite()));
        assert_eq!(out.expression.values()[[59, 2]], 0.0);
        assert!(out.table.ids[..5].iter().all(|id| ["probe0", "probe1", "probe2", "probe3", "probe4"].contains(&id.as_str())));
        assert!((out.table.log_fc[0] - 3.0).abs() < 0.3);

        let meta = read_xlsx(dir.path().join("metadata.xlsx")).unwrap();
        assert_eq!(meta.header, vec!["sample", "group"]);
        assert_eq!(meta.n_rows(), 8);
        assert_eq!(meta.rows[5][1], Cell::text("tumor"));

        let counts = read_xlsx(dir.path().join("counts_table_GSE9999.xlsx")).unwrap();
        assert_eq!(counts.n_rows(), 60);
        assert_eq!(counts.header[1], "Gene Symbol");
        assert_eq!(counts.rows[0][1], Cell::text("MYC"));

        let limma = read_xlsx(dir.path().join("Limma_output_tumor-control_GSE9999.xlsx")).unwrap();
        assert_eq!(limma.n_rows(), 60);
        assert!(limma.column_index("adj.P.Val").is_some());
        assert!(dir.path().join("sample_correlation_GSE9999.xlsx").exists());
        assert_eq!(out.files.len(), 4);
    }

    #[test]
    fn test_sample_order_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let series = parse_series_matrix(series_text(false).as_bytes()).unwrap();
        let err = run_microarray_from_series(&config(dir.path()), series, None).unwrap_err();
        assert!(matches!(err, DgeError::SampleOrderMismatch { .. }));
    }

    #[test]
    fn test_missing_group_column_and_contrast_rules() {
        let dir = tempfile::tempdir().unwrap();
        let series = parse_series_matrix(series_text(true).as_bytes()).unwrap();
        let cfg = MicroarrayConfig {
            group_column: "nope".to_string(),
            ..config(dir.path())
        };
        assert!(run_microarray_from_series(&cfg, series.clone(), None).is_err());

        let cfg = MicroarrayConfig {
            contrast: Some("control-tumor".to_string()),
            log_transform: LogTransformMode::Auto,
            ..config(dir.path())
        };
        let out = run_microarray_from_series(&cfg, series, None).unwrap();
        assert!(out.table.log_fc[0] < 0.0);
        assert_eq!(out.table.annotation.len(), 0);
    }

    #[test]
    fn test_file_component() {
        assert_eq!(file_component("(A+B)/2-C"), "_A_B__2-C");
    }
}
