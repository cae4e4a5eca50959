//! Locating and downloading GEO series and platform records

use std::fs::File;
use std::io::BufReader;

use super::platform::{parse_platform_soft, PlatformTable};
use super::series_matrix::{read_series_matrix, SeriesMatrix};
use crate::error::{DgeError, Result};
use crate::remote::RemoteClient;

const GEO_FTP: &str = "https://ftp.ncbi.nlm.nih.gov/geo/series";
const GEO_QUERY: &str = "https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi";
const MATRIX_SUFFIX: &str = "_series_matrix.txt.gz";

/// Directory stub of a series: the accession with its last three digits
/// replaced by `nnn` (`GSE12345` -> `GSE12nnn`, `GSE123` -> `GSEnnn`).
pub fn series_stub(accession: &str) -> Result<String> {
    let digits = accession
        .strip_prefix("GSE")
        .filter(|d| !d.is_empty() && d.chars().all(|c| c.is_ascii_digit()))
        .ok_or_else(|| DgeError::InvalidInput {
            reason: format!("'{}' is not a GEO series accession (GSE followed by digits)", accession),
        })?;
    let keep = digits.len().saturating_sub(3);
    Ok(format!("GSE{}nnn", &digits[..keep]))
}

/// Directory holding the series matrix files of `accession`
pub fn series_matrix_url(accession: &str) -> Result<String> {
    Ok(format!("{}/{}/{}/matrix/", GEO_FTP, series_stub(accession)?, accession))
}

pub fn platform_url(platform_id: &str) -> String {
    format!("{}?acc={}&targ=self&form=text&view=data", GEO_QUERY, platform_id)
}

/// Series matrix file names linked from a directory listing, sorted
pub fn matrix_files_in_listing(html: &str) -> Vec<String> {
    let mut files: Vec<String> = html
        .split("href=\"")
        .skip(1)
        .filter_map(|chunk| chunk.split('"').next())
        .map(|href| href.rsplit('/').next().unwrap_or(href).to_string())
        .filter(|name| name.ends_with(MATRIX_SUFFIX))
        .collect();
    files.sort();
    files.dedup();
    files
}

/// Fetches GEO records through a caching [`RemoteClient`]
pub struct GeoClient {
    remote: RemoteClient,
}

impl GeoClient {
    pub fn new(remote: RemoteClient) -> Self {
        Self { remote }
    }

    /// Series matrix file names of `accession`, one per platform, sorted
    pub fn list_matrix_files(&self, accession: &str) -> Result<Vec<String>> {
        let dir_url = series_matrix_url(accession)?;
        let files = matrix_files_in_listing(&self.remote.get_text(&dir_url)?);
        if files.is_empty() {
            return Err(DgeError::GeoFormat {
                reason: format!("no series matrix files listed at {}", dir_url),
            });
        }
        Ok(files)
    }

    /// First platform of a series; the other files are logged and not downloaded
    pub fn fetch_first_platform(&self, accession: &str) -> Result<SeriesMatrix> {
        let files = self.list_matrix_files(accession)?;
        self.fetch_first_listed(&series_matrix_url(accession)?, &files)
    }

    fn fetch_first_listed(&self, dir_url: &str, files: &[String]) -> Result<SeriesMatrix> {
        let (first, others) = files.split_first().ok_or_else(|| DgeError::GeoFormat {
            reason: format!("no series matrix files listed at {}", dir_url),
        })?;
        if !others.is_empty() {
            log::info!("{} platform files listed; using {}, skipping {}", files.len(), first, others.join(", "));
        }
        let path = self.remote.download(&format!("{}{}", dir_url, first), first)?;
        read_series_matrix(path)
    }

    /// Probe annotation table of a platform
    pub fn fetch_platform(&self, platform_id: &str) -> Result<PlatformTable> {
        let path = self
            .remote
            .download(&platform_url(platform_id), &format!("{}.annot.soft", platform_id))?;
        parse_platform_soft(BufReader::new(File::open(path)?), platform_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_stub() {
        assert_eq!(series_stub("GSE12345").unwrap(), "GSE12nnn");
        assert_eq!(series_stub("GSE1234").unwrap(), "GSE1nnn");
        assert_eq!(series_stub("GSE123").unwrap(), "GSEnnn");
        assert!(series_stub("GPL570").is_err());
        assert!(series_stub("GSE").is_err());
        assert_eq!(
            series_matrix_url("GSE26713").unwrap(),
            "https://ftp.ncbi.nlm.nih.gov/geo/series/GSE26nnn/GSE26713/matrix/"
        );
    }

    #[test]
    fn test_listing_parse() {
        let html = r#"<html><a href="../">Parent</a>
<a href="GSE1-GPL97_series_matrix.txt.gz">x</a>
<a href="GSE1-GPL96_series_matrix.txt.gz">y</a>
<a href="/geo/series/GSE1nnn/GSE1/matrix/GSE1-GPL96_series_matrix.txt.gz">dup</a></html>"#;
        assert_eq!(
            matrix_files_in_listing(html),
            vec!["GSE1-GPL96_series_matrix.txt.gz", "GSE1-GPL97_series_matrix.txt.gz"]
        );
    }

    #[test]
    fn test_fetch_platform_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("GPL1.annot.soft"),
            "!platform_table_begin\nID\tGene Symbol\np1\tACTB\n!platform_table_end\n",
        )
        .unwrap();
        let client = GeoClient::new(RemoteClient::new(dir.path()).unwrap());
        let table = client.fetch_platform("GPL1").unwrap();
        assert_eq!(table.column_map("Gene Symbol").unwrap()["p1"], "ACTB");
    }

    #[test]
    fn test_only_first_platform_is_downloaded() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let first = "GSE1-GPL96_series_matrix.txt.gz";
        let mut gz = GzEncoder::new(File::create(dir.path().join(first)).unwrap(), Compression::default());
        gz.write_all(
            b"!Series_platform_id\t\"GPL96\"\n!Sample_geo_accession\t\"GSM1\"\n\
!series_matrix_table_begin\n\"ID_REF\"\t\"GSM1\"\n\"p1\"\t5.0\n!series_matrix_table_end\n",
        )
        .unwrap();
        gz.finish().unwrap();

        // The second file is not cached and the URL is unreachable, so
        // fetching it would fail
        let client = GeoClient::new(RemoteClient::new(dir.path()).unwrap());
        let files = vec![first.to_string(), "GSE1-GPL97_series_matrix.txt.gz".to_string()];
        let series = client.fetch_first_listed("http://127.0.0.1:9/", &files).unwrap();
        assert_eq!(series.platform_id, "GPL96");
        assert_eq!(series.expression.n_features(), 1);
        assert!(!dir.path().join("GSE1-GPL97_series_matrix.txt.gz").exists());
        assert!(client.fetch_first_listed("http://127.0.0.1:9/", &[]).is_err());
    }
}
