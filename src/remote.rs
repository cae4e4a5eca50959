//! Blocking HTTP downloads with an on-disk cache

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::{Client, ClientBuilder};

use crate::error::{DgeError, Result};

const USER_AGENT: &str = concat!("rust_dge/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT_SECS: u64 = 60;

/// Connection setup is bounded; the transfer itself is not
fn client_builder() -> ClientBuilder {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(None)
}

/// HTTP client that stores downloaded files under `cache_dir`
#[derive(Debug, Clone)]
pub struct RemoteClient {
    client: Client,
    cache_dir: PathBuf,
}

impl RemoteClient {
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Result<Self> {
        Self::with_builder(cache_dir, client_builder())
    }

    fn with_builder<P: AsRef<Path>>(cache_dir: P, builder: ClientBuilder) -> Result<Self> {
        let client = builder.build()?;
        Ok(Self {
            client,
            cache_dir: cache_dir.as_ref().to_path_buf(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Path a download named `file_name` is cached at
    pub fn cached_path(&self, file_name: &str) -> PathBuf {
        self.cache_dir.join(file_name)
    }

    fn fetch(&self, url: &str) -> Result<reqwest::blocking::Response> {
        log::debug!("GET {}", url);
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(DgeError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Body of `url` as text
    pub fn get_text(&self, url: &str) -> Result<String> {
        Ok(self.fetch(url)?.text()?)
    }

    /// Download `url` into the cache as `file_name` unless already present.
    /// The body goes to a temporary file first so an interrupted transfer
    /// never leaves a truncated cache entry.
    pub fn download(&self, url: &str, file_name: &str) -> Result<PathBuf> {
        let dest = self.cached_path(file_name);
        if dest.exists() {
            log::info!("Using cached {}", dest.display());
            return Ok(dest);
        }
        fs::create_dir_all(&self.cache_dir)?;

        log::info!("Downloading {}", url);
        let bytes = self.fetch(url)?.bytes()?;
        if bytes.is_empty() {
            return Err(DgeError::EmptyData {
                reason: format!("download of {} returned no data", url),
            });
        }
        let partial = self.cache_dir.join(format!("{}.part", file_name));
        let mut file = fs::File::create(&partial)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&partial, &dest)?;
        log::debug!("Saved {} bytes to {}", bytes.len(), dest.display());
        Ok(dest)
    }
}
