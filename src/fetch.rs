//! Source archive download.
//!
//! The pipeline only needs two things from the network: the advertised size
//! of a remote file and its bytes. Both sit behind [`Fetcher`] so builders can
//! be exercised without a network.

use crate::error::{BuildError, Result};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_LENGTH;
use std::fs::{self, File};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Remote file access used by the download step
pub trait Fetcher {
    /// Size advertised by the server, `None` when it does not say
    fn remote_size(&self, url: &str) -> Result<Option<u64>>;

    /// Download `url` to `dest`, replacing any existing file.
    /// Returns the number of bytes written.
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Decide whether the local archive must be (re)downloaded.
///
/// A missing archive is always fetched. A local file smaller than the remote
/// size is an interrupted download. When the server gives no size, any
/// non-empty local file is taken as complete.
pub fn needs_fetch(local_size: Option<u64>, remote_size: Option<u64>) -> bool {
    match (local_size, remote_size) {
        (None, _) => true,
        (Some(local), Some(remote)) => local < remote,
        (Some(local), None) => local == 0,
    }
}

/// HTTP(S) fetcher over a blocking reqwest client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            // Source archives can be hundreds of megabytes
            .timeout(None)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BuildError::download(format!("Cannot create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn remote_size(&self, url: &str) -> Result<Option<u64>> {
        let response = self
            .client
            .head(url)
            .send()
            .map_err(|e| BuildError::download(format!("HEAD {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            debug!("HEAD {} returned {}, size unknown", url, response.status());
            return Ok(None);
        }

        // content_length() reports the (empty) body of a HEAD response
        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        debug!("Remote size of {}: {:?}", url, size);
        Ok(size)
    }

    fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        info!("Downloading {}", url);

        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| BuildError::download(format!("GET {} failed: {}", url, e)))?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let part = dest.with_extension("part");
        let written = {
            let mut file = File::create(&part)?;
            response
                .copy_to(&mut file)
                .map_err(|e| BuildError::download(format!("Reading {} failed: {}", url, e)))?
        };
        fs::rename(&part, dest)?;

        info!("Saved {} ({} bytes)", dest.display(), written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_local_is_fetched() {
        assert!(needs_fetch(None, None));
        assert!(needs_fetch(None, Some(10)));
    }

    #[test]
    fn test_partial_local_is_fetched() {
        assert!(needs_fetch(Some(5), Some(10)));
        assert!(!needs_fetch(Some(10), Some(10)));
        // Larger than advertised: server changed the file, keep what we have
        assert!(!needs_fetch(Some(12), Some(10)));
    }

    #[test]
    fn test_unknown_remote_size() {
        assert!(!needs_fetch(Some(1), None));
        assert!(needs_fetch(Some(0), None));
    }
}
