//! Size-capped image download for URL query terms

use super::{ImageError, LoadedImage};
use crate::error::{PixseekError, Result};
use reqwest::header::CONTENT_LENGTH;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("pixseek/", env!("CARGO_PKG_VERSION"));

/// Limits applied to every URL fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadLimits {
    pub max_size_bytes: u64,
    pub timeout: Duration,
}

impl Default for DownloadLimits {
    fn default() -> Self {
        Self {
            max_size_bytes: 50_000_000,
            timeout: Duration::from_secs(60),
        }
    }
}

/// HTTP(S) image fetcher
pub struct Downloader {
    client: Client,
    limits: DownloadLimits,
}

impl Downloader {
    pub fn new(limits: DownloadLimits) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(limits.timeout)
            .build()
            .map_err(|e| PixseekError::Download {
                url: String::new(),
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client, limits })
    }

    pub fn limits(&self) -> DownloadLimits {
        self.limits
    }

    /// Download `url` and check that it decodes as an image
    ///
    /// The advertised size is checked with a HEAD request before the body is
    /// requested; the body is then read in chunks and abandoned as soon as it
    /// passes the limit, so servers without a Content-Length are capped too.
    pub async fn fetch(&self, url: &str) -> Result<LoadedImage> {
        let limit = self.limits.max_size_bytes;

        match self.client.head(url).send().await {
            Ok(head) if head.status().is_success() => {
                if let Some(size) = advertised_length(&head) {
                    check_size(url, size, limit)?;
                }
            }
            Ok(head) => debug!("HEAD {} returned {}", url, head.status()),
            Err(e) => debug!("HEAD {} failed: {}", url, e),
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| download_error(url, e))?;

        if let Some(size) = advertised_length(&response) {
            check_size(url, size, limit)?;
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| download_error(url, e))? {
            body.extend_from_slice(&chunk);
            check_size(url, body.len() as u64, limit)?;
        }
        debug!("Downloaded {} bytes from {}", body.len(), url);

        LoadedImage::from_bytes(url, body).map_err(|e| match e {
            ImageError::NotAnImage(source) => PixseekError::NotAnImage { path: source },
            other => other.into(),
        })
    }
}

fn advertised_length(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn check_size(url: &str, size: u64, limit: u64) -> Result<()> {
    if size > limit {
        return Err(PixseekError::DownloadTooLarge {
            url: url.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

fn download_error(url: &str, err: reqwest::Error) -> PixseekError {
    let message = if err.is_timeout() {
        "request timed out".to_string()
    } else {
        err.to_string()
    };
    PixseekError::Download {
        url: url.to_string(),
        message,
    }
}
