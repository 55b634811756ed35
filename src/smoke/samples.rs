//! Sample images for the smoke run, fetched on demand

use crate::errors::{Result, SetupError};
use crate::models::download::write_atomic;
use crate::smoke::cases::SmokeCase;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

/// Identify JPEG and PNG by magic bytes
pub fn sniff_image(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageFormat::Jpeg)
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(ImageFormat::Png)
    } else {
        None
    }
}

pub struct SampleFetcher {
    client: Client,
}

impl SampleFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vlmsetup/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Path to the case's sample, downloading it if absent
    pub async fn ensure(&self, case: &SmokeCase) -> Result<PathBuf> {
        if tokio::fs::metadata(&case.path)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false)
        {
            return Ok(case.path.clone());
        }
        if let Some(parent) = case.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut last_error = String::from("no source URLs");
        for url in &case.fallback_urls {
            match self.fetch_image(url).await {
                Ok(bytes) => {
                    write_atomic(&case.path, &bytes).await?;
                    tracing::info!(case = %case.id, url = %url, path = %case.path.display(), "sample downloaded");
                    return Ok(case.path.clone());
                }
                Err(e) => {
                    tracing::debug!(case = %case.id, url = %url, error = %e, "sample source failed");
                    last_error = e.to_string();
                }
            }
        }
        Err(SetupError::Backend(format!(
            "no usable source for {}: {}",
            case.id, last_error
        )))
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SetupError::Backend(format!("GET {} returned {}", url, status)));
        }
        let bytes = response.bytes().await?;
        if sniff_image(&bytes).is_none() {
            return Err(SetupError::Backend(format!("{} did not return a JPEG or PNG", url)));
        }
        Ok(bytes.to_vec())
    }
}
