//! Atomic file downloads.
//!
//! Data streams into `<dest>.part`; only a complete, synced file is renamed
//! onto `dest`. Cancellation, errors and panics drop the guard, which
//! deletes the partial file, so a half-written artifact is never visible
//! under its final name.

use crate::errors::{Result, SetupError};
use crate::models::types::DownloadProgress;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

/// Called after every chunk; return `false` to cancel.
pub type ProgressCallback<'a> = &'a mut dyn FnMut(&DownloadProgress) -> bool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed,
    Cancelled,
}

/// Sibling temp path used while `dest` is being written
pub fn part_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    dest.with_file_name(format!("{}.part", name))
}

pub(crate) struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed && self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to clean up partial file");
            }
        }
    }
}

/// Write `bytes` to `dest` through a temp file and rename.
pub async fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = part_path(dest);
    let mut guard = TempFileGuard::new(tmp.clone());
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, dest).await?;
    guard.disarm();
    Ok(())
}

/// Stream `url` into `dest`, reporting progress after every chunk.
///
/// `idle_timeout` bounds the wait for the response headers and for each
/// chunk, so a stalled server fails instead of hanging the UI.
pub async fn fetch_to_file(
    client: &Client,
    url: &str,
    dest: &Path,
    label: &str,
    idle_timeout: Duration,
    progress: ProgressCallback<'_>,
) -> Result<FetchOutcome> {
    let response = timeout(idle_timeout, client.get(url).send())
        .await
        .map_err(|_| SetupError::timeout(idle_timeout))??;
    let status = response.status();
    if !status.is_success() {
        return Err(SetupError::Backend(format!("GET {} returned {}", url, status)));
    }
    let total = response.content_length();

    let tmp = part_path(dest);
    let mut guard = TempFileGuard::new(tmp.clone());
    let mut file = tokio::fs::File::create(&tmp).await?;
    let mut stream = response.bytes_stream();
    let start = Instant::now();
    let mut downloaded: u64 = 0;

    tracing::info!(url = %url, path = %dest.display(), "download started");

    loop {
        let next = timeout(idle_timeout, stream.next())
            .await
            .map_err(|_| SetupError::timeout(idle_timeout))?;
        let Some(chunk) = next else { break };
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
        let update = DownloadProgress {
            label: label.to_string(),
            downloaded,
            total,
            bytes_per_sec: downloaded as f64 / elapsed,
        };
        if !progress(&update) {
            tracing::info!(path = %dest.display(), downloaded, "download cancelled");
            drop(file);
            return Ok(FetchOutcome::Cancelled);
        }
    }

    if let Some(expected) = total {
        if downloaded != expected {
            return Err(SetupError::Backend(format!(
                "incomplete download of {}: {} of {} bytes",
                url, downloaded, expected
            )));
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, dest).await?;
    guard.disarm();

    tracing::info!(path = %dest.display(), bytes = downloaded, "download complete");
    Ok(FetchOutcome::Completed)
}
