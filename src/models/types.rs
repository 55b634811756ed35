//! Type definitions for model management
//!
//! Wire types for the backend's model endpoints plus the descriptors the
//! menus and the CLI render.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A model installed in the inference backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledModel {
    /// Model name (e.g., "llava:7b")
    pub name: String,

    /// Model size in bytes
    #[serde(default)]
    pub size: u64,

    /// Last modification time
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

/// Response from the `/api/tags` endpoint
#[derive(Debug, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<InstalledModel>,
}

/// One line of the `/api/pull` progress stream
#[derive(Debug, Clone, Deserialize)]
pub struct PullProgress {
    /// Status message
    #[serde(default)]
    pub status: String,

    /// Digest being pulled
    #[serde(default)]
    pub digest: Option<String>,

    /// Total bytes to download
    #[serde(default)]
    pub total: Option<u64>,

    /// Bytes completed
    #[serde(default)]
    pub completed: Option<u64>,

    /// Set by the backend when the pull failed
    #[serde(default)]
    pub error: Option<String>,
}

/// Where a listed model comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSource {
    /// GGUF artifact downloaded into `models/<family>/`
    Artifact,
    /// Pulled and served by the inference backend
    Backend,
}

/// A model entry as shown to the user
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub locally_present: bool,
    pub size_estimate: Option<u64>,
    pub source: ModelSource,
    pub description: String,
}

impl ModelDescriptor {
    /// Row text for pickers
    pub fn row(&self) -> String {
        let status = if self.locally_present { "✔ installed" } else { "☁ download" };
        let size = self.size_estimate.map(format_size).unwrap_or_else(|| "?".to_string());
        format!("{:<12} {:<24} {:>10}  {}", status, self.display_name, size, self.description)
    }
}

/// Incremental download progress
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub label: String,
    pub downloaded: u64,
    pub total: Option<u64>,
    pub bytes_per_sec: f64,
}

impl DownloadProgress {
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some(self.downloaded as f64 / total as f64),
            _ => None,
        }
    }

    /// "1.20 GB / 8.10 GB at 25.00 MB/s"
    pub fn summary(&self) -> String {
        let done = format_size(self.downloaded);
        let speed = format_size(self.bytes_per_sec as u64);
        match self.total {
            Some(total) => format!("{} / {} at {}/s", done, format_size(total), speed),
            None => format!("{} at {}/s", done, speed),
        }
    }
}

/// Result of a download request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Nothing to do; no file was written
    AlreadyPresent,
    /// Fetched; path of the main artifact when file-based
    Downloaded(Option<PathBuf>),
    /// User cancelled; partial data was discarded
    Cancelled,
}

impl fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadOutcome::AlreadyPresent => write!(f, "already present"),
            DownloadOutcome::Downloaded(Some(path)) => write!(f, "downloaded to {}", path.display()),
            DownloadOutcome::Downloaded(None) => write!(f, "downloaded"),
            DownloadOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Format bytes into human-readable size
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Split "name:tag" into its parts
pub fn split_model_tag(tag: &str) -> (String, Option<String>) {
    let normalized = tag.trim().to_lowercase();
    match normalized.split_once(':') {
        Some((name, version)) if !version.is_empty() => (name.to_string(), Some(version.to_string())),
        Some((name, _)) => (name.to_string(), None),
        None => (normalized, None),
    }
}

/// `name` and `name:latest` refer to the same model; other tags do not.
pub fn tags_equivalent(a: &str, b: &str) -> bool {
    let (name_a, tag_a) = split_model_tag(a);
    let (name_b, tag_b) = split_model_tag(b);
    if name_a != name_b {
        return false;
    }
    let tag_a = tag_a.unwrap_or_else(|| "latest".to_string());
    let tag_b = tag_b.unwrap_or_else(|| "latest".to_string());
    tag_a == tag_b
}
