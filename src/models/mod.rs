//! Model management module
//!
//! This module provides functionality for managing inference models:
//! - Listing the catalog against local and backend availability
//! - Downloading GGUF artifacts atomically into per-family folders
//! - Pulling backend models with progress and cancellation
//! - The Ollama HTTP client behind the inference seam

pub mod client;
pub mod download;
pub mod manager;
pub mod types;

// Re-export key types for convenience
pub use client::OllamaBackend;
pub use manager::ModelManager;
pub use types::{
    format_size, tags_equivalent, DownloadOutcome, DownloadProgress, InstalledModel,
    ModelDescriptor, ModelSource, PullProgress,
};
