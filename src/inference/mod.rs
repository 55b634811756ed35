//! Inference backend seam and the single loaded-model session.
//!
//! Diagnostics, the model manager and the smoke tests only see
//! [`InferenceBackend`]; the serving technology behind it can change
//! without touching them.

use crate::errors::{Result, SetupError};
use crate::models::types::{InstalledModel, PullProgress};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Structured answer returned for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    #[serde(rename = "polyp_detected", alias = "detected")]
    pub detected: bool,
    pub confidence_score: f64,
    pub justification: String,
}

impl InferenceResult {
    /// Parse the model's JSON answer. An empty answer yields an empty
    /// justification so callers can report it as such.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self {
                detected: false,
                confidence_score: 0.0,
                justification: String::new(),
            });
        }
        serde_json::from_str(trimmed)
            .map_err(|e| SetupError::Backend(format!("invalid structured response: {}", e)))
    }
}

/// Called for every progress line of a pull; return `false` to cancel.
pub type PullCallback<'a> = &'a mut dyn FnMut(&PullProgress) -> bool;

#[async_trait(?Send)]
pub trait InferenceBackend: Send + Sync {
    /// Reachability probe; returns the backend version
    async fn health(&self) -> Result<String>;

    async fn load_model(&self, id: &str) -> Result<()>;

    /// Release whatever model `load_model` made resident
    async fn unload_model(&self) -> Result<()>;

    /// Run the loaded model on one image
    async fn infer(&self, image: &Path, prompt: &str) -> Result<InferenceResult>;

    async fn list_available_models(&self) -> Result<Vec<InstalledModel>>;

    async fn pull_model(&self, id: &str, progress: PullCallback<'_>) -> Result<()>;
}

/// Owner of the one model the backend keeps loaded.
///
/// Loading a different model releases the current one first, so two
/// configurations are never resident at once.
pub struct InferenceSession {
    backend: Arc<dyn InferenceBackend>,
    loaded: Option<String>,
}

impl InferenceSession {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            backend,
            loaded: None,
        }
    }

    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }

    pub fn loaded_model(&self) -> Option<&str> {
        self.loaded.as_deref()
    }

    pub async fn preload(&mut self, id: &str) -> Result<()> {
        if self.loaded.as_deref() == Some(id) {
            return Ok(());
        }
        self.release().await?;
        tracing::info!(model = %id, "loading model");
        self.backend.load_model(id).await?;
        self.loaded = Some(id.to_string());
        Ok(())
    }

    /// Unload the current model, if any. Idempotent.
    pub async fn release(&mut self) -> Result<()> {
        if let Some(id) = self.loaded.take() {
            tracing::info!(model = %id, "releasing model");
            self.backend.unload_model().await?;
        }
        Ok(())
    }

    pub async fn infer(&self, image: &Path, prompt: &str) -> Result<InferenceResult> {
        if self.loaded.is_none() {
            return Err(SetupError::Backend("no model loaded".to_string()));
        }
        self.backend.infer(image, prompt).await
    }
}
