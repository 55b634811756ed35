//! Model manager
//!
//! Lists the configured catalog against what is already on disk or in the
//! backend, and downloads missing models. File artifacts land in
//! `models/<family>/` so two models never overwrite each other's projector.

use crate::cli::config::ModelArtifact;
use crate::errors::{Result, SetupError};
use crate::inference::InferenceBackend;
use crate::models::download::{fetch_to_file, FetchOutcome, ProgressCallback};
use crate::models::types::{
    tags_equivalent, DownloadOutcome, DownloadProgress, ModelDescriptor, ModelSource,
};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DOWNLOAD_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ModelManager {
    catalog: Vec<ModelArtifact>,
    models_dir: PathBuf,
    backend: Arc<dyn InferenceBackend>,
    http: Client,
    idle_timeout: Duration,
}

impl ModelManager {
    pub fn new(
        catalog: Vec<ModelArtifact>,
        models_dir: PathBuf,
        backend: Arc<dyn InferenceBackend>,
    ) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            catalog,
            models_dir,
            backend,
            http,
            idle_timeout: DOWNLOAD_IDLE_TIMEOUT,
        })
    }

    /// Longest silence tolerated from a download server
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn catalog(&self) -> &[ModelArtifact] {
        &self.catalog
    }

    fn find(&self, id: &str) -> Option<&ModelArtifact> {
        self.catalog.iter().find(|a| a.id == id)
    }

    /// Destination of every file an artifact needs (model, then projector)
    fn artifact_files(&self, artifact: &ModelArtifact) -> Vec<(PathBuf, String)> {
        let (Some(family), Some(file), Some(url)) = (&artifact.family, &artifact.file, &artifact.url)
        else {
            return Vec::new();
        };
        let dir = self.models_dir.join(family);
        let mut files = vec![(dir.join(file), url.clone())];
        if let Some(projector) = &artifact.projector {
            files.push((dir.join(&projector.file), projector.url.clone()));
        }
        files
    }

    fn artifact_present(&self, artifact: &ModelArtifact) -> bool {
        let files = self.artifact_files(artifact);
        !files.is_empty() && files.iter().all(|(path, _)| path.exists())
    }

    async fn backend_models(&self) -> Result<Vec<String>> {
        Ok(self
            .backend
            .list_available_models()
            .await?
            .into_iter()
            .map(|m| m.name)
            .collect())
    }

    /// Catalog entries plus backend-installed models, each marked with
    /// whether it is already available locally.
    ///
    /// An unreachable backend degrades to the file catalog only.
    pub async fn list_remote_models(&self) -> Result<Vec<ModelDescriptor>> {
        let installed = match self.backend.list_available_models().await {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!(error = %e, "backend model list unavailable");
                Vec::new()
            }
        };

        let mut descriptors = Vec::with_capacity(self.catalog.len() + installed.len());
        for artifact in &self.catalog {
            let (source, present) = match artifact.backend_tag() {
                Some(tag) => (
                    ModelSource::Backend,
                    installed.iter().any(|m| tags_equivalent(&m.name, tag)),
                ),
                None => (ModelSource::Artifact, self.artifact_present(artifact)),
            };
            descriptors.push(ModelDescriptor {
                id: artifact.id.clone(),
                display_name: artifact.name.clone(),
                locally_present: present,
                size_estimate: artifact.size_bytes,
                source,
                description: artifact.description.clone(),
            });
        }

        for model in installed {
            let known = self
                .catalog
                .iter()
                .filter_map(ModelArtifact::backend_tag)
                .any(|tag| tags_equivalent(tag, &model.name));
            if !known {
                descriptors.push(ModelDescriptor {
                    id: model.name.clone(),
                    display_name: model.name.clone(),
                    locally_present: true,
                    size_estimate: Some(model.size),
                    source: ModelSource::Backend,
                    description: "installed in backend".to_string(),
                });
            }
        }

        Ok(descriptors)
    }

    /// Backend models ready for inference
    pub async fn installed_backend_models(&self) -> Result<Vec<String>> {
        self.backend_models().await
    }

    /// Whether `id` can be used without downloading. Backend failures
    /// count as "not present".
    pub async fn is_locally_present(&self, id: &str) -> bool {
        if let Some(artifact) = self.find(id) {
            if artifact.backend_tag().is_none() {
                return self.artifact_present(artifact);
            }
        }
        let tag = self.find(id).and_then(ModelArtifact::backend_tag).unwrap_or(id);
        match self.backend_models().await {
            Ok(names) => names.iter().any(|name| tags_equivalent(name, tag)),
            Err(e) => {
                tracing::debug!(model = %id, error = %e, "presence check failed");
                false
            }
        }
    }

    /// Download `id` unless already present. Idempotent.
    ///
    /// Unknown identifiers are treated as backend tags.
    pub async fn download(&self, id: &str, progress: ProgressCallback<'_>) -> Result<DownloadOutcome> {
        if self.is_locally_present(id).await {
            tracing::info!(model = %id, "model already present");
            return Ok(DownloadOutcome::AlreadyPresent);
        }

        match self.find(id) {
            Some(artifact) if artifact.backend_tag().is_none() => {
                self.download_artifact(artifact, progress).await
            }
            Some(artifact) => {
                let tag = artifact.backend_tag().unwrap_or(id).to_string();
                self.pull(&tag, progress).await
            }
            None => self.pull(id, progress).await,
        }
    }

    async fn download_artifact(
        &self,
        artifact: &ModelArtifact,
        progress: ProgressCallback<'_>,
    ) -> Result<DownloadOutcome> {
        let files = self.artifact_files(artifact);
        let Some((main_path, _)) = files.first().cloned() else {
            return Err(SetupError::Config(format!(
                "model '{}' has no downloadable file",
                artifact.id
            )));
        };

        for (path, url) in &files {
            if path.exists() {
                tracing::debug!(path = %path.display(), "file already present, skipping");
                continue;
            }
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let label = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| artifact.name.clone());
            let outcome =
                fetch_to_file(&self.http, url, path, &label, self.idle_timeout, &mut *progress)
                    .await?;
            if outcome == FetchOutcome::Cancelled {
                return Ok(DownloadOutcome::Cancelled);
            }
        }

        Ok(DownloadOutcome::Downloaded(Some(main_path)))
    }

    async fn pull(&self, tag: &str, progress: ProgressCallback<'_>) -> Result<DownloadOutcome> {
        let start = Instant::now();
        let mut forward = |update: &crate::models::types::PullProgress| {
            let downloaded = update.completed.unwrap_or(0);
            let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
            progress(&DownloadProgress {
                label: format!("{} ({})", tag, update.status),
                downloaded,
                total: update.total,
                bytes_per_sec: downloaded as f64 / elapsed,
            })
        };

        match self.backend.pull_model(tag, &mut forward).await {
            Ok(()) => Ok(DownloadOutcome::Downloaded(None)),
            Err(SetupError::Cancelled) => Ok(DownloadOutcome::Cancelled),
            Err(e) => Err(e),
        }
    }
}
