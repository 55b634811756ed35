//! Ollama HTTP client implementing [`InferenceBackend`]
//!
//! Load and unload go through `/api/generate` with `keep_alive`, inference
//! through `/api/chat` with a base64 image and JSON output, pulls through
//! the NDJSON `/api/pull` stream.

use crate::errors::{Result, SetupError};
use crate::inference::{InferenceBackend, InferenceResult, PullCallback};
use crate::models::types::{InstalledModel, ModelsResponse, PullProgress};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::timeout;

/// Silence allowed between two chunks of a streaming response
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

/// HTTP client for the Ollama API
pub struct OllamaBackend {
    client: Client,
    stream_client: Client,
    base_url: String,
    keep_alive: String,
    temperature: f32,
    stream_idle: Duration,
    loaded: Mutex<Option<String>>,
}

impl OllamaBackend {
    /// Create a client for `base_url` (e.g. `http://127.0.0.1:11434`)
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        // Pulls can take an hour; only the connect, header and idle phases
        // are bounded.
        let stream_client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            keep_alive: "10m".to_string(),
            temperature: 0.1,
            stream_idle: STREAM_IDLE_TIMEOUT,
            loaded: Mutex::new(None),
        })
    }

    pub fn with_keep_alive(mut self, keep_alive: &str) -> Self {
        self.keep_alive = keep_alive.to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Longest silence tolerated while a pull is streaming
    pub fn with_stream_idle_timeout(mut self, idle: Duration) -> Self {
        self.stream_idle = idle;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn current_model(&self) -> Option<String> {
        self.loaded.lock().ok().and_then(|guard| guard.clone())
    }

    fn set_current_model(&self, model: Option<String>) {
        if let Ok(mut guard) = self.loaded.lock() {
            *guard = model;
        }
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SetupError::Backend(format!("{}: {}", status, body.trim())))
    }
}

#[async_trait(?Send)]
impl InferenceBackend for OllamaBackend {
    async fn health(&self) -> Result<String> {
        let response = self
            .client
            .get(self.url("/api/version"))
            .timeout(Duration::from_secs(3))
            .send()
            .await?;
        let version: VersionResponse = Self::ensure_success(response).await?.json().await?;
        Ok(version.version)
    }

    async fn load_model(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&json!({ "model": id, "keep_alive": self.keep_alive }))
            .send()
            .await?;
        Self::ensure_success(response).await?;
        self.set_current_model(Some(id.to_string()));
        tracing::debug!(model = %id, "model resident in backend");
        Ok(())
    }

    async fn unload_model(&self) -> Result<()> {
        let Some(model) = self.current_model() else {
            return Ok(());
        };
        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&json!({ "model": model, "keep_alive": 0 }))
            .send()
            .await?;
        Self::ensure_success(response).await?;
        self.set_current_model(None);
        Ok(())
    }

    async fn infer(&self, image: &Path, prompt: &str) -> Result<InferenceResult> {
        let model = self
            .current_model()
            .ok_or_else(|| SetupError::Backend("no model loaded".to_string()))?;
        if !image.exists() {
            return Err(SetupError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("image not found: {}", image.display()),
            )));
        }
        let bytes = tokio::fs::read(image).await?;

        let body = json!({
            "model": model,
            "messages": [{
                "role": "user",
                "content": prompt,
                "images": [STANDARD.encode(&bytes)],
            }],
            "stream": false,
            "format": "json",
            "keep_alive": self.keep_alive,
            "options": { "temperature": self.temperature },
        });

        let response = self.client.post(self.url("/api/chat")).json(&body).send().await?;
        let chat: ChatResponse = Self::ensure_success(response).await?.json().await?;
        InferenceResult::parse(&chat.message.content)
    }

    async fn list_available_models(&self) -> Result<Vec<InstalledModel>> {
        let response = self.client.get(self.url("/api/tags")).send().await?;
        let models: ModelsResponse = Self::ensure_success(response).await?.json().await?;
        Ok(models.models)
    }

    async fn pull_model(&self, id: &str, progress: PullCallback<'_>) -> Result<()> {
        let request = self
            .stream_client
            .post(self.url("/api/pull"))
            .json(&json!({ "name": id, "stream": true }))
            .send();
        let response = timeout(self.stream_idle, request)
            .await
            .map_err(|_| SetupError::timeout(self.stream_idle))??;
        let mut stream = Self::ensure_success(response).await?.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let next = timeout(self.stream_idle, stream.next())
                .await
                .map_err(|_| SetupError::timeout(self.stream_idle))?;
            let Some(chunk) = next else { break };
            buffer.extend_from_slice(&chunk?);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if handle_pull_line(&line, progress)? {
                    return Ok(());
                }
            }
        }

        if handle_pull_line(&buffer, progress)? {
            return Ok(());
        }
        Err(SetupError::Backend(format!("pull of '{}' ended without success", id)))
    }
}

/// `true` once the backend reports success; `Err` on an error line or cancel.
fn handle_pull_line(line: &[u8], progress: PullCallback<'_>) -> Result<bool> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(false);
    }
    let Ok(update) = serde_json::from_str::<PullProgress>(text) else {
        tracing::debug!(line = %text, "ignoring unparseable pull line");
        return Ok(false);
    };
    if let Some(error) = &update.error {
        return Err(SetupError::Backend(error.clone()));
    }
    if !progress(&update) {
        return Err(SetupError::Cancelled);
    }
    Ok(update.status == "success")
}
