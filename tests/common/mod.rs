//! Shared fakes for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use vlmsetup::bootstrap::EnvironmentLayer;
use vlmsetup::errors::{Result, SetupError};
use vlmsetup::inference::{InferenceBackend, InferenceResult, PullCallback};
use vlmsetup::models::{InstalledModel, PullProgress};
use vlmsetup::process::{CommandOutput, CommandRunner, CommandSpec};

/// In-memory backend recording every call
#[derive(Default)]
pub struct FakeBackend {
    pub calls: Mutex<Vec<String>>,
    pub installed: Mutex<Vec<String>>,
    /// Justification returned per image file stem
    pub answers: HashMap<String, String>,
    pub fail_health: bool,
    pub fail_load: bool,
}

impl FakeBackend {
    pub fn with_installed(models: &[&str]) -> Self {
        Self {
            installed: Mutex::new(models.iter().map(|m| m.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait(?Send)]
impl InferenceBackend for FakeBackend {
    async fn health(&self) -> Result<String> {
        if self.fail_health {
            Err(SetupError::Backend("connection refused".to_string()))
        } else {
            Ok("0.5.1".to_string())
        }
    }

    async fn load_model(&self, id: &str) -> Result<()> {
        self.record(format!("load {}", id));
        if self.fail_load {
            return Err(SetupError::Backend(format!("model '{}' not found", id)));
        }
        Ok(())
    }

    async fn unload_model(&self) -> Result<()> {
        self.record("unload".to_string());
        Ok(())
    }

    async fn infer(&self, image: &Path, _prompt: &str) -> Result<InferenceResult> {
        let stem = image
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record(format!("infer {}", stem));
        Ok(InferenceResult {
            detected: false,
            confidence_score: 80.0,
            justification: self.answers.get(&stem).cloned().unwrap_or_default(),
        })
    }

    async fn list_available_models(&self) -> Result<Vec<InstalledModel>> {
        self.record("list".to_string());
        Ok(self
            .installed
            .lock()
            .unwrap()
            .iter()
            .map(|name| InstalledModel {
                name: name.clone(),
                size: 1024,
                modified_at: None,
            })
            .collect())
    }

    async fn pull_model(&self, id: &str, progress: PullCallback<'_>) -> Result<()> {
        self.record(format!("pull {}", id));
        let update = PullProgress {
            status: "pulling manifest".to_string(),
            digest: None,
            total: Some(100),
            completed: Some(100),
            error: None,
        };
        if !progress(&update) {
            return Err(SetupError::Cancelled);
        }
        self.installed.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

/// Command runner that never spawns anything
pub struct FakeRunner {
    pub calls: Mutex<Vec<String>>,
    pub exit_code: i32,
    pub stderr: String,
}

impl FakeRunner {
    pub fn succeeding() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            exit_code: 0,
            stderr: String::new(),
        }
    }

    pub fn failing(stderr: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            exit_code: 1,
            stderr: stderr.to_string(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.display());
        Ok(CommandOutput {
            exit_code: self.exit_code,
            stdout: String::new(),
            stderr: self.stderr.clone(),
        })
    }

    fn spawn_detached(&self, spec: &CommandSpec) -> Result<()> {
        self.calls.lock().unwrap().push(format!("spawn {}", spec.display()));
        Ok(())
    }
}

/// Environment layer with observable side effects
#[derive(Default)]
pub struct FakeLayer {
    pub inside: bool,
    pub exists: AtomicBool,
    pub create_fails: bool,
    /// Creation "succeeds" but leaves nothing on disk
    pub create_is_noop: bool,
    pub creates: AtomicUsize,
    pub installs: AtomicUsize,
    pub reexecs: AtomicUsize,
    pub relaunch_code: i32,
}

impl FakeLayer {
    pub fn inside() -> Self {
        Self {
            inside: true,
            exists: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn outside(exists: bool) -> Self {
        Self {
            exists: AtomicBool::new(exists),
            ..Self::default()
        }
    }
}

#[async_trait]
impl EnvironmentLayer for FakeLayer {
    fn is_inside(&self) -> bool {
        self.inside
    }

    fn exists(&self) -> bool {
        self.exists.load(Ordering::SeqCst)
    }

    async fn create(&self) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.create_fails {
            return Err(SetupError::Command {
                command: "uv venv .venv".to_string(),
                reason: "no interpreter found for 3.12".to_string(),
            });
        }
        if !self.create_is_noop {
            self.exists.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn install_declared_dependencies(&self, _reinstall: bool) -> Result<()> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reexec(&self, _argv: &[String]) -> Result<i32> {
        self.reexecs.fetch_add(1, Ordering::SeqCst);
        Ok(self.relaunch_code)
    }
}

/// Serve `body` to every request on an ephemeral port; returns the base URL
pub async fn serve_bytes(body: Vec<u8>) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let mut request = Vec::new();
                loop {
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}", addr)
}

/// Accept connections and never answer; returns the base URL
pub async fn silent_server() -> String {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{}", addr)
}
