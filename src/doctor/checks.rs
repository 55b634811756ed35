//! Concrete capability checks, in declared order: local filesystem and
//! tools first, the interpreter-backed library probes next, the backend
//! service last.

use crate::bootstrap::env_python;
use crate::cli::Config;
use crate::doctor::{Check, DiagnosticItem};
use crate::errors::Result;
use crate::inference::InferenceBackend;
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Remediation keys understood by the repair catalog
pub mod keys {
    pub const FOLDERS: &str = "folders";
    pub const UV: &str = "uv";
    pub const ENVIRONMENT: &str = "environment";
    pub const TORCH: &str = "torch";
    pub const NATIVE_BACKEND: &str = "native-backend";
    pub const NATIVE_BACKEND_SOURCE: &str = "native-backend:source";
    pub const BACKEND_SERVICE: &str = "backend-service";

    pub fn library(package: &str) -> String {
        format!("libs:{}", package)
    }
}

/// Python module name for a distribution name
pub fn import_name(package: &str) -> String {
    match package.to_lowercase().as_str() {
        "pillow" => "PIL".to_string(),
        "opencv-python" | "opencv-python-headless" => "cv2".to_string(),
        "llama-cpp-python" => "llama_cpp".to_string(),
        "scikit-learn" => "sklearn".to_string(),
        "pyyaml" => "yaml".to_string(),
        other => other.replace('-', "_"),
    }
}

/// Packages probed by their own check rather than a generic library row
const DEDICATED_PACKAGES: &[&str] = &["torch", "llama-cpp-python"];

/// Whether `package` already has a dedicated check (and repair)
pub fn has_dedicated_check(package: &str) -> bool {
    DEDICATED_PACKAGES
        .iter()
        .any(|p| p.eq_ignore_ascii_case(package.trim()))
}

/// Whether an NVIDIA GPU answers `nvidia-smi -L`
pub async fn gpu_present(runner: &dyn CommandRunner) -> bool {
    let spec = CommandSpec::new("nvidia-smi", ["-L"]).timeout(Duration::from_secs(10));
    matches!(runner.run(&spec).await, Ok(out) if out.success() && !out.stdout.trim().is_empty())
}

pub struct FolderCheck {
    name: String,
    path: PathBuf,
}

impl FolderCheck {
    pub fn new(root: &Path, folder: &str) -> Self {
        Self {
            name: format!("Dir: {}", folder),
            path: root.join(folder),
        }
    }
}

#[async_trait(?Send)]
impl Check for FolderCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<DiagnosticItem> {
        Ok(if self.path.is_dir() {
            DiagnosticItem::ok(&self.name, "exists")
        } else {
            DiagnosticItem::missing(&self.name, format!("{} not found", self.path.display()))
                .with_remediation(keys::FOLDERS)
        })
    }
}

/// A command-line tool that must be on PATH
pub struct ToolCheck {
    name: String,
    tool: String,
    remediation: Option<&'static str>,
    hint: String,
}

impl ToolCheck {
    pub fn new(tool: &str, remediation: Option<&'static str>, hint: &str) -> Self {
        Self {
            name: format!("Tool: {}", tool),
            tool: tool.to_string(),
            remediation,
            hint: hint.to_string(),
        }
    }
}

#[async_trait(?Send)]
impl Check for ToolCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<DiagnosticItem> {
        Ok(match which::which(&self.tool) {
            Ok(path) => DiagnosticItem::ok(&self.name, path.display().to_string()),
            Err(_) => {
                let item = DiagnosticItem::missing(&self.name, format!("not on PATH ({})", self.hint));
                match self.remediation {
                    Some(key) => item.with_remediation(key),
                    None => item,
                }
            }
        })
    }
}

pub struct InterpreterCheck {
    python: PathBuf,
}

#[async_trait(?Send)]
impl Check for InterpreterCheck {
    fn name(&self) -> &str {
        "Env: interpreter"
    }

    async fn probe(&self) -> Result<DiagnosticItem> {
        Ok(if self.python.exists() {
            DiagnosticItem::ok(self.name(), self.python.display().to_string())
        } else {
            DiagnosticItem::missing(self.name(), format!("{} not found", self.python.display()))
                .with_remediation(keys::ENVIRONMENT)
        })
    }
}

/// Import a library through the environment's interpreter
pub struct LibraryCheck {
    name: String,
    runner: Arc<dyn CommandRunner>,
    python: PathBuf,
    module: String,
    remediation: String,
}

impl LibraryCheck {
    pub fn new(runner: Arc<dyn CommandRunner>, python: PathBuf, package: &str) -> Self {
        Self {
            name: format!("Lib: {}", package),
            runner,
            python,
            module: import_name(package),
            remediation: keys::library(package),
        }
    }

    pub fn with_remediation(mut self, key: &str) -> Self {
        self.remediation = key.to_string();
        self
    }
}

#[async_trait(?Send)]
impl Check for LibraryCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe(&self) -> Result<DiagnosticItem> {
        if !self.python.exists() {
            return Ok(DiagnosticItem::missing(&self.name, "environment interpreter missing")
                .with_remediation(keys::ENVIRONMENT));
        }
        let script = format!(
            "import {m}; print(getattr({m}, '__version__', 'unknown'))",
            m = self.module
        );
        let spec = CommandSpec::new(&self.python.to_string_lossy(), ["-c", script.as_str()])
            .timeout(PROBE_TIMEOUT);
        let output = self.runner.run(&spec).await?;

        Ok(if output.success() {
            DiagnosticItem::ok(&self.name, output.stdout.trim().to_string())
        } else if output.stderr.contains("No module named") {
            DiagnosticItem::missing(&self.name, "not installed").with_remediation(&self.remediation)
        } else {
            DiagnosticItem::error(&self.name, output.last_line()).with_remediation(&self.remediation)
        })
    }
}

/// Torch must be a CUDA build whenever a GPU is present
pub struct TorchCheck {
    runner: Arc<dyn CommandRunner>,
    python: PathBuf,
}

#[async_trait(?Send)]
impl Check for TorchCheck {
    fn name(&self) -> &str {
        "Lib: torch"
    }

    async fn probe(&self) -> Result<DiagnosticItem> {
        if !self.python.exists() {
            return Ok(DiagnosticItem::missing(self.name(), "environment interpreter missing")
                .with_remediation(keys::ENVIRONMENT));
        }
        let script = "import torch; print(torch.__version__); \
                      print(torch.cuda.is_available()); print(torch.version.cuda or '')";
        let spec = CommandSpec::new(&self.python.to_string_lossy(), ["-c", script])
            .timeout(PROBE_TIMEOUT);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Ok(DiagnosticItem::missing(self.name(), "not installed")
                .with_remediation(keys::TORCH));
        }

        let mut lines = output.stdout.lines().map(str::trim);
        let version = lines.next().unwrap_or("unknown").to_string();
        let cuda_available = lines.next() == Some("True");
        let cuda_version = lines.next().unwrap_or("");

        if cuda_available {
            return Ok(DiagnosticItem::ok(
                self.name(),
                format!("{} (CUDA {})", version, cuda_version),
            ));
        }
        if gpu_present(self.runner.as_ref()).await {
            return Ok(DiagnosticItem::mismatch(
                self.name(),
                format!("{} is a CPU build but a GPU is present", version),
            )
            .with_remediation(keys::TORCH));
        }
        Ok(DiagnosticItem::ok(self.name(), format!("{} (CPU)", version)))
    }
}

pub struct GpuCheck {
    runner: Arc<dyn CommandRunner>,
}

#[async_trait(?Send)]
impl Check for GpuCheck {
    fn name(&self) -> &str {
        "GPU"
    }

    async fn probe(&self) -> Result<DiagnosticItem> {
        let spec = CommandSpec::new(
            "nvidia-smi",
            ["--query-gpu=name,memory.total", "--format=csv,noheader"],
        )
        .timeout(Duration::from_secs(10));
        Ok(match self.runner.run(&spec).await {
            Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
                DiagnosticItem::ok(self.name(), out.stdout.lines().next().unwrap_or("").trim())
            }
            _ => DiagnosticItem::warn(self.name(), "no NVIDIA GPU detected, inference runs on CPU"),
        })
    }
}

pub struct DiskCheck {
    path: PathBuf,
    min_free_gb: f64,
}

impl DiskCheck {
    fn free_bytes(&self) -> Option<u64> {
        use sysinfo::Disks;

        let target = self.path.canonicalize().unwrap_or_else(|_| self.path.clone());
        let disks = Disks::new_with_refreshed_list();
        disks
            .iter()
            .filter(|d| target.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
    }
}

#[async_trait(?Send)]
impl Check for DiskCheck {
    fn name(&self) -> &str {
        "Disk space"
    }

    async fn probe(&self) -> Result<DiagnosticItem> {
        Ok(match self.free_bytes() {
            Some(bytes) => {
                let free_gb = bytes as f64 / GIB;
                if free_gb < self.min_free_gb {
                    DiagnosticItem::warn(
                        self.name(),
                        format!("{:.1} GB free (recommend {:.0} GB+)", free_gb, self.min_free_gb),
                    )
                } else {
                    DiagnosticItem::ok(self.name(), format!("{:.1} GB free", free_gb))
                }
            }
            None => DiagnosticItem::warn(self.name(), "could not determine free space"),
        })
    }
}

pub struct BackendCheck {
    backend: Arc<dyn InferenceBackend>,
    url: String,
}

#[async_trait(?Send)]
impl Check for BackendCheck {
    fn name(&self) -> &str {
        "Backend service"
    }

    async fn probe(&self) -> Result<DiagnosticItem> {
        Ok(match self.backend.health().await {
            Ok(version) => DiagnosticItem::ok(self.name(), format!("v{} at {}", version, self.url)),
            Err(e) => DiagnosticItem::unreachable(self.name(), format!("{}: {}", self.url, e))
                .with_remediation(keys::BACKEND_SERVICE),
        })
    }
}

/// The full catalog for `config`, rooted at the project directory
pub fn default_checks(
    config: &Config,
    root: &Path,
    runner: Arc<dyn CommandRunner>,
    backend: Arc<dyn InferenceBackend>,
) -> Vec<Box<dyn Check>> {
    let python = env_python(&config.env_dir(root));
    let mut checks: Vec<Box<dyn Check>> = Vec::new();

    for folder in &config.diagnostics.folders {
        checks.push(Box::new(FolderCheck::new(root, folder)));
    }
    checks.push(Box::new(ToolCheck::new("uv", Some(keys::UV), "pip install uv")));
    checks.push(Box::new(InterpreterCheck {
        python: python.clone(),
    }));
    for package in &config.environment.required_libs {
        if has_dedicated_check(package) {
            continue;
        }
        checks.push(Box::new(LibraryCheck::new(runner.clone(), python.clone(), package)));
    }
    checks.push(Box::new(TorchCheck {
        runner: runner.clone(),
        python: python.clone(),
    }));
    checks.push(Box::new(GpuCheck {
        runner: runner.clone(),
    }));
    checks.push(Box::new(
        LibraryCheck::new(runner, python, "llama-cpp-python").with_remediation(keys::NATIVE_BACKEND),
    ));
    checks.push(Box::new(DiskCheck {
        path: root.to_path_buf(),
        min_free_gb: config.diagnostics.min_free_disk_gb,
    }));
    checks.push(Box::new(ToolCheck::new(
        "ollama",
        None,
        "install from https://ollama.com",
    )));
    checks.push(Box::new(BackendCheck {
        backend,
        url: config.backend_url(),
    }));
    checks
}
