//! Remediations bound to diagnostic items by key.
//!
//! A failed repair never mutates the report; the caller re-runs only the
//! affected check afterwards and shows whatever it now reports.

use crate::bootstrap::{env_python, EnvironmentLayer};
use crate::cli::Config;
use crate::doctor::checks::{gpu_present, has_dedicated_check, keys};
use crate::doctor::DiagnosticItem;
use crate::errors::Result;
use crate::inference::InferenceBackend;
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const INSTALL_TIMEOUT: Duration = Duration::from_secs(1800);
const BUILD_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    pub success: bool,
    pub message: String,
    /// Changes only take effect in a fresh process
    pub restart_required: bool,
}

impl RepairOutcome {
    pub fn fixed(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            restart_required: false,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            restart_required: false,
        }
    }

    pub fn needs_restart(mut self) -> Self {
        self.restart_required = true;
        self
    }
}

#[async_trait(?Send)]
pub trait Remediation {
    fn key(&self) -> &str;

    fn label(&self) -> &str;

    /// Long-running or destructive; applied last and confirmed first
    fn heavy(&self) -> bool {
        false
    }

    async fn apply(&self) -> Result<RepairOutcome>;
}

pub struct RemediationCatalog {
    entries: Vec<Box<dyn Remediation>>,
}

impl RemediationCatalog {
    pub fn new(entries: Vec<Box<dyn Remediation>>) -> Self {
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&dyn Remediation> {
        self.entries
            .iter()
            .find(|r| r.key() == key)
            .map(|r| r.as_ref())
    }

    pub fn is_heavy(&self, key: &str) -> bool {
        self.get(key).map(|r| r.heavy()).unwrap_or(false)
    }

    /// Apply the remediation bound to `item`. Never fails: errors come back
    /// as an unsuccessful outcome.
    pub async fn repair(&self, item: &DiagnosticItem) -> RepairOutcome {
        let Some(remediation) = item.remediation.as_deref().and_then(|key| self.get(key)) else {
            return RepairOutcome::failed(format!("no automatic repair for {}", item.name));
        };
        self.apply(remediation).await
    }

    pub async fn apply_key(&self, key: &str) -> RepairOutcome {
        match self.get(key) {
            Some(remediation) => self.apply(remediation).await,
            None => RepairOutcome::failed(format!("no automatic repair for {}", key)),
        }
    }

    async fn apply(&self, remediation: &dyn Remediation) -> RepairOutcome {
        tracing::info!(key = remediation.key(), "applying repair");
        match remediation.apply().await {
            Ok(outcome) => {
                tracing::info!(
                    key = remediation.key(),
                    success = outcome.success,
                    restart = outcome.restart_required,
                    "repair finished"
                );
                outcome
            }
            Err(e) => {
                tracing::warn!(key = remediation.key(), error = %e, "repair failed");
                RepairOutcome::failed(format!("{}: {}", remediation.label(), e))
            }
        }
    }

    /// Distinct remediation keys for `items`, light repairs first, each
    /// group in report order. Items without a bound repair are skipped.
    pub fn plan<'a>(&self, items: impl IntoIterator<Item = &'a DiagnosticItem>) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for item in items {
            if let Some(key) = item.remediation.as_deref() {
                if self.get(key).is_some() && !keys.iter().any(|k| k == key) {
                    keys.push(key.to_string());
                }
            }
        }
        keys.sort_by_key(|k| self.is_heavy(k));
        keys
    }
}

pub struct CreateFolders {
    root: PathBuf,
    folders: Vec<String>,
}

#[async_trait(?Send)]
impl Remediation for CreateFolders {
    fn key(&self) -> &str {
        keys::FOLDERS
    }

    fn label(&self) -> &str {
        "Create project folders"
    }

    async fn apply(&self) -> Result<RepairOutcome> {
        let mut created = 0;
        for folder in &self.folders {
            let path = self.root.join(folder);
            if !path.is_dir() {
                tokio::fs::create_dir_all(&path).await?;
                created += 1;
            }
        }
        Ok(RepairOutcome::fixed(format!("{} folder(s) created", created)))
    }
}

pub struct InstallUv {
    runner: Arc<dyn CommandRunner>,
}

#[async_trait(?Send)]
impl Remediation for InstallUv {
    fn key(&self) -> &str {
        keys::UV
    }

    fn label(&self) -> &str {
        "Install uv"
    }

    async fn apply(&self) -> Result<RepairOutcome> {
        let python = if cfg!(windows) { "python" } else { "python3" };
        let spec = CommandSpec::new(python, ["-m", "pip", "install", "--user", "uv"])
            .timeout(Duration::from_secs(300));
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(RepairOutcome::fixed("uv installed"))
    }
}

/// Forced reinstall of one or more packages into the environment
pub struct ReinstallLibrary {
    key: String,
    label: String,
    packages: Vec<String>,
    python: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl ReinstallLibrary {
    pub fn new(package: &str, python: PathBuf, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            key: keys::library(package),
            label: format!("Reinstall {}", package),
            packages: vec![package.to_string()],
            python,
            runner,
        }
    }

    pub fn spec(&self) -> CommandSpec {
        reinstall_spec(&self.python, &self.packages, &[])
    }
}

/// `uv pip install` into the environment at `python`
pub fn pip_install_spec(python: &Path, packages: &[String], extra: &[&str], reinstall: bool) -> CommandSpec {
    let mut args = vec![
        "pip".to_string(),
        "install".to_string(),
        "--python".to_string(),
        python.to_string_lossy().into_owned(),
    ];
    if reinstall {
        args.push("--reinstall".to_string());
    }
    args.extend(extra.iter().map(|s| s.to_string()));
    args.extend(packages.iter().cloned());
    CommandSpec::new("uv", args).timeout(INSTALL_TIMEOUT)
}

pub fn reinstall_spec(python: &Path, packages: &[String], extra: &[&str]) -> CommandSpec {
    pip_install_spec(python, packages, extra, true)
}

/// Torch wheels from the CUDA index when a GPU is present, else the CPU one
pub fn torch_spec(python: &Path, index: &str, reinstall: bool) -> CommandSpec {
    let packages = ["torch".to_string(), "torchvision".to_string()];
    pip_install_spec(python, &packages, &["--index-url", index], reinstall)
}

/// Prebuilt native binding; the CUDA wheel index only helps with a GPU
pub fn native_wheel_spec(python: &Path, cuda_index: Option<&str>, reinstall: bool) -> CommandSpec {
    let packages = ["llama-cpp-python".to_string()];
    match cuda_index {
        Some(index) => pip_install_spec(python, &packages, &["--extra-index-url", index], reinstall),
        None => pip_install_spec(python, &packages, &[], reinstall),
    }
}

#[async_trait(?Send)]
impl Remediation for ReinstallLibrary {
    fn key(&self) -> &str {
        &self.key
    }

    fn label(&self) -> &str {
        &self.label
    }

    async fn apply(&self) -> Result<RepairOutcome> {
        let spec = self.spec();
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(RepairOutcome::fixed(format!("{} reinstalled", self.packages.join(", "))))
    }
}

/// Torch matching the hardware: CUDA wheels when a GPU is present
pub struct ReinstallTorch {
    python: PathBuf,
    cuda_index: String,
    cpu_index: String,
    runner: Arc<dyn CommandRunner>,
}

#[async_trait(?Send)]
impl Remediation for ReinstallTorch {
    fn key(&self) -> &str {
        keys::TORCH
    }

    fn label(&self) -> &str {
        "Reinstall torch for this hardware"
    }

    fn heavy(&self) -> bool {
        true
    }

    async fn apply(&self) -> Result<RepairOutcome> {
        let gpu = gpu_present(self.runner.as_ref()).await;
        let index = if gpu { &self.cuda_index } else { &self.cpu_index };
        let spec = torch_spec(&self.python, index, true);
        self.runner.run(&spec).await?.check(&spec)?;
        let flavor = if gpu { "CUDA" } else { "CPU" };
        Ok(RepairOutcome::fixed(format!("torch reinstalled ({} build)", flavor)).needs_restart())
    }
}

/// Prebuilt wheel of the native binding; the quick default
pub struct InstallNativeWheel {
    python: PathBuf,
    wheel_index: String,
    runner: Arc<dyn CommandRunner>,
}

#[async_trait(?Send)]
impl Remediation for InstallNativeWheel {
    fn key(&self) -> &str {
        keys::NATIVE_BACKEND
    }

    fn label(&self) -> &str {
        "Install prebuilt native binding"
    }

    async fn apply(&self) -> Result<RepairOutcome> {
        let gpu = gpu_present(self.runner.as_ref()).await;
        let index = gpu.then_some(self.wheel_index.as_str());
        let spec = native_wheel_spec(&self.python, index, true);
        self.runner.run(&spec).await?.check(&spec)?;
        let flavor = if gpu { "CUDA" } else { "CPU" };
        Ok(RepairOutcome::fixed(format!("native binding installed ({} wheel)", flavor)).needs_restart())
    }
}

/// Source build of the native binding through the configured command
pub struct BuildNativeBackend {
    command: String,
    runner: Arc<dyn CommandRunner>,
}

#[async_trait(?Send)]
impl Remediation for BuildNativeBackend {
    fn key(&self) -> &str {
        keys::NATIVE_BACKEND_SOURCE
    }

    fn label(&self) -> &str {
        "Compile native binding from source"
    }

    fn heavy(&self) -> bool {
        true
    }

    async fn apply(&self) -> Result<RepairOutcome> {
        let spec = CommandSpec::shell(&self.command).timeout(BUILD_TIMEOUT);
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(RepairOutcome::fixed("native binding compiled").needs_restart())
    }
}

/// Start the backend service and wait for it to answer
pub struct StartBackend {
    runner: Arc<dyn CommandRunner>,
    backend: Arc<dyn InferenceBackend>,
    wait: Duration,
}

#[async_trait(?Send)]
impl Remediation for StartBackend {
    fn key(&self) -> &str {
        keys::BACKEND_SERVICE
    }

    fn label(&self) -> &str {
        "Start backend service"
    }

    async fn apply(&self) -> Result<RepairOutcome> {
        if self.backend.health().await.is_ok() {
            return Ok(RepairOutcome::fixed("backend already running"));
        }
        self.runner
            .spawn_detached(&CommandSpec::new("ollama", ["serve"]))?;

        let deadline = tokio::time::Instant::now() + self.wait;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(500)).await;
            if let Ok(version) = self.backend.health().await {
                return Ok(RepairOutcome::fixed(format!("backend v{} started", version)));
            }
        }
        Ok(RepairOutcome::failed(format!(
            "backend did not answer within {}s",
            self.wait.as_secs()
        )))
    }
}

pub struct RecreateEnvironment {
    layer: Arc<dyn EnvironmentLayer>,
}

#[async_trait(?Send)]
impl Remediation for RecreateEnvironment {
    fn key(&self) -> &str {
        keys::ENVIRONMENT
    }

    fn label(&self) -> &str {
        "Create isolated environment"
    }

    fn heavy(&self) -> bool {
        true
    }

    async fn apply(&self) -> Result<RepairOutcome> {
        if !self.layer.exists() {
            self.layer.create().await?;
        }
        self.layer.install_declared_dependencies(false).await?;
        Ok(RepairOutcome::fixed("environment ready").needs_restart())
    }
}

/// Remediations for every key [`crate::doctor::default_checks`] emits
pub fn default_remediations(
    config: &Config,
    root: &Path,
    runner: Arc<dyn CommandRunner>,
    backend: Arc<dyn InferenceBackend>,
    layer: Arc<dyn EnvironmentLayer>,
) -> RemediationCatalog {
    let python = env_python(&config.env_dir(root));
    let mut entries: Vec<Box<dyn Remediation>> = vec![
        Box::new(CreateFolders {
            root: root.to_path_buf(),
            folders: config.diagnostics.folders.clone(),
        }),
        Box::new(InstallUv {
            runner: runner.clone(),
        }),
        Box::new(RecreateEnvironment { layer }),
    ];
    for package in &config.environment.required_libs {
        if has_dedicated_check(package) {
            continue;
        }
        entries.push(Box::new(ReinstallLibrary::new(
            package,
            python.clone(),
            runner.clone(),
        )));
    }
    entries.push(Box::new(ReinstallTorch {
        python: python.clone(),
        cuda_index: config.environment.torch_cuda_index.clone(),
        cpu_index: config.environment.torch_cpu_index.clone(),
        runner: runner.clone(),
    }));
    entries.push(Box::new(InstallNativeWheel {
        python: python.clone(),
        wheel_index: config.environment.native_wheel_index.clone(),
        runner: runner.clone(),
    }));
    entries.push(Box::new(BuildNativeBackend {
        command: config.environment.native_build_line(&python),
        runner: runner.clone(),
    }));
    entries.push(Box::new(StartBackend {
        runner,
        backend,
        wait: Duration::from_secs(15),
    }));
    RemediationCatalog::new(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SetupError;

    struct Stub {
        key: &'static str,
        heavy: bool,
        fail: bool,
    }

    #[async_trait(?Send)]
    impl Remediation for Stub {
        fn key(&self) -> &str {
            self.key
        }

        fn label(&self) -> &str {
            self.key
        }

        fn heavy(&self) -> bool {
            self.heavy
        }

        async fn apply(&self) -> Result<RepairOutcome> {
            if self.fail {
                Err(SetupError::Generic("network down".to_string()))
            } else {
                Ok(RepairOutcome::fixed("done"))
            }
        }
    }

    fn catalog() -> RemediationCatalog {
        RemediationCatalog::new(vec![
            Box::new(Stub { key: "torch", heavy: true, fail: false }),
            Box::new(Stub { key: "folders", heavy: false, fail: false }),
            Box::new(Stub { key: "libs:numpy", heavy: false, fail: true }),
        ])
    }

    #[tokio::test]
    async fn test_repair_without_binding() {
        let item = DiagnosticItem::warn("GPU", "none");
        let outcome = catalog().repair(&item).await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "no automatic repair for GPU");
    }

    #[tokio::test]
    async fn test_repair_error_becomes_failed_outcome() {
        let item = DiagnosticItem::missing("Lib: numpy", "gone").with_remediation("libs:numpy");
        let outcome = catalog().repair(&item).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("network down"));
    }

    #[test]
    fn test_plan_dedupes_and_orders_heavy_last() {
        let items = vec![
            DiagnosticItem::missing("Lib: torch", "").with_remediation("torch"),
            DiagnosticItem::missing("Dir: models", "").with_remediation("folders"),
            DiagnosticItem::missing("Dir: notebooks", "").with_remediation("folders"),
            DiagnosticItem::missing("Tool: ollama", ""),
            DiagnosticItem::missing("Lib: numpy", "").with_remediation("libs:numpy"),
        ];
        assert_eq!(
            catalog().plan(&items),
            vec!["folders".to_string(), "libs:numpy".to_string(), "torch".to_string()]
        );
    }

    #[tokio::test]
    async fn test_create_folders() {
        let dir = tempfile::tempdir().unwrap();
        let fix = CreateFolders {
            root: dir.path().to_path_buf(),
            folders: vec!["data/raw".to_string(), "models".to_string()],
        };
        let outcome = fix.apply().await.unwrap();
        assert!(outcome.success);
        assert!(dir.path().join("data/raw").is_dir());
        assert!(dir.path().join("models").is_dir());
    }

    #[test]
    fn test_native_wheel_spec_uses_cuda_index_only_with_gpu() {
        let python = Path::new("/w/env/bin/python");
        assert_eq!(
            native_wheel_spec(python, Some("https://wheels.invalid/cu121"), false).display(),
            "uv pip install --python /w/env/bin/python --extra-index-url https://wheels.invalid/cu121 llama-cpp-python"
        );
        assert_eq!(
            native_wheel_spec(python, None, true).display(),
            "uv pip install --python /w/env/bin/python --reinstall llama-cpp-python"
        );
    }

    #[test]
    fn test_native_repairs_split_fast_and_source() {
        let mut config = Config::default();
        config.environment.dir = "envs/vlm".to_string();
        let catalog = default_remediations(
            &config,
            Path::new("/work"),
            Arc::new(crate::process::SystemRunner),
            Arc::new(crate::models::OllamaBackend::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap()),
            Arc::new(crate::bootstrap::UvEnvironment::new(
                &config,
                Path::new("/work"),
                Arc::new(crate::process::SystemRunner),
            )),
        );

        assert!(!catalog.is_heavy(keys::NATIVE_BACKEND));
        assert!(catalog.is_heavy(keys::NATIVE_BACKEND_SOURCE));
        assert!(catalog.get(&keys::library("torch")).is_none());
    }

    #[test]
    fn test_reinstall_spec() {
        let spec = reinstall_spec(
            Path::new("/w/.venv/bin/python"),
            &["torch".to_string()],
            &["--index-url", "https://example.invalid/cpu"],
        );
        assert_eq!(
            spec.display(),
            "uv pip install --python /w/.venv/bin/python --reinstall --index-url https://example.invalid/cpu torch"
        );
    }
}
