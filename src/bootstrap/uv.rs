//! `uv`-managed virtual environment

use crate::bootstrap::{env_python, EnvironmentLayer};
use crate::cli::Config;
use crate::doctor::checks::{gpu_present, has_dedicated_check};
use crate::doctor::repair::{native_wheel_spec, torch_spec};
use crate::errors::{Result, SetupError};
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Set on a relaunched process so it knows it is already isolated
pub const MARKER_VAR: &str = "VLMSETUP_ISOLATED";

const CREATE_TIMEOUT: Duration = Duration::from_secs(600);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(1800);

pub struct UvEnvironment {
    root: PathBuf,
    env_dir: PathBuf,
    python_version: String,
    required_libs: Vec<String>,
    folders: Vec<String>,
    torch_cuda_index: String,
    torch_cpu_index: String,
    native_wheel_index: String,
    runner: Arc<dyn CommandRunner>,
    inside: bool,
}

impl UvEnvironment {
    /// The marker is read once here, never re-read later
    pub fn new(config: &Config, root: &Path, runner: Arc<dyn CommandRunner>) -> Self {
        let inside = std::env::var(MARKER_VAR).map(|v| v == "1").unwrap_or(false);
        Self {
            root: root.to_path_buf(),
            env_dir: config.env_dir(root),
            python_version: config.environment.python.clone(),
            required_libs: config.environment.required_libs.clone(),
            folders: config.diagnostics.folders.clone(),
            torch_cuda_index: config.environment.torch_cuda_index.clone(),
            torch_cpu_index: config.environment.torch_cpu_index.clone(),
            native_wheel_index: config.environment.native_wheel_index.clone(),
            runner,
            inside,
        }
    }

    pub fn with_marker(mut self, inside: bool) -> Self {
        self.inside = inside;
        self
    }

    pub fn env_dir(&self) -> &Path {
        &self.env_dir
    }

    pub fn python(&self) -> PathBuf {
        env_python(&self.env_dir)
    }

    fn bin_dir(&self) -> PathBuf {
        self.python()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.env_dir.clone())
    }

    /// Install command for the declared dependency set
    ///
    /// Torch and the native binding are left out; they need their own indexes.
    pub fn install_spec(&self, reinstall: bool) -> CommandSpec {
        if self.root.join("pyproject.toml").exists() {
            let mut args = vec!["sync".to_string()];
            if reinstall {
                args.push("--reinstall".to_string());
            }
            return CommandSpec::new("uv", args)
                .env("UV_PROJECT_ENVIRONMENT", self.env_dir.to_string_lossy())
                .timeout(INSTALL_TIMEOUT);
        }
        let mut args = vec![
            "pip".to_string(),
            "install".to_string(),
            "--python".to_string(),
            self.python().to_string_lossy().into_owned(),
        ];
        if reinstall {
            args.push("--reinstall".to_string());
        }
        args.extend(
            self.required_libs
                .iter()
                .filter(|p| !has_dedicated_check(p))
                .cloned(),
        );
        CommandSpec::new("uv", args).timeout(INSTALL_TIMEOUT)
    }

    /// Every install command of a full provisioning pass, in order
    pub fn provision_specs(&self, reinstall: bool, gpu: bool) -> Vec<CommandSpec> {
        let python = self.python();
        let torch_index = if gpu {
            &self.torch_cuda_index
        } else {
            &self.torch_cpu_index
        };
        let wheel_index = gpu.then_some(self.native_wheel_index.as_str());
        vec![
            self.install_spec(reinstall),
            torch_spec(&python, torch_index, reinstall),
            native_wheel_spec(&python, wheel_index, reinstall),
        ]
    }

    async fn create_folders(&self) -> Result<()> {
        for folder in &self.folders {
            tokio::fs::create_dir_all(self.root.join(folder)).await?;
        }
        Ok(())
    }

    fn relaunch_command(&self, argv: &[String]) -> Result<std::process::Command> {
        let exe = std::env::current_exe()?;
        let mut paths = vec![self.bin_dir()];
        if let Some(existing) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        let path = std::env::join_paths(paths)
            .map_err(|e| SetupError::Bootstrap(format!("invalid PATH: {}", e)))?;

        let mut cmd = std::process::Command::new(exe);
        cmd.args(argv.iter().skip(1))
            .current_dir(&self.root)
            .env(MARKER_VAR, "1")
            .env("VIRTUAL_ENV", &self.env_dir)
            .env("PATH", path);
        Ok(cmd)
    }
}

#[async_trait]
impl EnvironmentLayer for UvEnvironment {
    fn is_inside(&self) -> bool {
        self.inside
    }

    fn exists(&self) -> bool {
        self.python().exists()
    }

    async fn create(&self) -> Result<()> {
        let spec = CommandSpec::new(
            "uv",
            [
                "venv".to_string(),
                self.env_dir.to_string_lossy().into_owned(),
                "--python".to_string(),
                self.python_version.clone(),
            ],
        )
        .timeout(CREATE_TIMEOUT);
        self.runner.run(&spec).await?.check(&spec)?;
        tracing::info!(path = %self.env_dir.display(), "environment created");
        Ok(())
    }

    async fn install_declared_dependencies(&self, reinstall: bool) -> Result<()> {
        self.create_folders().await?;
        let gpu = gpu_present(self.runner.as_ref()).await;
        for spec in self.provision_specs(reinstall, gpu) {
            tracing::info!(command = %spec.display(), "installing");
            self.runner.run(&spec).await?.check(&spec)?;
        }
        tracing::info!(reinstall, gpu, "dependencies installed");
        Ok(())
    }

    #[cfg(unix)]
    fn reexec(&self, argv: &[String]) -> Result<i32> {
        use std::os::unix::process::CommandExt;

        let err = self.relaunch_command(argv)?.exec();
        Err(SetupError::Bootstrap(format!("re-exec failed: {}", err)))
    }

    #[cfg(not(unix))]
    fn reexec(&self, argv: &[String]) -> Result<i32> {
        let status = self
            .relaunch_command(argv)?
            .status()
            .map_err(|e| SetupError::Bootstrap(format!("relaunch failed: {}", e)))?;
        Ok(status.code().unwrap_or(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandOutput, SystemRunner};
    use std::sync::Mutex;

    fn env_in(root: &Path) -> UvEnvironment {
        UvEnvironment::new(&Config::default(), root, Arc::new(SystemRunner)).with_marker(false)
    }

    /// Records commands; `nvidia-smi` reports a GPU when `gpu` is set
    #[derive(Default)]
    struct Recorder {
        gpu: bool,
        seen: Mutex<Vec<CommandSpec>>,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.seen.lock().unwrap().push(spec.clone());
            let stdout = if spec.program == "nvidia-smi" && self.gpu {
                "GPU 0: NVIDIA RTX 4090".to_string()
            } else {
                String::new()
            };
            let exit_code = if spec.program == "nvidia-smi" && !self.gpu { 9 } else { 0 };
            Ok(CommandOutput {
                exit_code,
                stdout,
                stderr: String::new(),
            })
        }

        fn spawn_detached(&self, _spec: &CommandSpec) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sync_targets_configured_env_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "[project]\nname = \"x\"\n").unwrap();
        let mut config = Config::default();
        config.environment.dir = "envs/vlm".to_string();
        let env = UvEnvironment::new(&config, dir.path(), Arc::new(SystemRunner));

        let spec = env.install_spec(false);

        let expected = dir.path().join("envs/vlm").to_string_lossy().into_owned();
        assert!(spec
            .envs
            .contains(&("UV_PROJECT_ENVIRONMENT".to_string(), expected)));
    }

    #[test]
    fn test_pip_install_leaves_out_dedicated_packages() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.environment.required_libs = vec![
            "numpy".to_string(),
            "torch".to_string(),
            "llama-cpp-python".to_string(),
        ];
        let env = UvEnvironment::new(&config, dir.path(), Arc::new(SystemRunner));

        let spec = env.install_spec(false);

        assert!(spec.args.contains(&"numpy".to_string()));
        assert!(!spec.args.contains(&"torch".to_string()));
        assert!(!spec.args.contains(&"llama-cpp-python".to_string()));
    }

    #[tokio::test]
    async fn test_first_run_provisions_folders_torch_and_native_wheel() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Recorder {
            gpu: true,
            ..Recorder::default()
        });
        let config = Config::default();
        let env = UvEnvironment::new(&config, dir.path(), runner.clone()).with_marker(false);

        env.install_declared_dependencies(false).await.unwrap();

        for folder in &config.diagnostics.folders {
            assert!(dir.path().join(folder).is_dir(), "{} missing", folder);
        }
        let lines: Vec<String> = runner.seen.lock().unwrap().iter().map(CommandSpec::display).collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("nvidia-smi"));
        assert!(lines[1].starts_with("uv pip install"));
        assert!(lines[2].contains(&config.environment.torch_cuda_index));
        assert!(lines[2].ends_with("torch torchvision"));
        assert!(lines[3].contains(&format!("--extra-index-url {}", config.environment.native_wheel_index)));
        assert!(lines[3].ends_with("llama-cpp-python"));
    }

    #[tokio::test]
    async fn test_first_run_without_gpu_uses_cpu_wheels() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(Recorder::default());
        let config = Config::default();
        let env = UvEnvironment::new(&config, dir.path(), runner.clone()).with_marker(false);

        env.install_declared_dependencies(true).await.unwrap();

        let lines: Vec<String> = runner.seen.lock().unwrap().iter().map(CommandSpec::display).collect();
        assert!(lines[2].contains(&config.environment.torch_cpu_index));
        assert!(!lines[3].contains("--extra-index-url"));
        assert!(lines[1..].iter().all(|l| l.contains("--reinstall")));
    }

    #[test]
    fn test_install_spec_without_project_file() {
        let dir = tempfile::tempdir().unwrap();
        let spec = env_in(dir.path()).install_spec(true);
        assert_eq!(spec.program, "uv");
        assert_eq!(&spec.args[..2], &["pip".to_string(), "install".to_string()]);
        assert!(spec.args.contains(&"--reinstall".to_string()));
        assert!(spec.args.contains(&"numpy".to_string()));
    }

    #[test]
    fn test_install_spec_prefers_sync() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "[project]\nname = \"x\"\n").unwrap();
        let spec = env_in(dir.path()).install_spec(false);
        assert_eq!(spec.args, vec!["sync".to_string()]);
    }

    #[test]
    fn test_exists_follows_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_in(dir.path());
        assert!(!env.exists());
        let python = env.python();
        std::fs::create_dir_all(python.parent().unwrap()).unwrap();
        std::fs::write(&python, b"").unwrap();
        assert!(env.exists());
    }

    #[test]
    fn test_marker_override() {
        let dir = tempfile::tempdir().unwrap();
        assert!(env_in(dir.path()).with_marker(true).is_inside());
    }
}
