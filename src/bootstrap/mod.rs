//! Bootstrap system for vlmsetup
//!
//! Guarantees the manager runs inside its isolated environment. Outside it,
//! the environment is created on first run and the process re-executes
//! itself inside; inside it, nothing happens. Restarts after a repair use
//! the same re-exec primitive.

pub mod uv;

pub use uv::{UvEnvironment, MARKER_VAR};

use crate::errors::{Result, SetupError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// The isolated environment the manager runs in
#[async_trait]
pub trait EnvironmentLayer: Send + Sync {
    /// Whether the current process already runs inside the environment
    fn is_inside(&self) -> bool;

    /// Whether the environment exists on disk
    fn exists(&self) -> bool;

    async fn create(&self) -> Result<()>;

    /// Install the declared dependency set, optionally forcing reinstall
    async fn install_declared_dependencies(&self, reinstall: bool) -> Result<()>;

    /// Relaunch this program inside the environment with `argv` (argv[0]
    /// included). Returns the child's exit code where the platform cannot
    /// replace the process image.
    fn reexec(&self, argv: &[String]) -> Result<i32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    /// Already isolated; continue normally
    Inside,
    /// A relaunched copy ran and finished with this exit code
    Relaunched(i32),
}

/// Interpreter path inside an environment directory
pub fn env_python(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_dir.join("Scripts").join("python.exe")
    } else {
        env_dir.join("bin").join("python")
    }
}

/// Make sure we run isolated, creating the environment if needed.
pub async fn ensure_environment(
    layer: &dyn EnvironmentLayer,
    argv: &[String],
) -> Result<EnvironmentState> {
    if layer.is_inside() {
        tracing::debug!("already inside isolated environment");
        return Ok(EnvironmentState::Inside);
    }

    if !layer.exists() {
        tracing::info!("isolated environment missing, creating it");
        layer
            .create()
            .await
            .map_err(|e| SetupError::Bootstrap(format!("environment creation failed: {}", e)))?;
        layer
            .install_declared_dependencies(false)
            .await
            .map_err(|e| SetupError::Bootstrap(format!("dependency install failed: {}", e)))?;
        if !layer.exists() {
            return Err(SetupError::Bootstrap(
                "environment was not created properly".to_string(),
            ));
        }
    }

    tracing::info!("relaunching inside isolated environment");
    let code = layer.reexec(argv)?;
    Ok(EnvironmentState::Relaunched(code))
}

/// Relaunch the current program after a repair that needs a fresh process
pub fn restart(layer: &dyn EnvironmentLayer, argv: &[String]) -> Result<i32> {
    tracing::info!("restarting to apply changes");
    layer.reexec(argv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_python_layout() {
        let python = env_python(Path::new("/work/.venv"));
        if cfg!(windows) {
            assert!(python.ends_with("Scripts/python.exe"));
        } else {
            assert_eq!(python, PathBuf::from("/work/.venv/bin/python"));
        }
    }
}
