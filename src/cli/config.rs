//! Configuration management for vlmsetup
//!
//! Provides TOML-based configuration with defaults and validation.
//! Lookup order: `--config`, `./vlmsetup.toml`, `~/.vlmsetup/config.toml`,
//! then built-in defaults.

use crate::errors::{Result, SetupError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Project-local config file name
pub const LOCAL_CONFIG_FILE: &str = "vlmsetup.toml";

/// Complete configuration for vlmsetup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub environment: EnvironmentConfig,
    pub paths: PathsConfig,
    pub diagnostics: DiagnosticsConfig,
    pub smoke: SmokeConfig,
    pub models: Vec<ModelArtifact>,
}

/// Inference backend connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    /// How long the backend keeps a preloaded model resident
    pub keep_alive: String,
}

/// Isolated Python environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub dir: String,
    pub python: String,
    pub required_libs: Vec<String>,
    pub torch_cuda_index: String,
    pub torch_cpu_index: String,
    /// Extra index serving prebuilt CUDA wheels of the native binding
    pub native_wheel_index: String,
    /// Shell command that compiles the native binding from source;
    /// `{python}` expands to the environment interpreter
    pub native_build_command: String,
}

/// File system paths, relative to the project root unless absolute or `~/`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub models_dir: String,
    pub samples_dir: String,
    pub log_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub folders: Vec<String>,
    pub min_free_disk_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmokeConfig {
    pub prompt: String,
    pub temperature: f32,
    pub default_model: Option<String>,
}

/// One entry of the model catalog.
///
/// File artifacts carry `family`, `file` and `url` and are stored under
/// `models/<family>/`. Backend entries carry only `tag` and are pulled
/// through the inference backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub projector: Option<ProjectorFile>,
    #[serde(default)]
    pub tag: Option<String>,
}

/// Vision projector (mmproj) shipped next to a model file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectorFile {
    pub file: String,
    pub url: String,
}

impl ModelArtifact {
    /// Backend tag for registry-pulled models
    pub fn backend_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn file_artifact(
        id: &str,
        name: &str,
        family: &str,
        file: &str,
        url: &str,
        size_gb: f64,
        description: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            size_bytes: Some((size_gb * 1024.0 * 1024.0 * 1024.0) as u64),
            family: Some(family.to_string()),
            file: Some(file.to_string()),
            url: Some(url.to_string()),
            projector: None,
            tag: None,
        }
    }

    fn backend_model(tag: &str, name: &str, size_gb: f64, description: &str) -> Self {
        Self {
            id: tag.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            size_bytes: Some((size_gb * 1024.0 * 1024.0 * 1024.0) as u64),
            family: None,
            file: None,
            url: None,
            projector: None,
            tag: Some(tag.to_string()),
        }
    }

    fn with_projector(mut self, file: &str, url: &str) -> Self {
        self.projector = Some(ProjectorFile {
            file: file.to_string(),
            url: url.to_string(),
        });
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            environment: EnvironmentConfig::default(),
            paths: PathsConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            smoke: SmokeConfig::default(),
            models: default_catalog(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11434,
            request_timeout_secs: 120,
            keep_alive: "10m".to_string(),
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            dir: ".venv".to_string(),
            python: "3.12".to_string(),
            required_libs: ["numpy", "pillow", "requests", "tqdm", "psutil", "pytest"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            torch_cuda_index: "https://download.pytorch.org/whl/cu121".to_string(),
            torch_cpu_index: "https://download.pytorch.org/whl/cpu".to_string(),
            native_wheel_index: "https://abetlen.github.io/llama-cpp-python/whl/cu121".to_string(),
            native_build_command:
                "CMAKE_ARGS=\"-DGGML_CUDA=on\" FORCE_CMAKE=1 uv pip install --python \"{python}\" --no-binary llama-cpp-python --reinstall llama-cpp-python"
                    .to_string(),
        }
    }
}

impl EnvironmentConfig {
    /// The source build command for the interpreter at `python`
    pub fn native_build_line(&self, python: &Path) -> String {
        self.native_build_command
            .replace("{python}", &python.to_string_lossy())
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            models_dir: "models".to_string(),
            samples_dir: "data/samples".to_string(),
            log_file: "~/.vlmsetup/logs/vlmsetup.log".to_string(),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            folders: [
                "data/raw",
                "data/processed",
                "models",
                "src/preprocessing",
                "src/inference",
                "notebooks",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            min_free_disk_gb: 10.0,
        }
    }
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            prompt: "Describe this image in detail. Answer in JSON with the fields \
                     polyp_detected (bool), confidence_score (0-100) and justification (text)."
                .to_string(),
            temperature: 0.1,
            default_model: None,
        }
    }
}

fn default_catalog() -> Vec<ModelArtifact> {
    vec![
        ModelArtifact::file_artifact(
            "minicpm_v26_q8",
            "MiniCPM-V 2.6 Q8",
            "minicpm_v26",
            "MiniCPM-V-2_6-Q8_0.gguf",
            "https://huggingface.co/openbmb/MiniCPM-V-2_6-gguf/resolve/main/ggml-model-Q8_0.gguf?download=true",
            8.1,
            "Stable release, fits 8 GB VRAM",
        )
        .with_projector(
            "mmproj-model-f16.gguf",
            "https://huggingface.co/openbmb/MiniCPM-V-2_6-gguf/resolve/main/mmproj-model-f16.gguf?download=true",
        ),
        ModelArtifact::file_artifact(
            "minicpm_v45_q8",
            "MiniCPM-V 4.5 Q8",
            "minicpm_v45",
            "MiniCPM-V-4_5-Q8_0.gguf",
            "https://huggingface.co/openbmb/MiniCPM-V-4_5-gguf/resolve/main/MiniCPM-V-4_5-Q8_0.gguf?download=true",
            8.7,
            "Beta, needs its own projector",
        )
        .with_projector(
            "mmproj-model-f16.gguf",
            "https://huggingface.co/openbmb/MiniCPM-V-4_5-gguf/resolve/main/mmproj-model-f16.gguf?download=true",
        ),
        ModelArtifact::file_artifact(
            "qwen3_vl_8b_q8",
            "Qwen3-VL 8B Q8",
            "qwen3_vl",
            "Qwen3VL-8B-Instruct-Q8_0.gguf",
            "https://huggingface.co/Qwen/Qwen3-VL-8B-Instruct-GGUF/resolve/main/Qwen3VL-8B-Instruct-Q8_0.gguf?download=true",
            8.7,
            "Strong visual reasoning",
        ),
        ModelArtifact::file_artifact(
            "internvl3_5_8b_q8",
            "InternVL3.5 8B Q8",
            "internvl3_5",
            "InternVL3_5-8B.Q8_0.gguf",
            "https://huggingface.co/mradermacher/InternVL3_5-8B-GGUF/resolve/main/InternVL3_5-8B.Q8_0.gguf?download=true",
            8.7,
            "High precision, high VRAM",
        ),
        ModelArtifact::backend_model("qwen2.5vl:7b", "Qwen2.5-VL 7B", 6.0, "Served by the local backend"),
        ModelArtifact::backend_model("llava:7b", "LLaVA 7B", 4.7, "Served by the local backend"),
    ]
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(config_path) = path {
            return Self::load_from_file(config_path);
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Self::load_from_file(&local);
        }

        Self::load_default()
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SetupError::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| SetupError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `~/.vlmsetup/config.toml` or use built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".vlmsetup").join("config.toml");
            if config_path.exists() {
                return Self::load_from_file(&config_path);
            }
        }

        Ok(Config::default())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.backend.port == 0 {
            return Err(SetupError::Config("backend.port must be greater than 0".to_string()));
        }

        if self.backend.request_timeout_secs == 0 {
            return Err(SetupError::Config(
                "backend.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.environment.dir.trim().is_empty() {
            return Err(SetupError::Config("environment.dir must not be empty".to_string()));
        }

        if !(0.0..=2.0).contains(&self.smoke.temperature) {
            return Err(SetupError::Config(
                "smoke.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.diagnostics.min_free_disk_gb < 0.0 {
            return Err(SetupError::Config(
                "diagnostics.min_free_disk_gb must not be negative".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if !seen.insert(model.id.as_str()) {
                return Err(SetupError::Config(format!("Duplicate model id: {}", model.id)));
            }

            let is_file = model.family.is_some() && model.file.is_some() && model.url.is_some();
            if is_file == model.tag.is_some() {
                return Err(SetupError::Config(format!(
                    "Model '{}' needs either family/file/url or a backend tag",
                    model.id
                )));
            }
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| SetupError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SetupError::Config(format!("Failed to create config dir: {}", e)))?;
        }

        std::fs::write(path, contents)
            .map_err(|e| SetupError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Get backend base URL
    pub fn backend_url(&self) -> String {
        format!("http://{}:{}", self.backend.host, self.backend.port)
    }

    /// Expand tilde and resolve relative paths against `root`
    pub fn expand_path(path: &str, root: &Path) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        let path = PathBuf::from(path);
        if path.is_absolute() {
            path
        } else {
            root.join(path)
        }
    }

    pub fn env_dir(&self, root: &Path) -> PathBuf {
        Self::expand_path(&self.environment.dir, root)
    }

    pub fn models_dir(&self, root: &Path) -> PathBuf {
        Self::expand_path(&self.paths.models_dir, root)
    }

    pub fn samples_dir(&self, root: &Path) -> PathBuf {
        Self::expand_path(&self.paths.samples_dir, root)
    }

    pub fn log_file(&self, root: &Path) -> PathBuf {
        Self::expand_path(&self.paths.log_file, root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backend.host, "127.0.0.1");
        assert_eq!(config.backend.port, 11434);
        assert_eq!(config.environment.dir, ".venv");
        assert_eq!(config.diagnostics.folders.len(), 6);
    }

    #[test]
    fn test_config_validation_success() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_port() {
        let mut config = Config::default();
        config.backend.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_temperature() {
        let mut config = Config::default();
        config.smoke.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_duplicate_model() {
        let mut config = Config::default();
        let first = config.models[0].clone();
        config.models.push(first);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_model_needs_source() {
        let mut config = Config::default();
        config.models[0].tag = Some("also-a-tag".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_native_build_line_follows_env_dir() {
        let mut config = Config::default();
        config.environment.dir = "envs/vlm".to_string();
        let python = crate::bootstrap::env_python(&config.env_dir(Path::new("/work")));

        let line = config.environment.native_build_line(&python);

        assert!(line.contains(&format!("--python \"{}\"", python.display())));
        assert!(!line.contains("{python}"));
        assert!(!line.contains(".venv"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [backend]
            port = 8080

            [diagnostics]
            min_free_disk_gb = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.port, 8080);
        assert_eq!(config.backend.host, "127.0.0.1");
        assert_eq!(config.diagnostics.min_free_disk_gb, 2.5);
        assert!(!config.diagnostics.folders.is_empty());
        assert!(!config.models.is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vlmsetup.toml");
        let mut config = Config::default();
        config.smoke.default_model = Some("llava:7b".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.smoke.default_model.as_deref(), Some("llava:7b"));
        assert_eq!(loaded.models, config.models);
    }

    #[test]
    fn test_backend_url() {
        let config = Config::default();
        assert_eq!(config.backend_url(), "http://127.0.0.1:11434");
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = Config::expand_path("~/.vlmsetup", Path::new("/project"));
        assert!(!expanded.to_string_lossy().contains('~'));
    }

    #[test]
    fn test_expand_path_relative_to_root() {
        let expanded = Config::expand_path("models", Path::new("/project"));
        assert_eq!(expanded, PathBuf::from("/project/models"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let expanded = Config::expand_path("/absolute/path", Path::new("/project"));
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }
}
