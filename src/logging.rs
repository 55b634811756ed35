//! Tracing subscriber setup.
//!
//! The interactive manager owns stdout, so structured logs always go to a
//! file. Filter priority: `VLMSETUP_LOG`, then `RUST_LOG`, then the CLI
//! verbosity flags.

use crate::cli::Verbosity;
use crate::errors::{Result, SetupError};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Project-specific filter variable
pub const LOG_ENV_VAR: &str = "VLMSETUP_LOG";

impl Verbosity {
    /// Map to a default `tracing::Level`.
    pub fn default_level(self) -> Level {
        match self {
            Verbosity::Quiet => Level::ERROR,
            Verbosity::Normal => Level::INFO,
            Verbosity::Verbose => Level::DEBUG,
            Verbosity::VeryVerbose => Level::TRACE,
        }
    }
}

/// Install the global subscriber writing to `log_file`.
///
/// Fails if the file cannot be opened or a subscriber is already set.
pub fn init_subscriber(verbosity: Verbosity, log_file: &Path) -> Result<()> {
    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(log_file)?;

    let fmt_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(build_env_filter(verbosity))
        .with(fmt_layer)
        .try_init()
        .map_err(|e| SetupError::Generic(format!("Failed to install log subscriber: {}", e)))
}

fn build_env_filter(verbosity: Verbosity) -> EnvFilter {
    if let Ok(directives) = std::env::var(LOG_ENV_VAR) {
        if let Ok(filter) = EnvFilter::try_new(&directives) {
            return filter;
        }
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let level = verbosity.default_level();
    EnvFilter::try_new(default_directive(verbosity)).unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Our own crate at the CLI level, dependencies one notch quieter.
fn default_directive(verbosity: Verbosity) -> String {
    let level = verbosity.default_level();
    let deps = match verbosity {
        Verbosity::Quiet => Level::ERROR,
        Verbosity::Normal | Verbosity::Verbose => Level::WARN,
        Verbosity::VeryVerbose => Level::DEBUG,
    };
    format!("{deps},vlmsetup={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_levels() {
        assert_eq!(Verbosity::Quiet.default_level(), Level::ERROR);
        assert_eq!(Verbosity::Normal.default_level(), Level::INFO);
        assert_eq!(Verbosity::Verbose.default_level(), Level::DEBUG);
        assert_eq!(Verbosity::VeryVerbose.default_level(), Level::TRACE);
    }

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(Verbosity::Normal), "WARN,vlmsetup=INFO");
        assert_eq!(default_directive(Verbosity::Quiet), "ERROR,vlmsetup=ERROR");
    }

    #[test]
    fn test_directives_parse() {
        for verbosity in [
            Verbosity::Quiet,
            Verbosity::Normal,
            Verbosity::Verbose,
            Verbosity::VeryVerbose,
        ] {
            assert!(EnvFilter::try_new(default_directive(verbosity)).is_ok());
        }
    }
}
