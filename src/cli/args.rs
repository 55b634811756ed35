//! Command-line argument parsing for vlmsetup
//!
//! No subcommand launches the interactive manager. `smoke`, `doctor` and
//! `models` run without taking over the terminal.

use crate::cli::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// vlmsetup - Bootstrap, diagnose and repair a local VLM inference environment
#[derive(Parser, Debug)]
#[command(name = "vlmsetup")]
#[command(version)]
#[command(about = "Bootstrap, diagnose and repair a local vision-model inference environment", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Inference backend host (overrides config)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Inference backend port (overrides config)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Log verbosity: -v (debug), -vv (trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the smoke-test suite; exits 0 only when every case passes
    Smoke {
        /// Model identifier to test
        #[arg(short, long)]
        model: Option<String>,

        /// Pick the model from the installed list interactively
        #[arg(short, long)]
        interactive: bool,
    },

    /// Run environment diagnostics and print the report
    Doctor,

    /// List catalog and backend models
    Models {
        /// Download the given model identifier
        #[arg(long, value_name = "ID")]
        download: Option<String>,
    },
}

/// Verbosity level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}

impl Args {
    /// Get verbosity level based on flags
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::VeryVerbose,
            }
        }
    }

    /// Whether this invocation takes over the terminal
    pub fn is_interactive(&self) -> bool {
        self.command.is_none()
    }

    /// Apply command-line overrides on top of the loaded config
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.backend.host = host.clone();
        }
        if let Some(port) = self.port {
            config.backend.port = port;
        }
    }
}

impl Verbosity {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "quiet",
            Verbosity::Normal => "normal",
            Verbosity::Verbose => "verbose",
            Verbosity::VeryVerbose => "very_verbose",
        }
    }

    /// Check if should show progress bars
    pub fn show_progress(&self) -> bool {
        !matches!(self, Verbosity::Quiet)
    }
}
