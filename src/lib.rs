//! vlmsetup - Local VLM environment manager
//!
//! Bootstraps an isolated Python environment, diagnoses and repairs it,
//! manages inference models and drives smoke tests, all from one
//! interactive terminal menu.
//!
//! # Architecture
//!
//! - **menu**: navigation state machine, diffing renderer, input
//! - **doctor**: capability checks and the remediation catalog
//! - **bootstrap**: isolated-environment detection and re-exec
//! - **models** / **inference**: model catalog, downloads, backend seam
//! - **smoke**: end-to-end inference over sample images
//! - **manager**: the menu tree wiring everything together

pub mod errors;
pub mod cli;
pub mod logging;
pub mod process;

pub mod menu;
pub mod doctor;
pub mod bootstrap;
pub mod inference;
pub mod models;
pub mod smoke;
pub mod manager;

// Re-export commonly used types
pub use errors::{Result, SetupError};
