//! Interactive manager
//!
//! Owns the long-lived collaborators (diagnostics, repairs, model manager,
//! the inference session) and exposes them as a static menu tree. Every leaf
//! is a [`ManagerAction`] pointing back at the shared [`Manager`].

mod actions;

use crate::bootstrap::EnvironmentLayer;
use crate::cli::Config;
use crate::doctor::checks::keys;
use crate::doctor::{default_checks, default_remediations, Diagnostics, DiagnosticReport, RemediationCatalog};
use crate::errors::Result;
use crate::inference::{InferenceBackend, InferenceSession};
use crate::menu::{ActionContext, MenuAction, MenuNode, MenuResult};
use crate::models::ModelManager;
use crate::process::CommandRunner;
use crate::smoke::SampleFetcher;
use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

pub const TITLE: &str = "VLM Environment Manager";

const SAMPLE_TIMEOUT: Duration = Duration::from_secs(30);

/// User-adjustable switches shown under Settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Ask before long-running repairs
    pub confirm_heavy: Rc<Cell<bool>>,
    /// Include OK rows in diagnostic reports
    pub show_passing: Rc<Cell<bool>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            confirm_heavy: Rc::new(Cell::new(true)),
            show_passing: Rc::new(Cell::new(true)),
        }
    }
}

pub struct Manager {
    config: Config,
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
    layer: Arc<dyn EnvironmentLayer>,
    diagnostics: Diagnostics,
    remediations: RemediationCatalog,
    models: ModelManager,
    fetcher: SampleFetcher,
    session: tokio::sync::Mutex<InferenceSession>,
    last_report: RefCell<Option<DiagnosticReport>>,
    settings: Settings,
}

impl Manager {
    pub fn new(
        config: Config,
        root: PathBuf,
        runner: Arc<dyn CommandRunner>,
        backend: Arc<dyn InferenceBackend>,
        layer: Arc<dyn EnvironmentLayer>,
    ) -> Result<Self> {
        let diagnostics = Diagnostics::new(default_checks(
            &config,
            &root,
            runner.clone(),
            backend.clone(),
        ));
        let remediations = default_remediations(
            &config,
            &root,
            runner.clone(),
            backend.clone(),
            layer.clone(),
        );
        let models = ModelManager::new(config.models.clone(), config.models_dir(&root), backend.clone())?;
        let fetcher = SampleFetcher::new(SAMPLE_TIMEOUT)?;

        Ok(Self {
            config,
            root,
            runner,
            layer,
            diagnostics,
            remediations,
            models,
            fetcher,
            session: tokio::sync::Mutex::new(InferenceSession::new(backend)),
            last_report: RefCell::new(None),
            settings: Settings::default(),
        })
    }

    /// Swap the check and repair catalogs
    pub fn with_doctor(mut self, diagnostics: Diagnostics, remediations: RemediationCatalog) -> Self {
        self.diagnostics = diagnostics;
        self.remediations = remediations;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Most recent diagnostic report, with repaired rows refreshed
    pub fn last_report(&self) -> Option<DiagnosticReport> {
        self.last_report.borrow().clone()
    }

    /// Release the loaded model. Call before exiting or restarting.
    pub async fn shutdown(&self) {
        if let Err(e) = self.session.lock().await.release().await {
            tracing::warn!(error = %e, "failed to release model on shutdown");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    RunDiagnostics,
    SmartFix,
    RepairOne,
    RunUnitTests,
    RunTestFile,
    SmokeTest,
    ManageModels,
    ReinstallLibraries,
    ReinstallTorch,
    ReinstallNative,
    InstallUv,
    RegenerateFolders,
    FactoryReset,
    Exit,
}

pub struct ManagerAction {
    manager: Rc<Manager>,
    kind: ActionKind,
}

#[async_trait(?Send)]
impl MenuAction for ManagerAction {
    async fn run(&self, ctx: &mut ActionContext<'_>) -> Result<MenuResult> {
        let m = &self.manager;
        match self.kind {
            ActionKind::RunDiagnostics => m.run_diagnostics(ctx).await,
            ActionKind::SmartFix => m.smart_fix(ctx).await,
            ActionKind::RepairOne => m.repair_one(ctx).await,
            ActionKind::RunUnitTests => m.run_unit_tests(ctx).await,
            ActionKind::RunTestFile => m.run_test_file(ctx).await,
            ActionKind::SmokeTest => m.smoke_test(ctx).await,
            ActionKind::ManageModels => m.manage_models(ctx).await,
            ActionKind::ReinstallLibraries => m.reinstall_libraries(ctx).await,
            ActionKind::ReinstallTorch => m.apply_named(ctx, keys::TORCH).await,
            ActionKind::ReinstallNative => m.reinstall_native(ctx).await,
            ActionKind::InstallUv => m.apply_named(ctx, keys::UV).await,
            ActionKind::RegenerateFolders => m.apply_named(ctx, keys::FOLDERS).await,
            ActionKind::FactoryReset => m.factory_reset(ctx).await,
            ActionKind::Exit => Ok(MenuResult::Exit(0)),
        }
    }
}

/// The full menu tree bound to `manager`
pub fn build_menu(manager: &Rc<Manager>) -> MenuNode {
    let action = |key: &str, label: &str, description: &str, kind: ActionKind| {
        MenuNode::action(
            key,
            label,
            description,
            ManagerAction {
                manager: manager.clone(),
                kind,
            },
        )
    };
    let settings = manager.settings();

    MenuNode::submenu(
        "root",
        TITLE,
        "",
        vec![
            MenuNode::submenu(
                "diagnostics",
                "System Diagnostics",
                "Probe folders, tools, libraries, GPU and the backend",
                vec![
                    action("run", "Run diagnostics", "Run every check and show the report", ActionKind::RunDiagnostics),
                    action("smart-fix", "Smart fix", "Select and apply repairs for failing checks", ActionKind::SmartFix),
                    action("repair-one", "Repair one item", "Repair a single failing check", ActionKind::RepairOne),
                ],
            ),
            MenuNode::submenu(
                "tests",
                "Tests & Models",
                "Unit tests, smoke test and model downloads",
                vec![
                    action("pytest", "Run all unit tests", "pytest over tests/", ActionKind::RunUnitTests),
                    action("pytest-file", "Run a test file", "Pick one tests/test_*.py file", ActionKind::RunTestFile),
                    action("smoke", "Run smoke test", "Inference over the sample images", ActionKind::SmokeTest),
                    action("models", "Manage models", "List and download models", ActionKind::ManageModels),
                ],
            ),
            MenuNode::submenu(
                "reinstall",
                "Manual Reinstall",
                "Force clean reinstalls",
                vec![
                    action("core-libs", "Core libraries", "Select libraries to reinstall", ActionKind::ReinstallLibraries),
                    action("torch", "Torch", "Reinstall torch for the detected hardware", ActionKind::ReinstallTorch),
                    action("native", "Native backend", "Prebuilt wheel, or compile from source", ActionKind::ReinstallNative),
                    action("uv", "uv", "Install the uv package manager", ActionKind::InstallUv),
                ],
            ),
            action("folders", "Regenerate folders", "Create any missing project folder", ActionKind::RegenerateFolders),
            action("reset", "Factory reset", "Reinstall every declared dependency", ActionKind::FactoryReset),
            MenuNode::submenu(
                "settings",
                "Settings",
                "Manager preferences",
                vec![
                    MenuNode::toggle(
                        "confirm-heavy",
                        "Confirm heavy repairs",
                        "Ask before torch reinstalls and native compiles",
                        settings.confirm_heavy.clone(),
                    ),
                    MenuNode::toggle(
                        "show-passing",
                        "Show passing checks",
                        "Include OK rows in diagnostic reports",
                        settings.show_passing.clone(),
                    ),
                ],
            ),
            action("exit", "Exit", "Leave the manager", ActionKind::Exit),
        ],
    )
}
