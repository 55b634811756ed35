//! vlmsetup - Main CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use vlmsetup::{
    bootstrap::{self, EnvironmentLayer, EnvironmentState, UvEnvironment},
    cli::{Args, Commands, Config, Verbosity},
    doctor::{default_checks, DiagnosticStatus, Diagnostics},
    inference::{InferenceBackend, InferenceSession},
    logging,
    manager::{build_menu, Manager, TITLE},
    menu::{ActionContext, Engine, EngineOutcome, Terminal, TerminalGuard},
    models::{DownloadProgress, ModelManager, OllamaBackend},
    process::{CommandRunner, SystemRunner},
    smoke::{self, SampleFetcher, SmokeEvent},
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let root = std::env::current_dir().context("cannot determine the working directory")?;

    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply_overrides(&mut config);
    config.validate().context("invalid configuration")?;

    if let Err(e) = logging::init_subscriber(args.verbosity(), &config.log_file(&root)) {
        eprintln!("{} logging disabled: {}", "⚠".yellow(), e);
    }
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        command = ?args.command,
        root = %root.display(),
        "vlmsetup starting"
    );

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let backend: Arc<dyn InferenceBackend> = Arc::new(
        OllamaBackend::new(
            &config.backend_url(),
            Duration::from_secs(config.backend.request_timeout_secs),
        )?
        .with_keep_alive(&config.backend.keep_alive)
        .with_temperature(config.smoke.temperature),
    );
    let layer: Arc<dyn EnvironmentLayer> =
        Arc::new(UvEnvironment::new(&config, &root, runner.clone()));
    let argv: Vec<String> = std::env::args().collect();

    let code = match &args.command {
        Some(Commands::Doctor) => run_doctor(&args, &config, &root, runner, backend).await,
        Some(Commands::Models { download }) => {
            run_models(&args, &config, &root, backend, download.as_deref()).await?
        }
        Some(Commands::Smoke { model, interactive }) => {
            match enter_environment(layer.as_ref(), &argv).await {
                Some(code) => code,
                None => run_smoke(&config, &root, backend, model.as_deref(), *interactive).await?,
            }
        }
        None => match enter_environment(layer.as_ref(), &argv).await {
            Some(code) => code,
            None => run_manager(config, &root, runner, backend, layer, &argv).await?,
        },
    };

    tracing::info!(code, "vlmsetup exiting");
    std::process::exit(code);
}

/// `None` when running isolated; otherwise the exit code to leave with
async fn enter_environment(layer: &dyn EnvironmentLayer, argv: &[String]) -> Option<i32> {
    if !layer.is_inside() && !layer.exists() {
        println!("{}", "Preparing isolated environment (first run)...".cyan());
    }
    match bootstrap::ensure_environment(layer, argv).await {
        Ok(EnvironmentState::Inside) => None,
        Ok(EnvironmentState::Relaunched(code)) => Some(code),
        Err(e) => {
            tracing::error!(error = %e, "bootstrap failed");
            eprintln!("{} {}", "✗".red(), e);
            Some(1)
        }
    }
}

fn progress_bar(verbosity: Verbosity, len: u64, template: &str) -> ProgressBar {
    if !verbosity.show_progress() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

async fn run_doctor(
    args: &Args,
    config: &Config,
    root: &Path,
    runner: Arc<dyn CommandRunner>,
    backend: Arc<dyn InferenceBackend>,
) -> i32 {
    let diagnostics = Diagnostics::new(default_checks(config, root, runner, backend));
    let pb = progress_bar(
        args.verbosity(),
        diagnostics.len() as u64,
        "{bar:30.cyan/blue} {pos}/{len} {msg}",
    );
    let report = diagnostics
        .run_with(|done, _, item| {
            pb.set_position(done as u64);
            pb.set_message(item.name.clone());
        })
        .await;
    pb.finish_and_clear();

    println!("\n{}\n", "System diagnostics".bold());
    for (status, row) in report.table_rows() {
        let row = match status {
            DiagnosticStatus::Ok => row.green(),
            DiagnosticStatus::Warn => row.yellow(),
            _ => row.red(),
        };
        println!("  {}", row);
    }
    println!();

    if report.is_healthy() {
        println!("{}", "System looks healthy".green());
        0
    } else {
        let failures = report.failures().len();
        println!(
            "{}",
            format!("{} problem(s) found. Run vlmsetup to repair them.", failures).red()
        );
        1
    }
}

async fn run_models(
    args: &Args,
    config: &Config,
    root: &Path,
    backend: Arc<dyn InferenceBackend>,
    download: Option<&str>,
) -> Result<i32> {
    let models = ModelManager::new(config.models.clone(), config.models_dir(root), backend)?;

    let Some(id) = download else {
        println!("\n{}\n", "Models".bold());
        for descriptor in models.list_remote_models().await? {
            println!("  {}  {}", descriptor.row(), descriptor.id.dimmed());
        }
        println!();
        return Ok(0);
    };

    let pb = progress_bar(
        args.verbosity(),
        0,
        "{msg}\n{bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
    );
    let mut on_progress = |p: &DownloadProgress| {
        if let Some(total) = p.total {
            pb.set_length(total);
        }
        pb.set_position(p.downloaded);
        pb.set_message(p.label.clone());
        true
    };
    let outcome = models.download(id, &mut on_progress).await;
    pb.finish_and_clear();

    match outcome {
        Ok(outcome) => {
            println!("{} {}: {}", "✓".green(), id, outcome);
            Ok(0)
        }
        Err(e) => {
            eprintln!("{} {}: {}", "✗".red(), id, e);
            Ok(1)
        }
    }
}

/// Interactive model pick in the alternate screen
fn pick_model(installed: &[String]) -> Result<Option<String>> {
    let _guard = TerminalGuard::acquire()?;
    let mut terminal = Terminal::stdout();
    let mut ctx = ActionContext::new(&mut terminal, TITLE);
    Ok(ctx
        .pick("Select inference model", installed, 0)?
        .map(|i| installed[i].clone()))
}

async fn run_smoke(
    config: &Config,
    root: &Path,
    backend: Arc<dyn InferenceBackend>,
    model: Option<&str>,
    interactive: bool,
) -> Result<i32> {
    let models = ModelManager::new(config.models.clone(), config.models_dir(root), backend.clone())?;
    let installed = match models.installed_backend_models().await {
        Ok(installed) => installed,
        Err(e) => {
            eprintln!("{} cannot list backend models: {}", "⚠".yellow(), e);
            Vec::new()
        }
    };

    let model = match model {
        Some(model) => model.to_string(),
        None if interactive && !installed.is_empty() => match pick_model(&installed)? {
            Some(model) => model,
            None => {
                eprintln!("No model selected");
                return Ok(1);
            }
        },
        None => match smoke::resolve_model(None, config.smoke.default_model.as_deref(), &installed) {
            Ok(model) => model,
            Err(e) => {
                eprintln!("{} {}", "✗".red(), e);
                return Ok(1);
            }
        },
    };

    println!("\n{} {}\n", "Smoke test with".bold(), model.cyan());
    let cases = smoke::default_catalog(&config.samples_dir(root));
    let fetcher = SampleFetcher::new(Duration::from_secs(30))?;
    let mut session = InferenceSession::new(backend);
    let report = smoke::run_smoke_tests(
        &mut session,
        &model,
        &cases,
        &fetcher,
        &config.smoke.prompt,
        |event| match event {
            SmokeEvent::Loading(model) => println!("  Loading {}...", model),
            SmokeEvent::CaseStarted { .. } => {}
            SmokeEvent::CaseFinished(outcome) => {
                let mark = if outcome.passed { "✓".green() } else { "✗".red() };
                println!("  {} {:<10} {}", mark, outcome.case_id, outcome.detail);
            }
        },
    )
    .await;

    println!();
    if report.passed() {
        println!("{}", report.summary().green());
        Ok(0)
    } else {
        println!("{}", report.summary().red());
        Ok(1)
    }
}

async fn run_manager(
    config: Config,
    root: &Path,
    runner: Arc<dyn CommandRunner>,
    backend: Arc<dyn InferenceBackend>,
    layer: Arc<dyn EnvironmentLayer>,
    argv: &[String],
) -> Result<i32> {
    let manager = Rc::new(Manager::new(
        config,
        root.to_path_buf(),
        runner,
        backend,
        layer.clone(),
    )?);
    let menu = build_menu(&manager);

    let outcome = {
        let _guard = TerminalGuard::acquire()?;
        let mut engine = Engine::new(Terminal::stdout(), TITLE);
        engine.run(&menu).await
    };
    manager.shutdown().await;

    match outcome? {
        EngineOutcome::Exit(code) => Ok(code),
        EngineOutcome::Restart => {
            println!("{}", "Restarting to apply changes...".cyan());
            Ok(bootstrap::restart(layer.as_ref(), argv)?)
        }
    }
}
