//! Menu action flows

use super::Manager;
use crate::bootstrap::env_python;
use crate::doctor::checks::keys;
use crate::doctor::repair::reinstall_spec;
use crate::doctor::{DiagnosticReport, DiagnosticStatus, RepairOutcome};
use crate::errors::Result;
use crate::menu::{ActionContext, Line, LineStyle, MenuResult, Status};
use crate::models::{DownloadOutcome, DownloadProgress, ModelDescriptor};
use crate::process::CommandSpec;
use crate::smoke::{default_catalog, run_smoke_tests, SmokeEvent};
use std::path::PathBuf;
use std::time::Duration;

const PYTEST_TIMEOUT: Duration = Duration::from_secs(1800);
const OUTPUT_TAIL_LINES: usize = 200;

fn draw_progress(ctx: &mut ActionContext<'_>, label: &str, fraction: Option<f64>, detail: &str) {
    if let Err(e) = ctx.progress(label, fraction, detail) {
        tracing::debug!(error = %e, "progress redraw failed");
    }
}

fn status_style(status: DiagnosticStatus) -> LineStyle {
    match status {
        DiagnosticStatus::Ok => LineStyle::Success,
        DiagnosticStatus::Warn => LineStyle::Warning,
        _ => LineStyle::Error,
    }
}

pub(crate) fn report_lines(report: &DiagnosticReport, show_passing: bool) -> Vec<Line> {
    report
        .table_rows()
        .into_iter()
        .filter(|(status, _)| show_passing || *status != DiagnosticStatus::Ok)
        .map(|(status, text)| Line::new(format!(" {}", text), status_style(status)))
        .collect()
}

fn outcome_status(label: &str, outcome: &RepairOutcome) -> Status {
    if outcome.success {
        Status::success(format!("{}: {}", label, outcome.message))
    } else {
        Status::error(format!("{} failed", label)).with_detail(outcome.message.clone())
    }
}

fn output_tail(stdout: &str, stderr: &str) -> Vec<Line> {
    let all: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let skip = all.len().saturating_sub(OUTPUT_TAIL_LINES);
    all.into_iter().skip(skip).map(|l| Line::plain(format!(" {}", l))).collect()
}

impl Manager {
    async fn cached_or_fresh_report(&self) -> DiagnosticReport {
        let cached = self.last_report.borrow().clone();
        match cached {
            Some(report) => report,
            None => {
                let report = self.diagnostics.run().await;
                *self.last_report.borrow_mut() = Some(report.clone());
                report
            }
        }
    }

    /// Re-run only the checks bound to `key`, if a report exists
    async fn refresh_rows(&self, key: &str) {
        let cached = self.last_report.borrow().clone();
        let Some(mut report) = cached else { return };
        let names: Vec<String> = report
            .items
            .iter()
            .filter(|i| i.remediation.as_deref() == Some(key))
            .map(|i| i.name.clone())
            .collect();
        for name in names {
            if let Some(item) = self.diagnostics.recheck(&name).await {
                report.replace(item);
            }
        }
        *self.last_report.borrow_mut() = Some(report);
    }

    fn confirm_heavy(&self, ctx: &mut ActionContext<'_>, key: &str, label: &str) -> Result<bool> {
        if self.remediations.is_heavy(key) && self.settings.confirm_heavy.get() {
            return ctx.confirm(&format!("{} can take a long time. Continue?", label), true);
        }
        Ok(true)
    }

    pub(crate) async fn run_diagnostics(&self, ctx: &mut ActionContext<'_>) -> Result<MenuResult> {
        let report = self
            .diagnostics
            .run_with(|done, total, item| {
                let fraction = done as f64 / total.max(1) as f64;
                let label = format!("Checking ({}/{}) {}", done, total, item.name);
                draw_progress(ctx, &label, Some(fraction), item.status.label());
            })
            .await;
        *self.last_report.borrow_mut() = Some(report.clone());

        let failures = report.failures().len();
        let subtitle = format!("{} checks, {} problem(s)", report.items.len(), failures);
        ctx.page(&subtitle, &report_lines(&report, self.settings.show_passing.get()))?;

        Ok(MenuResult::Message(if failures == 0 {
            Status::success(format!("All {} checks passed", report.items.len()))
        } else {
            Status::warning(format!("{} problem(s) found", failures))
                .with_detail("Use Smart fix to repair them")
        }))
    }

    pub(crate) async fn smart_fix(&self, ctx: &mut ActionContext<'_>) -> Result<MenuResult> {
        let report = self.cached_or_fresh_report().await;
        let failures = report.failures();
        if failures.is_empty() {
            return Ok(MenuResult::Message(Status::success("Nothing to fix")));
        }
        let plan = self.remediations.plan(failures.iter().copied());
        if plan.is_empty() {
            return Ok(MenuResult::Message(Status::warning(
                "No automatic repair for the remaining problems",
            )));
        }

        let options: Vec<String> = plan
            .iter()
            .map(|key| {
                let label = self.remediations.get(key).map(|r| r.label()).unwrap_or(key);
                let affected: Vec<&str> = failures
                    .iter()
                    .filter(|i| i.remediation.as_deref() == Some(key.as_str()))
                    .map(|i| i.name.as_str())
                    .collect();
                format!("{} ({})", label, affected.join(", "))
            })
            .collect();
        let all: Vec<usize> = (0..plan.len()).collect();
        let prompt = format!("{} problem(s) found. Select repairs to apply", failures.len());
        let Some(selected) = ctx.multi_pick(&prompt, &options, &all)? else {
            return Ok(MenuResult::Message(Status::info("Smart fix cancelled")));
        };

        let mut results: Vec<(String, RepairOutcome)> = Vec::new();
        for index in selected {
            let key = &plan[index];
            let label = self
                .remediations
                .get(key)
                .map(|r| r.label().to_string())
                .unwrap_or_else(|| key.clone());
            if !self.confirm_heavy(ctx, key, &label)? {
                continue;
            }
            ctx.notice("Applying repairs", &[Line::plain(format!(" {}…", label))])?;
            let outcome = self.remediations.apply_key(key).await;
            self.refresh_rows(key).await;
            results.push((label, outcome));
        }
        if results.is_empty() {
            return Ok(MenuResult::Message(Status::info("No repairs applied")));
        }

        let mut lines: Vec<Line> = results
            .iter()
            .map(|(label, outcome)| {
                let (mark, style) = if outcome.success {
                    ("✓", LineStyle::Success)
                } else {
                    ("✗", LineStyle::Error)
                };
                Line::new(format!(" {} {}: {}", mark, label, outcome.message), style)
            })
            .collect();
        if let Some(report) = self.last_report() {
            lines.push(Line::blank());
            lines.extend(report_lines(&report, self.settings.show_passing.get()));
        }
        ctx.page("Repair results", &lines)?;

        if results.iter().any(|(_, o)| o.success && o.restart_required) {
            return Ok(MenuResult::Restart);
        }
        let failed: Vec<&(String, RepairOutcome)> =
            results.iter().filter(|(_, o)| !o.success).collect();
        Ok(MenuResult::Message(match failed.first() {
            None => Status::success(format!("{} repair(s) applied", results.len())),
            Some((label, outcome)) => Status::error(format!(
                "{} of {} repair(s) failed",
                failed.len(),
                results.len()
            ))
            .with_detail(format!("{}: {}", label, outcome.message)),
        }))
    }

    pub(crate) async fn repair_one(&self, ctx: &mut ActionContext<'_>) -> Result<MenuResult> {
        let report = self.cached_or_fresh_report().await;
        let failures = report.failures();
        if failures.is_empty() {
            return Ok(MenuResult::Message(Status::success("Nothing to fix")));
        }
        let options: Vec<String> = failures
            .iter()
            .map(|i| format!("{}: {} ({})", i.name, i.status.label(), i.detail))
            .collect();
        let Some(index) = ctx.pick("Select the item to repair", &options, 0)? else {
            return Ok(MenuResult::Quiet);
        };
        let item = failures[index];
        if let Some(key) = item.remediation.as_deref() {
            if !self.confirm_heavy(ctx, key, &item.name)? {
                return Ok(MenuResult::Quiet);
            }
        }

        ctx.notice("Repairing", &[Line::plain(format!(" {}…", item.name))])?;
        let outcome = self.remediations.repair(item).await;
        if let Some(key) = item.remediation.as_deref() {
            self.refresh_rows(key).await;
        }
        if outcome.success && outcome.restart_required {
            return Ok(MenuResult::Restart);
        }
        Ok(MenuResult::Message(outcome_status(&item.name, &outcome)))
    }

    /// Apply one catalog remediation directly
    pub(crate) async fn apply_named(&self, ctx: &mut ActionContext<'_>, key: &str) -> Result<MenuResult> {
        let label = self
            .remediations
            .get(key)
            .map(|r| r.label().to_string())
            .unwrap_or_else(|| key.to_string());
        if !self.confirm_heavy(ctx, key, &label)? {
            return Ok(MenuResult::Quiet);
        }
        ctx.notice(&label, &[Line::plain(" Working…")])?;
        let outcome = self.remediations.apply_key(key).await;
        self.refresh_rows(key).await;
        if outcome.success && outcome.restart_required {
            return Ok(MenuResult::Restart);
        }
        Ok(MenuResult::Message(outcome_status(&label, &outcome)))
    }

    /// Fast prebuilt wheel or slow source build of the native binding
    pub(crate) async fn reinstall_native(&self, ctx: &mut ActionContext<'_>) -> Result<MenuResult> {
        let options = [
            "Fast: prebuilt wheel (CUDA when a GPU is present)".to_string(),
            "Slow: compile from source".to_string(),
        ];
        let Some(index) = ctx.pick("Install the native binding", &options, 0)? else {
            return Ok(MenuResult::Quiet);
        };
        let key = if index == 0 {
            keys::NATIVE_BACKEND
        } else {
            keys::NATIVE_BACKEND_SOURCE
        };
        let result = self.apply_named(ctx, key).await;
        if key != keys::NATIVE_BACKEND {
            self.refresh_rows(keys::NATIVE_BACKEND).await;
        }
        result
    }

    async fn run_pytest(&self, ctx: &mut ActionContext<'_>, target: PathBuf) -> Result<MenuResult> {
        let python = env_python(&self.config.env_dir(&self.root));
        let spec = CommandSpec::new(
            &python.to_string_lossy(),
            [
                "-m".to_string(),
                "pytest".to_string(),
                target.to_string_lossy().into_owned(),
            ],
        )
        .timeout(PYTEST_TIMEOUT);

        ctx.notice("Running tests", &[Line::plain(format!(" {}", spec.display()))])?;
        let output = self.runner.run(&spec).await?;
        let subtitle = format!("pytest exited with {}", output.exit_code);
        ctx.page(&subtitle, &output_tail(&output.stdout, &output.stderr))?;

        Ok(MenuResult::Message(if output.success() {
            Status::success("Tests passed")
        } else {
            Status::error(format!("Tests failed (exit {})", output.exit_code))
                .with_detail(output.last_line())
        }))
    }

    pub(crate) async fn run_unit_tests(&self, ctx: &mut ActionContext<'_>) -> Result<MenuResult> {
        let target = self.root.join("tests");
        self.run_pytest(ctx, target).await
    }

    /// `tests/test_*.py`, sorted
    fn test_files(&self) -> Result<Vec<String>> {
        let dir = self.root.join("tests");
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("test_") && name.ends_with(".py"))
            .collect();
        files.sort();
        Ok(files)
    }

    pub(crate) async fn run_test_file(&self, ctx: &mut ActionContext<'_>) -> Result<MenuResult> {
        let files = self.test_files()?;
        if files.is_empty() {
            return Ok(MenuResult::Message(Status::warning("No test files in tests/")));
        }
        let Some(index) = ctx.pick("Select test file", &files, 0)? else {
            return Ok(MenuResult::Quiet);
        };
        let target = self.root.join("tests").join(&files[index]);
        self.run_pytest(ctx, target).await
    }

    async fn download_with_progress(
        &self,
        ctx: &mut ActionContext<'_>,
        id: &str,
    ) -> Result<DownloadOutcome> {
        let mut on_progress = |p: &DownloadProgress| {
            draw_progress(ctx, &p.label, p.fraction(), &p.summary());
            !matches!(ctx.cancel_requested(), Ok(true))
        };
        self.models.download(id, &mut on_progress).await
    }

    pub(crate) async fn manage_models(&self, ctx: &mut ActionContext<'_>) -> Result<MenuResult> {
        let descriptors = self.models.list_remote_models().await?;
        if descriptors.is_empty() {
            return Ok(MenuResult::Message(Status::warning("The model catalog is empty")));
        }
        let rows: Vec<String> = descriptors.iter().map(ModelDescriptor::row).collect();
        let Some(index) = ctx.pick("Select a model to download", &rows, 0)? else {
            return Ok(MenuResult::Quiet);
        };
        let chosen = &descriptors[index];
        if chosen.locally_present {
            return Ok(MenuResult::Message(Status::info(format!(
                "{} is already present",
                chosen.display_name
            ))));
        }

        let outcome = self.download_with_progress(ctx, &chosen.id).await?;
        Ok(MenuResult::Message(match outcome {
            DownloadOutcome::Cancelled => Status::warning(format!("{}: download cancelled", chosen.display_name)),
            other => Status::success(format!("{}: {}", chosen.display_name, other)),
        }))
    }

    pub(crate) async fn smoke_test(&self, ctx: &mut ActionContext<'_>) -> Result<MenuResult> {
        let mut installed = self.models.installed_backend_models().await?;
        if installed.is_empty() {
            let Some(default) = self.config.models.iter().find(|m| m.backend_tag().is_some()) else {
                return Ok(MenuResult::Message(Status::error("no models available")));
            };
            let question = format!("No models installed. Download {} now?", default.name);
            if !ctx.confirm(&question, true)? {
                return Ok(MenuResult::Message(Status::warning(
                    "The smoke test needs an installed model",
                )));
            }
            if self.download_with_progress(ctx, &default.id).await? == DownloadOutcome::Cancelled {
                return Ok(MenuResult::Message(Status::warning("Download cancelled")));
            }
            installed = self.models.installed_backend_models().await?;
            if installed.is_empty() {
                return Ok(MenuResult::Message(Status::error("no models available")));
            }
        }

        let initial = self
            .config
            .smoke
            .default_model
            .as_ref()
            .and_then(|d| installed.iter().position(|m| m == d))
            .unwrap_or(0);
        let Some(index) = ctx.pick("Select inference model", &installed, initial)? else {
            return Ok(MenuResult::Quiet);
        };
        let model = installed[index].clone();
        let cases = default_catalog(&self.config.samples_dir(&self.root));

        let report = {
            let mut session = self.session.lock().await;
            run_smoke_tests(
                &mut session,
                &model,
                &cases,
                &self.fetcher,
                &self.config.smoke.prompt,
                |event| match event {
                    SmokeEvent::Loading(model) => {
                        draw_progress(ctx, &format!("Loading {}", model), None, "")
                    }
                    SmokeEvent::CaseStarted {
                        index,
                        total,
                        case_id,
                    } => draw_progress(
                        ctx,
                        &format!("Case {}/{}", index, total),
                        Some((*index - 1) as f64 / (*total).max(1) as f64),
                        case_id,
                    ),
                    SmokeEvent::CaseFinished(_) => {}
                },
            )
            .await
        };

        let lines: Vec<Line> = report
            .lines()
            .into_iter()
            .map(|(passed, text)| {
                let style = if passed { LineStyle::Success } else { LineStyle::Error };
                Line::new(format!(" {}", text), style)
            })
            .collect();
        ctx.page(&report.summary(), &lines)?;

        Ok(MenuResult::Message(if report.passed() {
            Status::success(report.summary())
        } else {
            Status::error(report.summary())
        }))
    }

    pub(crate) async fn reinstall_libraries(&self, ctx: &mut ActionContext<'_>) -> Result<MenuResult> {
        let libs = &self.config.environment.required_libs;
        let Some(selected) = ctx.multi_pick("Select libraries to reinstall", libs, &[])? else {
            return Ok(MenuResult::Quiet);
        };
        if selected.is_empty() {
            return Ok(MenuResult::Message(Status::info("Nothing selected")));
        }
        let packages: Vec<String> = selected.iter().map(|&i| libs[i].clone()).collect();
        let python = env_python(&self.config.env_dir(&self.root));
        let spec = reinstall_spec(&python, &packages, &[]);

        ctx.notice("Reinstalling", &[Line::plain(format!(" {}", packages.join(", ")))])?;
        self.runner.run(&spec).await?.check(&spec)?;
        tracing::info!(packages = %packages.join(","), "libraries reinstalled");
        Ok(MenuResult::Restart)
    }

    pub(crate) async fn factory_reset(&self, ctx: &mut ActionContext<'_>) -> Result<MenuResult> {
        let question = "Reinstall every declared dependency from scratch?";
        if !ctx.confirm(question, false)? {
            return Ok(MenuResult::Message(Status::info("Factory reset cancelled")));
        }
        ctx.notice("Factory reset", &[Line::plain(" Reinstalling dependencies…")])?;
        if !self.layer.exists() {
            self.layer.create().await?;
        }
        self.layer.install_declared_dependencies(true).await?;
        Ok(MenuResult::Restart)
    }
}
