//! Smoke-test orchestrator
//!
//! Preloads one model, runs each case through it exactly once and releases
//! it exactly once afterwards, whatever happened in between.

pub mod cases;
pub mod samples;

pub use cases::{default_catalog, normalize_text, SmokeCase};
pub use samples::{sniff_image, SampleFetcher};

use crate::errors::{Result, SetupError};
use crate::inference::InferenceSession;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseOutcome {
    pub case_id: String,
    pub passed: bool,
    pub detail: String,
}

impl CaseOutcome {
    fn pass(case: &SmokeCase, detail: impl Into<String>) -> Self {
        Self {
            case_id: case.id.clone(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(case: &SmokeCase, detail: impl Into<String>) -> Self {
        Self {
            case_id: case.id.clone(),
            passed: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeReport {
    pub model: String,
    pub outcomes: Vec<CaseOutcome>,
}

impl SmokeReport {
    /// Overall verdict: every case passed
    pub fn passed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.passed)
    }

    pub fn pass_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    pub fn fail_count(&self) -> usize {
        self.outcomes.len() - self.pass_count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {}/{} passed, overall {}",
            self.model,
            self.pass_count(),
            self.outcomes.len(),
            if self.passed() { "PASS" } else { "FAIL" }
        )
    }

    /// One line per case
    pub fn lines(&self) -> Vec<(bool, String)> {
        self.outcomes
            .iter()
            .map(|o| {
                let mark = if o.passed { "✓" } else { "✗" };
                (o.passed, format!("{} {:<10} {}", mark, o.case_id, o.detail))
            })
            .collect()
    }
}

/// Progress notifications for the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmokeEvent {
    Loading(String),
    CaseStarted { index: usize, total: usize, case_id: String },
    CaseFinished(CaseOutcome),
}

const MAX_DETAIL_CHARS: usize = 80;

fn shorten(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= MAX_DETAIL_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(MAX_DETAIL_CHARS).collect();
        format!("{}…", cut)
    }
}

fn evaluate(case: &SmokeCase, justification: &str) -> CaseOutcome {
    if justification.trim().is_empty() {
        return CaseOutcome::fail(case, "empty response");
    }
    match case.matched_keyword(justification) {
        Some(keyword) => CaseOutcome::pass(case, format!("matched '{}'", keyword)),
        None => CaseOutcome::fail(
            case,
            format!("no expected keyword in \"{}\"", shorten(justification)),
        ),
    }
}

async fn run_case(
    session: &InferenceSession,
    case: &SmokeCase,
    fetcher: &SampleFetcher,
    prompt: &str,
) -> CaseOutcome {
    let image = match fetcher.ensure(case).await {
        Ok(path) => path,
        Err(e) => return CaseOutcome::fail(case, format!("sample unavailable: {}", e)),
    };

    match AssertUnwindSafe(session.infer(&image, prompt))
        .catch_unwind()
        .await
    {
        Ok(Ok(result)) => evaluate(case, &result.justification),
        Ok(Err(e)) => CaseOutcome::fail(case, format!("inference failed: {}", e)),
        Err(_) => CaseOutcome::fail(case, "inference panicked"),
    }
}

/// Run `cases` against `model`.
///
/// A per-case breakdown is always produced; when the model cannot be
/// loaded every case is recorded as failed.
pub async fn run_smoke_tests<F>(
    session: &mut InferenceSession,
    model: &str,
    cases: &[SmokeCase],
    fetcher: &SampleFetcher,
    prompt: &str,
    mut on_event: F,
) -> SmokeReport
where
    F: FnMut(&SmokeEvent),
{
    on_event(&SmokeEvent::Loading(model.to_string()));
    if let Err(e) = session.preload(model).await {
        tracing::warn!(model = %model, error = %e, "model load failed");
        let outcomes = cases
            .iter()
            .map(|case| CaseOutcome::fail(case, format!("model load failed: {}", e)))
            .collect();
        return SmokeReport {
            model: model.to_string(),
            outcomes,
        };
    }

    let mut outcomes = Vec::with_capacity(cases.len());
    for (index, case) in cases.iter().enumerate() {
        on_event(&SmokeEvent::CaseStarted {
            index: index + 1,
            total: cases.len(),
            case_id: case.id.clone(),
        });
        let outcome = run_case(session, case, fetcher, prompt).await;
        tracing::info!(case = %case.id, passed = outcome.passed, detail = %outcome.detail, "smoke case finished");
        on_event(&SmokeEvent::CaseFinished(outcome.clone()));
        outcomes.push(outcome);
    }

    if let Err(e) = session.release().await {
        tracing::warn!(model = %model, error = %e, "model release failed");
    }

    let report = SmokeReport {
        model: model.to_string(),
        outcomes,
    };
    tracing::info!(model = %model, passed = report.pass_count(), failed = report.fail_count(), "smoke run finished");
    report
}

/// Pick the model to test: an explicit choice, then the configured
/// default, then the first installed model.
pub fn resolve_model(
    explicit: Option<&str>,
    configured: Option<&str>,
    installed: &[String],
) -> Result<String> {
    explicit
        .or(configured)
        .map(str::to_string)
        .or_else(|| installed.first().cloned())
        .ok_or_else(|| SetupError::Generic("no models available".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn case(keywords: &[&str]) -> SmokeCase {
        SmokeCase::new("sample_01", "cat", PathBuf::from("x.jpg"), keywords, &[])
    }

    #[test]
    fn test_evaluate_empty_response() {
        let outcome = evaluate(&case(&["cat"]), "   ");
        assert!(!outcome.passed);
        assert_eq!(outcome.detail, "empty response");
    }

    #[test]
    fn test_evaluate_keyword_miss_shows_text() {
        let outcome = evaluate(&case(&["cat"]), "A red car");
        assert!(!outcome.passed);
        assert!(outcome.detail.contains("A red car"));
    }

    #[test]
    fn test_resolve_model_precedence() {
        let installed = vec!["llava:7b".to_string()];
        assert_eq!(resolve_model(Some("x"), Some("y"), &installed).unwrap(), "x");
        assert_eq!(resolve_model(None, Some("y"), &installed).unwrap(), "y");
        assert_eq!(resolve_model(None, None, &installed).unwrap(), "llava:7b");
        let err = resolve_model(None, None, &[]).unwrap_err();
        assert!(err.to_string().contains("no models available"));
    }

    #[test]
    fn test_report_verdict() {
        let report = SmokeReport {
            model: "m".to_string(),
            outcomes: vec![
                CaseOutcome::pass(&case(&[]), "ok"),
                CaseOutcome::fail(&case(&[]), "bad"),
            ],
        };
        assert!(!report.passed());
        assert_eq!(report.pass_count(), 1);
        assert!(report.summary().ends_with("overall FAIL"));
    }

    #[test]
    fn test_shorten_long_text() {
        let long = "word ".repeat(40);
        assert!(shorten(&long).ends_with('…'));
    }
}
