//! Doctor - environment diagnostics and repair
//!
//! A fixed, ordered catalog of [`Check`]s. Every check yields exactly one
//! [`DiagnosticItem`], even when probing itself fails, so callers always get
//! a complete report. Repairs live in [`repair`]; after a repair only the
//! affected check is re-run.

pub mod checks;
pub mod repair;

pub use checks::default_checks;
pub use repair::{default_remediations, RemediationCatalog, RepairOutcome};

use crate::errors::Result;
use async_trait::async_trait;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticStatus {
    Ok,
    /// Advisory only, never blocks
    Warn,
    Missing,
    VersionMismatch,
    Unreachable,
    Error,
}

impl DiagnosticStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warn => "WARN",
            Self::Missing => "MISSING",
            Self::VersionMismatch => "MISMATCH",
            Self::Unreachable => "UNREACHABLE",
            Self::Error => "ERROR",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Ok => "✓",
            Self::Warn => "⚠",
            _ => "✗",
        }
    }

    /// Whether this status counts as a problem to fix
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Ok | Self::Warn)
    }
}

/// Outcome of probing one capability. Replaced, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticItem {
    pub name: String,
    pub status: DiagnosticStatus,
    pub detail: String,
    pub remediation: Option<String>,
}

impl DiagnosticItem {
    fn new(name: &str, status: DiagnosticStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
            remediation: None,
        }
    }

    pub fn ok(name: &str, detail: impl Into<String>) -> Self {
        Self::new(name, DiagnosticStatus::Ok, detail)
    }

    pub fn warn(name: &str, detail: impl Into<String>) -> Self {
        Self::new(name, DiagnosticStatus::Warn, detail)
    }

    pub fn missing(name: &str, detail: impl Into<String>) -> Self {
        Self::new(name, DiagnosticStatus::Missing, detail)
    }

    pub fn mismatch(name: &str, detail: impl Into<String>) -> Self {
        Self::new(name, DiagnosticStatus::VersionMismatch, detail)
    }

    pub fn unreachable(name: &str, detail: impl Into<String>) -> Self {
        Self::new(name, DiagnosticStatus::Unreachable, detail)
    }

    /// ERROR items always carry a detail
    pub fn error(name: &str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let detail = if detail.trim().is_empty() {
            "probe failed without a message".to_string()
        } else {
            detail
        };
        Self::new(name, DiagnosticStatus::Error, detail)
    }

    pub fn with_remediation(mut self, key: &str) -> Self {
        self.remediation = Some(key.to_string());
        self
    }
}

/// Probes one capability
#[async_trait(?Send)]
pub trait Check {
    fn name(&self) -> &str;

    /// Cheap checks run before network-bound ones
    async fn probe(&self) -> Result<DiagnosticItem>;
}

/// Ordered check catalog
pub struct Diagnostics {
    checks: Vec<Box<dyn Check>>,
}

impl Diagnostics {
    pub fn new(checks: Vec<Box<dyn Check>>) -> Self {
        Self { checks }
    }

    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub async fn run(&self) -> DiagnosticReport {
        self.run_with(|_, _, _| {}).await
    }

    /// Run every check in order, calling `on_item(done, total, item)` as
    /// each result arrives so the UI can show partial progress.
    pub async fn run_with<F>(&self, mut on_item: F) -> DiagnosticReport
    where
        F: FnMut(usize, usize, &DiagnosticItem),
    {
        let total = self.checks.len();
        let mut items = Vec::with_capacity(total);
        for (i, check) in self.checks.iter().enumerate() {
            let item = run_check(check.as_ref()).await;
            on_item(i + 1, total, &item);
            items.push(item);
        }
        DiagnosticReport { items }
    }

    /// Re-run a single check by name
    pub async fn recheck(&self, name: &str) -> Option<DiagnosticItem> {
        let check = self.checks.iter().find(|c| c.name() == name)?;
        Some(run_check(check.as_ref()).await)
    }
}

async fn run_check(check: &dyn Check) -> DiagnosticItem {
    let start = Instant::now();
    let item = match check.probe().await {
        Ok(item) => item,
        Err(e) => DiagnosticItem::error(check.name(), e.to_string()),
    };
    tracing::debug!(
        check = %item.name,
        status = item.status.label(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "check finished"
    );
    item
}

/// Result of a full diagnostic run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticReport {
    pub items: Vec<DiagnosticItem>,
}

impl DiagnosticReport {
    pub fn is_healthy(&self) -> bool {
        !self.items.iter().any(|i| i.status.is_failure())
    }

    pub fn failures(&self) -> Vec<&DiagnosticItem> {
        self.items.iter().filter(|i| i.status.is_failure()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&DiagnosticItem> {
        self.items.iter().find(|i| i.name == name)
    }

    /// Swap in a fresh result for one row; other rows are untouched
    pub fn replace(&mut self, item: DiagnosticItem) {
        if let Some(slot) = self.items.iter_mut().find(|i| i.name == item.name) {
            *slot = item;
        } else {
            self.items.push(item);
        }
    }

    /// Fixed-width table rows: symbol, component, status, detail
    pub fn table_rows(&self) -> Vec<(DiagnosticStatus, String)> {
        self.items
            .iter()
            .map(|item| {
                (
                    item.status,
                    format!(
                        "{} {:<26} {:<11} {}",
                        item.status.symbol(),
                        item.name,
                        item.status.label(),
                        item.detail
                    ),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SetupError;

    struct Fixed(&'static str, Option<DiagnosticStatus>);

    #[async_trait(?Send)]
    impl Check for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        async fn probe(&self) -> Result<DiagnosticItem> {
            match self.1 {
                Some(DiagnosticStatus::Ok) => Ok(DiagnosticItem::ok(self.0, "fine")),
                Some(_) => Ok(DiagnosticItem::missing(self.0, "gone").with_remediation("fix")),
                None => Err(SetupError::Generic("probe exploded".to_string())),
            }
        }
    }

    #[test]
    fn test_error_item_always_has_detail() {
        assert!(!DiagnosticItem::error("x", "").detail.is_empty());
        assert_eq!(DiagnosticItem::error("x", "boom").detail, "boom");
    }

    #[test]
    fn test_warn_is_not_failure() {
        assert!(!DiagnosticStatus::Warn.is_failure());
        assert!(DiagnosticStatus::Unreachable.is_failure());
    }

    #[tokio::test]
    async fn test_probe_error_becomes_error_item() {
        let diagnostics = Diagnostics::new(vec![
            Box::new(Fixed("a", Some(DiagnosticStatus::Ok))),
            Box::new(Fixed("b", None)),
            Box::new(Fixed("c", Some(DiagnosticStatus::Missing))),
        ]);
        let report = diagnostics.run().await;
        assert_eq!(report.items.len(), 3);
        assert_eq!(report.items[1].status, DiagnosticStatus::Error);
        assert!(report.items[1].detail.contains("probe exploded"));
        assert_eq!(report.failures().len(), 2);
        assert!(!report.is_healthy());
    }

    #[tokio::test]
    async fn test_run_with_reports_progress_in_order() {
        let diagnostics = Diagnostics::new(vec![
            Box::new(Fixed("first", Some(DiagnosticStatus::Ok))),
            Box::new(Fixed("second", Some(DiagnosticStatus::Ok))),
        ]);
        let mut seen = Vec::new();
        diagnostics
            .run_with(|done, total, item| seen.push((done, total, item.name.clone())))
            .await;
        assert_eq!(
            seen,
            vec![(1, 2, "first".to_string()), (2, 2, "second".to_string())]
        );
    }

    #[tokio::test]
    async fn test_recheck_single_row() {
        let diagnostics = Diagnostics::new(vec![
            Box::new(Fixed("a", Some(DiagnosticStatus::Ok))),
            Box::new(Fixed("b", Some(DiagnosticStatus::Missing))),
        ]);
        let mut report = diagnostics.run().await;
        let fresh = diagnostics.recheck("b").await.unwrap();
        assert_eq!(fresh.status, DiagnosticStatus::Missing);
        report.replace(fresh);
        assert_eq!(report.items.len(), 2);
        assert!(diagnostics.recheck("nope").await.is_none());
    }
}
