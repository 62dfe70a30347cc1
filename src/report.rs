//! Run report rendering.
//!
//! [`render`] is pure: it returns the Markdown text and where it should be
//! written. [`write`] is the only function here that touches the disk.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::storage::files::slug;
use crate::trend::{Alert, Severity, TrendAnalysis};
use crate::unit::{SuiteResult, TestStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub path: PathBuf,
    pub body: String,
}

/// Table cells must stay on one line and not break the column layout.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\n', '\r'], " ")
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

/// One-line outcome, e.g. `web: 1/3 passed (33.3%), 1 failed, 1 error, 0 skipped in 2.00s`.
pub fn format_summary(result: &SuiteResult) -> String {
    format!(
        "{}: {}/{} passed ({}), {} failed, {} error, {} skipped in {:.2}s",
        result.suite_name,
        result.passed,
        result.total,
        percent(result.success_rate()),
        result.failed,
        result.error,
        result.skipped,
        result.duration,
    )
}

/// Summary line plus the alert list, for the notifier.
pub fn condensed(result: &SuiteResult, alerts: &[Alert]) -> String {
    let mut text = format_summary(result);
    if alerts.is_empty() {
        text.push_str("\nNo alerts.");
    } else {
        let critical = alerts
            .iter()
            .filter(|a| a.severity == Severity::Critical)
            .count();
        let _ = write!(
            text,
            "\n{} alert{} ({} critical):",
            alerts.len(),
            if alerts.len() == 1 { "" } else { "s" },
            critical
        );
        for alert in alerts {
            let _ = write!(text, "\n- {}", alert);
        }
    }
    text
}

/// Output location for a run's report.
pub fn report_path(report_dir: &Path, result: &SuiteResult) -> PathBuf {
    report_dir.join(format!(
        "{}-{}.md",
        slug(&result.suite_name),
        result.started_at.format("%Y%m%dT%H%M%SZ")
    ))
}

pub fn render(
    result: &SuiteResult,
    analysis: &TrendAnalysis,
    alerts: &[Alert],
    report_dir: &Path,
) -> Report {
    let mut out = String::new();

    let _ = writeln!(out, "# Test report: {}\n", result.suite_name);
    let _ = writeln!(out, "- Started: {}", result.started_at.to_rfc3339());
    let _ = writeln!(out, "- Duration: {:.2}s", result.duration);
    let _ = writeln!(
        out,
        "- Total: {} | Passed: {} | Failed: {} | Error: {} | Skipped: {}",
        result.total, result.passed, result.failed, result.error, result.skipped
    );
    let _ = writeln!(out, "- Success rate: {}", percent(result.success_rate()));

    let categories = result.by_category();
    if !categories.is_empty() {
        out.push_str("\n## Categories\n\n");
        out.push_str("| Category | Total | Passed | Failed | Error | Skipped |\n");
        out.push_str("|---|---|---|---|---|---|\n");
        for (category, c) in &categories {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} |",
                category, c.total, c.passed, c.failed, c.error, c.skipped
            );
        }
    }

    out.push_str("\n## Units\n\n");
    out.push_str("| Unit | Category | Status | Duration (s) | Details |\n");
    out.push_str("|---|---|---|---|---|\n");
    for unit in &result.units {
        let details = match unit.status {
            TestStatus::Skipped => unit.skip_reason.clone().unwrap_or_default(),
            _ => unit.error_message.clone().unwrap_or_default(),
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {:.3} | {} |",
            cell(&unit.name),
            unit.category.map(|c| c.as_str()).unwrap_or("-"),
            unit.status,
            unit.duration,
            cell(&details)
        );
    }

    out.push_str("\n## Trend analysis\n\n");
    match analysis {
        TrendAnalysis::InsufficientData { reason, .. } => {
            let _ = writeln!(
                out,
                "No prior data: {}. This run establishes baseline data.",
                reason
            );
        }
        TrendAnalysis::Compared {
            baseline_runs,
            threshold_pct,
            deltas,
        } => {
            let _ = writeln!(
                out,
                "Compared against the mean of {} prior run(s); regression threshold {:.1}%.\n",
                baseline_runs, threshold_pct
            );
            out.push_str("| Metric | Baseline | Current | Change | Regression |\n");
            out.push_str("|---|---|---|---|---|\n");
            for d in deltas {
                let _ = writeln!(
                    out,
                    "| {} | {:.3} | {:.3} | {:+.1}% | {} |",
                    cell(&d.metric),
                    d.baseline,
                    d.current,
                    d.change_pct,
                    if d.regression { "yes" } else { "no" }
                );
            }
        }
    }

    out.push_str("\n## Alerts\n\n");
    if alerts.is_empty() {
        out.push_str("None.\n");
    } else {
        for alert in alerts {
            let _ = writeln!(
                out,
                "- **{}** {}: {}",
                alert.severity,
                alert.source,
                alert.message.replace('\n', " ")
            );
        }
    }

    Report {
        path: report_path(report_dir, result),
        body: out,
    }
}

/// Write a rendered report, creating its directory.
pub fn write(report: &Report) -> Result<()> {
    if let Some(dir) = report.path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(&report.path, &report.body)
        .with_context(|| format!("Failed to write {}", report.path.display()))?;
    Ok(())
}
