//! Alerts for one run: problem units and regressions.

use super::analysis::TrendAnalysis;
use super::{Alert, Severity};
use crate::unit::{SuiteResult, TestStatus};

/// One alert per failed (`warning`) or errored (`critical`) unit, then one
/// per regression (`warning`, or `critical` when the run's success rate is
/// below `success_floor`).
pub fn generate_alerts(
    result: &SuiteResult,
    analysis: &TrendAnalysis,
    success_floor: f64,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for unit in &result.units {
        let severity = match unit.status {
            TestStatus::Failed => Severity::Warning,
            TestStatus::Error => Severity::Critical,
            _ => continue,
        };
        let detail = unit.error_message.as_deref().unwrap_or("no message");
        alerts.push(Alert {
            severity,
            message: format!("{} {}: {}", unit.name, unit.status, detail),
            source: unit.name.clone(),
        });
    }

    let below_floor = result.success_rate() < success_floor;
    for delta in analysis.regressions() {
        alerts.push(Alert {
            severity: if below_floor {
                Severity::Critical
            } else {
                Severity::Warning
            },
            message: format!(
                "{} regressed {:+.1}% (baseline {:.3}, current {:.3})",
                delta.metric, delta.change_pct, delta.baseline, delta.current
            ),
            source: delta.metric.clone(),
        });
    }
    alerts
}
