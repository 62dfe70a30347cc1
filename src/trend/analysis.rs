//! Baseline comparison of a run against its recent history.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::metrics::{extract, Direction, Metrics};
use super::TrendError;
use crate::stats::{percent_change, TimeSeries};
use crate::storage::{RunRecord, StorageError};
use crate::unit::SuiteResult;

/// Fewest prior runs a baseline is built from.
pub const MIN_HISTORY: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDelta {
    pub metric: String,
    pub baseline: f64,
    pub current: f64,
    pub change_pct: f64,
    /// Prior runs the baseline was averaged over.
    pub samples: usize,
    pub regression: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrendAnalysis {
    /// No comparison was made; this run establishes baseline data.
    InsufficientData { history_runs: usize, reason: String },
    Compared {
        baseline_runs: usize,
        threshold_pct: f64,
        deltas: Vec<MetricDelta>,
    },
}

impl TrendAnalysis {
    pub fn regressions(&self) -> Vec<&MetricDelta> {
        match self {
            TrendAnalysis::InsufficientData { .. } => Vec::new(),
            TrendAnalysis::Compared { deltas, .. } => {
                deltas.iter().filter(|d| d.regression).collect()
            }
        }
    }

    pub fn is_baseline_only(&self) -> bool {
        matches!(self, TrendAnalysis::InsufficientData { .. })
    }
}

#[derive(Debug, Clone)]
pub struct TrendAnalyzer {
    threshold_pct: f64,
    window: usize,
}

impl TrendAnalyzer {
    pub fn new(threshold_pct: f64, window: usize) -> Self {
        Self {
            threshold_pct,
            window: window.max(MIN_HISTORY),
        }
    }

    /// How many prior runs to load.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Compare `current` against `history` (most recent first). Only the
    /// first `window` runs of the same suite are used.
    pub fn compare(
        &self,
        current: &SuiteResult,
        history: &[RunRecord],
    ) -> Result<Vec<MetricDelta>, TrendError> {
        let prior: Vec<Metrics> = history
            .iter()
            .filter(|r| r.suite_name == current.suite_name)
            .take(self.window)
            .map(|r| extract(&r.to_suite_result()))
            .collect();
        if prior.len() < MIN_HISTORY {
            return Err(TrendError::InsufficientHistory {
                needed: MIN_HISTORY,
                have: prior.len(),
            });
        }

        let mut deltas = Vec::new();
        for (name, metric) in extract(current) {
            let baseline = TimeSeries::new(
                prior
                    .iter()
                    .filter_map(|m| m.get(&name).map(|p| p.value))
                    .collect(),
            );
            // A metric with no history yet is not comparable.
            if baseline.is_empty() {
                continue;
            }
            let mean = baseline.mean();
            let change_pct = percent_change(mean, metric.value);
            let regression = is_regression(mean, change_pct, metric.direction, self.threshold_pct);
            if regression {
                debug!(metric = %name, baseline = mean, current = metric.value, change_pct, "Regression");
            }
            deltas.push(MetricDelta {
                metric: name,
                baseline: mean,
                current: metric.value,
                change_pct,
                samples: baseline.len(),
                regression,
            });
        }
        Ok(deltas)
    }

    /// Analysis that never fails: too little history becomes
    /// [`TrendAnalysis::InsufficientData`].
    pub fn analyze(&self, current: &SuiteResult, history: &[RunRecord]) -> TrendAnalysis {
        match self.compare(current, history) {
            Ok(deltas) => {
                let regressions = deltas.iter().filter(|d| d.regression).count();
                info!(
                    suite = %current.suite_name,
                    metrics = deltas.len(),
                    regressions,
                    "Trend analysis complete"
                );
                // success_rate exists in every run, so this is the run count.
                let baseline_runs = deltas.iter().map(|d| d.samples).max().unwrap_or(0);
                TrendAnalysis::Compared {
                    baseline_runs,
                    threshold_pct: self.threshold_pct,
                    deltas,
                }
            }
            Err(TrendError::InsufficientHistory { have, .. }) => {
                info!(suite = %current.suite_name, have, "Not enough history; this run establishes baseline data");
                TrendAnalysis::InsufficientData {
                    history_runs: have,
                    reason: format!(
                        "{} prior run(s) recorded, {} needed for a baseline",
                        have, MIN_HISTORY
                    ),
                }
            }
        }
    }

    /// Like [`analyze`](Self::analyze), but takes the raw history load.
    /// Unusable history falls back to no prior data.
    pub fn analyze_loaded(
        &self,
        current: &SuiteResult,
        history: Result<Vec<RunRecord>, StorageError>,
    ) -> TrendAnalysis {
        match history {
            Ok(runs) => self.analyze(current, &runs),
            Err(e) => {
                warn!(suite = %current.suite_name, error = %e, "History unusable; skipping trend analysis");
                TrendAnalysis::InsufficientData {
                    history_runs: 0,
                    reason: format!("history could not be read: {}", e),
                }
            }
        }
    }
}

fn is_regression(baseline: f64, change_pct: f64, direction: Direction, threshold_pct: f64) -> bool {
    // Growth from zero has no meaningful percentage.
    if baseline.abs() < f64::EPSILON {
        return false;
    }
    direction.worsened_by(change_pct) > threshold_pct
}
