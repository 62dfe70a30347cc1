//! probebench -- test orchestration and regression reporting.
//!
//! Test units (plain checks and probes) run through a [`runner::Runner`],
//! suites group them by category, and every completed run is stored,
//! compared against its history, rendered into a report and summarized to
//! the configured notification channels.

pub mod assert;
pub mod catalog;
pub mod config;
pub mod notify;
pub mod probes;
pub mod report;
pub mod runner;
pub mod stats;
pub mod storage;
pub mod suite;
pub mod trend;
pub mod unit;

use anyhow::Result;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::notify::Notifier;
use crate::report::Report;
use crate::runner::Runner;
use crate::storage::{HistoryStore, RunRecord, StorageError};
use crate::suite::TestSuite;
use crate::trend::{Alert, TrendAnalysis, TrendAnalyzer};
use crate::unit::SuiteResult;

/// Everything produced for one run.
#[derive(Debug)]
pub struct RunOutcome {
    pub result: SuiteResult,
    pub analysis: TrendAnalysis,
    pub alerts: Vec<Alert>,
    pub report: Report,
    pub run_id: Uuid,
    /// The run record reached the history store.
    pub persisted: bool,
    pub report_written: bool,
    /// Channels that accepted the summary.
    pub notified: usize,
}

impl RunOutcome {
    /// No unit failed or errored. Reporting problems do not count.
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

/// Holds the per-invocation config, history store and notification
/// channels. Built once per run and dropped after the report is out.
pub struct Engine {
    config: Config,
    store: Box<dyn HistoryStore>,
    notifiers: Vec<Box<dyn Notifier>>,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        let store = storage::open_store(&config.reporting)?;
        let notifiers = notify::from_config(&config.notify)?;
        Ok(Self::with_parts(config, store, notifiers))
    }

    pub fn with_parts(
        config: Config,
        store: Box<dyn HistoryStore>,
        notifiers: Vec<Box<dyn Notifier>>,
    ) -> Self {
        Self {
            config,
            store,
            notifiers,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the named catalog suites.
    pub fn build_suites(&self, names: &[String]) -> Result<Vec<TestSuite>> {
        catalog::select(&self.config.suites, names)?
            .into_iter()
            .map(|spec| spec.build(self.config.runner.parallel))
            .collect()
    }

    /// Run suites one after another and report them as a single run.
    ///
    /// Several suites are aggregated under their joined names (`a+b`), so
    /// history stays comparable for the same selection.
    pub async fn run_suites(
        &self,
        suites: Vec<TestSuite>,
        parallel_override: Option<bool>,
    ) -> Result<RunOutcome> {
        anyhow::ensure!(!suites.is_empty(), "no suites selected");
        let runner = Runner::new(self.config.runner.to_options());

        let run_name = suites
            .iter()
            .map(|s| s.name().to_string())
            .collect::<Vec<_>>()
            .join("+");
        suite::ensure_unique_names(&run_name, suites.iter().flat_map(|s| s.unit_names()))?;
        let mut results = Vec::with_capacity(suites.len());
        for suite in suites {
            let result = match parallel_override {
                Some(parallel) => suite.run_with(&runner, parallel).await,
                None => suite.run(&runner).await,
            };
            results.push(result);
        }

        let result = if results.len() == 1 {
            results.remove(0)
        } else {
            suite::aggregate(run_name, results)
        };
        Ok(self.report(result).await)
    }

    /// Persist, analyze, render and notify for a finished run. Every step is
    /// best effort; none of them alter `result`.
    pub async fn report(&self, result: SuiteResult) -> RunOutcome {
        let reporting = &self.config.reporting;
        let analyzer = TrendAnalyzer::new(reporting.regression_threshold_pct, reporting.history_window);

        let history = self.store.load_recent(&result.suite_name, analyzer.window());
        let analysis = analyzer.analyze_loaded(&result, history);
        let alerts = trend::generate_alerts(&result, &analysis, reporting.success_floor);

        let record = RunRecord::from_suite(&result);
        let persisted = match self.store.append(&record) {
            Ok(()) => {
                if let Some(keep) = reporting.retention {
                    match self.store.prune(&record.suite_name, keep) {
                        Ok(0) => {}
                        Ok(removed) => info!(suite = %record.suite_name, removed, "Pruned old runs"),
                        Err(e) => warn!(suite = %record.suite_name, error = %e, "Pruning history failed"),
                    }
                }
                true
            }
            Err(e) => {
                warn!(suite = %record.suite_name, error = %e, "Failed to persist run");
                false
            }
        };

        let report = report::render(&result, &analysis, &alerts, &reporting.report_dir);
        let report_written = match report::write(&report) {
            Ok(()) => {
                info!(path = %report.path.display(), "Report written");
                true
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Failed to write report");
                false
            }
        };

        let summary = report::condensed(&result, &alerts);
        let notified = notify::dispatch(&self.notifiers, &summary).await;

        info!(
            suite = %result.suite_name,
            run_id = %record.run_id,
            passed = result.passed,
            failed = result.failed,
            error = result.error,
            alerts = alerts.len(),
            "Run complete"
        );

        RunOutcome {
            result,
            analysis,
            alerts,
            report,
            run_id: record.run_id,
            persisted,
            report_written,
            notified,
        }
    }

    /// Stored runs for a suite, most recent first.
    pub fn history(&self, suite_name: &str, limit: usize) -> Result<Vec<RunRecord>, StorageError> {
        self.store.load_recent(suite_name, limit)
    }
}
