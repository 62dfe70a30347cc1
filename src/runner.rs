//! Suite runner: sequential or bounded-parallel execution with per-unit
//! timeouts.
//!
//! Every unit executes on its own tokio task. The runner only ever waits on
//! that task for the unit's timeout; a unit that overruns is aborted and
//! recorded as `error` with message `"timeout"`, and the suite moves on
//! without it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::unit::{self, SuiteResult, TestStatus, TestUnit, UnitContext, UnitRecord};

/// Runner knobs. Constructed once per run from [`crate::config::RunnerConfig`].
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Upper bound on concurrently executing units in parallel mode.
    pub max_parallel: usize,
    /// Timeout for units that do not declare their own.
    pub default_timeout: Duration,
    /// Only units whose name contains this substring run; the rest are skipped.
    pub filter: Option<String>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            default_timeout: Duration::from_secs(60),
            filter: None,
        }
    }
}

pub struct Runner {
    options: RunnerOptions,
}

impl Runner {
    pub fn new(options: RunnerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Run `units` and aggregate them into one suite result.
    ///
    /// Output order is declaration order in both modes. No unit's failure
    /// stops the batch.
    pub async fn run(
        &self,
        suite_name: &str,
        units: Vec<Box<dyn TestUnit>>,
        parallel: bool,
    ) -> SuiteResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(suite = %suite_name, units = units.len(), parallel, "Running suite");

        let mut names = Vec::with_capacity(units.len());
        let mut slots: Vec<Option<UnitRecord>> = Vec::with_capacity(units.len());
        let mut runnable = Vec::new();

        for (idx, unit) in units.into_iter().enumerate() {
            let timeout = unit.timeout().unwrap_or(self.options.default_timeout);
            names.push((unit.name().to_string(), timeout));
            match self.skip_reason(unit.as_ref()) {
                Some(reason) => {
                    info!(suite = %suite_name, unit = %unit.name(), %reason, "Skipping unit");
                    slots.push(Some(UnitRecord::skipped(unit.name(), timeout, reason)));
                }
                None => {
                    slots.push(None);
                    runnable.push((idx, unit, timeout));
                }
            }
        }

        if parallel {
            let permits = Arc::new(Semaphore::new(self.options.max_parallel.max(1)));
            let mut set = JoinSet::new();
            for (idx, unit, timeout) in runnable {
                let permits = permits.clone();
                set.spawn(async move {
                    // The semaphore is never closed, so acquire only fails if it were.
                    let _permit = permits.acquire_owned().await.ok();
                    (idx, run_bounded(unit, timeout).await)
                });
            }
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((idx, record)) => slots[idx] = Some(record),
                    Err(e) => error!(suite = %suite_name, "Unit dispatcher task failed: {}", e),
                }
            }
        } else {
            for (idx, unit, timeout) in runnable {
                slots[idx] = Some(run_bounded(unit, timeout).await);
            }
        }

        let records: Vec<UnitRecord> = slots
            .into_iter()
            .zip(names)
            .map(|(slot, (name, timeout))| {
                slot.unwrap_or_else(|| {
                    let mut lost = UnitRecord::pending(name, timeout);
                    let now = Utc::now();
                    lost.start(now);
                    lost.finish(TestStatus::Error, Some("unit result lost".to_string()), now);
                    lost
                })
            })
            .collect();

        let result = SuiteResult::from_records(suite_name, started_at, clock.elapsed(), records);
        info!(
            suite = %suite_name,
            total = result.total,
            passed = result.passed,
            failed = result.failed,
            skipped = result.skipped,
            error = result.error,
            duration_s = result.duration,
            "Suite finished"
        );
        result
    }

    fn skip_reason(&self, unit: &dyn TestUnit) -> Option<String> {
        if let Some(filter) = &self.options.filter {
            if !unit.name().contains(filter.as_str()) {
                return Some(format!("filtered out by '{}'", filter));
            }
        }
        unit.skip_reason()
    }
}

/// Execute one unit on its own task, waiting at most `timeout` for it.
async fn run_bounded(mut unit: Box<dyn TestUnit>, timeout: Duration) -> UnitRecord {
    let name = unit.name().to_string();
    let ctx = UnitContext::new();
    let task_ctx = ctx.clone();
    let started = Utc::now();

    let mut handle =
        tokio::spawn(async move { unit::execute(unit.as_mut(), &task_ctx, timeout).await });

    let record = match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(record)) => record,
        Ok(Err(e)) => {
            error!(unit = %name, "Unit task failed: {}", e);
            let mut record = UnitRecord::pending(&name, timeout);
            record.start(started);
            record.metadata = ctx.snapshot();
            record.finish(TestStatus::Error, Some(format!("unit task failed: {}", e)), Utc::now());
            record
        }
        Err(_) => {
            // Abandon the task; it is never awaited again.
            handle.abort();
            warn!(unit = %name, timeout_s = timeout.as_secs_f64(), "Unit timed out");
            let mut record = UnitRecord::pending(&name, timeout);
            record.start(started);
            record.metadata = ctx.snapshot();
            record.finish(TestStatus::Error, Some("timeout".to_string()), Utc::now());
            record
        }
    };

    info!(unit = %record.name, status = %record.status, duration_s = record.duration, "Unit finished");
    record
}
