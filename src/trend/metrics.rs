//! Flat, comparable metrics derived from a suite result.

use std::collections::BTreeMap;

use crate::unit::{SuiteResult, TestStatus};

/// Which way a metric improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

impl Direction {
    /// Percent by which a change of `change_pct` is a worsening; negative
    /// for an improvement.
    pub fn worsened_by(self, change_pct: f64) -> f64 {
        match self {
            Direction::HigherIsBetter => -change_pct,
            Direction::LowerIsBetter => change_pct,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metric {
    pub value: f64,
    pub direction: Direction,
}

pub type Metrics = BTreeMap<String, Metric>;

pub const SUCCESS_RATE: &str = "success_rate";

/// Probe metadata keys tracked across runs.
const PROBE_METRICS: &[(&str, Direction)] = &[
    ("mean_ms", Direction::LowerIsBetter),
    ("max_ms", Direction::LowerIsBetter),
    ("p95_ms", Direction::LowerIsBetter),
    ("tps", Direction::HigherIsBetter),
    ("cpu_max", Direction::LowerIsBetter),
    ("memory_max_mb", Direction::LowerIsBetter),
];

/// Success rate, per-unit duration and probe aggregates.
///
/// Skipped units contribute nothing; their duration is meaningless.
pub fn extract(result: &SuiteResult) -> Metrics {
    let mut metrics = Metrics::new();
    metrics.insert(
        SUCCESS_RATE.to_string(),
        Metric {
            value: result.success_rate(),
            direction: Direction::HigherIsBetter,
        },
    );

    for unit in &result.units {
        if unit.status == TestStatus::Skipped {
            continue;
        }
        metrics.insert(
            format!("{}.duration", unit.name),
            Metric {
                value: unit.duration,
                direction: Direction::LowerIsBetter,
            },
        );
        for (key, direction) in PROBE_METRICS {
            if let Some(value) = unit.metric(key) {
                metrics.insert(
                    format!("{}.{}", unit.name, key),
                    Metric {
                        value,
                        direction: *direction,
                    },
                );
            }
        }
    }
    metrics
}
