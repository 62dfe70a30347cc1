//! Trend analysis against run history, and alert generation.

pub mod alerts;
pub mod analysis;
pub mod metrics;

pub use self::alerts::generate_alerts;
pub use self::analysis::{MetricDelta, TrendAnalysis, TrendAnalyzer};
pub use self::metrics::{extract, Direction, Metric, Metrics};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrendError {
    #[error("insufficient history: need {needed} prior runs, have {have}")]
    InsufficientHistory { needed: usize, have: usize },
}

/// Severity levels for alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Produced fresh for every run; never stored with the run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    pub message: String,
    /// Unit name or metric name.
    pub source: String,
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.source, self.message)
    }
}
