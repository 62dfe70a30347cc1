//! Unit and suite result records.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Metadata, TestStatus};
use crate::suite::Category;

/// Outcome of one unit execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub status: TestStatus,
    /// Configured timeout in seconds.
    pub timeout: f64,
    /// `end_time - start_time` in seconds; 0 for skipped units.
    pub duration: f64,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl UnitRecord {
    pub fn pending(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            category: None,
            status: TestStatus::Pending,
            timeout: timeout.as_secs_f64(),
            duration: 0.0,
            metadata: Metadata::new(),
            error_message: None,
            skip_reason: None,
            start_time: None,
            end_time: None,
        }
    }

    /// A unit that never ran.
    pub fn skipped(name: impl Into<String>, timeout: Duration, reason: impl Into<String>) -> Self {
        let mut record = Self::pending(name, timeout);
        record.status = TestStatus::Skipped;
        record.skip_reason = Some(reason.into());
        record
    }

    pub(crate) fn start(&mut self, at: DateTime<Utc>) {
        self.status = TestStatus::Running;
        self.start_time = Some(at);
    }

    /// Move to a terminal status. Only `failed`/`error` keep a message.
    pub(crate) fn finish(&mut self, status: TestStatus, message: Option<String>, at: DateTime<Utc>) {
        self.status = status;
        self.error_message = if status.is_problem() { message } else { None };
        self.end_time = Some(at);
        if let Some(start) = self.start_time {
            self.duration = (at - start)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
        }
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(|v| v.as_f64())
    }
}

/// Per-category counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategorySummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub error: usize,
}

impl CategorySummary {
    fn add(&mut self, status: TestStatus) {
        self.total += 1;
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Skipped => self.skipped += 1,
            TestStatus::Error => self.error += 1,
            // Aggregation only happens once every unit is terminal.
            TestStatus::Pending | TestStatus::Running => self.error += 1,
        }
    }
}

/// Aggregated outcome of running a named collection of units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub suite_name: String,
    pub started_at: DateTime<Utc>,
    /// Wall-clock span of the whole run in seconds.
    pub duration: f64,
    /// Declaration order, not completion order.
    pub units: Vec<UnitRecord>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub error: usize,
}

impl SuiteResult {
    pub fn from_records(
        suite_name: impl Into<String>,
        started_at: DateTime<Utc>,
        duration: Duration,
        units: Vec<UnitRecord>,
    ) -> Self {
        let mut counts = CategorySummary::default();
        for unit in &units {
            counts.add(unit.status);
        }
        Self {
            suite_name: suite_name.into(),
            started_at,
            duration: duration.as_secs_f64(),
            units,
            total: counts.total,
            passed: counts.passed,
            failed: counts.failed,
            skipped: counts.skipped,
            error: counts.error,
        }
    }

    /// `passed / total`, 0 for an empty suite.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    /// No unit failed or errored.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.error == 0
    }

    pub fn unit(&self, name: &str) -> Option<&UnitRecord> {
        self.units.iter().find(|u| u.name == name)
    }

    /// Counts broken down by category. Untagged units are left out.
    pub fn by_category(&self) -> BTreeMap<Category, CategorySummary> {
        let mut map: BTreeMap<Category, CategorySummary> = BTreeMap::new();
        for unit in &self.units {
            if let Some(category) = unit.category {
                map.entry(category).or_default().add(unit.status);
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, status: TestStatus, category: Option<Category>) -> UnitRecord {
        let mut r = UnitRecord::pending(name, Duration::from_secs(5));
        r.status = status;
        r.category = category;
        r
    }

    #[test]
    fn test_success_rate_empty_is_zero() {
        let result = SuiteResult::from_records("empty", Utc::now(), Duration::ZERO, vec![]);
        assert_eq!(result.total, 0);
        assert_eq!(result.success_rate(), 0.0);
        assert!(!result.success_rate().is_nan());
    }

    #[test]
    fn test_counts_and_rate() {
        let result = SuiteResult::from_records(
            "s",
            Utc::now(),
            Duration::from_secs(1),
            vec![
                record("a", TestStatus::Passed, None),
                record("b", TestStatus::Failed, None),
                record("c", TestStatus::Skipped, None),
                record("d", TestStatus::Passed, None),
            ],
        );
        assert_eq!(
            (result.total, result.passed, result.failed, result.skipped, result.error),
            (4, 2, 1, 1, 0)
        );
        assert_eq!(result.success_rate(), 0.5);
        assert!(!result.is_success());
    }

    #[test]
    fn test_by_category() {
        let result = SuiteResult::from_records(
            "s",
            Utc::now(),
            Duration::ZERO,
            vec![
                record("a", TestStatus::Passed, Some(Category::Security)),
                record("b", TestStatus::Error, Some(Category::Security)),
                record("c", TestStatus::Passed, Some(Category::Performance)),
                record("d", TestStatus::Passed, None),
            ],
        );
        let breakdown = result.by_category();
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[&Category::Security].total, 2);
        assert_eq!(breakdown[&Category::Security].error, 1);
        assert_eq!(breakdown[&Category::Performance].passed, 1);
    }

    #[test]
    fn test_finish_drops_message_on_pass() {
        let mut r = UnitRecord::pending("x", Duration::from_secs(1));
        let now = Utc::now();
        r.start(now);
        r.finish(TestStatus::Passed, Some("ignored".into()), now);
        assert!(r.error_message.is_none());
        assert_eq!(r.duration, 0.0);
    }
}
