//! Suite organizer: named collections of units grouped by category.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::runner::Runner;
use crate::unit::{Scalar, SuiteResult, TestUnit};

/// Category tag attached to a unit when it is added to a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Functional,
    Performance,
    Security,
    Compatibility,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Functional => "functional",
            Category::Performance => "performance",
            Category::Security => "security",
            Category::Compatibility => "compatibility",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named suite. The parallel/sequential policy applies to every unit.
pub struct TestSuite {
    name: String,
    parallel: bool,
    entries: Vec<(Category, Box<dyn TestUnit>)>,
}

impl TestSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parallel: false,
            entries: Vec::new(),
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unit_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, unit)| unit.name())
    }

    pub fn add(&mut self, category: Category, unit: impl TestUnit + 'static) -> &mut Self {
        self.add_boxed(category, Box::new(unit))
    }

    pub fn add_boxed(&mut self, category: Category, unit: Box<dyn TestUnit>) -> &mut Self {
        self.entries.push((category, unit));
        self
    }

    /// Unit names under `category`, in declaration order.
    pub fn units_in(&self, category: Category) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(c, _)| *c == category)
            .map(|(_, u)| u.name())
            .collect()
    }

    /// Run with the suite's own policy.
    pub async fn run(self, runner: &Runner) -> SuiteResult {
        let parallel = self.parallel;
        self.run_with(runner, parallel).await
    }

    /// Run with an explicit policy, e.g. a CLI override.
    pub async fn run_with(self, runner: &Runner, parallel: bool) -> SuiteResult {
        let (categories, units): (Vec<Category>, Vec<Box<dyn TestUnit>>) =
            self.entries.into_iter().unzip();

        let mut result = runner.run(&self.name, units, parallel).await;

        // Runner output is in declaration order, so positions line up.
        for (record, category) in result.units.iter_mut().zip(categories) {
            record.category = Some(category);
            record
                .metadata
                .entry("category".to_string())
                .or_insert_with(|| Scalar::from(category.as_str()));
        }
        result
    }
}

/// Per-unit history is keyed by unit name, so a name may appear only once
/// in a run.
pub fn ensure_unique_names<'a>(
    run_name: &str,
    names: impl IntoIterator<Item = &'a str>,
) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            anyhow::bail!("duplicate unit name '{}' in {}", name, run_name);
        }
    }
    Ok(())
}

/// Fold several suite results into one run-level result.
///
/// Units keep their suite order; the duration is the sum of suite durations
/// because suites run one after another.
pub fn aggregate(run_name: impl Into<String>, results: Vec<SuiteResult>) -> SuiteResult {
    let run_name = run_name.into();
    let started_at = results
        .iter()
        .map(|r| r.started_at)
        .min()
        .unwrap_or_else(chrono::Utc::now);
    let duration: f64 = results.iter().map(|r| r.duration).sum();
    let units = results.into_iter().flat_map(|r| r.units).collect::<Vec<_>>();
    info!(run = %run_name, units = units.len(), "Aggregated suites");
    SuiteResult::from_records(
        run_name,
        started_at,
        Duration::from_secs_f64(duration.max(0.0)),
        units,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert;
    use crate::runner::RunnerOptions;
    use crate::unit::{TestStatus, UnitContext, UnitError};

    struct Check {
        name: &'static str,
        value: i64,
    }

    #[async_trait::async_trait]
    impl TestUnit for Check {
        fn name(&self) -> &str {
            self.name
        }

        async fn run_test(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
            ctx.record("value", self.value);
            assert::assert_eq(2, self.value)?;
            Ok(())
        }
    }

    struct Tagged;

    #[async_trait::async_trait]
    impl TestUnit for Tagged {
        fn name(&self) -> &str {
            "tagged"
        }

        async fn run_test(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
            ctx.record("category", "custom");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_categories_are_tagged() {
        let mut suite = TestSuite::new("nightly").with_parallel(true);
        suite
            .add(Category::Functional, Check { name: "login", value: 2 })
            .add(Category::Security, Check { name: "scan", value: 3 })
            .add(Category::Compatibility, Tagged);
        assert_eq!(suite.units_in(Category::Security), vec!["scan"]);

        let result = suite.run(&Runner::new(RunnerOptions::default())).await;
        assert_eq!(result.suite_name, "nightly");
        let login = result.unit("login").unwrap();
        assert_eq!(login.category, Some(Category::Functional));
        assert_eq!(login.metadata["category"], Scalar::from("functional"));

        let scan = result.unit("scan").unwrap();
        assert_eq!(scan.status, TestStatus::Failed);
        assert_eq!(scan.category, Some(Category::Security));

        // A unit's own metadata is never replaced.
        let tagged = result.unit("tagged").unwrap();
        assert_eq!(tagged.metadata["category"], Scalar::from("custom"));
        assert_eq!(tagged.category, Some(Category::Compatibility));

        let breakdown = result.by_category();
        assert_eq!(breakdown[&Category::Security].failed, 1);
    }

    #[tokio::test]
    async fn test_aggregate_suites() {
        let runner = Runner::new(RunnerOptions::default());
        let mut a = TestSuite::new("a");
        a.add(Category::Functional, Check { name: "a1", value: 2 });
        let mut b = TestSuite::new("b");
        b.add(Category::Functional, Check { name: "b1", value: 2 })
            .add(Category::Functional, Check { name: "b2", value: 9 });

        let ra = a.run(&runner).await;
        let rb = b.run(&runner).await;
        let run = aggregate("a+b", vec![ra, rb]);
        assert_eq!(run.suite_name, "a+b");
        assert_eq!(run.total, 3);
        assert_eq!(run.passed, 2);
        assert_eq!(run.failed, 1);
        let order: Vec<_> = run.units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(order, vec!["a1", "b1", "b2"]);
    }

    #[test]
    fn test_unit_names_must_be_unique() {
        let mut suite = TestSuite::new("web");
        suite
            .add(Category::Functional, Check { name: "login", value: 2 })
            .add(Category::Security, Check { name: "login", value: 2 });
        let names: Vec<_> = suite.unit_names().collect();
        assert_eq!(names, vec!["login", "login"]);

        let err = ensure_unique_names("web", suite.unit_names()).unwrap_err();
        assert_eq!(err.to_string(), "duplicate unit name 'login' in web");
        assert!(ensure_unique_names("web", ["a", "b"]).is_ok());
    }

    #[test]
    fn test_category_serde() {
        assert_eq!(serde_json::to_string(&Category::Performance).unwrap(), "\"performance\"");
        let c: Category = serde_json::from_str("\"compatibility\"").unwrap();
        assert_eq!(c, Category::Compatibility);
    }
}
