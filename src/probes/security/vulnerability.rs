//! Pattern-based source scanner for risky constructs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use super::{display_path, is_ignored_dir, report_findings, Finding, Severity};
use crate::unit::{TestUnit, UnitContext, UnitError};

/// A named regex applied line by line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRule {
    pub id: String,
    pub pattern: String,
    pub severity: Severity,
}

impl RiskRule {
    pub fn new(id: impl Into<String>, pattern: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            pattern: pattern.into(),
            severity,
        }
    }

    /// Rules for common dynamic-execution, deserialization and secret leaks.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("eval-call", r"\beval\s*\(", 3),
            Self::new(
                "shell-exec",
                r"\b(shell_exec|system|passthru|popen|proc_open)\s*\(",
                3,
            ),
            Self::new("unsafe-unserialize", r"\bunserialize\s*\(", 2),
            Self::new(
                "sql-superglobal",
                r"mysqli?_query\s*\([^)]*\$_(GET|POST|REQUEST|COOKIE)",
                3,
            ),
            Self::new(
                "hardcoded-secret",
                r#"(?i)\b(password|passwd|secret|api_?key|token)\s*[:=]\s*["'][^"']{4,}["']"#,
                2,
            ),
            Self::new("aws-access-key", r"\bAKIA[0-9A-Z]{16}\b", 3),
            Self::new("private-key", r"-----BEGIN( [A-Z]+)? PRIVATE KEY-----", 3),
        ]
    }
}

#[derive(Clone)]
struct CompiledRule {
    id: String,
    regex: Regex,
    severity: Severity,
}

/// Walks `root` and reports every line matching a rule.
///
/// Metadata: `files_scanned` plus the common finding keys.
pub struct VulnerabilityScan {
    name: String,
    root: PathBuf,
    extensions: Vec<String>,
    rules: Vec<RiskRule>,
    compiled: Vec<CompiledRule>,
    timeout: Option<Duration>,
}

impl VulnerabilityScan {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            extensions: Vec::new(),
            rules: RiskRule::defaults(),
            compiled: Vec::new(),
            timeout: None,
        }
    }

    /// Restrict the scan to these file extensions (without the dot). Empty
    /// means every file.
    pub fn extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn rules(mut self, rules: Vec<RiskRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

fn wanted(extensions: &[String], path: &Path) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.contains(&e.to_ascii_lowercase()))
        .unwrap_or(false)
}

/// Blocking tree walk; returns files scanned and findings.
fn scan(root: &Path, extensions: &[String], rules: &[CompiledRule]) -> (usize, Vec<Finding>) {
    let mut files = 0;
    let mut findings = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_ignored_dir(e));

    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || !wanted(extensions, entry.path()) {
            continue;
        }
        // Binary or unreadable files are not source.
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        files += 1;
        let location = display_path(root, entry.path());
        for (idx, line) in content.lines().enumerate() {
            for rule in rules {
                if rule.regex.is_match(line) {
                    findings.push(Finding::new(
                        format!("{}:{}", location, idx + 1),
                        rule.id.clone(),
                        rule.severity,
                    ));
                }
            }
        }
    }
    (files, findings)
}

#[async_trait::async_trait]
impl TestUnit for VulnerabilityScan {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn setup(&mut self, _ctx: &UnitContext) -> Result<(), UnitError> {
        if !self.root.is_dir() {
            return Err(UnitError::other(format!(
                "scan root {} is not a directory",
                self.root.display()
            )));
        }
        self.compiled = self
            .rules
            .iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern)
                    .with_context(|| format!("Invalid pattern for rule {}", rule.id))?;
                Ok(CompiledRule {
                    id: rule.id.clone(),
                    regex,
                    severity: rule.severity,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(())
    }

    async fn run_test(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let root = self.root.clone();
        let extensions = self.extensions.clone();
        let rules = self.compiled.clone();
        let (files, findings) =
            tokio::task::spawn_blocking(move || scan(&root, &extensions, &rules))
                .await
                .context("Source scan task failed")?;
        debug!(scan = %self.name, files, findings = findings.len(), "Source scan finished");
        ctx.record("files_scanned", files);
        report_findings(ctx, "vulnerability scan", &findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::testing::with_yield_count;
    use crate::unit::{execute, Scalar, TestStatus};

    async fn run(scan: &mut VulnerabilityScan) -> crate::unit::UnitRecord {
        execute(scan, &UnitContext::new(), Duration::from_secs(10)).await
    }

    #[tokio::test]
    async fn test_clean_tree_passes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.php"), "<?php echo 'hello';\n").unwrap();
        let mut scan = VulnerabilityScan::new("vuln", dir.path());
        let record = run(&mut scan).await;
        assert_eq!(record.status, TestStatus::Passed);
        assert_eq!(record.metadata["files_scanned"], Scalar::Int(1));
        assert_eq!(record.metadata["findings"], Scalar::Int(0));
    }

    #[tokio::test]
    async fn test_risky_code_fails_with_locations() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("admin.php"),
            "<?php\n$x = 1;\neval($_GET['code']);\n",
        )
        .unwrap();
        let mut scan = VulnerabilityScan::new("vuln", dir.path());
        let record = run(&mut scan).await;
        assert_eq!(record.status, TestStatus::Failed);
        assert_eq!(record.metadata["max_severity"], Scalar::Int(3));
        let first = record.metadata["finding.0"].to_string();
        assert!(first.contains("admin.php:3"));
        assert!(first.contains("eval-call"));
    }

    #[tokio::test]
    async fn test_extension_filter_and_ignored_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "eval(x)\n").unwrap();
        std::fs::create_dir(dir.path().join("vendor")).unwrap();
        std::fs::write(dir.path().join("vendor/lib.php"), "eval(x);\n").unwrap();
        std::fs::write(dir.path().join("app.php"), "<?php\n").unwrap();

        let mut scan = VulnerabilityScan::new("vuln", dir.path()).extensions(vec!["php".into()]);
        let record = run(&mut scan).await;
        assert_eq!(record.status, TestStatus::Passed);
        assert_eq!(record.metadata["files_scanned"], Scalar::Int(1));
    }

    #[tokio::test]
    async fn test_bad_rule_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut scan = VulnerabilityScan::new("vuln", dir.path())
            .rules(vec![RiskRule::new("broken", "(unclosed", 1)]);
        let record = run(&mut scan).await;
        assert_eq!(record.status, TestStatus::Error);
        assert!(record.error_message.unwrap().starts_with("setup failed: "));
    }

    #[tokio::test]
    async fn test_missing_root_is_error() {
        let mut scan = VulnerabilityScan::new("vuln", "/nonexistent/probebench/root");
        let record = run(&mut scan).await;
        assert_eq!(record.status, TestStatus::Error);
    }

    #[tokio::test]
    async fn test_scan_runs_off_the_runtime_thread() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..200 {
            std::fs::write(
                dir.path().join(format!("page{}.php", i)),
                "<?php\necho 'ok';\n",
            )
            .unwrap();
        }
        let mut scan = VulnerabilityScan::new("vuln", dir.path());
        let (record, ticks) = with_yield_count(run(&mut scan)).await;
        assert_eq!(record.status, TestStatus::Passed);
        assert_eq!(record.metadata["files_scanned"], Scalar::Int(200));
        assert!(ticks > 0);
    }
}
