//! Security probes: single-pass scanners over files and directories.
//!
//! Each probe collects [`Finding`]s, records them in metadata
//! (`findings`, `max_severity`, `finding.<n>`) and fails when any finding
//! has a severity above zero.

pub mod config_audit;
pub mod dependencies;
pub mod permissions;
pub mod vulnerability;

pub use self::config_audit::ConfigAudit;
pub use self::dependencies::{Advisory, DependencyCheck};
pub use self::permissions::PermissionCheck;
pub use self::vulnerability::{RiskRule, VulnerabilityScan};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::assert::AssertionFailure;
use crate::unit::{UnitContext, UnitError};

/// Findings beyond this count are only reflected in the `findings` total.
const MAX_RECORDED_FINDINGS: usize = 50;

/// Directories never worth scanning.
pub(crate) const IGNORED_DIRS: &[&str] = &[".git", "node_modules", "vendor", "target", ".venv"];

/// 0 = informational, 1 = low, 2 = medium, 3 = high.
pub type Severity = u8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// `path`, `path:line` or `path#key`.
    pub location: String,
    pub rule: String,
    pub severity: Severity,
}

impl Finding {
    pub fn new(location: impl Into<String>, rule: impl Into<String>, severity: Severity) -> Self {
        Self {
            location: location.into(),
            rule: rule.into(),
            severity,
        }
    }
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] severity {}", self.location, self.rule, self.severity)
    }
}

/// Write findings into metadata and turn any non-zero severity into an
/// assertion failure.
pub(crate) fn report_findings(
    ctx: &UnitContext,
    what: &str,
    findings: &[Finding],
) -> Result<(), UnitError> {
    let max_severity = findings.iter().map(|f| f.severity).max().unwrap_or(0);
    ctx.record("findings", findings.len());
    ctx.record("max_severity", i64::from(max_severity));
    for (i, finding) in findings.iter().take(MAX_RECORDED_FINDINGS).enumerate() {
        ctx.record(format!("finding.{}", i), finding.to_string());
    }

    let serious: Vec<&Finding> = findings.iter().filter(|f| f.severity > 0).collect();
    if let Some(first) = serious.first() {
        return Err(AssertionFailure::new(format!(
            "{}: {} finding(s) above severity 0, first: {}",
            what,
            serious.len(),
            first
        ))
        .into());
    }
    Ok(())
}

pub(crate) fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

pub(crate) fn is_ignored_dir(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| IGNORED_DIRS.contains(&name))
            .unwrap_or(false)
}
