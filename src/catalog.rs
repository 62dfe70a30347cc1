//! Declarative suites: `[[suites]]` entries in the config file turned into
//! runnable [`TestSuite`]s.
//!
//! ```toml
//! [[suites]]
//! name = "web"
//! parallel = true
//!
//! [[suites.units]]
//! name = "php-lint"
//! kind = "command"
//! program = "php"
//! args = ["-l", "index.php"]
//!
//! [[suites.units]]
//! name = "home-latency"
//! kind = "http_response_time"
//! url = "http://localhost:8080/"
//! max_mean_ms = 250.0
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::probes::{
    Advisory, CommandOperation, CommandProbe, ConfigAudit, DependencyCheck, HttpGet,
    PermissionCheck, ResourceUsageProbe, ResponseTimeProbe, RiskRule, ThroughputProbe,
    VulnerabilityScan,
};
use crate::suite::{Category, TestSuite};
use crate::unit::TestUnit;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteSpec {
    pub name: String,
    /// `None` defers to `[runner] parallel`.
    #[serde(default)]
    pub parallel: Option<bool>,
    #[serde(default)]
    pub units: Vec<UnitSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub name: String,
    /// Defaults by kind: security scanners are `security`, HTTP and resource
    /// probes `performance`, commands `functional`.
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(flatten)]
    pub kind: UnitKind,
}

fn default_iterations() -> usize {
    10
}

fn default_max_mean_ms() -> f64 {
    1000.0
}

fn default_window_secs() -> f64 {
    5.0
}

fn default_min_tps() -> f64 {
    1.0
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_cpu_percent() -> f64 {
    100.0
}

fn default_max_memory_mb() -> f64 {
    1024.0
}

fn default_interval_ms() -> u64 {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitKind {
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
        #[serde(default)]
        expected_exit: i32,
    },
    HttpResponseTime {
        url: String,
        #[serde(default = "default_iterations")]
        iterations: usize,
        #[serde(default = "default_max_mean_ms")]
        max_mean_ms: f64,
        #[serde(default = "default_request_timeout_secs")]
        request_timeout_secs: u64,
    },
    HttpThroughput {
        url: String,
        #[serde(default = "default_window_secs")]
        window_secs: f64,
        #[serde(default = "default_min_tps")]
        min_tps: f64,
        #[serde(default = "default_request_timeout_secs")]
        request_timeout_secs: u64,
    },
    CommandResourceUsage {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_max_cpu_percent")]
        max_cpu_percent: f64,
        #[serde(default = "default_max_memory_mb")]
        max_memory_mb: f64,
        #[serde(default = "default_interval_ms")]
        interval_ms: u64,
    },
    VulnerabilityScan {
        root: PathBuf,
        #[serde(default)]
        extensions: Vec<String>,
        /// Empty means the built-in rule set.
        #[serde(default)]
        rules: Vec<RiskRule>,
    },
    ConfigAudit {
        path: PathBuf,
        #[serde(default)]
        required_keys: Vec<String>,
    },
    PermissionCheck {
        root: PathBuf,
        #[serde(default)]
        max_file_mode: Option<u32>,
        #[serde(default)]
        max_dir_mode: Option<u32>,
        #[serde(default)]
        owner_uid: Option<u32>,
    },
    DependencyCheck {
        root: PathBuf,
        #[serde(default)]
        advisories: Vec<Advisory>,
    },
}

impl UnitKind {
    pub fn label(&self) -> &'static str {
        match self {
            UnitKind::Command { .. } => "command",
            UnitKind::HttpResponseTime { .. } => "http_response_time",
            UnitKind::HttpThroughput { .. } => "http_throughput",
            UnitKind::CommandResourceUsage { .. } => "command_resource_usage",
            UnitKind::VulnerabilityScan { .. } => "vulnerability_scan",
            UnitKind::ConfigAudit { .. } => "config_audit",
            UnitKind::PermissionCheck { .. } => "permission_check",
            UnitKind::DependencyCheck { .. } => "dependency_check",
        }
    }

    pub fn default_category(&self) -> Category {
        match self {
            UnitKind::Command { .. } => Category::Functional,
            UnitKind::HttpResponseTime { .. }
            | UnitKind::HttpThroughput { .. }
            | UnitKind::CommandResourceUsage { .. } => Category::Performance,
            UnitKind::VulnerabilityScan { .. }
            | UnitKind::ConfigAudit { .. }
            | UnitKind::PermissionCheck { .. }
            | UnitKind::DependencyCheck { .. } => Category::Security,
        }
    }
}

impl UnitSpec {
    pub fn category(&self) -> Category {
        self.category.unwrap_or_else(|| self.kind.default_category())
    }

    /// Construct the unit this entry describes.
    pub fn build(&self) -> Result<Box<dyn TestUnit>> {
        let name = self.name.clone();
        let timeout = self.timeout_secs.map(Duration::from_secs);

        let unit: Box<dyn TestUnit> = match &self.kind {
            UnitKind::Command {
                program,
                args,
                cwd,
                expected_exit,
            } => {
                let mut op = CommandOperation::new(program, args.clone());
                if let Some(cwd) = cwd {
                    op = op.current_dir(cwd);
                }
                let mut probe = CommandProbe::new(name, op).expected_exit(*expected_exit);
                if let Some(t) = timeout {
                    probe = probe.with_timeout(t);
                }
                Box::new(probe)
            }
            UnitKind::HttpResponseTime {
                url,
                iterations,
                max_mean_ms,
                request_timeout_secs,
            } => {
                let op = HttpGet::new(url, Duration::from_secs(*request_timeout_secs))?;
                let mut probe = ResponseTimeProbe::new(name, Arc::new(op))
                    .iterations(*iterations)
                    .max_mean_ms(*max_mean_ms);
                if let Some(t) = timeout {
                    probe = probe.with_timeout(t);
                }
                Box::new(probe)
            }
            UnitKind::HttpThroughput {
                url,
                window_secs,
                min_tps,
                request_timeout_secs,
            } => {
                let window = Duration::try_from_secs_f64(*window_secs)
                    .with_context(|| format!("unit {}: invalid window_secs", self.name))?;
                let op = HttpGet::new(url, Duration::from_secs(*request_timeout_secs))?;
                let mut probe = ThroughputProbe::new(name, Arc::new(op))
                    .window(window)
                    .min_tps(*min_tps);
                if let Some(t) = timeout {
                    probe = probe.with_timeout(t);
                }
                Box::new(probe)
            }
            UnitKind::CommandResourceUsage {
                program,
                args,
                max_cpu_percent,
                max_memory_mb,
                interval_ms,
            } => {
                let op = CommandOperation::new(program, args.clone());
                let mut probe = ResourceUsageProbe::new(name, Arc::new(op))
                    .interval(Duration::from_millis(*interval_ms))
                    .max_cpu_percent(*max_cpu_percent)
                    .max_memory_mb(*max_memory_mb);
                if let Some(t) = timeout {
                    probe = probe.with_timeout(t);
                }
                Box::new(probe)
            }
            UnitKind::VulnerabilityScan {
                root,
                extensions,
                rules,
            } => {
                let mut scan = VulnerabilityScan::new(name, root).extensions(extensions.clone());
                if !rules.is_empty() {
                    scan = scan.rules(rules.clone());
                }
                if let Some(t) = timeout {
                    scan = scan.with_timeout(t);
                }
                Box::new(scan)
            }
            UnitKind::ConfigAudit {
                path,
                required_keys,
            } => {
                let mut audit = ConfigAudit::new(name, path).required_keys(required_keys.clone());
                if let Some(t) = timeout {
                    audit = audit.with_timeout(t);
                }
                Box::new(audit)
            }
            UnitKind::PermissionCheck {
                root,
                max_file_mode,
                max_dir_mode,
                owner_uid,
            } => {
                let mut check = PermissionCheck::new(name, root);
                if let Some(mode) = max_file_mode {
                    check = check.max_file_mode(*mode);
                }
                if let Some(mode) = max_dir_mode {
                    check = check.max_dir_mode(*mode);
                }
                if let Some(uid) = owner_uid {
                    check = check.owner_uid(*uid);
                }
                if let Some(t) = timeout {
                    check = check.with_timeout(t);
                }
                Box::new(check)
            }
            UnitKind::DependencyCheck { root, advisories } => {
                let mut check = DependencyCheck::new(name, root).advisories(advisories.clone());
                if let Some(t) = timeout {
                    check = check.with_timeout(t);
                }
                Box::new(check)
            }
        };
        Ok(unit)
    }
}

impl SuiteSpec {
    /// Build the suite. `default_parallel` applies when the entry does not
    /// set `parallel` itself.
    pub fn build(&self, default_parallel: bool) -> Result<TestSuite> {
        let mut suite =
            TestSuite::new(&self.name).with_parallel(self.parallel.unwrap_or(default_parallel));
        for spec in &self.units {
            let unit = spec
                .build()
                .with_context(|| format!("suite {}: cannot build unit {}", self.name, spec.name))?;
            suite.add_boxed(spec.category(), unit);
        }
        Ok(suite)
    }
}

/// Look up suites by name, preserving the requested order.
pub fn select<'a>(suites: &'a [SuiteSpec], names: &[String]) -> Result<Vec<&'a SuiteSpec>> {
    names
        .iter()
        .map(|name| {
            suites
                .iter()
                .find(|s| &s.name == name)
                .with_context(|| format!("unknown suite: {}", name))
        })
        .collect()
}
