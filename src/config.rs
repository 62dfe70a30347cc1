//! TOML configuration for probebench.
//!
//! One [`Config`] value is built per invocation and passed down to the
//! runner, the reporting layer and the notifier. Nothing reads configuration
//! from global state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::SuiteSpec;
use crate::runner::RunnerOptions;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "PROBEBENCH_CONFIG";

/// Config file picked up from the working directory.
pub const LOCAL_CONFIG: &str = "probebench.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub suites: Vec<SuiteSpec>,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), suites = config.suites.len(), "loaded configuration");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve configuration, in order:
    /// 1. `explicit` (a `--config` flag); errors are returned, not skipped.
    /// 2. The path in `PROBEBENCH_CONFIG`.
    /// 3. `./probebench.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        // 2. Environment variable override.
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "PROBEBENCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        // 3. Working directory.
        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            return Self::load(local);
        }

        // 4. Defaults.
        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    fn validate(&self) -> Result<()> {
        if self.runner.max_parallel == 0 {
            bail!("runner.max_parallel must be at least 1");
        }
        if self.runner.default_timeout_secs == 0 {
            bail!("runner.default_timeout_secs must be at least 1");
        }
        let threshold = self.reporting.regression_threshold_pct;
        if threshold.is_nan() || threshold < 0.0 {
            bail!("reporting.regression_threshold_pct must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.reporting.success_floor) {
            bail!("reporting.success_floor must be between 0 and 1");
        }
        let mut seen = std::collections::HashSet::new();
        for suite in &self.suites {
            if !seen.insert(suite.name.as_str()) {
                bail!("duplicate suite name: {}", suite.name);
            }
            crate::suite::ensure_unique_names(
                &suite.name,
                suite.units.iter().map(|u| u.name.as_str()),
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Default policy for suites that do not set `parallel` themselves.
    pub parallel: bool,
    pub max_parallel: usize,
    pub default_timeout_secs: u64,
    /// Substring filter on unit names; non-matching units are skipped.
    pub filter: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            max_parallel: 4,
            default_timeout_secs: 60,
            filter: None,
        }
    }
}

impl RunnerConfig {
    pub fn to_options(&self) -> RunnerOptions {
        RunnerOptions {
            max_parallel: self.max_parallel.max(1),
            default_timeout: Duration::from_secs(self.default_timeout_secs),
            filter: self.filter.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    /// One JSON file per run under `history_dir`.
    Files,
    /// One row per run in `sqlite_path`.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    pub backend: HistoryBackend,
    pub history_dir: PathBuf,
    pub sqlite_path: PathBuf,
    /// Markdown reports are written here.
    pub report_dir: PathBuf,
    /// Prior runs averaged into the trend baseline.
    pub history_window: usize,
    /// Runs kept per suite after each append; `None` keeps everything.
    pub retention: Option<usize>,
    /// Worsening beyond this percentage is a regression.
    pub regression_threshold_pct: f64,
    /// A regression while the success rate is below this is critical.
    pub success_floor: f64,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            backend: HistoryBackend::Files,
            history_dir: PathBuf::from(".probebench/history"),
            sqlite_path: PathBuf::from(".probebench/history.db"),
            report_dir: PathBuf::from(".probebench/reports"),
            history_window: 5,
            retention: None,
            regression_threshold_pct: 20.0,
            success_floor: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    /// JSON POST target. Without one, summaries only go to the log.
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();

        assert!(!cfg.runner.parallel);
        assert_eq!(cfg.runner.max_parallel, 4);
        assert_eq!(cfg.runner.default_timeout_secs, 60);
        assert!(cfg.runner.filter.is_none());

        assert_eq!(cfg.reporting.backend, HistoryBackend::Files);
        assert_eq!(cfg.reporting.history_window, 5);
        assert_eq!(cfg.reporting.regression_threshold_pct, 20.0);
        assert_eq!(cfg.reporting.success_floor, 0.5);
        assert!(cfg.reporting.retention.is_none());

        assert!(cfg.notify.enabled);
        assert!(cfg.notify.webhook_url.is_none());

        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Text);
        assert!(cfg.suites.is_empty());
    }

    #[test]
    fn test_parse_example_toml() {
        let cfg = Config::parse(
            r#"
[runner]
parallel = true
max_parallel = 8
filter = "login"

[reporting]
backend = "sqlite"
sqlite_path = "/var/lib/probebench/history.db"
regression_threshold_pct = 10.0
retention = 50

[notify]
webhook_url = "https://hooks.example.com/probebench"

[logging]
format = "json"

[[suites]]
name = "smoke"

[[suites.units]]
name = "true"
kind = "command"
program = "true"
"#,
        )
        .unwrap();

        assert!(cfg.runner.parallel);
        assert_eq!(cfg.runner.to_options().max_parallel, 8);
        assert_eq!(cfg.runner.filter.as_deref(), Some("login"));
        assert_eq!(cfg.reporting.backend, HistoryBackend::Sqlite);
        assert_eq!(cfg.reporting.retention, Some(50));
        // Unset keys in a present section keep their defaults.
        assert_eq!(cfg.reporting.success_floor, 0.5);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.suites.len(), 1);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(Config::parse("[runner]\nmax_parallel = 0\n").is_err());
        assert!(Config::parse("[reporting]\nsuccess_floor = 1.5\n").is_err());
        assert!(Config::parse("[[suites]]\nname = \"a\"\n[[suites]]\nname = \"a\"\n").is_err());
    }

    #[test]
    fn test_duplicate_unit_names_rejected() {
        let err = Config::parse(
            r#"
[[suites]]
name = "web"

[[suites.units]]
name = "lint"
kind = "command"
program = "true"

[[suites.units]]
name = "lint"
kind = "command"
program = "false"
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("duplicate unit name 'lint' in web"));
    }

    #[test]
    fn test_explicit_path_errors_are_returned() {
        let err = Config::resolve(Some(Path::new("/nonexistent/probebench.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probebench.toml");
        std::fs::write(&path, "[runner]\ndefault_timeout_secs = 5\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.runner.to_options().default_timeout, Duration::from_secs(5));
    }
}
