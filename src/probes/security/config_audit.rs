//! Configuration file audit: required keys present, non-empty, debug off.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use super::{report_findings, Finding};
use crate::unit::{TestUnit, UnitContext, UnitError};

/// Flattened key -> value view of a config file. Nested tables use dotted
/// keys; arrays and tables themselves are not values.
type FlatConfig = BTreeMap<String, String>;

const DEBUG_KEYS: &[&str] = &["debug", "app_debug", "display_errors"];
const TRUTHY: &[&str] = &["true", "1", "on", "yes"];

/// Audits one configuration file. The format is chosen by extension:
/// `.toml`, `.json`, anything else is read as `KEY=VALUE` lines.
///
/// Findings: missing required key (2), empty value (1), debug enabled (2).
pub struct ConfigAudit {
    name: String,
    path: PathBuf,
    required: Vec<String>,
    parsed: FlatConfig,
    timeout: Option<Duration>,
}

impl ConfigAudit {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            required: Vec::new(),
            parsed: FlatConfig::new(),
            timeout: None,
        }
    }

    pub fn required_keys(mut self, keys: Vec<String>) -> Self {
        self.required = keys;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn audit(&self) -> Vec<Finding> {
        let file = self.path.display().to_string();
        let mut findings = Vec::new();

        for key in &self.required {
            match self.parsed.get(key) {
                None => findings.push(Finding::new(format!("{}#{}", file, key), "missing-key", 2)),
                Some(v) if v.trim().is_empty() => {
                    findings.push(Finding::new(format!("{}#{}", file, key), "empty-value", 1))
                }
                Some(_) => {}
            }
        }

        for (key, value) in &self.parsed {
            let leaf = key.rsplit('.').next().unwrap_or(key).to_ascii_lowercase();
            if DEBUG_KEYS.contains(&leaf.as_str())
                && TRUTHY.contains(&value.trim().to_ascii_lowercase().as_str())
            {
                findings.push(Finding::new(format!("{}#{}", file, key), "debug-enabled", 2));
            }
        }
        findings
    }
}

fn parse(path: &std::path::Path, content: &str) -> Result<FlatConfig> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let mut out = FlatConfig::new();
    match ext.as_str() {
        "toml" => {
            let value: toml::Value = toml::from_str(content).context("Invalid TOML")?;
            flatten_toml("", &value, &mut out);
        }
        "json" => {
            let value: serde_json::Value = serde_json::from_str(content).context("Invalid JSON")?;
            flatten_json("", &value, &mut out);
        }
        _ => {
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let value = value.trim().trim_matches('"').trim_matches('\'');
                    out.insert(key.trim().to_string(), value.to_string());
                }
            }
        }
    }
    Ok(out)
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn flatten_toml(prefix: &str, value: &toml::Value, out: &mut FlatConfig) {
    match value {
        toml::Value::Table(table) => {
            for (k, v) in table {
                flatten_toml(&join(prefix, k), v, out);
            }
        }
        toml::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        toml::Value::Array(_) => {
            out.insert(prefix.to_string(), value.to_string());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

fn flatten_json(prefix: &str, value: &serde_json::Value, out: &mut FlatConfig) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                flatten_json(&join(prefix, k), v, out);
            }
        }
        serde_json::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        serde_json::Value::Null => {
            out.insert(prefix.to_string(), String::new());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

#[async_trait::async_trait]
impl TestUnit for ConfigAudit {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn setup(&mut self, _ctx: &UnitContext) -> Result<(), UnitError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        self.parsed = parse(&self.path, &content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(())
    }

    async fn run_test(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        ctx.record("keys", self.parsed.len());
        let findings = self.audit();
        report_findings(ctx, "config audit", &findings)
    }
}
