//! Dependency manifest check against a denylist of known-bad packages.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{report_findings, Finding, Severity};
use crate::unit::{TestUnit, UnitContext, UnitError};

const MANIFESTS: &[&str] = &["Cargo.toml", "package.json", "composer.json", "requirements.txt"];

/// A denylisted package, optionally narrowed to versions starting with
/// `versions` (e.g. `"1.2."`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub package: String,
    #[serde(default)]
    pub versions: Option<String>,
    #[serde(default = "default_severity")]
    pub severity: Severity,
}

fn default_severity() -> Severity {
    2
}

impl Advisory {
    pub fn new(package: impl Into<String>, versions: Option<&str>, severity: Severity) -> Self {
        Self {
            package: package.into(),
            versions: versions.map(str::to_string),
            severity,
        }
    }

    fn matches(&self, dep: &Dependency) -> bool {
        if !self.package.eq_ignore_ascii_case(&dep.name) {
            return false;
        }
        match &self.versions {
            None => true,
            Some(prefix) => dep.version.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Dependency {
    manifest: String,
    name: String,
    /// Requirement with range operators stripped.
    version: String,
}

/// Reads the manifests found directly under `root` and reports every
/// dependency matching an advisory.
///
/// Metadata: `manifests`, `dependencies` plus the common finding keys.
pub struct DependencyCheck {
    name: String,
    root: PathBuf,
    advisories: Vec<Advisory>,
    dependencies: Vec<Dependency>,
    manifests: usize,
    timeout: Option<Duration>,
}

impl DependencyCheck {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            advisories: Vec::new(),
            dependencies: Vec::new(),
            manifests: 0,
            timeout: None,
        }
    }

    pub fn advisories(mut self, advisories: Vec<Advisory>) -> Self {
        self.advisories = advisories;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

fn normalize_version(raw: &str) -> String {
    raw.trim()
        .trim_start_matches(|c: char| matches!(c, '^' | '~' | '=' | '>' | '<' | 'v' | ' '))
        .to_string()
}

fn parse_manifest(path: &Path, content: &str) -> Result<Vec<Dependency>> {
    let manifest = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let mut deps = Vec::new();
    let mut push = |name: &str, version: &str| {
        deps.push(Dependency {
            manifest: manifest.clone(),
            name: name.to_string(),
            version: normalize_version(version),
        })
    };

    match manifest.as_str() {
        "Cargo.toml" => {
            let doc: toml::Value = toml::from_str(content).context("Invalid Cargo.toml")?;
            for section in ["dependencies", "dev-dependencies", "build-dependencies"] {
                let Some(table) = doc.get(section).and_then(|v| v.as_table()) else {
                    continue;
                };
                for (name, spec) in table {
                    let version = match spec {
                        toml::Value::String(v) => v.as_str(),
                        toml::Value::Table(t) => {
                            t.get("version").and_then(|v| v.as_str()).unwrap_or("")
                        }
                        _ => "",
                    };
                    push(name, version);
                }
            }
        }
        "package.json" | "composer.json" => {
            let doc: serde_json::Value =
                serde_json::from_str(content).with_context(|| format!("Invalid {}", manifest))?;
            let sections: &[&str] = if manifest == "package.json" {
                &["dependencies", "devDependencies"]
            } else {
                &["require", "require-dev"]
            };
            for section in sections {
                let Some(map) = doc.get(*section).and_then(|v| v.as_object()) else {
                    continue;
                };
                for (name, version) in map {
                    push(name, version.as_str().unwrap_or(""));
                }
            }
        }
        _ => {
            for line in content.lines() {
                let line = line.split('#').next().unwrap_or("").trim();
                if line.is_empty() || line.starts_with('-') {
                    continue;
                }
                let split = line
                    .find(|c: char| matches!(c, '=' | '>' | '<' | '~' | '!' | ';' | '['))
                    .unwrap_or(line.len());
                let (name, rest) = line.split_at(split);
                push(name.trim(), rest.trim_start_matches(['=', '!', '~']));
            }
        }
    }
    Ok(deps)
}

#[async_trait::async_trait]
impl TestUnit for DependencyCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn setup(&mut self, _ctx: &UnitContext) -> Result<(), UnitError> {
        self.dependencies.clear();
        self.manifests = 0;
        for manifest in MANIFESTS {
            let path = self.root.join(manifest);
            if !path.is_file() {
                continue;
            }
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            self.dependencies.extend(parse_manifest(&path, &content)?);
            self.manifests += 1;
        }
        if self.manifests == 0 {
            return Err(UnitError::other(format!(
                "no dependency manifest found in {}",
                self.root.display()
            )));
        }
        Ok(())
    }

    async fn run_test(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        ctx.record("manifests", self.manifests);
        ctx.record("dependencies", self.dependencies.len());

        let mut findings = Vec::new();
        for dep in &self.dependencies {
            for advisory in self.advisories.iter().filter(|a| a.matches(dep)) {
                findings.push(Finding::new(
                    format!("{}#{}@{}", dep.manifest, dep.name, dep.version),
                    "denylisted-dependency",
                    advisory.severity,
                ));
            }
        }
        report_findings(ctx, "dependency check", &findings)
    }
}
