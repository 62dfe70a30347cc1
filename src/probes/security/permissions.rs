//! File permission check (unix only).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use super::{report_findings, Finding};
use crate::unit::{TestUnit, UnitContext, UnitError};

/// Walks `root` and flags entries that are world-writable (3), looser than
/// the allowed mode (2) or owned by an unexpected uid (2).
///
/// Metadata: `entries_checked` plus the common finding keys.
pub struct PermissionCheck {
    name: String,
    root: PathBuf,
    policy: ModePolicy,
    timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct ModePolicy {
    max_file_mode: u32,
    max_dir_mode: u32,
    owner_uid: Option<u32>,
}

impl PermissionCheck {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            policy: ModePolicy {
                max_file_mode: 0o644,
                max_dir_mode: 0o755,
                owner_uid: None,
            },
            timeout: None,
        }
    }

    pub fn max_file_mode(mut self, mode: u32) -> Self {
        self.policy.max_file_mode = mode;
        self
    }

    pub fn max_dir_mode(mut self, mode: u32) -> Self {
        self.policy.max_dir_mode = mode;
        self
    }

    pub fn owner_uid(mut self, uid: u32) -> Self {
        self.policy.owner_uid = Some(uid);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Blocking tree walk; returns entries checked and findings.
#[cfg(unix)]
fn check(root: &Path, policy: ModePolicy) -> (usize, Vec<Finding>) {
    use std::os::unix::fs::MetadataExt;
    use walkdir::WalkDir;

    let mut checked = 0;
    let mut findings = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !super::is_ignored_dir(e));

    for entry in walker.filter_map(|e| e.ok()) {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.file_type().is_symlink() {
            continue;
        }
        checked += 1;
        let location = entry.path().display().to_string();
        let mode = meta.mode() & 0o7777;
        let allowed = if meta.is_dir() {
            policy.max_dir_mode
        } else {
            policy.max_file_mode
        };

        if mode & 0o002 != 0 {
            findings.push(Finding::new(
                format!("{} ({:o})", location, mode),
                "world-writable",
                3,
            ));
        } else if mode & !allowed != 0 {
            findings.push(Finding::new(
                format!("{} ({:o} > {:o})", location, mode, allowed),
                "mode-too-permissive",
                2,
            ));
        }

        if let Some(uid) = policy.owner_uid {
            if meta.uid() != uid {
                findings.push(Finding::new(
                    format!("{} (uid {})", location, meta.uid()),
                    "unexpected-owner",
                    2,
                ));
            }
        }
    }
    (checked, findings)
}

#[cfg(not(unix))]
fn check(_root: &Path, _policy: ModePolicy) -> (usize, Vec<Finding>) {
    (0, Vec::new())
}

#[async_trait::async_trait]
impl TestUnit for PermissionCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn skip_reason(&self) -> Option<String> {
        if cfg!(unix) {
            None
        } else {
            Some("permission checks require a unix platform".to_string())
        }
    }

    async fn setup(&mut self, _ctx: &UnitContext) -> Result<(), UnitError> {
        if !self.root.exists() {
            return Err(UnitError::other(format!(
                "{} does not exist",
                self.root.display()
            )));
        }
        Ok(())
    }

    async fn run_test(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let root = self.root.clone();
        let policy = self.policy;
        let (checked, findings) = tokio::task::spawn_blocking(move || check(&root, policy))
            .await
            .context("Permission scan task failed")?;
        ctx.record("entries_checked", checked);
        report_findings(ctx, "permission check", &findings)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::probes::testing::with_yield_count;
    use crate::unit::{execute, Scalar, TestStatus};
    use std::os::unix::fs::PermissionsExt;

    fn chmod(path: &std::path::Path, mode: u32) {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    async fn run(unit: &mut PermissionCheck) -> crate::unit::UnitRecord {
        execute(unit, &UnitContext::new(), Duration::from_secs(5)).await
    }

    #[tokio::test]
    async fn test_tight_permissions_pass() {
        let dir = tempfile::tempdir().unwrap();
        chmod(dir.path(), 0o755);
        let file = dir.path().join("config.php");
        std::fs::write(&file, "<?php\n").unwrap();
        chmod(&file, 0o640);

        let mut unit = PermissionCheck::new("perms", dir.path());
        let record = run(&mut unit).await;
        assert_eq!(record.status, TestStatus::Passed);
        assert_eq!(record.metadata["entries_checked"], Scalar::Int(2));
    }

    #[tokio::test]
    async fn test_world_writable_is_high_severity() {
        let dir = tempfile::tempdir().unwrap();
        chmod(dir.path(), 0o755);
        let file = dir.path().join("uploads.log");
        std::fs::write(&file, "").unwrap();
        chmod(&file, 0o666);

        let mut unit = PermissionCheck::new("perms", dir.path());
        let record = run(&mut unit).await;
        assert_eq!(record.status, TestStatus::Failed);
        assert_eq!(record.metadata["max_severity"], Scalar::Int(3));
    }

    #[tokio::test]
    async fn test_executable_file_exceeds_file_mode() {
        let dir = tempfile::tempdir().unwrap();
        chmod(dir.path(), 0o755);
        let file = dir.path().join("run.sh");
        std::fs::write(&file, "#!/bin/sh\n").unwrap();
        chmod(&file, 0o755);

        let mut unit = PermissionCheck::new("perms", dir.path());
        let record = run(&mut unit).await;
        assert_eq!(record.status, TestStatus::Failed);
        assert_eq!(record.metadata["max_severity"], Scalar::Int(2));

        let mut relaxed = PermissionCheck::new("perms", dir.path()).max_file_mode(0o755);
        assert_eq!(run(&mut relaxed).await.status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn test_walk_runs_off_the_runtime_thread() {
        let dir = tempfile::tempdir().unwrap();
        chmod(dir.path(), 0o755);
        for i in 0..200 {
            let file = dir.path().join(format!("asset{}.css", i));
            std::fs::write(&file, "").unwrap();
            chmod(&file, 0o644);
        }
        let mut unit = PermissionCheck::new("perms", dir.path());
        let (record, ticks) = with_yield_count(run(&mut unit)).await;
        assert_eq!(record.status, TestStatus::Passed);
        assert_eq!(record.metadata["entries_checked"], Scalar::Int(201));
        assert!(ticks > 0);
    }
}
