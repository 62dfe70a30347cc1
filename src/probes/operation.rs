//! Operations under test: the callable a performance probe drives.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

use super::sampler::TargetPid;

/// One invocation of the target under test.
///
/// Probes call this many times and possibly from parallel suites, so an
/// implementation must be safe to repeat.
#[async_trait::async_trait]
pub trait Operation: Send + Sync {
    async fn call(&self) -> Result<()>;

    /// Like [`Operation::call`], but an implementation that does its work in
    /// a separate process reports that process through `target` so it can
    /// be sampled. The default runs in-process and reports nothing.
    async fn call_tracked(&self, _target: &TargetPid) -> Result<()> {
        self.call().await
    }

    /// Short label used in logs.
    fn describe(&self) -> String {
        "operation".to_string()
    }
}

/// Adapter for async closures.
pub struct FnOperation<F> {
    label: String,
    f: F,
}

impl<F> FnOperation<F> {
    pub fn new(label: impl Into<String>, f: F) -> Self {
        Self {
            label: label.into(),
            f,
        }
    }
}

#[async_trait::async_trait]
impl<F, Fut> Operation for FnOperation<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn call(&self) -> Result<()> {
        (self.f)().await
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Shorthand for wrapping a closure into a shareable operation.
pub fn from_fn<F, Fut>(label: impl Into<String>, f: F) -> Arc<dyn Operation>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnOperation::new(label, f))
}

/// HTTP GET; any non-2xx status counts as a failed call.
pub struct HttpGet {
    client: Client,
    url: String,
}

impl HttpGet {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        let url = if url.starts_with("http") {
            url
        } else {
            format!("http://{}", url)
        };
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, url })
    }
}

#[async_trait::async_trait]
impl Operation for HttpGet {
    async fn call(&self) -> Result<()> {
        self.client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url))?
            .error_for_status()
            .with_context(|| format!("GET {} returned an error status", self.url))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("GET {}", self.url)
    }
}

/// External command; a non-zero exit counts as a failed call.
#[derive(Debug, Clone)]
pub struct CommandOperation {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl CommandOperation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
        }
    }

    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub(crate) fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

#[async_trait::async_trait]
impl Operation for CommandOperation {
    async fn call(&self) -> Result<()> {
        self.call_tracked(&TargetPid::default()).await
    }

    async fn call_tracked(&self, target: &TargetPid) -> Result<()> {
        let child = self
            .command()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.program))?;
        if let Some(pid) = child.id() {
            target.set(pid);
        }
        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for {}", self.program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}
