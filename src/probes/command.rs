//! Command probe: wrap an external check (linters, syntax checkers, smoke
//! scripts) as a test unit.

use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::debug;

use super::operation::{CommandOperation, Operation};
use crate::assert::AssertionFailure;
use crate::unit::{TestUnit, UnitContext, UnitError};

/// Lines of stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 5;

/// Runs a command once. An exit code other than `expected_exit` is an
/// assertion failure; failing to spawn the command is an error.
///
/// Metadata: `exit_code`, `elapsed_ms`, `stdout_lines`.
pub struct CommandProbe {
    name: String,
    command: CommandOperation,
    expected_exit: i32,
    timeout: Option<Duration>,
}

impl CommandProbe {
    pub fn new(name: impl Into<String>, command: CommandOperation) -> Self {
        Self {
            name: name.into(),
            command,
            expected_exit: 0,
            timeout: None,
        }
    }

    pub fn expected_exit(mut self, code: i32) -> Self {
        self.expected_exit = code;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait::async_trait]
impl TestUnit for CommandProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn run_test(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let start = Instant::now();
        let output = self
            .command
            .command()
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.command.describe()))?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        // Killed by a signal: no exit code.
        let code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout);
        ctx.record("exit_code", code);
        ctx.record("elapsed_ms", elapsed_ms);
        ctx.record("stdout_lines", stdout.lines().count());
        debug!(probe = %self.name, code, elapsed_ms, "Command finished");

        if code != self.expected_exit {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join(" | ");
            let detail = if tail.is_empty() {
                String::new()
            } else {
                format!(": {}", tail)
            };
            return Err(AssertionFailure::new(format!(
                "expected exit code {} got {}{}",
                self.expected_exit, code, detail
            ))
            .into());
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::unit::{execute, Scalar, TestStatus};

    async fn run(probe: &mut CommandProbe) -> crate::unit::UnitRecord {
        execute(probe, &UnitContext::new(), Duration::from_secs(10)).await
    }

    #[tokio::test]
    async fn test_success() {
        let mut probe = CommandProbe::new(
            "echo",
            CommandOperation::new("sh", vec!["-c".into(), "echo one; echo two".into()]),
        );
        let record = run(&mut probe).await;
        assert_eq!(record.status, TestStatus::Passed);
        assert_eq!(record.metadata["exit_code"], Scalar::Int(0));
        assert_eq!(record.metadata["stdout_lines"], Scalar::Int(2));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed() {
        let mut probe = CommandProbe::new(
            "syntax",
            CommandOperation::new(
                "sh",
                vec!["-c".into(), "echo 'Parse error: line 3' >&2; exit 255".into()],
            ),
        );
        let record = run(&mut probe).await;
        assert_eq!(record.status, TestStatus::Failed);
        let message = record.error_message.unwrap();
        assert!(message.contains("expected exit code 0 got 255"));
        assert!(message.contains("Parse error"));
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let mut probe = CommandProbe::new(
            "missing",
            CommandOperation::new("definitely-not-a-real-binary-xyz", vec![]),
        );
        let record = run(&mut probe).await;
        assert_eq!(record.status, TestStatus::Error);
    }
}
