//! Test unit lifecycle contract.
//!
//! A unit is anything that can be set up, executed and torn down once. Probes
//! are units with a measurement body; plain functional checks implement the
//! trait directly.

pub mod lifecycle;
pub mod record;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assert::AssertionFailure;

pub use self::lifecycle::execute;
pub use self::record::{CategorySummary, SuiteResult, UnitRecord};

/// Status of a single test unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
    Error,
}

impl TestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TestStatus::Passed | TestStatus::Failed | TestStatus::Skipped | TestStatus::Error
        )
    }

    /// `failed` or `error`.
    pub fn is_problem(self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::Error)
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Pending => write!(f, "pending"),
            TestStatus::Running => write!(f, "running"),
            TestStatus::Passed => write!(f, "passed"),
            TestStatus::Failed => write!(f, "failed"),
            TestStatus::Skipped => write!(f, "skipped"),
            TestStatus::Error => write!(f, "error"),
        }
    }
}

/// Failure raised from a unit's setup, body or teardown.
#[derive(Debug, Error)]
pub enum UnitError {
    /// The body observed a wrong value.
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),

    /// Anything else: I/O, unreachable target, bad configuration.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UnitError {
    pub fn other(message: impl std::fmt::Display) -> Self {
        UnitError::Other(anyhow::anyhow!("{}", message))
    }
}

/// A metadata value. Only flat scalars are allowed so historical runs stay
/// comparable key by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            Scalar::Bool(_) | Scalar::Text(_) => None,
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{:.3}", v),
            Scalar::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(i64::from(v))
    }
}

impl From<u64> for Scalar {
    fn from(v: u64) -> Self {
        i64::try_from(v).map(Scalar::Int).unwrap_or(Scalar::Float(v as f64))
    }
}

impl From<usize> for Scalar {
    fn from(v: usize) -> Self {
        Scalar::from(v as u64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        // JSON has no representation for NaN/inf; keep records loadable.
        if v.is_finite() {
            Scalar::Float(v)
        } else {
            Scalar::Text(v.to_string())
        }
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

/// Key -> scalar map owned by a unit's body.
///
/// Ordered by key, not by insertion: records from different runs list the
/// same keys in the same order, in memory and in persisted JSON.
pub type Metadata = BTreeMap<String, Scalar>;

/// Handle a unit writes its metadata through.
///
/// The map is shared with the runner so whatever a unit recorded before a
/// timeout still shows up in its record.
#[derive(Debug, Clone, Default)]
pub struct UnitContext {
    metadata: Arc<Mutex<Metadata>>,
}

impl UnitContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: impl Into<String>, value: impl Into<Scalar>) {
        let mut map = self.metadata.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Scalar> {
        let map = self.metadata.lock().unwrap_or_else(|e| e.into_inner());
        map.get(key).cloned()
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> Metadata {
        self.metadata
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Lifecycle contract implemented by every test unit and probe.
#[async_trait::async_trait]
pub trait TestUnit: Send {
    /// Identifier, unique within a run.
    fn name(&self) -> &str;

    /// Per-unit timeout. `None` falls back to the runner default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Returning `Some` marks the unit skipped before it is ever started.
    fn skip_reason(&self) -> Option<String> {
        None
    }

    async fn setup(&mut self, _ctx: &UnitContext) -> Result<(), UnitError> {
        Ok(())
    }

    async fn run_test(&mut self, ctx: &UnitContext) -> Result<(), UnitError>;

    async fn teardown(&mut self, _ctx: &UnitContext) -> Result<(), UnitError> {
        Ok(())
    }
}
