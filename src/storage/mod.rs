//! Run history: versioned run records and the stores that keep them.

pub mod files;
pub mod schema;
pub mod sqlite;

pub use self::files::FileStore;
pub use self::sqlite::{open_pool, Pool, SqliteStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{HistoryBackend, ReportingConfig};
use crate::unit::{SuiteResult, UnitRecord};

/// Version written into every persisted record.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt run record {location}: {source}")]
    Corrupt {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported schema version {found} in {location}")]
    UnsupportedVersion { location: String, found: u32 },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

impl StorageError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// The stored data itself is unusable, as opposed to the store being
    /// unreachable.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            StorageError::Corrupt { .. } | StorageError::UnsupportedVersion { .. }
        )
    }
}

/// Persisted snapshot of one completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub suite_name: String,
    pub timestamp: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub error: usize,
    /// Seconds.
    pub duration: f64,
    pub units: Vec<UnitRecord>,
}

impl RunRecord {
    pub fn from_suite(result: &SuiteResult) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            run_id: Uuid::new_v4(),
            suite_name: result.suite_name.clone(),
            timestamp: result.started_at,
            total: result.total,
            passed: result.passed,
            failed: result.failed,
            skipped: result.skipped,
            error: result.error,
            duration: result.duration,
            units: result.units.clone(),
        }
    }

    pub fn to_suite_result(&self) -> SuiteResult {
        SuiteResult {
            suite_name: self.suite_name.clone(),
            started_at: self.timestamp,
            duration: self.duration,
            units: self.units.clone(),
            total: self.total,
            passed: self.passed,
            failed: self.failed,
            skipped: self.skipped,
            error: self.error,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse and version-check a stored record.
    pub fn from_json(location: &str, json: &str) -> Result<Self, StorageError> {
        let record: RunRecord =
            serde_json::from_str(json).map_err(|source| StorageError::Corrupt {
                location: location.to_string(),
                source,
            })?;
        if record.schema_version != SCHEMA_VERSION {
            return Err(StorageError::UnsupportedVersion {
                location: location.to_string(),
                found: record.schema_version,
            });
        }
        Ok(record)
    }
}

/// Append-only history of run records, keyed by suite name.
///
/// Single writer per suite is assumed; no locking is done.
pub trait HistoryStore: Send + Sync {
    fn append(&self, record: &RunRecord) -> Result<(), StorageError>;

    /// Up to `limit` records for `suite_name`, most recent first.
    fn load_recent(&self, suite_name: &str, limit: usize) -> Result<Vec<RunRecord>, StorageError>;

    /// Keep only the `keep` most recent records for `suite_name`. Returns how
    /// many were removed.
    fn prune(&self, suite_name: &str, keep: usize) -> Result<usize, StorageError>;
}

/// Open the store selected in the reporting config.
pub fn open_store(config: &ReportingConfig) -> anyhow::Result<Box<dyn HistoryStore>> {
    match config.backend {
        HistoryBackend::Files => Ok(Box::new(FileStore::new(&config.history_dir))),
        HistoryBackend::Sqlite => {
            if let Some(parent) = config.sqlite_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let pool = open_pool(&config.sqlite_path.to_string_lossy())?;
            Ok(Box::new(SqliteStore::new(pool)))
        }
    }
}
