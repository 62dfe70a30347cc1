//! SQLite history backend: one row per run with the full record as JSON.

use chrono::SecondsFormat;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tracing::debug;

use super::schema;
use super::{HistoryStore, RunRecord, StorageError};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool, StorageError> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

impl HistoryStore for SqliteStore {
    fn append(&self, record: &RunRecord) -> Result<(), StorageError> {
        let conn = self.pool.get()?;
        let json = record.to_json().map_err(|source| StorageError::Corrupt {
            location: record.run_id.to_string(),
            source,
        })?;
        conn.execute(
            "INSERT INTO runs (run_id, suite_name, schema_version, started_at, total, passed, success_rate, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.run_id.to_string(),
                record.suite_name,
                record.schema_version,
                record
                    .timestamp
                    .to_rfc3339_opts(SecondsFormat::Nanos, true),
                record.total as i64,
                record.passed as i64,
                record.success_rate(),
                json,
            ],
        )?;
        debug!(suite = %record.suite_name, run_id = %record.run_id, "Run stored");
        Ok(())
    }

    fn load_recent(&self, suite_name: &str, limit: usize) -> Result<Vec<RunRecord>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, record_json FROM runs WHERE suite_name = ?1
             ORDER BY started_at DESC, id DESC LIMIT ?2",
        )?;
        let rows: Vec<(String, String)> = stmt
            .query_map(params![suite_name, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<_, _>>()?;

        rows.iter()
            .map(|(run_id, json)| RunRecord::from_json(&format!("runs/{}", run_id), json))
            .collect()
    }

    fn prune(&self, suite_name: &str, keep: usize) -> Result<usize, StorageError> {
        let conn = self.pool.get()?;
        let removed = conn.execute(
            "DELETE FROM runs WHERE suite_name = ?1 AND id NOT IN (
                SELECT id FROM runs WHERE suite_name = ?1
                ORDER BY started_at DESC, id DESC LIMIT ?2
             )",
            params![suite_name, keep as i64],
        )?;
        Ok(removed)
    }
}
