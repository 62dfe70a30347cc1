//! Directory history backend: `<root>/<suite>/<timestamp>_<run_id>.json`.
//!
//! File names sort chronologically, so most-recent-first is a reverse sort
//! of the directory listing.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{HistoryStore, RunRecord, StorageError};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.9fZ";

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn suite_dir(&self, suite_name: &str) -> PathBuf {
        self.root.join(slug(suite_name))
    }

    /// Record files for a suite, newest first.
    fn entries(&self, suite_name: &str) -> Result<Vec<PathBuf>, StorageError> {
        let dir = self.suite_dir(suite_name);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StorageError::io(&dir, e))? {
            let path = entry.map_err(|e| StorageError::io(&dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();
        paths.reverse();
        Ok(paths)
    }
}

/// File-system-safe form of a suite name.
pub(crate) fn slug(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if slug.is_empty() {
        "_".to_string()
    } else {
        slug
    }
}

impl HistoryStore for FileStore {
    fn append(&self, record: &RunRecord) -> Result<(), StorageError> {
        let dir = self.suite_dir(&record.suite_name);
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

        let file_name = format!(
            "{}_{}.json",
            record.timestamp.format(TIMESTAMP_FORMAT),
            record.run_id
        );
        let path = dir.join(file_name);
        let json = record.to_json().map_err(|source| StorageError::Corrupt {
            location: path.display().to_string(),
            source,
        })?;

        // Write-then-rename so a crash never leaves a half-written record.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| StorageError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| StorageError::io(&path, e))?;
        debug!(path = %path.display(), "Run stored");
        Ok(())
    }

    fn load_recent(&self, suite_name: &str, limit: usize) -> Result<Vec<RunRecord>, StorageError> {
        self.entries(suite_name)?
            .into_iter()
            .take(limit)
            .map(|path| {
                let json = fs::read_to_string(&path).map_err(|e| StorageError::io(&path, e))?;
                RunRecord::from_json(&path.display().to_string(), &json)
            })
            .collect()
    }

    fn prune(&self, suite_name: &str, keep: usize) -> Result<usize, StorageError> {
        let mut removed = 0;
        for path in self.entries(suite_name)?.into_iter().skip(keep) {
            fs::remove_file(&path).map_err(|e| StorageError::io(&path, e))?;
            removed += 1;
        }
        Ok(removed)
    }
}
