//! Durable dedup ledger and run-report store
//!
//! A flat, append-only set of `"year/filename"` keys plus the last run's
//! report and a trimmed error log, persisted as one JSON file. Keys are
//! never removed during normal operation; only the explicit administrative
//! clear empties the set. The ledger is the cross-run duplicate-suppression
//! memory, so it survives even if the archive itself is later cleared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ArchiveError, Result};
use crate::models::{ErrorLogEntry, RunReport, UploadRecord};

/// The error log is trimmed to this many most-recent entries on every write
pub const MAX_ERROR_LOG_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LedgerData {
    #[serde(default)]
    keys: HashSet<String>,
    #[serde(default)]
    uploads: Vec<UploadRecord>,
    #[serde(default)]
    last_report: Option<RunReport>,
    #[serde(default)]
    errors: Vec<ErrorLogEntry>,
}

pub struct ArchiveLedger {
    path: PathBuf,
    data: LedgerData,
}

impl ArchiveLedger {
    /// Load the ledger, starting fresh when no file exists yet
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No existing ledger at {:?}, starting fresh", path);
            return Ok(Self {
                path: path.to_path_buf(),
                data: LedgerData::default(),
            });
        }

        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ArchiveError::Storage(format!("Failed to read ledger: {}", e)))?;
        let data: LedgerData = serde_json::from_str(&json)
            .map_err(|e| ArchiveError::Storage(format!("Failed to parse ledger: {}", e)))?;

        info!(
            "Loaded ledger: {} keys, {} logged errors",
            data.keys.len(),
            data.errors.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ArchiveError::Storage(format!("Failed to create ledger dir: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(&self.data)
            .map_err(|e| ArchiveError::Storage(format!("Failed to serialize ledger: {}", e)))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| ArchiveError::Storage(format!("Failed to write ledger: {}", e)))?;
        debug!("Saved ledger to {:?}", self.path);
        Ok(())
    }

    /// Check whether a `"year/filename"` key was already archived
    pub fn is_recorded(&self, key: &str) -> bool {
        self.data.keys.contains(key)
    }

    /// Record a key; recording an already-recorded key is a no-op
    pub async fn record(&mut self, key: &str) -> Result<()> {
        if !self.data.keys.insert(key.to_string()) {
            return Ok(());
        }
        self.save().await
    }

    /// Record a key together with its audit-trail upload record
    pub async fn record_upload(&mut self, key: &str, record: UploadRecord) -> Result<()> {
        if self.data.keys.insert(key.to_string()) {
            self.data.uploads.push(record);
        }
        self.save().await
    }

    /// Number of recorded keys
    pub fn len(&self) -> usize {
        self.data.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.keys.is_empty()
    }

    /// Persist the aggregate report of a finished run
    pub async fn save_run_report(&mut self, report: RunReport) -> Result<()> {
        self.data.last_report = Some(report);
        self.save().await
    }

    pub fn last_report(&self) -> Option<&RunReport> {
        self.data.last_report.as_ref()
    }

    /// End time of the last persisted run, if any
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.data.last_report.as_ref().map(|r| r.end_time)
    }

    /// Append to the error log, trimming to the most recent
    /// [`MAX_ERROR_LOG_ENTRIES`]; oldest entries are silently dropped
    pub async fn append_error(&mut self, entry: ErrorLogEntry) -> Result<()> {
        self.data.errors.push(entry);
        if self.data.errors.len() > MAX_ERROR_LOG_ENTRIES {
            let excess = self.data.errors.len() - MAX_ERROR_LOG_ENTRIES;
            self.data.errors.drain(..excess);
        }
        self.save().await
    }

    /// Most recent errors, newest last
    pub fn get_recent_errors(&self, limit: usize) -> &[ErrorLogEntry] {
        let start = self.data.errors.len().saturating_sub(limit);
        &self.data.errors[start..]
    }

    /// Administrative clear: empties keys, uploads, report, and error log
    pub async fn clear(&mut self) -> Result<()> {
        self.data = LedgerData::default();
        self.save().await
    }
}
