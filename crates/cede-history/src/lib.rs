//! Durable ledger of terminal analysis outcomes.
//!
//! One JSON array document, newest first by completion time, unique by task
//! id and capped at [`MAX_HISTORY_ITEMS`] entries. Writers serialize on a
//! single lock and documents are swapped into place atomically, so a
//! concurrent reader never observes a partial write and a read-modify-write
//! upsert never loses a sibling's update.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

use cede_types::{AnalysisHistoryRecord, PersistedBy};

pub const MAX_HISTORY_ITEMS: usize = 100;

const HISTORY_FILE: &str = "analysis-history.json";

/// Ledger operations as API consumers see them. Kept behind a trait so the
/// backing implementation can move from a locked flat file to an embedded
/// key-value store or a transactional table without touching callers.
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn read(&self) -> anyhow::Result<Vec<AnalysisHistoryRecord>>;
    async fn upsert(
        &self,
        record: AnalysisHistoryRecord,
    ) -> anyhow::Result<AnalysisHistoryRecord>;
    async fn list(&self, limit: usize) -> anyhow::Result<Vec<AnalysisHistoryRecord>>;
}

pub struct HistoryStore {
    dir: PathBuf,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl HistoryStore {
    /// A store rooted at `dir`. Nothing touches the filesystem until the
    /// first read or write; the directory and document are created on
    /// demand.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(HISTORY_FILE);
        Self {
            dir,
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_file(&self) -> anyhow::Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating history directory {}", self.dir.display()))?;
        fs::write(&self.path, "[]")
            .await
            .with_context(|| format!("creating history document {}", self.path.display()))?;
        Ok(())
    }

    /// Load the full ledger. A missing document is created empty; an
    /// unparsable one is treated as empty (logged, never raised) so damaged
    /// history can never block new work. Only irrecoverable I/O faults
    /// propagate.
    pub async fn read(&self) -> anyhow::Result<Vec<AnalysisHistoryRecord>> {
        self.ensure_file().await?;
        let raw = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading history document {}", self.path.display()))?;
        match serde_json::from_str::<Vec<AnalysisHistoryRecord>>(&raw) {
            Ok(records) => Ok(records),
            Err(err) => {
                warn!(
                    "history document {} is unreadable, treating as empty: {err}",
                    self.path.display()
                );
                Ok(Vec::new())
            }
        }
    }

    /// First `limit` entries of the ledger, which is already newest-first.
    pub async fn list(&self, limit: usize) -> anyhow::Result<Vec<AnalysisHistoryRecord>> {
        let mut records = self.read().await?;
        records.truncate(limit);
        Ok(records)
    }

    /// Sanitize and persist a full candidate set: entries without a task id
    /// are dropped, the rest are ordered newest-first by completion time and
    /// capped at [`MAX_HISTORY_ITEMS`]. Idempotent under re-application.
    pub async fn write(&self, records: Vec<AnalysisHistoryRecord>) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_locked(records).await
    }

    /// Replace any record sharing the candidate's task id and put the
    /// candidate at the head of the ledger: the whole record is replaced,
    /// never merged. The stored record is tagged with server provenance and
    /// handed back.
    pub async fn upsert(
        &self,
        mut record: AnalysisHistoryRecord,
    ) -> anyhow::Result<AnalysisHistoryRecord> {
        let _guard = self.write_lock.lock().await;
        let existing = self.read().await?;
        record.persisted_by = Some(PersistedBy::Server);
        let mut records = Vec::with_capacity(existing.len() + 1);
        records.push(record.clone());
        records.extend(
            existing
                .into_iter()
                .filter(|r| r.task_id != record.task_id),
        );
        self.write_locked(records).await?;
        Ok(record)
    }

    async fn write_locked(&self, mut records: Vec<AnalysisHistoryRecord>) -> anyhow::Result<()> {
        records.retain(|record| !record.task_id.trim().is_empty());
        records.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        records.truncate(MAX_HISTORY_ITEMS);

        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)
                .await
                .with_context(|| format!("creating history directory {}", self.dir.display()))?;
        }
        let payload = serde_json::to_string_pretty(&records)?;
        // Swap in via a sibling temp file so no reader sees a half-written
        // document.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl HistoryRepository for HistoryStore {
    async fn read(&self) -> anyhow::Result<Vec<AnalysisHistoryRecord>> {
        HistoryStore::read(self).await
    }

    async fn upsert(
        &self,
        record: AnalysisHistoryRecord,
    ) -> anyhow::Result<AnalysisHistoryRecord> {
        HistoryStore::upsert(self, record).await
    }

    async fn list(&self, limit: usize) -> anyhow::Result<Vec<AnalysisHistoryRecord>> {
        HistoryStore::list(self, limit).await
    }
}
