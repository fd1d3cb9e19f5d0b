use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs;
use tracing::warn;

/// Client-side store of completed analysis results, one JSON document per
/// task id under `dir`, keyed `analysis_<taskId>`.
///
/// No TTL, no eviction, no cross-entry invariants: entries are overwritten
/// wholesale and unreadable ones count as misses, so a damaged cache can
/// never block a live fetch. Unbounded growth is an accepted limitation of
/// this layer.
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    /// Open (or create) the cache directory.
    pub async fn new(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn entry_path(&self, task_id: &str) -> PathBuf {
        // Task ids are opaque; keep the derived file name filesystem-safe.
        let key: String = task_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        self.dir.join(format!("analysis_{key}.json"))
    }

    /// Look up a cached result. Missing and unparsable entries are both
    /// misses; the latter is logged, never raised.
    pub async fn get(&self, task_id: &str) -> Option<Value> {
        let raw = fs::read_to_string(self.entry_path(task_id)).await.ok()?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("discarding unreadable cache entry for task {task_id}: {err}");
                None
            }
        }
    }

    /// Store a result, unconditionally overwriting any prior entry for the
    /// same task id.
    pub async fn set(&self, task_id: &str, result: &Value) -> anyhow::Result<()> {
        let payload = serde_json::to_string_pretty(result)?;
        fs::write(self.entry_path(task_id), payload).await?;
        Ok(())
    }
}
