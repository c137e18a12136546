use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use sha2::{Digest, Sha256};

use super::{Database, to_ts};

/// SHA-256 of the content bytes, hex-encoded.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Fingerprint for dedup: the item URL when present, otherwise id + source.
/// Ingestion and filter steps must use this same rule; any drift between them
/// causes silent double-delivery.
pub fn fingerprint(url: &str, id: &str, source: &str) -> String {
    if url.is_empty() {
        hash_content(&format!("{id}{source}"))
    } else {
        hash_content(url)
    }
}

#[derive(Clone)]
pub struct CacheRepository {
    db: Database,
}

impl CacheRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn exists_for_task(&self, content_hash: &str, task_id: &str) -> Result<bool> {
        let conn = self.db.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM content_cache WHERE content_hash = ?1 AND task_id = ?2",
                params![content_hash, task_id],
                |row| row.get(0),
            )
            .context("failed to check task cache")?;
        Ok(count > 0)
    }

    /// Records a batch of fingerprints for a task. Idempotent on
    /// `(content_hash, task_id)`: duplicates are ignored, not rejected. The
    /// whole batch is one transaction and rolls back if any insert fails.
    pub async fn add_batch(&self, hashes: &[String], source: &str, task_id: &str) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO content_cache (content_hash, task_id, source, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            let now = to_ts(Utc::now());
            for hash in hashes {
                stmt.execute(params![hash, task_id, source, now])
                    .context("failed to insert content hash")?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub async fn clean_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.db.lock().await;
        let deleted = conn.execute(
            "DELETE FROM content_cache WHERE created_at < ?1",
            [to_ts(cutoff)],
        )?;
        Ok(deleted)
    }

    pub async fn clean_by_task(&self, task_id: &str) -> Result<usize> {
        let conn = self.db.lock().await;
        let deleted = conn.execute("DELETE FROM content_cache WHERE task_id = ?1", [task_id])?;
        Ok(deleted)
    }

    pub async fn count(&self) -> Result<i64> {
        let conn = self.db.lock().await;
        let count = conn.query_row("SELECT COUNT(*) FROM content_cache", [], |row| row.get(0))?;
        Ok(count)
    }
}
