mod cache_repo;
mod discord_repo;
mod execution_repo;
mod task_repo;

pub use cache_repo::{CacheRepository, fingerprint, hash_content};
pub use discord_repo::DiscordRepository;
pub use execution_repo::ExecutionRepository;
pub use task_repo::TaskRepository;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::{Mutex, MutexGuard};

/// SQLite handle shared by the repositories. Every operation takes the
/// connection lock for its duration, so each call is its own short
/// transaction unless it opens an explicit one.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub async fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate().await?;
        Ok(db)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate().await?;
        Ok(db)
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    async fn migrate(&self) -> Result<()> {
        let conn = self.lock().await;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                schedule    TEXT NOT NULL,
                status      TEXT NOT NULL,
                pipeline    TEXT NOT NULL,
                last_run_at TEXT,
                next_run_at TEXT,
                created_by  TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS executions (
                id           TEXT PRIMARY KEY,
                task_id      TEXT NOT NULL,
                task_name    TEXT NOT NULL,
                status       TEXT NOT NULL,
                started_at   TEXT NOT NULL,
                finished_at  TEXT,
                duration_ms  INTEGER,
                step_results TEXT NOT NULL,
                error        TEXT,
                triggered_by TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_task ON executions (task_id, started_at);

            CREATE TABLE IF NOT EXISTS content_cache (
                content_hash TEXT NOT NULL,
                task_id      TEXT NOT NULL,
                source       TEXT NOT NULL,
                created_at   TEXT NOT NULL,
                UNIQUE (content_hash, task_id)
            );
            CREATE INDEX IF NOT EXISTS idx_content_cache_task ON content_cache (task_id);

            CREATE TABLE IF NOT EXISTS discord_bots (
                id         TEXT PRIMARY KEY,
                name       TEXT NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS discord_channels (
                id          TEXT PRIMARY KEY,
                bot_id      TEXT NOT NULL,
                name        TEXT NOT NULL,
                webhook_url TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS task_discord_configs (
                task_id     TEXT PRIMARY KEY,
                channel_id  TEXT,
                webhook_url TEXT,
                template    TEXT,
                username    TEXT,
                avatar_url  TEXT,
                updated_at  TEXT NOT NULL
            );
            "#,
        )
        .context("failed to run migrations")?;
        Ok(())
    }
}

pub(crate) fn to_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp in database: {s}"))
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(&s)).transpose()
}
