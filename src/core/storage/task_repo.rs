use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{Database, parse_opt_ts, parse_ts, to_ts};
use crate::core::model::{CreateTaskRequest, Task, TaskStatus, UpdateTaskRequest};

const TASK_COLUMNS: &str = "id, name, description, schedule, status, pipeline, \
                            last_run_at, next_run_at, created_by, created_at, updated_at";

#[derive(Clone)]
pub struct TaskRepository {
    db: Database,
}

impl TaskRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, req: &CreateTaskRequest, created_by: &str) -> Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            name: req.name.clone(),
            description: req.description.clone(),
            schedule: req.schedule.clone(),
            status: req.status.unwrap_or(TaskStatus::Enabled),
            pipeline: req.pipeline.clone(),
            last_run_at: None,
            next_run_at: None,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        };

        let pipeline = serde_json::to_string(&task.pipeline)?;
        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO tasks (id, name, description, schedule, status, pipeline, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                task.id,
                task.name,
                task.description,
                task.schedule,
                task.status.as_str(),
                pipeline,
                task.created_by,
                to_ts(task.created_at),
                to_ts(task.updated_at),
            ],
        )
        .context("failed to create task")?;

        Ok(task)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.db.lock().await;
        let row = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                [id],
                read_raw,
            )
            .optional()
            .context("failed to find task")?;
        row.map(RawTask::into_task).transpose()
    }

    pub async fn find_all(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Task>> {
        let conn = self.db.lock().await;
        let mut tasks = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1
                     ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
                ))?;
                let rows = stmt.query_map(params![status.as_str(), limit, offset], read_raw)?;
                for row in rows {
                    tasks.push(row?.into_task()?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
                ))?;
                let rows = stmt.query_map(params![limit, offset], read_raw)?;
                for row in rows {
                    tasks.push(row?.into_task()?);
                }
            }
        }
        Ok(tasks)
    }

    pub async fn find_enabled(&self) -> Result<Vec<Task>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1"
        ))?;
        let rows = stmt.query_map([TaskStatus::Enabled.as_str()], read_raw)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?.into_task()?);
        }
        Ok(tasks)
    }

    pub async fn update(&self, id: &str, req: &UpdateTaskRequest) -> Result<Option<Task>> {
        let Some(mut task) = self.find_by_id(id).await? else {
            return Ok(None);
        };

        if let Some(name) = &req.name {
            task.name = name.clone();
        }
        if let Some(description) = &req.description {
            task.description = description.clone();
        }
        if let Some(schedule) = &req.schedule {
            task.schedule = schedule.clone();
        }
        if let Some(status) = req.status {
            task.status = status;
        }
        if let Some(pipeline) = &req.pipeline {
            task.pipeline = pipeline.clone();
        }
        task.updated_at = Utc::now();

        let pipeline = serde_json::to_string(&task.pipeline)?;
        let conn = self.db.lock().await;
        conn.execute(
            "UPDATE tasks SET name = ?1, description = ?2, schedule = ?3, status = ?4,
                              pipeline = ?5, updated_at = ?6
             WHERE id = ?7",
            params![
                task.name,
                task.description,
                task.schedule,
                task.status.as_str(),
                pipeline,
                to_ts(task.updated_at),
                id,
            ],
        )
        .context("failed to update task")?;

        Ok(Some(task))
    }

    /// Deletes the task and cascades to its executions, cache entries, and
    /// Discord config.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM executions WHERE task_id = ?1", [id])?;
        tx.execute("DELETE FROM content_cache WHERE task_id = ?1", [id])?;
        tx.execute("DELETE FROM task_discord_configs WHERE task_id = ?1", [id])?;
        let deleted = tx.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        tx.commit()?;
        if deleted == 0 {
            return Err(anyhow!("task not found"));
        }
        Ok(true)
    }

    pub async fn update_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), to_ts(Utc::now()), id],
        )?;
        Ok(())
    }

    pub async fn update_next_run(&self, id: &str, next_run: DateTime<Utc>) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "UPDATE tasks SET next_run_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![to_ts(next_run), to_ts(Utc::now()), id],
        )?;
        Ok(())
    }

    pub async fn update_last_run(&self, id: &str, last_run: DateTime<Utc>) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            "UPDATE tasks SET last_run_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![to_ts(last_run), to_ts(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Flips tasks stranded in `running` back to `enabled`. Called once at
    /// startup before the scheduler replays enabled tasks.
    pub async fn reset_running(&self) -> Result<usize> {
        let conn = self.db.lock().await;
        let changed = conn.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE status = ?3",
            params![
                TaskStatus::Enabled.as_str(),
                to_ts(Utc::now()),
                TaskStatus::Running.as_str()
            ],
        )?;
        Ok(changed)
    }

    pub async fn count(&self, status: Option<TaskStatus>) -> Result<i64> {
        let conn = self.db.lock().await;
        let count = match status {
            Some(status) => conn.query_row(
                "SELECT COUNT(*) FROM tasks WHERE status = ?1",
                [status.as_str()],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?,
        };
        Ok(count)
    }
}

struct RawTask {
    id: String,
    name: String,
    description: String,
    schedule: String,
    status: String,
    pipeline: String,
    last_run_at: Option<String>,
    next_run_at: Option<String>,
    created_by: String,
    created_at: String,
    updated_at: String,
}

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawTask> {
    Ok(RawTask {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        schedule: row.get(3)?,
        status: row.get(4)?,
        pipeline: row.get(5)?,
        last_run_at: row.get(6)?,
        next_run_at: row.get(7)?,
        created_by: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl RawTask {
    fn into_task(self) -> Result<Task> {
        Ok(Task {
            status: TaskStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("invalid task status in database: {}", self.status))?,
            pipeline: serde_json::from_str(&self.pipeline).context("invalid stored pipeline")?,
            last_run_at: parse_opt_ts(self.last_run_at)?,
            next_run_at: parse_opt_ts(self.next_run_at)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            id: self.id,
            name: self.name,
            description: self.description,
            schedule: self.schedule,
            created_by: self.created_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::PipelineStep;

    fn step(kind: &str) -> PipelineStep {
        PipelineStep {
            kind: kind.to_string(),
            name: None,
            config: serde_json::Map::new(),
        }
    }

    fn request(name: &str) -> CreateTaskRequest {
        CreateTaskRequest {
            name: name.to_string(),
            description: String::new(),
            schedule: "0 0 * * * *".to_string(),
            pipeline: vec![step("scraper"), step("discord")],
            status: None,
        }
    }

    #[tokio::test]
    async fn create_and_find_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = TaskRepository::new(db);

        let task = repo.create(&request("job digest"), "user-1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Enabled);

        let found = repo.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(found.name, "job digest");
        assert_eq!(found.pipeline.len(), 2);
        assert_eq!(found.created_by, "user-1");
        assert!(found.last_run_at.is_none());
    }

    #[tokio::test]
    async fn find_enabled_excludes_other_statuses() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = TaskRepository::new(db);

        let a = repo.create(&request("a"), "u").await.unwrap();
        let b = repo.create(&request("b"), "u").await.unwrap();
        repo.update_status(&b.id, TaskStatus::Disabled).await.unwrap();

        let enabled = repo.find_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, a.id);
    }

    #[tokio::test]
    async fn reset_running_reverts_to_enabled() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = TaskRepository::new(db);

        let task = repo.create(&request("stuck"), "u").await.unwrap();
        repo.update_status(&task.id, TaskStatus::Running).await.unwrap();

        assert_eq!(repo.reset_running().await.unwrap(), 1);
        let task = repo.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Enabled);
    }

    #[tokio::test]
    async fn delete_cascades_to_related_rows() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = TaskRepository::new(db.clone());
        let cache = crate::core::storage::CacheRepository::new(db.clone());

        let task = repo.create(&request("gone"), "u").await.unwrap();
        cache
            .add_batch(&["abc".to_string()], "scraper", &task.id)
            .await
            .unwrap();

        repo.delete(&task.id).await.unwrap();
        assert!(repo.find_by_id(&task.id).await.unwrap().is_none());
        assert!(!cache.exists_for_task("abc", &task.id).await.unwrap());
    }
}
