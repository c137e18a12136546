use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{Database, parse_opt_ts, parse_ts, to_ts};
use crate::core::model::{Execution, ExecutionStatus, StepResult};

const EXECUTION_COLUMNS: &str = "id, task_id, task_name, status, started_at, finished_at, \
                                 duration_ms, step_results, error, triggered_by";

#[derive(Clone)]
pub struct ExecutionRepository {
    db: Database,
}

impl ExecutionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Opens the journal for one run: the record starts at `running` with an
    /// empty step list.
    pub async fn create(
        &self,
        task_id: &str,
        task_name: &str,
        triggered_by: &str,
    ) -> Result<Execution> {
        let execution = Execution {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            task_name: task_name.to_string(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            step_results: Vec::new(),
            error: None,
            triggered_by: triggered_by.to_string(),
        };

        let conn = self.db.lock().await;
        conn.execute(
            "INSERT INTO executions (id, task_id, task_name, status, started_at, step_results, triggered_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                execution.id,
                execution.task_id,
                execution.task_name,
                execution.status.as_str(),
                to_ts(execution.started_at),
                "[]",
                execution.triggered_by,
            ],
        )
        .context("failed to create execution")?;

        Ok(execution)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Execution>> {
        let conn = self.db.lock().await;
        let row = conn
            .query_row(
                &format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?1"),
                [id],
                read_raw,
            )
            .optional()
            .context("failed to find execution")?;
        row.map(RawExecution::into_execution).transpose()
    }

    pub async fn find_by_task(
        &self,
        task_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Execution>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE task_id = ?1
             ORDER BY started_at DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(params![task_id, limit, offset], read_raw)?;
        let mut executions = Vec::new();
        for row in rows {
            executions.push(row?.into_execution()?);
        }
        Ok(executions)
    }

    pub async fn find_recent(&self, limit: i64) -> Result<Vec<Execution>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions ORDER BY started_at DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit], read_raw)?;
        let mut executions = Vec::new();
        for row in rows {
            executions.push(row?.into_execution()?);
        }
        Ok(executions)
    }

    /// Incremental journal write; called after every step so progress is
    /// observable while a long run is in flight.
    pub async fn update_step_results(&self, id: &str, results: &[StepResult]) -> Result<()> {
        let json = serde_json::to_string(results)?;
        let conn = self.db.lock().await;
        conn.execute(
            "UPDATE executions SET step_results = ?1 WHERE id = ?2",
            params![json, id],
        )?;
        Ok(())
    }

    pub async fn complete(&self, id: &str, results: &[StepResult]) -> Result<()> {
        self.finish(id, ExecutionStatus::Completed, results, None).await
    }

    pub async fn fail(&self, id: &str, results: &[StepResult], error: &str) -> Result<()> {
        self.finish(id, ExecutionStatus::Failed, results, Some(error)).await
    }

    async fn finish(
        &self,
        id: &str,
        status: ExecutionStatus,
        results: &[StepResult],
        error: Option<&str>,
    ) -> Result<()> {
        let json = serde_json::to_string(results)?;
        let conn = self.db.lock().await;
        let started_at: String = conn
            .query_row("SELECT started_at FROM executions WHERE id = ?1", [id], |row| row.get(0))
            .optional()?
            .ok_or_else(|| anyhow!("execution not found: {id}"))?;
        let started = parse_ts(&started_at)?;
        let now = Utc::now();
        let duration_ms = (now - started).num_milliseconds();
        conn.execute(
            "UPDATE executions SET status = ?1, finished_at = ?2, duration_ms = ?3,
                                   step_results = ?4, error = ?5
             WHERE id = ?6",
            params![status.as_str(), to_ts(now), duration_ms, json, error, id],
        )?;
        Ok(())
    }

    /// Marks executions stranded in `running` as failed. Startup
    /// reconciliation only; the scheduler never calls this.
    pub async fn fail_orphaned(&self, reason: &str) -> Result<usize> {
        let conn = self.db.lock().await;
        let changed = conn.execute(
            "UPDATE executions SET status = ?1, finished_at = ?2, error = ?3
             WHERE status = ?4",
            params![
                ExecutionStatus::Failed.as_str(),
                to_ts(Utc::now()),
                reason,
                ExecutionStatus::Running.as_str()
            ],
        )?;
        Ok(changed)
    }

    pub async fn delete_old(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.db.lock().await;
        let deleted = conn.execute(
            "DELETE FROM executions WHERE started_at < ?1",
            [to_ts(cutoff)],
        )?;
        Ok(deleted)
    }

    pub async fn count_by_task(&self, task_id: &str) -> Result<i64> {
        let conn = self.db.lock().await;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM executions WHERE task_id = ?1",
            [task_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// Raw row shape; JSON and timestamp parsing happen outside the rusqlite
// closure so failures surface as anyhow errors.
struct RawExecution {
    id: String,
    task_id: String,
    task_name: String,
    status: String,
    started_at: String,
    finished_at: Option<String>,
    duration_ms: Option<i64>,
    step_results: String,
    error: Option<String>,
    triggered_by: String,
}

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawExecution> {
    Ok(RawExecution {
        id: row.get(0)?,
        task_id: row.get(1)?,
        task_name: row.get(2)?,
        status: row.get(3)?,
        started_at: row.get(4)?,
        finished_at: row.get(5)?,
        duration_ms: row.get(6)?,
        step_results: row.get(7)?,
        error: row.get(8)?,
        triggered_by: row.get(9)?,
    })
}

impl RawExecution {
    fn into_execution(self) -> Result<Execution> {
        Ok(Execution {
            status: ExecutionStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("invalid execution status in database: {}", self.status))?,
            started_at: parse_ts(&self.started_at)?,
            finished_at: parse_opt_ts(self.finished_at)?,
            step_results: serde_json::from_str(&self.step_results)
                .context("invalid stored step results")?,
            id: self.id,
            task_id: self.task_id,
            task_name: self.task_name,
            duration_ms: self.duration_ms,
            error: self.error,
            triggered_by: self.triggered_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::StepStatus;

    fn step_result(name: &str, status: StepStatus) -> StepResult {
        StepResult {
            step_name: name.to_string(),
            step_type: "scraper".to_string(),
            status,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            output: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn create_starts_running_with_empty_journal() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = ExecutionRepository::new(db);

        let execution = repo.create("t1", "digest", "schedule").await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);

        let found = repo.find_by_id(&execution.id).await.unwrap().unwrap();
        assert!(found.step_results.is_empty());
        assert!(found.finished_at.is_none());
        assert_eq!(found.triggered_by, "schedule");
    }

    #[tokio::test]
    async fn complete_stamps_terminal_fields() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = ExecutionRepository::new(db);

        let execution = repo.create("t1", "digest", "manual").await.unwrap();
        let results = vec![step_result("step 1", StepStatus::Completed)];
        repo.complete(&execution.id, &results).await.unwrap();

        let found = repo.find_by_id(&execution.id).await.unwrap().unwrap();
        assert_eq!(found.status, ExecutionStatus::Completed);
        assert!(found.finished_at.is_some());
        assert!(found.duration_ms.is_some());
        assert_eq!(found.step_results.len(), 1);
        assert!(found.error.is_none());
    }

    #[tokio::test]
    async fn fail_records_error_message() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = ExecutionRepository::new(db);

        let execution = repo.create("t1", "digest", "schedule").await.unwrap();
        let results = vec![step_result("step 1", StepStatus::Failed)];
        repo.fail(&execution.id, &results, "step 1 (scraper) failed: boom")
            .await
            .unwrap();

        let found = repo.find_by_id(&execution.id).await.unwrap().unwrap();
        assert_eq!(found.status, ExecutionStatus::Failed);
        assert_eq!(
            found.error.as_deref(),
            Some("step 1 (scraper) failed: boom")
        );
    }

    #[tokio::test]
    async fn fail_orphaned_touches_only_running_rows() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = ExecutionRepository::new(db);

        let done = repo.create("t1", "digest", "schedule").await.unwrap();
        repo.complete(&done.id, &[]).await.unwrap();
        let stuck = repo.create("t1", "digest", "schedule").await.unwrap();

        assert_eq!(repo.fail_orphaned("orphaned by restart").await.unwrap(), 1);
        let stuck = repo.find_by_id(&stuck.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, ExecutionStatus::Failed);
        assert_eq!(stuck.error.as_deref(), Some("orphaned by restart"));

        let done = repo.find_by_id(&done.id).await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
    }
}
