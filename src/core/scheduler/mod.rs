mod runner;

pub use runner::PipelineRunner;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::model::{Execution, Task, TaskStatus};
use crate::core::storage::TaskRepository;

/// Default hard ceiling for one firing; expiry cancels the firing's token and
/// the in-flight step unwinds with a cancellation error.
const DEFAULT_FIRING_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Expands schedule shortcuts and upgrades 5-field expressions to 6-field by
/// prepending seconds.
pub(crate) fn normalize_schedule(schedule: &str) -> String {
    let expanded = match schedule.trim() {
        "@hourly" => "0 0 * * * *",
        "@daily" => "0 0 0 * * *",
        "@weekly" => "0 0 0 * * 0",
        "@monthly" => "0 0 0 1 * *",
        other => other,
    };
    if expanded.split_whitespace().count() == 5 {
        format!("0 {expanded}")
    } else {
        expanded.to_string()
    }
}

/// Parses a schedule without installing anything; used by the CRUD surface so
/// bad expressions are rejected before a task is stored.
pub fn validate_schedule(schedule: &str) -> Result<()> {
    let normalized = normalize_schedule(schedule);
    Job::new_async(normalized.as_str(), |_, _| Box::pin(async {}))
        .map(|_| ())
        .map_err(|e| anyhow!("invalid cron expression '{schedule}': {e}"))
}

/// Owns one timer entry per enabled task and fires the runner when an entry
/// comes due. Firings for distinct tasks run in parallel; firings for the
/// same task are serialized by the persisted status check.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    cron: Mutex<JobScheduler>,
    tasks: TaskRepository,
    runner: Arc<PipelineRunner>,
    entries: RwLock<HashMap<String, Uuid>>,
    lifecycle: Mutex<Lifecycle>,
    in_flight: AtomicUsize,
    firing_timeout: Duration,
}

struct Lifecycle {
    running: bool,
    cancel: CancellationToken,
}

impl Scheduler {
    pub async fn new(tasks: TaskRepository, runner: Arc<PipelineRunner>) -> Result<Self> {
        Self::with_firing_timeout(tasks, runner, DEFAULT_FIRING_TIMEOUT).await
    }

    /// The timeout applies to every task alike; there is no per-task
    /// override.
    pub async fn with_firing_timeout(
        tasks: TaskRepository,
        runner: Arc<PipelineRunner>,
        firing_timeout: Duration,
    ) -> Result<Self> {
        let cron = JobScheduler::new().await?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                cron: Mutex::new(cron),
                tasks,
                runner,
                entries: RwLock::new(HashMap::new()),
                lifecycle: Mutex::new(Lifecycle {
                    running: false,
                    cancel: CancellationToken::new(),
                }),
                in_flight: AtomicUsize::new(0),
                firing_timeout,
            }),
        })
    }

    /// Idempotent: loads every enabled task, installs its timer entry, and
    /// starts the dispatcher. Per-task schedule failures are logged, not
    /// fatal.
    pub async fn start(&self, ambient: CancellationToken) -> Result<()> {
        // The lifecycle lock is held for the whole startup so early firings
        // block until the ambient token and running flag are in place.
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.running {
            return Ok(());
        }
        lifecycle.cancel = ambient;

        let tasks = self
            .inner
            .tasks
            .find_enabled()
            .await
            .context("failed to load enabled tasks")?;
        let count = tasks.len();
        for task in tasks {
            if let Err(e) = self.schedule_task(&task).await {
                warn!(task_id = %task.id, error = %e, "failed to schedule task");
            }
        }

        self.inner.cron.lock().await.start().await?;
        lifecycle.running = true;
        info!(tasks = count, "scheduler started");
        Ok(())
    }

    /// Cancels the ambient token, waits for in-flight firings to observe the
    /// cancellation and drain, then shuts the timer wheel down.
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            if !lifecycle.running {
                return;
            }
            lifecycle.cancel.cancel();
            lifecycle.running = false;
        }

        while self.inner.in_flight.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if let Err(e) = self.inner.cron.lock().await.shutdown().await {
            warn!(error = %e, "cron shutdown error");
        }
        info!("scheduler stopped");
    }

    /// Installs a timer entry for an enabled task; no-op for any other
    /// status.
    pub async fn add_task(&self, task: &Task) -> Result<()> {
        self.schedule_task(task).await
    }

    /// Atomically replaces the task's entry: the old one is removed and a new
    /// one installed only if the task is enabled.
    pub async fn update_task(&self, task: &Task) -> Result<()> {
        self.remove_task(&task.id).await;
        if task.status == TaskStatus::Enabled {
            self.schedule_task(task).await
        } else {
            Ok(())
        }
    }

    /// Cancels and forgets the entry; an in-flight firing is left to finish.
    pub async fn remove_task(&self, task_id: &str) {
        let entry = self.inner.entries.write().await.remove(task_id);
        if let Some(job_id) = entry
            && let Err(e) = self.inner.cron.lock().await.remove(&job_id).await
        {
            warn!(task_id, error = %e, "failed to remove cron entry");
        }
    }

    /// Manual run: bypasses the timer but is subject to the same re-entrancy
    /// check as a scheduled firing.
    pub async fn trigger(&self, task_id: &str, triggered_by: &str) -> Result<Execution> {
        let task = self
            .inner
            .tasks
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| anyhow!("task not found"))?;
        if task.status == TaskStatus::Running {
            bail!("task is already running");
        }
        let cancel = {
            let lifecycle = self.inner.lifecycle.lock().await;
            lifecycle.cancel.child_token()
        };
        self.inner.runner.run(&task, triggered_by, &cancel).await
    }

    pub async fn next_run(&self, task_id: &str) -> Option<DateTime<Utc>> {
        let job_id = *self.inner.entries.read().await.get(task_id)?;
        let mut cron = self.inner.cron.lock().await;
        cron.next_tick_for_job(job_id).await.ok().flatten()
    }

    pub async fn scheduled_tasks(&self) -> Vec<String> {
        self.inner.entries.read().await.keys().cloned().collect()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lifecycle.lock().await.running
    }

    async fn schedule_task(&self, task: &Task) -> Result<()> {
        if task.status != TaskStatus::Enabled {
            return Ok(());
        }

        let schedule = normalize_schedule(&task.schedule);
        let inner = Arc::clone(&self.inner);
        let task_id = task.id.clone();
        let job = Job::new_async(schedule.as_str(), move |job_id, mut handle| {
            let inner = Arc::clone(&inner);
            let task_id = task_id.clone();
            Box::pin(async move {
                inner.fire(job_id, &mut handle, &task_id).await;
            })
        })
        .map_err(|e| anyhow!("invalid cron expression '{}': {e}", task.schedule))?;

        let job_id = self.inner.cron.lock().await.add(job).await?;
        self.inner
            .entries
            .write()
            .await
            .insert(task.id.clone(), job_id);

        // Surface the first upcoming fire time right away (best effort).
        let next = {
            let mut cron = self.inner.cron.lock().await;
            cron.next_tick_for_job(job_id).await.ok().flatten()
        };
        if let Some(next) = next
            && let Err(e) = self.inner.tasks.update_next_run(&task.id, next).await
        {
            warn!(task_id = %task.id, error = %e, "failed to set initial next run time");
        }

        Ok(())
    }
}

impl SchedulerInner {
    async fn fire(self: Arc<Self>, job_id: Uuid, handle: &mut JobScheduler, task_id: &str) {
        // The in-flight count is taken under the lifecycle lock so `stop`
        // either sees this firing or this firing sees the shutdown.
        let ambient = {
            let lifecycle = self.lifecycle.lock().await;
            if !lifecycle.running || lifecycle.cancel.is_cancelled() {
                return;
            }
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            lifecycle.cancel.clone()
        };

        let firing = ambient.child_token();
        let watchdog = tokio::spawn({
            let firing = firing.clone();
            let timeout = self.firing_timeout;
            async move {
                tokio::time::sleep(timeout).await;
                firing.cancel();
            }
        });

        self.fire_inner(job_id, handle, task_id, &firing).await;
        watchdog.abort();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn fire_inner(
        &self,
        job_id: Uuid,
        handle: &mut JobScheduler,
        task_id: &str,
        cancel: &CancellationToken,
    ) {
        // Re-read the task; it may have been edited or deleted since the
        // entry was installed.
        let task = match self.tasks.find_by_id(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                info!(task_id, "task no longer exists, removing cron entry");
                self.entries.write().await.remove(task_id);
                if let Err(e) = handle.remove(&job_id).await {
                    warn!(task_id, error = %e, "failed to remove cron entry");
                }
                return;
            }
            Err(e) => {
                warn!(task_id, error = %e, "failed to load task for firing");
                return;
            }
        };

        // Re-entrancy guard: another firing or a manual trigger is in
        // flight. The missed tick is dropped, not queued.
        if task.status == TaskStatus::Running {
            info!(task_id, "task is already running, skipping scheduled execution");
            return;
        }
        if task.status != TaskStatus::Enabled {
            return;
        }

        if let Err(e) = self.runner.run(&task, "schedule", cancel).await {
            warn!(task_id, error = %e, "task execution failed");
        }

        // A cancelled firing (shutdown or timeout) leaves next_run_at alone.
        if cancel.is_cancelled() {
            return;
        }
        if let Ok(Some(next)) = handle.next_tick_for_job(job_id).await
            && let Err(e) = self.tasks.update_next_run(task_id, next).await
        {
            warn!(task_id, error = %e, "failed to update next run time");
        }
    }
}

#[cfg(test)]
mod schedule_tests {
    use super::*;

    #[test]
    fn shortcuts_expand_to_six_fields() {
        assert_eq!(normalize_schedule("@hourly"), "0 0 * * * *");
        assert_eq!(normalize_schedule("@daily"), "0 0 0 * * *");
        assert_eq!(normalize_schedule("@weekly"), "0 0 0 * * 0");
        assert_eq!(normalize_schedule("@monthly"), "0 0 0 1 * *");
    }

    #[test]
    fn five_field_expressions_gain_leading_seconds() {
        assert_eq!(normalize_schedule("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_schedule("0 8 * * 1-5"), "0 0 8 * * 1-5");
    }

    #[test]
    fn six_field_expressions_pass_through() {
        assert_eq!(normalize_schedule("30 0 8 * * *"), "30 0 8 * * *");
    }

    #[test]
    fn valid_schedules_parse() {
        for schedule in ["@hourly", "@daily", "*/10 * * * *", "0 0 12 * * *", "0,30 * * * *"] {
            assert!(validate_schedule(schedule).is_ok(), "{schedule} should parse");
        }
    }

    #[test]
    fn malformed_schedules_are_rejected() {
        for schedule in ["not a cron", "* * *", "99 * * * * *"] {
            assert!(validate_schedule(schedule).is_err(), "{schedule} should fail");
        }
    }
}
