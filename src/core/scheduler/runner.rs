use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::executor::{
    SkipPipeline, StepConfig, StepContext, StepExecutor, StepKind, ai::AiExecutor,
    discord::DiscordExecutor, filter::FilterExecutor, rss::RssExecutor, scraper::ScraperExecutor,
};
use crate::core::model::{
    Execution, PipelineStep, StepOutput, StepResult, StepStatus, Task, TaskStatus,
};
use crate::core::storage::{DiscordRepository, ExecutionRepository, TaskRepository};

/// Runs one execution of one task to its terminal state, journaling progress
/// after every step. Step failures surface only through the returned
/// execution record; an `Err` here means the journal itself could not be
/// written.
pub struct PipelineRunner {
    tasks: TaskRepository,
    executions: ExecutionRepository,
    discord_store: DiscordRepository,
    scraper: ScraperExecutor,
    rss: RssExecutor,
    ai: AiExecutor,
    discord: DiscordExecutor,
    filter: FilterExecutor,
}

impl PipelineRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: TaskRepository,
        executions: ExecutionRepository,
        discord_store: DiscordRepository,
        scraper: ScraperExecutor,
        rss: RssExecutor,
        ai: AiExecutor,
        discord: DiscordExecutor,
        filter: FilterExecutor,
    ) -> Self {
        Self {
            tasks,
            executions,
            discord_store,
            scraper,
            rss,
            ai,
            discord,
            filter,
        }
    }

    pub async fn run(
        &self,
        task: &Task,
        triggered_by: &str,
        cancel: &CancellationToken,
    ) -> Result<Execution> {
        let execution = self
            .executions
            .create(&task.id, &task.name, triggered_by)
            .await
            .context("failed to create execution record")?;

        if let Err(e) = self.tasks.update_status(&task.id, TaskStatus::Running).await {
            warn!(task_id = %task.id, error = %e, "failed to mark task running");
        }

        let (results, outcome) = self.execute_pipeline(task, &execution.id, cancel).await;

        match &outcome {
            Ok(()) => {
                if let Err(e) = self.executions.complete(&execution.id, &results).await {
                    warn!(execution_id = %execution.id, error = %e, "failed to mark execution complete");
                }
            }
            Err(err) => {
                if let Err(e) = self
                    .executions
                    .fail(&execution.id, &results, &format!("{err:#}"))
                    .await
                {
                    warn!(execution_id = %execution.id, error = %e, "failed to mark execution failed");
                }
            }
        }

        // The task goes back to enabled regardless of outcome so the
        // scheduler can fire it again.
        if let Err(e) = self.tasks.update_status(&task.id, TaskStatus::Enabled).await {
            warn!(task_id = %task.id, error = %e, "failed to restore task status");
        }
        if let Err(e) = self.tasks.update_last_run(&task.id, Utc::now()).await {
            warn!(task_id = %task.id, error = %e, "failed to update last run time");
        }

        Ok(self
            .executions
            .find_by_id(&execution.id)
            .await?
            .unwrap_or(execution))
    }

    async fn execute_pipeline(
        &self,
        task: &Task,
        execution_id: &str,
        cancel: &CancellationToken,
    ) -> (Vec<StepResult>, Result<()>) {
        let mut results: Vec<StepResult> = Vec::new();
        let mut current: Option<StepOutput> = None;
        // One context per run: the firing's cancellation plus the run's
        // freshly recorded fingerprints, shared by ingestion and filter.
        let ctx = StepContext::new(cancel.clone());

        for (i, step) in task.pipeline.iter().enumerate() {
            let step_name = step
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("Step {}: {}", i + 1, step.kind));

            // Ingestion and filter steps key the dedup cache by task.
            let mut config = step.config.clone();
            config.insert(
                "task_id".to_string(),
                serde_json::Value::String(task.id.clone()),
            );

            let mut step_result = StepResult {
                step_name,
                step_type: step.kind.clone(),
                status: StepStatus::Running,
                started_at: Utc::now(),
                finished_at: None,
                output: None,
                error: None,
            };

            let outcome = self
                .execute_step(&step.kind, current.as_ref(), &config, &ctx)
                .await;
            step_result.finished_at = Some(Utc::now());

            match outcome {
                Err(err) => {
                    if let Some(skip) = err.downcast_ref::<SkipPipeline>() {
                        step_result.status = StepStatus::Skipped;
                        step_result.error = Some(skip.to_string());
                        results.push(step_result);
                        self.persist_progress(execution_id, &results).await;
                        info!(task_id = %task.id, step = i + 1, "pipeline skipped");
                        return (results, Ok(()));
                    }

                    step_result.status = StepStatus::Failed;
                    step_result.error = Some(format!("{err:#}"));
                    results.push(step_result);
                    self.persist_progress(execution_id, &results).await;
                    return (
                        results,
                        Err(anyhow!("step {} ({}) failed: {err:#}", i + 1, step.kind)),
                    );
                }
                Ok(output) => {
                    if output.data.is_empty() {
                        // Nothing new to carry forward; downstream steps (and
                        // critically the notification sink) are not invoked.
                        step_result.status = StepStatus::Completed;
                        step_result.output =
                            Some(serde_json::Value::String("No new items found".to_string()));
                        results.push(step_result);
                        self.persist_progress(execution_id, &results).await;
                        info!(task_id = %task.id, step = i + 1, "no new items, skipping remaining steps");
                        return (results, Ok(()));
                    }

                    step_result.status = StepStatus::Completed;
                    step_result.output = Some(serde_json::json!({
                        "item_count": output.item_count,
                        "metadata": output.metadata,
                    }));
                    results.push(step_result);
                    self.persist_progress(execution_id, &results).await;
                    current = Some(output);
                }
            }
        }

        (results, Ok(()))
    }

    async fn execute_step(
        &self,
        kind: &str,
        input: Option<&StepOutput>,
        config: &StepConfig,
        ctx: &StepContext,
    ) -> Result<StepOutput> {
        let Some(kind) = StepKind::parse(kind) else {
            return Err(anyhow!("unknown step type: {kind}"));
        };
        match kind {
            StepKind::Scraper => self.scraper.execute(input, config, ctx).await,
            StepKind::Rss => self.rss.execute(input, config, ctx).await,
            StepKind::Filter => self.filter.execute(input, config, ctx).await,
            StepKind::AiProcessor => self.ai.execute(input, config, ctx).await,
            StepKind::Discord => {
                // Fill in the webhook from the task's stored Discord config
                // when the step itself names none.
                let mut config = config.clone();
                if !config.contains_key("webhook_url") {
                    let task_id = config
                        .get("task_id")
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                    if let Some(task_id) = task_id {
                        match self.discord_store.get_webhook_for_task(&task_id).await {
                            Ok(Some(url)) => {
                                config.insert(
                                    "webhook_url".to_string(),
                                    serde_json::Value::String(url),
                                );
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!(task_id, error = %e, "webhook resolution failed");
                            }
                        }
                    }
                }
                self.discord.execute(input, &config, ctx).await
            }
        }
    }

    /// Validates every step's config without side effects. Returns one
    /// message per offending step.
    pub fn validate_pipeline(&self, pipeline: &[PipelineStep]) -> Vec<String> {
        let mut errors = Vec::new();
        for (i, step) in pipeline.iter().enumerate() {
            let result = match StepKind::parse(&step.kind) {
                None => Err(anyhow!("unknown step type: {}", step.kind)),
                Some(StepKind::Scraper) => self.scraper.validate(&step.config),
                Some(StepKind::Rss) => self.rss.validate(&step.config),
                Some(StepKind::Filter) => self.filter.validate(&step.config),
                Some(StepKind::AiProcessor) => self.ai.validate(&step.config),
                Some(StepKind::Discord) => self.discord.validate(&step.config),
            };
            if let Err(e) = result {
                errors.push(format!("step {}: {e:#}", i + 1));
            }
        }
        errors
    }

    async fn persist_progress(&self, execution_id: &str, results: &[StepResult]) {
        if let Err(e) = self
            .executions
            .update_step_results(execution_id, results)
            .await
        {
            warn!(execution_id, error = %e, "failed to update step results");
        }
    }
}
