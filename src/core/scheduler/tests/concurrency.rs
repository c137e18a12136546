use std::sync::Arc;
use std::time::Duration;

use super::support::{StubSource, TestEnv, item, step};
use crate::core::model::{ExecutionStatus, StepStatus, TaskStatus};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn trigger_is_rejected_while_task_is_running() {
    let env = TestEnv::with_source(Arc::new(StubSource::new(vec![vec![item("https://x/a")]])))
        .await;
    let task = env
        .create_task(
            "0 0 * * * *",
            vec![step("scraper", serde_json::json!({"source": "stub"}))],
        )
        .await;

    env.tasks
        .update_status(&task.id, TaskStatus::Running)
        .await
        .unwrap();

    let err = env.scheduler.trigger(&task.id, "user-u1").await.unwrap_err();
    assert!(err.to_string().contains("already running"));
    assert_eq!(env.executions.count_by_task(&task.id).await.unwrap(), 0);

    // Once the in-flight marker clears, the manual trigger goes through and
    // records who asked for it.
    env.tasks
        .update_status(&task.id, TaskStatus::Enabled)
        .await
        .unwrap();
    let execution = env.scheduler.trigger(&task.id, "user-u1").await.unwrap();
    assert_eq!(execution.triggered_by, "user-u1");
    assert_eq!(execution.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn trigger_fails_for_missing_task() {
    let env = TestEnv::with_source(Arc::new(StubSource::new(vec![vec![]]))).await;
    let err = env.scheduler.trigger("no-such-task", "manual").await.unwrap_err();
    assert!(err.to_string().contains("task not found"));
}

#[tokio::test]
async fn scheduled_firings_of_one_task_never_overlap() {
    // A task due every second whose scrape takes ~2.2s: overlapping ticks
    // must be dropped, so the observed executions stay well under one per
    // second.
    let env = TestEnv::with_source(Arc::new(
        StubSource::new(vec![vec![item("https://x/a")]])
            .with_delay(Duration::from_millis(2200)),
    ))
    .await;
    let task = env
        .create_task(
            "* * * * * *",
            vec![step("scraper", serde_json::json!({"source": "stub"}))],
        )
        .await;

    let shutdown = CancellationToken::new();
    env.scheduler.start(shutdown.child_token()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(4500)).await;
    env.scheduler.stop().await;

    let executions = env.executions.find_by_task(&task.id, 50, 0).await.unwrap();
    assert!(
        !executions.is_empty(),
        "at least one firing should have happened"
    );
    assert!(
        executions.len() <= 2,
        "overlapping firings were not dropped: {} executions",
        executions.len()
    );
}

#[tokio::test]
async fn journal_grows_monotonically_while_a_run_is_in_flight() {
    let env = TestEnv::with_source(Arc::new(
        StubSource::new(vec![vec![item("https://x/a")]])
            .with_delay(Duration::from_millis(250)),
    ))
    .await;
    let task = env
        .create_task(
            "0 0 * * * *",
            vec![
                step("scraper", serde_json::json!({"source": "stub"})),
                step("filter", serde_json::json!({})),
                step("discord", serde_json::json!({"webhook_url": env.webhook.url})),
            ],
        )
        .await;

    let runner = env.runner.clone();
    let run_task = task.clone();
    let handle = tokio::spawn(async move {
        runner
            .run(&run_task, "schedule", &CancellationToken::new())
            .await
            .unwrap()
    });

    // Poll the journal while the pipeline runs; observed prefixes must only
    // ever extend.
    let mut observed_lens = Vec::new();
    for _ in 0..20 {
        if let Some(execution) = env
            .executions
            .find_by_task(&task.id, 1, 0)
            .await
            .unwrap()
            .into_iter()
            .next()
        {
            observed_lens.push(execution.step_results.len());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let final_execution = handle.await.unwrap();
    assert_eq!(final_execution.status, ExecutionStatus::Completed);
    assert!(
        observed_lens.windows(2).all(|w| w[0] <= w[1]),
        "journal shrank: {observed_lens:?}"
    );
}

#[tokio::test]
async fn cancellation_fails_the_running_step_and_unwinds() {
    let env = TestEnv::with_source(Arc::new(
        StubSource::new(vec![vec![item("https://x/a")]])
            .with_delay(Duration::from_secs(30)),
    ))
    .await;
    let task = env
        .create_task(
            "0 0 * * * *",
            vec![
                step("scraper", serde_json::json!({"source": "stub"})),
                step("discord", serde_json::json!({"webhook_url": env.webhook.url})),
            ],
        )
        .await;

    let cancel = CancellationToken::new();
    let runner = env.runner.clone();
    let run_task = task.clone();
    let child = cancel.child_token();
    let handle = tokio::spawn(async move {
        runner.run(&run_task, "schedule", &child).await.unwrap()
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();

    let execution = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run did not unwind after cancellation")
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let error = execution.error.unwrap();
    assert!(error.contains("cancelled"), "unexpected error: {error}");
    assert_eq!(execution.step_results.len(), 1);
    assert_eq!(execution.step_results[0].status, StepStatus::Failed);
    assert_eq!(env.webhook.count(), 0);
}

#[tokio::test]
async fn scheduling_sets_next_run_for_shortcuts_and_five_field_expressions() {
    for schedule in ["@hourly", "@daily", "*/5 * * * *", "0 0 12 * * *"] {
        let env = TestEnv::with_source(Arc::new(StubSource::new(vec![vec![]]))).await;
        let task = env
            .create_task(
                schedule,
                vec![step("scraper", serde_json::json!({"source": "stub"}))],
            )
            .await;

        let shutdown = CancellationToken::new();
        env.scheduler.start(shutdown.child_token()).await.unwrap();

        assert!(
            env.scheduler.next_run(&task.id).await.is_some(),
            "next_run missing for {schedule}"
        );
        assert!(env.scheduler.scheduled_tasks().await.contains(&task.id));

        let stored = env.tasks.find_by_id(&task.id).await.unwrap().unwrap();
        assert!(stored.next_run_at.is_some(), "next_run_at not persisted for {schedule}");

        env.scheduler.stop().await;
    }
}

#[tokio::test]
async fn malformed_schedule_is_rejected_without_installing_an_entry() {
    let env = TestEnv::with_source(Arc::new(StubSource::new(vec![vec![]]))).await;
    let task = env
        .create_task(
            "not a cron",
            vec![step("scraper", serde_json::json!({"source": "stub"}))],
        )
        .await;

    assert!(env.scheduler.add_task(&task).await.is_err());
    assert!(env.scheduler.scheduled_tasks().await.is_empty());
    assert!(env.scheduler.next_run(&task.id).await.is_none());
}

#[tokio::test]
async fn stop_returns_promptly_and_disables_further_firings() {
    let env = TestEnv::with_source(Arc::new(StubSource::new(vec![vec![]]))).await;
    let shutdown = CancellationToken::new();
    env.scheduler.start(shutdown.child_token()).await.unwrap();
    assert!(env.scheduler.is_running().await);

    tokio::time::timeout(Duration::from_secs(5), env.scheduler.stop())
        .await
        .expect("stop did not return in time");
    assert!(!env.scheduler.is_running().await);
}

#[tokio::test]
async fn removed_task_keeps_no_entry() {
    let env = TestEnv::with_source(Arc::new(StubSource::new(vec![vec![]]))).await;
    let task = env
        .create_task(
            "@hourly",
            vec![step("scraper", serde_json::json!({"source": "stub"}))],
        )
        .await;

    env.scheduler.add_task(&task).await.unwrap();
    assert_eq!(env.scheduler.scheduled_tasks().await.len(), 1);

    env.scheduler.remove_task(&task.id).await;
    assert!(env.scheduler.scheduled_tasks().await.is_empty());
}
