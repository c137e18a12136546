use std::sync::Arc;

use super::support::{StubSource, TestEnv, item, spawn_failing_ai_server, step};
use crate::core::model::{ExecutionStatus, StepStatus};
use crate::core::storage::fingerprint;
use tokio_util::sync::CancellationToken;

fn scraper_filter_discord(webhook_url: &str) -> Vec<crate::core::model::PipelineStep> {
    vec![
        step("scraper", serde_json::json!({"source": "stub", "limit": 10})),
        step("filter", serde_json::json!({"deduplicate": true})),
        step("discord", serde_json::json!({"webhook_url": webhook_url})),
    ]
}

#[tokio::test]
async fn first_run_delivers_every_new_item() {
    let env = TestEnv::with_source(Arc::new(StubSource::new(vec![vec![
        item("https://x/a"),
        item("https://x/b"),
        item("https://x/c"),
    ]])))
    .await;
    let task = env
        .create_task("0 0 * * * *", scraper_filter_discord(&env.webhook.url))
        .await;

    let execution = env
        .runner
        .run(&task, "schedule", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.error.is_none());
    assert_eq!(execution.step_results.len(), 3);
    assert!(
        execution
            .step_results
            .iter()
            .all(|r| r.status == StepStatus::Completed)
    );

    // One webhook call containing all three items.
    assert_eq!(env.webhook.count(), 1);
    let payload = &env.webhook.payloads()[0];
    assert_eq!(payload["embeds"].as_array().unwrap().len(), 3);

    // Fingerprints recorded for this task.
    for url in ["https://x/a", "https://x/b", "https://x/c"] {
        let hash = fingerprint(url, url, "stub");
        assert!(env.cache.exists_for_task(&hash, &task.id).await.unwrap());
    }
}

#[tokio::test]
async fn repeat_run_with_same_items_says_nothing() {
    let env = TestEnv::with_source(Arc::new(StubSource::new(vec![vec![
        item("https://x/a"),
        item("https://x/b"),
        item("https://x/c"),
    ]])))
    .await;
    let task = env
        .create_task("0 0 * * * *", scraper_filter_discord(&env.webhook.url))
        .await;

    let cancel = CancellationToken::new();
    env.runner.run(&task, "schedule", &cancel).await.unwrap();
    let second = env.runner.run(&task, "schedule", &cancel).await.unwrap();

    assert_eq!(second.status, ExecutionStatus::Completed);
    assert!(second.error.is_none());
    // The scraper emits nothing after cache filtering, so the pipeline
    // short-circuits before the sink.
    assert!(second.step_results.len() <= 2);
    assert!(
        second
            .step_results
            .iter()
            .all(|r| r.status == StepStatus::Completed)
    );
    assert_eq!(env.webhook.count(), 1);
    assert_eq!(env.cache.count().await.unwrap(), 3);
}

#[tokio::test]
async fn partial_new_run_delivers_only_the_new_item() {
    let env = TestEnv::with_source(Arc::new(StubSource::new(vec![
        vec![item("https://x/a"), item("https://x/b"), item("https://x/c")],
        vec![
            item("https://x/a"),
            item("https://x/b"),
            item("https://x/c"),
            item("https://x/d"),
        ],
    ])))
    .await;
    let task = env
        .create_task("0 0 * * * *", scraper_filter_discord(&env.webhook.url))
        .await;

    let cancel = CancellationToken::new();
    env.runner.run(&task, "schedule", &cancel).await.unwrap();
    let second = env.runner.run(&task, "schedule", &cancel).await.unwrap();

    assert_eq!(second.status, ExecutionStatus::Completed);
    assert_eq!(env.webhook.count(), 2);
    let payload = &env.webhook.payloads()[1];
    let embeds = payload["embeds"].as_array().unwrap();
    assert_eq!(embeds.len(), 1);
    assert_eq!(embeds[0]["url"], "https://x/d");

    let hash = fingerprint("https://x/d", "https://x/d", "stub");
    assert!(env.cache.exists_for_task(&hash, &task.id).await.unwrap());
    assert_eq!(env.cache.count().await.unwrap(), 4);
}

#[tokio::test]
async fn empty_ingest_completes_without_notifying() {
    let env = TestEnv::with_source(Arc::new(StubSource::new(vec![vec![]]))).await;
    let task = env
        .create_task("0 0 * * * *", scraper_filter_discord(&env.webhook.url))
        .await;

    let execution = env
        .runner
        .run(&task, "schedule", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.error.is_none());
    assert_eq!(execution.step_results.len(), 1);
    assert_eq!(execution.step_results[0].status, StepStatus::Completed);
    assert_eq!(
        execution.step_results[0].output,
        Some(serde_json::Value::String("No new items found".to_string()))
    );
    assert_eq!(env.webhook.count(), 0);
}

#[tokio::test]
async fn provider_error_fails_execution_mid_pipeline() {
    let ai_url = spawn_failing_ai_server().await;
    let env = TestEnv::with_source_and_ai(
        Arc::new(StubSource::new(vec![vec![
            item("https://x/1"),
            item("https://x/2"),
            item("https://x/3"),
            item("https://x/4"),
            item("https://x/5"),
        ]])),
        ai_url,
    )
    .await;
    let task = env
        .create_task(
            "0 0 * * * *",
            vec![
                step("scraper", serde_json::json!({"source": "stub"})),
                step(
                    "ai_processor",
                    serde_json::json!({"provider": "stub", "prompt": "Summarize"}),
                ),
                step("discord", serde_json::json!({"webhook_url": env.webhook.url})),
            ],
        )
        .await;

    let execution = env
        .runner
        .run(&task, "schedule", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    let error = execution.error.unwrap();
    assert!(
        error.starts_with("step 2 (ai_processor) failed:"),
        "unexpected error: {error}"
    );
    assert_eq!(execution.step_results.len(), 2);
    assert_eq!(execution.step_results[0].status, StepStatus::Completed);
    assert_eq!(execution.step_results[1].status, StepStatus::Failed);
    assert_eq!(env.webhook.count(), 0);

    // Fingerprints from the successful ingestion step persist even though a
    // later step failed.
    assert_eq!(env.cache.count().await.unwrap(), 5);
}

#[tokio::test]
async fn unknown_step_type_fails_validation_and_execution() {
    let env = TestEnv::with_source(Arc::new(StubSource::new(vec![vec![]]))).await;

    let pipeline = vec![step("teleport", serde_json::json!({}))];
    let errors = env.runner.validate_pipeline(&pipeline);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("unknown step type"));

    let task = env.create_task("0 0 * * * *", pipeline).await;
    let execution = env
        .runner
        .run(&task, "manual", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn validate_pipeline_reports_each_bad_step() {
    let env = TestEnv::with_source(Arc::new(StubSource::new(vec![vec![]]))).await;
    let pipeline = vec![
        step("scraper", serde_json::json!({})),
        step("ai_processor", serde_json::json!({})),
        step("discord", serde_json::json!({})),
    ];
    let errors = env.runner.validate_pipeline(&pipeline);
    assert_eq!(errors.len(), 2);
    assert!(errors[0].starts_with("step 1:"));
    assert!(errors[1].starts_with("step 2:"));
}

#[tokio::test]
async fn run_restores_task_status_and_stamps_last_run() {
    let env = TestEnv::with_source(Arc::new(StubSource::new(vec![vec![item("https://x/a")]])))
        .await;
    let task = env
        .create_task("0 0 * * * *", scraper_filter_discord(&env.webhook.url))
        .await;

    env.runner
        .run(&task, "schedule", &CancellationToken::new())
        .await
        .unwrap();

    let task = env.tasks.find_by_id(&task.id).await.unwrap().unwrap();
    assert_eq!(task.status, crate::core::model::TaskStatus::Enabled);
    assert!(task.last_run_at.is_some());
}
