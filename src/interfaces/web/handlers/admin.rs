use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{Duration, Utc};
use serde::Deserialize;

use super::{fail, ok};
use crate::interfaces::web::AppState;

pub async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let total = state.tasks.count(None).await;
    let enabled = state
        .tasks
        .count(Some(crate::core::model::TaskStatus::Enabled))
        .await;
    let cache_entries = state.cache.count().await;

    match (total, enabled, cache_entries) {
        (Ok(total), Ok(enabled), Ok(cache_entries)) => ok(serde_json::json!({
            "tasks": total,
            "enabled_tasks": enabled,
            "cache_entries": cache_entries,
        })),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => fail(e),
    }
}

pub async fn scheduler_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let running = state.scheduler.is_running().await;
    let task_ids = state.scheduler.scheduled_tasks().await;

    let mut scheduled = Vec::with_capacity(task_ids.len());
    for task_id in task_ids {
        let next_run = state.scheduler.next_run(&task_id).await;
        scheduled.push(serde_json::json!({
            "task_id": task_id,
            "next_run_at": next_run,
        }));
    }

    ok(serde_json::json!({
        "running": running,
        "scheduled": scheduled,
    }))
}

#[derive(Deserialize)]
pub struct CleanupRequest {
    #[serde(default = "default_older_than_days")]
    older_than_days: i64,
}

fn default_older_than_days() -> i64 {
    30
}

pub async fn cleanup_cache(
    State(state): State<AppState>,
    Json(req): Json<CleanupRequest>,
) -> Json<serde_json::Value> {
    if req.older_than_days < 0 {
        return fail("older_than_days must be non-negative");
    }
    let cutoff = Utc::now() - Duration::days(req.older_than_days);
    match state.cache.clean_older_than(cutoff).await {
        Ok(removed) => ok(serde_json::json!({"removed": removed})),
        Err(e) => fail(e),
    }
}

pub async fn clear_task_cache(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.cache.clean_by_task(&id).await {
        Ok(removed) => ok(serde_json::json!({"removed": removed})),
        Err(e) => fail(e),
    }
}

pub async fn cleanup_executions(
    State(state): State<AppState>,
    Json(req): Json<CleanupRequest>,
) -> Json<serde_json::Value> {
    if req.older_than_days < 0 {
        return fail("older_than_days must be non-negative");
    }
    let cutoff = Utc::now() - Duration::days(req.older_than_days);
    match state.executions.delete_old(cutoff).await {
        Ok(removed) => ok(serde_json::json!({"removed": removed})),
        Err(e) => fail(e),
    }
}
