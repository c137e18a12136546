use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use tracing::warn;

use super::{fail, ok};
use crate::core::model::{CreateTaskRequest, PipelineStep, TaskStatus, UpdateTaskRequest};
use crate::core::scheduler::validate_schedule;
use crate::interfaces::web::AppState;

const MIN_NAME_LEN: usize = 3;
const MAX_NAME_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 500;

fn validate_name(name: &str) -> Result<(), String> {
    let len = name.chars().count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
        return Err(format!(
            "name must be between {MIN_NAME_LEN} and {MAX_NAME_LEN} characters"
        ));
    }
    Ok(())
}

#[derive(Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Json<serde_json::Value> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => match TaskStatus::parse(raw) {
            Some(status) => Some(status),
            None => return fail(format!("unknown status filter: {raw}")),
        },
    };

    match state.tasks.find_all(status, query.limit, query.offset).await {
        Ok(tasks) => ok(serde_json::json!({"tasks": tasks, "count": tasks.len()})),
        Err(e) => fail(e),
    }
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.tasks.find_by_id(&id).await {
        Ok(Some(task)) => ok(serde_json::json!({"task": task})),
        Ok(None) => fail("task not found"),
        Err(e) => fail(e),
    }
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Json<serde_json::Value> {
    if let Err(e) = validate_name(&req.name) {
        return fail(e);
    }
    if req.description.chars().count() > MAX_DESCRIPTION_LEN {
        return fail(format!("description must be at most {MAX_DESCRIPTION_LEN} characters"));
    }
    if req.pipeline.is_empty() {
        return fail("pipeline must contain at least one step");
    }
    if req.status == Some(TaskStatus::Running) {
        return fail("a task cannot be created in the running state");
    }

    let errors = state.runner.validate_pipeline(&req.pipeline);
    if !errors.is_empty() {
        return Json(serde_json::json!({
            "success": false,
            "error": "invalid pipeline",
            "details": errors,
        }));
    }
    if let Err(e) = validate_schedule(&req.schedule) {
        return fail(e);
    }

    let task = match state.tasks.create(&req, "api").await {
        Ok(task) => task,
        Err(e) => return fail(e),
    };

    if task.status == TaskStatus::Enabled
        && let Err(e) = state.scheduler.add_task(&task).await
    {
        warn!(task_id = %task.id, error = %e, "task stored but scheduling failed");
        return Json(serde_json::json!({
            "success": true,
            "task": task,
            "warning": format!("task stored but scheduling failed: {e}"),
        }));
    }

    ok(serde_json::json!({"task": task}))
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> Json<serde_json::Value> {
    if let Some(name) = &req.name
        && let Err(e) = validate_name(name)
    {
        return fail(e);
    }
    if req.status == Some(TaskStatus::Running) {
        return fail("task status cannot be set to running directly");
    }
    if let Some(pipeline) = &req.pipeline {
        if pipeline.is_empty() {
            return fail("pipeline must contain at least one step");
        }
        let errors = state.runner.validate_pipeline(pipeline);
        if !errors.is_empty() {
            return Json(serde_json::json!({
                "success": false,
                "error": "invalid pipeline",
                "details": errors,
            }));
        }
    }
    if let Some(schedule) = &req.schedule
        && let Err(e) = validate_schedule(schedule)
    {
        return fail(e);
    }

    let task = match state.tasks.update(&id, &req).await {
        Ok(Some(task)) => task,
        Ok(None) => return fail("task not found"),
        Err(e) => return fail(e),
    };

    if let Err(e) = state.scheduler.update_task(&task).await {
        warn!(task_id = %task.id, error = %e, "task updated but rescheduling failed");
        return Json(serde_json::json!({
            "success": true,
            "task": task,
            "warning": format!("task updated but rescheduling failed: {e}"),
        }));
    }

    ok(serde_json::json!({"task": task}))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    state.scheduler.remove_task(&id).await;
    match state.tasks.delete(&id).await {
        Ok(_) => ok(serde_json::json!({"message": "task deleted"})),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
pub struct RunTaskRequest {
    #[serde(default)]
    triggered_by: Option<String>,
}

pub async fn run_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Json<serde_json::Value> {
    // The body is optional; an empty or malformed one means a plain manual
    // run.
    let triggered_by = serde_json::from_str::<RunTaskRequest>(&body)
        .ok()
        .and_then(|req| req.triggered_by)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "manual".to_string());

    match state.scheduler.trigger(&id, &triggered_by).await {
        Ok(execution) => ok(serde_json::json!({"execution": execution})),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
pub struct ValidatePipelineRequest {
    #[serde(default)]
    schedule: Option<String>,
    #[serde(default)]
    pipeline: Vec<PipelineStep>,
}

pub async fn validate_pipeline(
    State(state): State<AppState>,
    Json(req): Json<ValidatePipelineRequest>,
) -> Json<serde_json::Value> {
    let mut errors = state.runner.validate_pipeline(&req.pipeline);
    if let Some(schedule) = &req.schedule
        && let Err(e) = validate_schedule(schedule)
    {
        errors.push(format!("schedule: {e:#}"));
    }

    Json(serde_json::json!({
        "success": true,
        "valid": errors.is_empty(),
        "errors": errors,
    }))
}
