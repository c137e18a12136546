use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use super::{fail, ok};
use crate::interfaces::web::AppState;

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    20
}

pub async fn list_recent(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Json<serde_json::Value> {
    match state.executions.find_recent(query.limit).await {
        Ok(executions) => ok(serde_json::json!({
            "executions": executions,
            "count": executions.len(),
        })),
        Err(e) => fail(e),
    }
}

pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.executions.find_by_id(&id).await {
        Ok(Some(execution)) => ok(serde_json::json!({"execution": execution})),
        Ok(None) => fail("execution not found"),
        Err(e) => fail(e),
    }
}

pub async fn list_task_executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Json<serde_json::Value> {
    match state
        .executions
        .find_by_task(&id, query.limit, query.offset)
        .await
    {
        Ok(executions) => ok(serde_json::json!({
            "executions": executions,
            "count": executions.len(),
        })),
        Err(e) => fail(e),
    }
}
