use axum::{
    Json, Router, middleware,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{admin, discord, executions, tasks};

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/tasks/validate", post(tasks::validate_pipeline))
        .route(
            "/tasks/{id}",
            get(tasks::get_task)
                .put(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route("/tasks/{id}/run", post(tasks::run_task))
        .route("/tasks/{id}/executions", get(executions::list_task_executions))
        .route(
            "/tasks/{id}/discord",
            get(discord::get_task_config)
                .put(discord::set_task_config)
                .delete(discord::delete_task_config),
        )
        .route("/executions", get(executions::list_recent))
        .route("/executions/{id}", get(executions::get_execution))
        .route("/executions/cleanup", post(admin::cleanup_executions))
        .route("/scheduler/status", get(admin::scheduler_status))
        .route("/stats", get(admin::stats))
        .route("/cache/cleanup", post(admin::cleanup_cache))
        .route("/cache/tasks/{id}", delete(admin::clear_task_cache))
        .route("/discord/bots", get(discord::list_bots).post(discord::create_bot))
        .route(
            "/discord/channels",
            get(discord::list_channels).post(discord::create_channel),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth::require_auth))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(CorsLayer::permissive())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
