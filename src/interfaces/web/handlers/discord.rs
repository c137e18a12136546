use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use super::{fail, ok};
use crate::core::model::SetTaskDiscordConfigRequest;
use crate::interfaces::web::AppState;

#[derive(Deserialize)]
pub struct CreateBotRequest {
    name: String,
    #[serde(default)]
    is_default: bool,
}

pub async fn create_bot(
    State(state): State<AppState>,
    Json(req): Json<CreateBotRequest>,
) -> Json<serde_json::Value> {
    if req.name.trim().is_empty() {
        return fail("bot name is required");
    }
    match state.discord.create_bot(req.name.trim(), req.is_default).await {
        Ok(bot) => ok(serde_json::json!({"bot": bot})),
        Err(e) => fail(e),
    }
}

pub async fn list_bots(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.discord.list_bots().await {
        Ok(bots) => ok(serde_json::json!({"bots": bots, "count": bots.len()})),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
pub struct CreateChannelRequest {
    bot_id: String,
    name: String,
    webhook_url: String,
}

pub async fn create_channel(
    State(state): State<AppState>,
    Json(req): Json<CreateChannelRequest>,
) -> Json<serde_json::Value> {
    if req.name.trim().is_empty() || req.webhook_url.trim().is_empty() {
        return fail("channel name and webhook_url are required");
    }
    match state
        .discord
        .create_channel(&req.bot_id, req.name.trim(), req.webhook_url.trim())
        .await
    {
        Ok(channel) => ok(serde_json::json!({"channel": channel})),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
pub struct ListChannelsQuery {
    #[serde(default)]
    bot_id: Option<String>,
}

pub async fn list_channels(
    State(state): State<AppState>,
    Query(query): Query<ListChannelsQuery>,
) -> Json<serde_json::Value> {
    match state.discord.list_channels(query.bot_id.as_deref()).await {
        Ok(channels) => ok(serde_json::json!({"channels": channels, "count": channels.len()})),
        Err(e) => fail(e),
    }
}

pub async fn get_task_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.discord.task_config(&id).await {
        Ok(Some(config)) => ok(serde_json::json!({"config": config})),
        Ok(None) => fail("no Discord config for this task"),
        Err(e) => fail(e),
    }
}

pub async fn set_task_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SetTaskDiscordConfigRequest>,
) -> Json<serde_json::Value> {
    match state.tasks.find_by_id(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return fail("task not found"),
        Err(e) => return fail(e),
    }
    match state.discord.set_task_config(&id, &req).await {
        Ok(config) => ok(serde_json::json!({"config": config})),
        Err(e) => fail(e),
    }
}

pub async fn delete_task_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.discord.delete_task_config(&id).await {
        Ok(()) => ok(serde_json::json!({"message": "config removed"})),
        Err(e) => fail(e),
    }
}
