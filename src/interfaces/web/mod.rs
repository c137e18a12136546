pub(crate) mod auth;
mod handlers;
mod router;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::ServerConfig;
use crate::core::scheduler::{PipelineRunner, Scheduler};
use crate::core::storage::{
    CacheRepository, DiscordRepository, ExecutionRepository, TaskRepository,
};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    pub runner: Arc<PipelineRunner>,
    pub tasks: TaskRepository,
    pub executions: ExecutionRepository,
    pub cache: CacheRepository,
    pub discord: DiscordRepository,
    pub api_token: String,
    pub api_host: String,
}

pub struct ApiServer {
    host: String,
    port: u16,
    state: AppState,
}

impl ApiServer {
    pub fn new(cfg: &ServerConfig, state: AppState) -> Self {
        Self {
            host: cfg.host.clone(),
            port: cfg.port,
            state,
        }
    }

    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router::build_router(self.state);
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!("API listening on {addr}");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("server error")?;
        Ok(())
    }
}
