mod config;
mod core;
mod interfaces;

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::executor::ai::{AiExecutor, ProviderRegistry};
use crate::core::executor::discord::DiscordExecutor;
use crate::core::executor::filter::FilterExecutor;
use crate::core::executor::rss::RssExecutor;
use crate::core::executor::scraper::{ScraperExecutor, SourceRegistry};
use crate::core::scheduler::{PipelineRunner, Scheduler};
use crate::core::storage::{
    CacheRepository, Database, DiscordRepository, ExecutionRepository, TaskRepository,
};
use crate::interfaces::web::{ApiServer, AppState};

const HTTP_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::load();

    info!(path = %cfg.database.path.display(), "opening database");
    let db = Database::open(&cfg.database.path).await?;

    let tasks = TaskRepository::new(db.clone());
    let executions = ExecutionRepository::new(db.clone());
    let cache = CacheRepository::new(db.clone());
    let discord_store = DiscordRepository::new(db);

    // Reconcile state stranded by an unclean shutdown before replaying
    // schedules.
    let reset_tasks = tasks.reset_running().await?;
    let orphaned = executions.fail_orphaned("orphaned by restart").await?;
    if reset_tasks > 0 || orphaned > 0 {
        warn!(
            tasks = reset_tasks,
            executions = orphaned,
            "reconciled state left over from a previous run"
        );
    }

    let providers = Arc::new(ProviderRegistry::from_config(&cfg.ai));
    info!(providers = ?providers.available(), "AI providers ready");

    let sources = Arc::new(SourceRegistry::with_builtin_sources(&cfg.scraper));
    info!(sources = ?sources.available(), "scraper sources ready");

    let runner = Arc::new(PipelineRunner::new(
        tasks.clone(),
        executions.clone(),
        discord_store.clone(),
        ScraperExecutor::new(sources, cache.clone()),
        RssExecutor::new(cache.clone(), &cfg.scraper),
        AiExecutor::new(providers),
        DiscordExecutor::new(&cfg.discord),
        FilterExecutor::new(cache.clone()),
    ));

    let scheduler =
        Scheduler::with_firing_timeout(tasks.clone(), runner.clone(), cfg.scheduler.firing_timeout)
            .await?;

    let shutdown = CancellationToken::new();
    scheduler.start(shutdown.child_token()).await?;

    let state = AppState {
        scheduler: scheduler.clone(),
        runner,
        tasks,
        executions,
        cache,
        discord: discord_store,
        api_token: cfg.server.api_token.clone(),
        api_host: cfg.server.host.clone(),
    };
    let server = ApiServer::new(&cfg.server, state);

    // The scheduler drains before the HTTP surface so in-flight runs observe
    // the cancellation first; the HTTP drain itself is bounded.
    let drained = Arc::new(tokio::sync::Notify::new());
    let graceful = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        let drained = drained.clone();
        async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
            scheduler.stop().await;
            drained.notify_one();
        }
    };

    let mut server_task = tokio::spawn(server.serve(graceful));
    tokio::select! {
        result = &mut server_task => {
            result??;
            return Ok(());
        }
        _ = drained.notified() => {}
    }

    match tokio::time::timeout(HTTP_DRAIN_TIMEOUT, server_task).await {
        Ok(result) => result??,
        Err(_) => warn!("HTTP surface did not drain in time, exiting anyway"),
    }
    info!("server stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
