use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use tokio_util::sync::CancellationToken;

use crate::config::{DiscordConfig, ScraperConfig};
use crate::core::executor::ai::{AiExecutor, ApiFormat, HttpProvider, ProviderDef, ProviderRegistry};
use crate::core::executor::discord::DiscordExecutor;
use crate::core::executor::filter::FilterExecutor;
use crate::core::executor::rss::RssExecutor;
use crate::core::executor::scraper::{ScraperExecutor, Source, SourceRegistry};
use crate::core::executor::with_cancel;
use crate::core::model::{CreateTaskRequest, PipelineStep, ScrapedItem, Task, TaskStatus};
use crate::core::scheduler::{PipelineRunner, Scheduler};
use crate::core::storage::{
    CacheRepository, Database, DiscordRepository, ExecutionRepository, TaskRepository,
};

/// A source fed by the test: each call pops the next prepared batch, falling
/// back to the last one, with an optional artificial delay.
pub struct StubSource {
    batches: std::sync::Mutex<Vec<Vec<ScrapedItem>>>,
    last: std::sync::Mutex<Vec<ScrapedItem>>,
    delay: Duration,
}

impl StubSource {
    pub fn new(batches: Vec<Vec<ScrapedItem>>) -> Self {
        Self {
            last: std::sync::Mutex::new(batches.last().cloned().unwrap_or_default()),
            batches: std::sync::Mutex::new(batches),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Source for StubSource {
    fn name(&self) -> &str {
        "stub"
    }

    fn category(&self) -> &str {
        "news"
    }

    async fn scrape(
        &self,
        _query: &str,
        _limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScrapedItem>> {
        if !self.delay.is_zero() {
            with_cancel(cancel, "stub scrape", async {
                tokio::time::sleep(self.delay).await;
                Ok(())
            })
            .await?;
        }
        let mut batches = self.batches.lock().unwrap();
        if batches.len() > 1 {
            Ok(batches.remove(0))
        } else if let Some(batch) = batches.first() {
            Ok(batch.clone())
        } else {
            Ok(self.last.lock().unwrap().clone())
        }
    }
}

pub fn item(url: &str) -> ScrapedItem {
    ScrapedItem {
        id: url.to_string(),
        title: format!("item {url}"),
        description: "stub item".to_string(),
        url: url.to_string(),
        source: "stub".to_string(),
        ..Default::default()
    }
}

/// Local webhook endpoint that records every payload it receives.
pub struct WebhookCapture {
    pub url: String,
    received: Arc<std::sync::Mutex<Vec<serde_json::Value>>>,
}

impl WebhookCapture {
    pub async fn spawn() -> Self {
        let received: Arc<std::sync::Mutex<Vec<serde_json::Value>>> = Arc::default();
        let state = received.clone();

        async fn capture(
            State(state): State<Arc<std::sync::Mutex<Vec<serde_json::Value>>>>,
            Json(body): Json<serde_json::Value>,
        ) -> StatusCode {
            state.lock().unwrap().push(body);
            StatusCode::NO_CONTENT
        }

        let app = Router::new()
            .route("/hook", post(capture))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://{addr}/hook"),
            received,
        }
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.received.lock().unwrap().clone()
    }
}

/// Completion endpoint that always answers HTTP 500, for provider-failure
/// scenarios.
pub async fn spawn_failing_ai_server() -> String {
    async fn fail() -> (StatusCode, &'static str) {
        (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded")
    }

    let app = Router::new().route("/chat/completions", post(fail));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

pub struct TestEnv {
    pub tasks: TaskRepository,
    pub executions: ExecutionRepository,
    pub cache: CacheRepository,
    pub runner: Arc<PipelineRunner>,
    pub scheduler: Scheduler,
    pub webhook: WebhookCapture,
}

impl TestEnv {
    pub async fn with_source(source: Arc<dyn Source>) -> Self {
        Self::build(source, None).await
    }

    pub async fn with_source_and_ai(source: Arc<dyn Source>, ai_base_url: String) -> Self {
        Self::build(source, Some(ai_base_url)).await
    }

    async fn build(source: Arc<dyn Source>, ai_base_url: Option<String>) -> Self {
        let db = Database::open_in_memory().await.unwrap();
        let tasks = TaskRepository::new(db.clone());
        let executions = ExecutionRepository::new(db.clone());
        let cache = CacheRepository::new(db.clone());
        let discord_store = DiscordRepository::new(db);

        let mut sources = SourceRegistry::new();
        sources.register(source);

        let mut providers = ProviderRegistry::new("stub");
        if let Some(base_url) = ai_base_url {
            providers.register(HttpProvider::new(ProviderDef {
                id: "stub".to_string(),
                api_format: ApiFormat::OpenAi,
                base_url,
                model: "test".to_string(),
                api_key: "test-key".to_string(),
            }));
        }

        let scraper_cfg = ScraperConfig {
            user_agent: "conveyor-tests".to_string(),
            request_timeout: Duration::from_secs(5),
        };
        let discord_cfg = DiscordConfig {
            default_webhook: String::new(),
            rate_limit: Duration::from_millis(1),
        };

        let runner = Arc::new(PipelineRunner::new(
            tasks.clone(),
            executions.clone(),
            discord_store,
            ScraperExecutor::new(Arc::new(sources), cache.clone()),
            RssExecutor::new(cache.clone(), &scraper_cfg),
            AiExecutor::new(Arc::new(providers)),
            DiscordExecutor::new(&discord_cfg),
            FilterExecutor::new(cache.clone()),
        ));
        let scheduler = Scheduler::new(tasks.clone(), runner.clone()).await.unwrap();
        let webhook = WebhookCapture::spawn().await;

        Self {
            tasks,
            executions,
            cache,
            runner,
            scheduler,
            webhook,
        }
    }

    pub async fn create_task(&self, schedule: &str, pipeline: Vec<PipelineStep>) -> Task {
        self.tasks
            .create(
                &CreateTaskRequest {
                    name: "test task".to_string(),
                    description: String::new(),
                    schedule: schedule.to_string(),
                    pipeline,
                    status: Some(TaskStatus::Enabled),
                },
                "tests",
            )
            .await
            .unwrap()
    }
}

pub fn step(kind: &str, config: serde_json::Value) -> PipelineStep {
    let config = match config {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    PipelineStep {
        kind: kind.to_string(),
        name: None,
        config,
    }
}
