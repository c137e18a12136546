mod client;
mod devto;
mod hackernews;
mod remoteok;
mod weworkremotely;

pub use client::HttpClient;
pub use devto::DevToSource;
pub use hackernews::{HackerNewsJobsSource, HackerNewsSource};
pub use remoteok::RemoteOkSource;
pub use weworkremotely::WeWorkRemotelySource;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{StepConfig, StepContext, StepExecutor, StepKind, parse_config, retain_unseen};
use crate::config::ScraperConfig;
use crate::core::model::{ScrapedItem, StepData, StepOutput};
use crate::core::storage::{CacheRepository, fingerprint};

/// A web source that can be scraped for items.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    /// "jobs", "freelance", or "news".
    fn category(&self) -> &str;

    async fn scrape(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScrapedItem>>;
}

/// Name → adapter mapping for all scrapeable sources.
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_sources(cfg: &ScraperConfig) -> Self {
        let client = HttpClient::new(cfg);
        let mut registry = Self::new();
        registry.register(Arc::new(HackerNewsSource::new(client.clone())));
        registry.register(Arc::new(HackerNewsJobsSource::new(client.clone())));
        registry.register(Arc::new(RemoteOkSource::new(client.clone())));
        registry.register(Arc::new(DevToSource::new(client.clone())));
        registry.register(Arc::new(WeWorkRemotelySource::new(client)));
        registry
    }

    pub fn register(&mut self, source: Arc<dyn Source>) {
        self.sources.insert(source.name().to_string(), source);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.sources.get(name).cloned()
    }

    pub fn by_category(&self, category: &str) -> Vec<Arc<dyn Source>> {
        self.sources
            .values()
            .filter(|s| s.category() == category)
            .cloned()
            .collect()
    }

    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Deserialize)]
struct ScraperStepConfig {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    task_id: Option<String>,
}

fn default_limit() -> usize {
    10
}

impl ScraperStepConfig {
    fn query(&self) -> String {
        match &self.query {
            Some(q) if !q.is_empty() => q.clone(),
            _ => self.keywords.join(" "),
        }
    }
}

/// Pipeline ingestion step backed by the source registry.
pub struct ScraperExecutor {
    registry: Arc<SourceRegistry>,
    cache: CacheRepository,
}

impl ScraperExecutor {
    pub fn new(registry: Arc<SourceRegistry>, cache: CacheRepository) -> Self {
        Self { registry, cache }
    }

    fn resolve_sources(&self, cfg: &ScraperStepConfig) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(source) = &cfg.source {
            names.push(source.clone());
        }
        names.extend(cfg.sources.iter().cloned());
        if let Some(category) = &cfg.category {
            for source in self.registry.by_category(category) {
                names.push(source.name().to_string());
            }
        }
        names
    }
}

#[async_trait]
impl StepExecutor for ScraperExecutor {
    fn kind(&self) -> StepKind {
        StepKind::Scraper
    }

    fn validate(&self, config: &StepConfig) -> Result<()> {
        let cfg: ScraperStepConfig = parse_config(config)?;
        if cfg.source.is_none() && cfg.sources.is_empty() && cfg.category.is_none() {
            bail!("scraper requires 'source', 'sources' or 'category' in config");
        }
        Ok(())
    }

    async fn execute(
        &self,
        _input: Option<&StepOutput>,
        config: &StepConfig,
        ctx: &StepContext,
    ) -> Result<StepOutput> {
        let cfg: ScraperStepConfig = parse_config(config)?;
        let query = cfg.query();
        let names = self.resolve_sources(&cfg);

        let mut items: Vec<ScrapedItem> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        for name in &names {
            let Some(source) = self.registry.get(name) else {
                errors.push(format!("{name}: source not found"));
                continue;
            };
            let scraped = match source.scrape(&query, cfg.limit, &ctx.cancel).await {
                Ok(scraped) => scraped,
                Err(e) => {
                    errors.push(format!("{name}: {e:#}"));
                    continue;
                }
            };

            let scraped = match &cfg.task_id {
                Some(task_id) => {
                    retain_unseen(&self.cache, scraped, "scraper", task_id, ctx, |item| {
                        fingerprint(&item.url, &item.id, &item.source)
                    })
                    .await
                }
                None => scraped,
            };
            items.extend(scraped);
        }

        if items.is_empty() && !errors.is_empty() && errors.len() == names.len() {
            bail!("all sources failed: {}", errors.join("; "));
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("sources".into(), serde_json::json!(names));
        metadata.insert("query".into(), serde_json::json!(query));
        metadata.insert("total_items".into(), serde_json::json!(items.len()));
        if !errors.is_empty() {
            metadata.insert("errors".into(), serde_json::json!(errors));
        }

        let count = items.len();
        Ok(StepOutput::with_metadata(
            StepData::Scraped(items),
            count,
            metadata,
        ))
    }
}
