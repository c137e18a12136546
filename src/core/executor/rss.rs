use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{
    StepConfig, StepContext, StepExecutor, StepKind, parse_config, retain_unseen, strip_html,
    with_cancel,
};
use crate::config::ScraperConfig;
use crate::core::model::{FeedItem, StepData, StepOutput};
use crate::core::storage::{CacheRepository, fingerprint};

#[derive(Debug, Deserialize)]
struct RssStepConfig {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    task_id: Option<String>,
}

fn default_limit() -> usize {
    20
}

impl RssStepConfig {
    fn all_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        if let Some(url) = &self.url {
            urls.push(url.clone());
        }
        urls.extend(self.urls.iter().cloned());
        urls
    }
}

/// Feed ingestion step: fetches each configured feed, filters by keywords,
/// drops items already delivered for this task, and truncates the aggregate.
pub struct RssExecutor {
    client: reqwest::Client,
    cache: CacheRepository,
}

impl RssExecutor {
    pub fn new(cache: CacheRepository, cfg: &ScraperConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, cache }
    }

    async fn fetch_feed(
        &self,
        url: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<FeedItem>> {
        let body = with_cancel(cancel, "feed request", async {
            let response = self
                .client
                .get(url)
                .header(
                    reqwest::header::ACCEPT,
                    "application/rss+xml, application/atom+xml, application/xml, text/xml",
                )
                .send()
                .await?;
            if !response.status().is_success() {
                bail!("HTTP {}", response.status());
            }
            Ok(response.bytes().await?.to_vec())
        })
        .await?;

        let feed = feed_rs::parser::parse(&body[..])
            .context("could not parse feed as RSS or Atom")?;
        let source = feed.title.map(|t| t.content).unwrap_or_default();

        let items = feed
            .entries
            .into_iter()
            .take(limit)
            .map(|entry| {
                let description = entry
                    .summary
                    .map(|t| t.content)
                    .or_else(|| entry.content.and_then(|c| c.body))
                    .unwrap_or_default();
                FeedItem {
                    id: entry.id,
                    title: entry.title.map(|t| t.content).unwrap_or_default(),
                    description: strip_html(&description),
                    link: entry
                        .links
                        .first()
                        .map(|l| l.href.clone())
                        .unwrap_or_default(),
                    source: source.clone(),
                    pub_date: entry
                        .published
                        .or(entry.updated)
                        .map(|d| d.to_rfc3339())
                        .unwrap_or_default(),
                    categories: entry.categories.into_iter().map(|c| c.term).collect(),
                    author: entry
                        .authors
                        .first()
                        .map(|a| a.name.clone())
                        .unwrap_or_default(),
                }
            })
            .collect();

        Ok(items)
    }
}

#[async_trait]
impl StepExecutor for RssExecutor {
    fn kind(&self) -> StepKind {
        StepKind::Rss
    }

    fn validate(&self, config: &StepConfig) -> Result<()> {
        let cfg: RssStepConfig = parse_config(config)?;
        if cfg.all_urls().is_empty() {
            bail!("rss requires 'url' or 'urls' in config");
        }
        Ok(())
    }

    async fn execute(
        &self,
        _input: Option<&StepOutput>,
        config: &StepConfig,
        ctx: &StepContext,
    ) -> Result<StepOutput> {
        let cfg: RssStepConfig = parse_config(config)?;
        let urls = cfg.all_urls();

        let mut items: Vec<FeedItem> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        for url in &urls {
            let fetched = match self.fetch_feed(url, cfg.limit, &ctx.cancel).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    errors.push(format!("{url}: {e:#}"));
                    continue;
                }
            };

            let fetched = if cfg.keywords.is_empty() {
                fetched
            } else {
                filter_by_keywords(fetched, &cfg.keywords)
            };

            let fetched = match &cfg.task_id {
                Some(task_id) => {
                    retain_unseen(&self.cache, fetched, "rss", task_id, ctx, |item| {
                        fingerprint(&item.link, &item.id, &item.source)
                    })
                    .await
                }
                None => fetched,
            };
            items.extend(fetched);
        }

        items.truncate(cfg.limit);

        let mut metadata = serde_json::Map::new();
        metadata.insert("feeds".into(), serde_json::json!(urls));
        metadata.insert("total_items".into(), serde_json::json!(items.len()));
        if !errors.is_empty() {
            metadata.insert("errors".into(), serde_json::json!(errors));
        }

        let count = items.len();
        Ok(StepOutput::with_metadata(
            StepData::Feed(items),
            count,
            metadata,
        ))
    }
}

// Case-insensitive OR over keywords, matched against title + description.
fn filter_by_keywords(items: Vec<FeedItem>, keywords: &[String]) -> Vec<FeedItem> {
    let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    items
        .into_iter()
        .filter(|item| {
            let text = format!("{} {}", item.title, item.description).to_lowercase();
            keywords.iter().any(|k| text.contains(k))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_item(title: &str, description: &str) -> FeedItem {
        FeedItem {
            id: title.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            source: "test feed".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn keyword_filter_is_any_of_and_case_insensitive() {
        let items = vec![
            feed_item("Rust 1.80 released", ""),
            feed_item("Python news", "nothing else"),
            feed_item("Misc", "a post about ASYNC runtimes"),
        ];
        let kept = filter_by_keywords(items, &["rust".to_string(), "async".to_string()]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].title, "Rust 1.80 released");
        assert_eq!(kept[1].title, "Misc");
    }

    #[test]
    fn feed_dialects_both_parse() {
        let rss = br#"<?xml version="1.0"?>
            <rss version="2.0"><channel><title>T</title>
            <item><title>one</title><link>https://a</link><description>d</description></item>
            </channel></rss>"#;
        let feed = feed_rs::parser::parse(&rss[..]).unwrap();
        assert_eq!(feed.entries.len(), 1);

        let atom = br#"<?xml version="1.0"?>
            <feed xmlns="http://www.w3.org/2005/Atom"><title>T</title>
            <entry><id>e1</id><title>one</title><updated>2024-01-01T00:00:00Z</updated></entry>
            </feed>"#;
        let feed = feed_rs::parser::parse(&atom[..]).unwrap();
        assert_eq!(feed.entries.len(), 1);
    }
}
