use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{HttpClient, Source};
use crate::core::executor::{strip_html, truncate_chars};
use crate::core::model::ScrapedItem;

const TOP_STORIES_URL: &str = "https://hacker-news.firebaseio.com/v0/topstories.json";
const JOB_STORIES_URL: &str = "https://hacker-news.firebaseio.com/v0/jobstories.json";

#[derive(Debug, Default, Deserialize)]
struct HnItem {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    descendants: u32,
    #[serde(default)]
    kids: Vec<u64>,
}

async fn fetch_item(client: &HttpClient, id: u64, cancel: &CancellationToken) -> Result<HnItem> {
    client
        .get_json(
            &format!("https://hacker-news.firebaseio.com/v0/item/{id}.json"),
            cancel,
        )
        .await
}

fn matches_query(query: &str, haystacks: &[&str]) -> bool {
    if query.is_empty() {
        return true;
    }
    let query = query.to_lowercase();
    haystacks.iter().any(|h| h.to_lowercase().contains(&query))
}

/// Front-page tech news from the Hacker News Firebase API.
pub struct HackerNewsSource {
    client: HttpClient,
}

impl HackerNewsSource {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Source for HackerNewsSource {
    fn name(&self) -> &str {
        "hackernews"
    }

    fn category(&self) -> &str {
        "news"
    }

    async fn scrape(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScrapedItem>> {
        let limit = if limit == 0 { 20 } else { limit };
        let mut story_ids: Vec<u64> = self
            .client
            .get_json(TOP_STORIES_URL, cancel)
            .await
            .context("failed to fetch HN top stories")?;
        // Over-fetch so a query filter can still fill the limit.
        story_ids.truncate(limit * 2);

        let mut items = Vec::new();
        for id in story_ids {
            if items.len() >= limit {
                break;
            }
            let Ok(item) = fetch_item(&self.client, id, cancel).await else {
                continue;
            };
            if !matches_query(query, &[item.title.as_str()]) {
                continue;
            }

            let url = if item.url.is_empty() {
                format!("https://news.ycombinator.com/item?id={}", item.id)
            } else {
                item.url.clone()
            };

            let mut extra = serde_json::Map::new();
            extra.insert("points".into(), serde_json::json!(item.descendants));
            extra.insert("comments".into(), serde_json::json!(item.kids.len()));

            items.push(ScrapedItem {
                id: item.id.to_string(),
                title: item.title,
                description: format!(
                    "{} points, {} comments",
                    item.descendants,
                    item.kids.len()
                ),
                url,
                source: "HackerNews".to_string(),
                category: "news".to_string(),
                extra,
                ..Default::default()
            });
        }

        Ok(items)
    }
}

/// Job postings from HN job stories.
pub struct HackerNewsJobsSource {
    client: HttpClient,
}

impl HackerNewsJobsSource {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Source for HackerNewsJobsSource {
    fn name(&self) -> &str {
        "hackernews_jobs"
    }

    fn category(&self) -> &str {
        "jobs"
    }

    async fn scrape(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScrapedItem>> {
        let mut job_ids: Vec<u64> = self
            .client
            .get_json(JOB_STORIES_URL, cancel)
            .await
            .context("failed to fetch HN job stories")?;
        if limit > 0 {
            job_ids.truncate(limit);
        }

        let mut items = Vec::new();
        for id in job_ids {
            let Ok(item) = fetch_item(&self.client, id, cancel).await else {
                continue;
            };
            if !matches_query(query, &[item.title.as_str(), item.text.as_str()]) {
                continue;
            }

            items.push(ScrapedItem {
                id: item.id.to_string(),
                title: item.title.clone(),
                description: truncate_chars(&strip_html(&item.text), 500),
                url: item.url,
                source: "HackerNews Jobs".to_string(),
                category: "jobs".to_string(),
                company: company_from_title(&item.title),
                ..Default::default()
            });
        }

        Ok(items)
    }
}

// "Company (YC W24) is hiring..." → "Company"
fn company_from_title(title: &str) -> String {
    title
        .split(['(', '|'])
        .next()
        .map(|s| {
            s.split(" is hiring")
                .next()
                .unwrap_or(s)
                .trim()
                .to_string()
        })
        .unwrap_or_default()
}
