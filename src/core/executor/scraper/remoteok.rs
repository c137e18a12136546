use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{HttpClient, Source};
use crate::core::executor::{strip_html, truncate_chars};
use crate::core::model::ScrapedItem;

const API_URL: &str = "https://remoteok.com/api";

// The API mixes a leading legal-notice object into the job array, so every
// field defaults and empty positions are dropped.
#[derive(Debug, Default, Deserialize)]
struct RemoteOkEntry {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    position: String,
    #[serde(default)]
    company: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    location: String,
    #[serde(default)]
    salary_min: u64,
    #[serde(default)]
    salary_max: u64,
    #[serde(default)]
    date: String,
}

fn id_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Remote job listings from the RemoteOK JSON API.
pub struct RemoteOkSource {
    client: HttpClient,
}

impl RemoteOkSource {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Source for RemoteOkSource {
    fn name(&self) -> &str {
        "remoteok"
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
        let raw: Vec<serde_json::Value> = self
            .client
            .get_json(API_URL, cancel)
            .await
            .context("failed to fetch RemoteOK listings")?;

        let query_lower = query.to_lowercase();
        let mut items = Vec::new();

        for value in raw {
            // Entries with unexpected shapes are skipped rather than failing
            // the whole batch.
            let Ok(entry) = serde_json::from_value::<RemoteOkEntry>(value) else {
                continue;
            };
            if entry.position.is_empty() {
                continue;
            }
            if limit > 0 && items.len() >= limit {
                break;
            }
            if !query_lower.is_empty() {
                let haystack = format!(
                    "{} {} {}",
                    entry.position,
                    entry.description,
                    entry.tags.join(" ")
                )
                .to_lowercase();
                if !haystack.contains(&query_lower) {
                    continue;
                }
            }

            let salary = if entry.salary_min > 0 {
                format!("${} - ${}", entry.salary_min, entry.salary_max)
            } else {
                String::new()
            };

            items.push(ScrapedItem {
                id: id_string(&entry.id),
                title: entry.position,
                description: truncate_chars(&strip_html(&entry.description), 500),
                url: entry.url,
                source: "RemoteOK".to_string(),
                category: "jobs".to_string(),
                tags: entry.tags,
                salary,
                company: entry.company,
                location: entry.location,
                posted_at: entry.date,
                ..Default::default()
            });
        }

        Ok(items)
    }
}
