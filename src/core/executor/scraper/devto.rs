use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::{HttpClient, Source};
use crate::core::model::ScrapedItem;

#[derive(Debug, Default, Deserialize)]
struct DevToArticle {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    tag_list: Vec<String>,
    #[serde(default)]
    published_at: String,
    #[serde(default)]
    user: DevToUser,
}

#[derive(Debug, Default, Deserialize)]
struct DevToUser {
    #[serde(default)]
    name: String,
}

/// Developer articles from the dev.to public API.
pub struct DevToSource {
    client: HttpClient,
}

impl DevToSource {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    fn url_for(query: &str, limit: usize) -> String {
        // A single-token query maps onto the API's tag filter; anything else
        // is filtered client-side.
        let tag = query.trim();
        if !tag.is_empty() && !tag.contains(' ') {
            format!(
                "https://dev.to/api/articles?per_page={limit}&tag={}",
                tag.to_lowercase()
            )
        } else {
            format!("https://dev.to/api/articles?per_page={limit}")
        }
    }
}

#[async_trait]
impl Source for DevToSource {
    fn name(&self) -> &str {
        "devto"
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
        let articles: Vec<DevToArticle> = self
            .client
            .get_json(&Self::url_for(query, limit), cancel)
            .await
            .context("failed to fetch dev.to articles")?;

        let query_lower = query.to_lowercase();
        let multi_word = query.trim().contains(' ');

        let items = articles
            .into_iter()
            .filter(|a| {
                if !multi_word || query_lower.is_empty() {
                    return true;
                }
                a.title.to_lowercase().contains(&query_lower)
                    || a.description.to_lowercase().contains(&query_lower)
            })
            .take(limit)
            .map(|a| ScrapedItem {
                id: a.id.to_string(),
                title: a.title,
                description: a.description,
                url: a.url,
                source: "DevTo".to_string(),
                category: "news".to_string(),
                tags: a.tag_list,
                company: a.user.name,
                posted_at: a.published_at,
                ..Default::default()
            })
            .collect();

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_token_query_becomes_a_tag() {
        assert_eq!(
            DevToSource::url_for("Rust", 5),
            "https://dev.to/api/articles?per_page=5&tag=rust"
        );
        assert_eq!(
            DevToSource::url_for("rust async", 5),
            "https://dev.to/api/articles?per_page=5"
        );
        assert_eq!(
            DevToSource::url_for("", 10),
            "https://dev.to/api/articles?per_page=10"
        );
    }
}
