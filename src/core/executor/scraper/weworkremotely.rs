use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{HttpClient, Source};
use crate::core::executor::strip_html;
use crate::core::model::ScrapedItem;

const FEED_URL: &str = "https://weworkremotely.com/remote-jobs.rss";

/// Remote job listings from the We Work Remotely feed. Titles come as
/// "Company: Position".
pub struct WeWorkRemotelySource {
    client: HttpClient,
}

impl WeWorkRemotelySource {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Source for WeWorkRemotelySource {
    fn name(&self) -> &str {
        "weworkremotely"
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
        let body = self
            .client
            .get_bytes(FEED_URL, "application/rss+xml, application/xml", cancel)
            .await
            .context("failed to fetch We Work Remotely feed")?;
        let feed = feed_rs::parser::parse(&body[..])
            .context("failed to parse We Work Remotely feed")?;

        let query_lower = query.to_lowercase();
        let mut items = Vec::new();

        for entry in feed.entries {
            if limit > 0 && items.len() >= limit {
                break;
            }

            let raw_title = entry.title.map(|t| t.content).unwrap_or_default();
            let (company, title) = split_title(&raw_title);
            let description = entry
                .summary
                .map(|t| strip_html(&t.content))
                .unwrap_or_default();

            if !query_lower.is_empty() {
                let haystack = format!("{raw_title} {description}").to_lowercase();
                if !haystack.contains(&query_lower) {
                    continue;
                }
            }

            items.push(ScrapedItem {
                id: entry.id,
                title,
                description,
                url: entry
                    .links
                    .first()
                    .map(|l| l.href.clone())
                    .unwrap_or_default(),
                source: "WeWorkRemotely".to_string(),
                category: "jobs".to_string(),
                company,
                posted_at: entry
                    .published
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_default(),
                ..Default::default()
            });
        }

        Ok(items)
    }
}

fn split_title(raw: &str) -> (String, String) {
    match raw.split_once(':') {
        Some((company, position)) => (company.trim().to_string(), position.trim().to_string()),
        None => (String::new(), raw.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_splits_into_company_and_position() {
        assert_eq!(
            split_title("Acme Corp: Senior Rust Engineer"),
            ("Acme Corp".to_string(), "Senior Rust Engineer".to_string())
        );
        assert_eq!(
            split_title("Just a title"),
            (String::new(), "Just a title".to_string())
        );
    }
}
