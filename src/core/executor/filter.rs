use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};

use super::{StepConfig, StepContext, StepExecutor, StepKind, parse_config, retain_unseen};
use crate::core::model::{StepData, StepOutput};
use crate::core::storage::{CacheRepository, fingerprint};

#[derive(Debug, Default, Deserialize)]
struct FilterStepConfig {
    #[serde(default, deserialize_with = "string_or_seq")]
    include_keywords: Vec<String>,
    #[serde(default, deserialize_with = "string_or_seq")]
    exclude_keywords: Vec<String>,
    #[serde(default)]
    deduplicate: bool,
    #[serde(default)]
    limit: usize,
    #[serde(default)]
    task_id: Option<String>,
}

// Accepts either a single string or an array of strings.
fn string_or_seq<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) if s.is_empty() => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// Keyword filtering and optional cache-backed deduplication. Exclusions are
/// checked before inclusions; non-item payloads pass through unchanged.
pub struct FilterExecutor {
    cache: CacheRepository,
}

impl FilterExecutor {
    pub fn new(cache: CacheRepository) -> Self {
        Self { cache }
    }
}

fn keep(text: &str, include: &[String], exclude: &[String]) -> bool {
    let text = text.to_lowercase();
    if exclude.iter().any(|k| text.contains(&k.to_lowercase())) {
        return false;
    }
    if !include.is_empty() && !include.iter().any(|k| text.contains(&k.to_lowercase())) {
        return false;
    }
    true
}

#[async_trait]
impl StepExecutor for FilterExecutor {
    fn kind(&self) -> StepKind {
        StepKind::Filter
    }

    fn validate(&self, config: &StepConfig) -> Result<()> {
        // Every key is optional; parsing alone catches malformed shapes.
        parse_config::<FilterStepConfig>(config).map(|_| ())
    }

    async fn execute(
        &self,
        input: Option<&StepOutput>,
        config: &StepConfig,
        ctx: &StepContext,
    ) -> Result<StepOutput> {
        let cfg: FilterStepConfig = parse_config(config)?;
        let Some(input) = input else {
            return Ok(StepOutput::new(StepData::Value(serde_json::Value::Null), 0));
        };

        match &input.data {
            StepData::Scraped(items) => {
                let mut items: Vec<_> = items
                    .iter()
                    .filter(|item| {
                        let text = format!(
                            "{} {} {}",
                            item.title,
                            item.description,
                            item.tags.join(" ")
                        );
                        keep(&text, &cfg.include_keywords, &cfg.exclude_keywords)
                    })
                    .cloned()
                    .collect();
                if cfg.deduplicate && let Some(task_id) = &cfg.task_id {
                    items = retain_unseen(&self.cache, items, "filter", task_id, ctx, |item| {
                        fingerprint(&item.url, &item.id, &item.source)
                    })
                    .await;
                }
                if cfg.limit > 0 {
                    items.truncate(cfg.limit);
                }
                let count = items.len();
                Ok(StepOutput::with_metadata(
                    StepData::Scraped(items),
                    count,
                    input.metadata.clone(),
                ))
            }
            StepData::Feed(items) => {
                let mut items: Vec<_> = items
                    .iter()
                    .filter(|item| {
                        let text = format!("{} {}", item.title, item.description);
                        keep(&text, &cfg.include_keywords, &cfg.exclude_keywords)
                    })
                    .cloned()
                    .collect();
                if cfg.deduplicate && let Some(task_id) = &cfg.task_id {
                    items = retain_unseen(&self.cache, items, "filter", task_id, ctx, |item| {
                        fingerprint(&item.link, &item.id, &item.source)
                    })
                    .await;
                }
                if cfg.limit > 0 {
                    items.truncate(cfg.limit);
                }
                let count = items.len();
                Ok(StepOutput::with_metadata(
                    StepData::Feed(items),
                    count,
                    input.metadata.clone(),
                ))
            }
            // Text and arbitrary values pass through untouched.
            _ => Ok(input.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ScrapedItem;
    use crate::core::storage::Database;

    fn item(title: &str, tags: &[&str]) -> ScrapedItem {
        ScrapedItem {
            id: title.to_string(),
            title: title.to_string(),
            url: format!("https://example.com/{title}"),
            source: "stub".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    fn config(json: serde_json::Value) -> StepConfig {
        match json {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    async fn executor() -> FilterExecutor {
        FilterExecutor::new(CacheRepository::new(Database::open_in_memory().await.unwrap()))
    }

    fn run_ctx() -> StepContext {
        StepContext::new(tokio_util::sync::CancellationToken::new())
    }

    #[tokio::test]
    async fn exclude_takes_precedence_over_include() {
        let executor = executor().await;
        let input = StepOutput::new(
            StepData::Scraped(vec![
                item("rust backend role", &[]),
                item("rust crypto role", &[]),
            ]),
            2,
        );
        let cfg = config(serde_json::json!({
            "include_keywords": ["rust"],
            "exclude_keywords": ["crypto"]
        }));

        let out = executor
            .execute(Some(&input), &cfg, &run_ctx())
            .await
            .unwrap();
        assert_eq!(out.item_count, 1);
        match out.data {
            StepData::Scraped(items) => assert_eq!(items[0].title, "rust backend role"),
            _ => panic!("expected scraped items"),
        }
    }

    #[tokio::test]
    async fn tags_count_toward_keyword_matches() {
        let executor = executor().await;
        let input = StepOutput::new(
            StepData::Scraped(vec![item("generic title", &["Golang"]), item("other", &[])]),
            2,
        );
        let cfg = config(serde_json::json!({"include_keywords": ["golang"]}));

        let out = executor
            .execute(Some(&input), &cfg, &run_ctx())
            .await
            .unwrap();
        assert_eq!(out.item_count, 1);
    }

    #[tokio::test]
    async fn single_string_keyword_is_accepted() {
        let executor = executor().await;
        let input = StepOutput::new(StepData::Scraped(vec![item("rust job", &[])]), 1);
        let cfg = config(serde_json::json!({"include_keywords": "rust"}));

        let out = executor
            .execute(Some(&input), &cfg, &run_ctx())
            .await
            .unwrap();
        assert_eq!(out.item_count, 1);
    }

    #[tokio::test]
    async fn limit_truncates_after_filtering() {
        let executor = executor().await;
        let input = StepOutput::new(
            StepData::Scraped(vec![item("a", &[]), item("b", &[]), item("c", &[])]),
            3,
        );
        let cfg = config(serde_json::json!({"limit": 2}));

        let out = executor
            .execute(Some(&input), &cfg, &run_ctx())
            .await
            .unwrap();
        assert_eq!(out.item_count, 2);
    }

    #[tokio::test]
    async fn dedup_pass_drops_previously_seen_items() {
        let executor = executor().await;
        let cfg = config(serde_json::json!({
            "deduplicate": true,
            "task_id": "task-1"
        }));
        let input = StepOutput::new(StepData::Scraped(vec![item("a", &[]), item("b", &[])]), 2);

        let first = executor
            .execute(Some(&input), &cfg, &run_ctx())
            .await
            .unwrap();
        assert_eq!(first.item_count, 2);

        let second = executor
            .execute(Some(&input), &cfg, &run_ctx())
            .await
            .unwrap();
        assert_eq!(second.item_count, 0);
        assert!(second.data.is_empty());
    }

    #[tokio::test]
    async fn dedup_keeps_items_recorded_earlier_in_the_same_run() {
        // An ingestion step records fingerprints before the filter runs; a
        // deduplicating filter in the same run must still pass those items on.
        let executor = executor().await;
        let cfg = config(serde_json::json!({
            "deduplicate": true,
            "task_id": "task-1"
        }));
        let input = StepOutput::new(StepData::Scraped(vec![item("a", &[]), item("b", &[])]), 2);

        let ctx = run_ctx();
        let first = executor.execute(Some(&input), &cfg, &ctx).await.unwrap();
        assert_eq!(first.item_count, 2);

        let again = executor.execute(Some(&input), &cfg, &ctx).await.unwrap();
        assert_eq!(again.item_count, 2);
    }

    #[tokio::test]
    async fn unknown_payloads_pass_through() {
        let executor = executor().await;
        let input = StepOutput::new(StepData::Text("a summary".to_string()), 1);
        let out = executor
            .execute(Some(&input), &config(serde_json::json!({})), &run_ctx())
            .await
            .unwrap();
        match out.data {
            StepData::Text(s) => assert_eq!(s, "a summary"),
            _ => panic!("expected passthrough"),
        }
    }
}
