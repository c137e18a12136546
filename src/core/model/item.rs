use serde::{Deserialize, Serialize};

/// A scraped job or content item from a web source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapedItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub salary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub company: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub posted_at: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// An entry from an RSS or Atom feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: String,
    pub source: String,
    #[serde(default)]
    pub pub_date: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
}

/// Payload carried between pipeline steps. The set of shapes is closed;
/// executors match on the variant they understand and pass others through.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StepData {
    Scraped(Vec<ScrapedItem>),
    Feed(Vec<FeedItem>),
    Text(String),
    Value(serde_json::Value),
}

impl StepData {
    /// Emptiness drives the pipeline's early exit: an empty item list, an
    /// empty string, or JSON null. Any other JSON value is never considered
    /// empty, so unknown shapes never short-circuit the pipeline.
    pub fn is_empty(&self) -> bool {
        match self {
            StepData::Scraped(items) => items.is_empty(),
            StepData::Feed(items) => items.is_empty(),
            StepData::Text(s) => s.is_empty(),
            StepData::Value(v) => v.is_null(),
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// In-memory result of one executor invocation.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub data: StepData,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub item_count: usize,
}

impl StepOutput {
    pub fn new(data: StepData, item_count: usize) -> Self {
        Self {
            data,
            metadata: serde_json::Map::new(),
            item_count,
        }
    }

    pub fn with_metadata(
        data: StepData,
        item_count: usize,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            data,
            metadata,
            item_count,
        }
    }
}
