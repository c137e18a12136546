pub mod ai;
pub mod discord;
pub mod filter;
pub mod rss;
pub mod scraper;

use std::collections::HashSet;
use std::fmt;
use std::future::Future;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::model::StepOutput;
use crate::core::storage::CacheRepository;

/// Untyped step config as it appears on the wire. Executors parse this into
/// their own typed config; unrecognized keys are ignored.
pub type StepConfig = serde_json::Map<String, serde_json::Value>;

/// The closed set of pipeline step types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Scraper,
    Rss,
    Filter,
    AiProcessor,
    Discord,
}

impl StepKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scraper" => Some(StepKind::Scraper),
            "rss" => Some(StepKind::Rss),
            "filter" => Some(StepKind::Filter),
            "ai_processor" | "ai" => Some(StepKind::AiProcessor),
            "discord" => Some(StepKind::Discord),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Scraper => "scraper",
            StepKind::Rss => "rss",
            StepKind::Filter => "filter",
            StepKind::AiProcessor => "ai_processor",
            StepKind::Discord => "discord",
        }
    }
}

/// Per-execution context shared by every step of one run: the firing's
/// cancellation token plus the fingerprints first recorded during this run.
/// A fingerprint inserted by an ingestion step must not be treated as
/// "previously delivered" by a dedup pass later in the same run, or the
/// items it guards would never reach the sink at all.
pub struct StepContext {
    pub cancel: CancellationToken,
    fresh: std::sync::Mutex<HashSet<String>>,
}

impl StepContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            fresh: std::sync::Mutex::new(HashSet::new()),
        }
    }

    fn mark_fresh(&self, hash: &str) {
        if let Ok(mut fresh) = self.fresh.lock() {
            fresh.insert(hash.to_string());
        }
    }

    fn is_fresh(&self, hash: &str) -> bool {
        self.fresh.lock().map(|f| f.contains(hash)).unwrap_or(false)
    }
}

/// Uniform executor contract: input → config → output, with validation
/// separated so it can run at CRUD time without side effects.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn kind(&self) -> StepKind;

    fn validate(&self, config: &StepConfig) -> Result<()>;

    async fn execute(
        &self,
        input: Option<&StepOutput>,
        config: &StepConfig,
        ctx: &StepContext,
    ) -> Result<StepOutput>;
}

/// Distinguished signal meaning "the pipeline is finished successfully with
/// nothing to deliver". The runner recognizes it by downcast and records the
/// step as skipped and the execution as completed.
#[derive(Debug)]
pub struct SkipPipeline {
    pub reason: String,
}

impl SkipPipeline {
    pub fn error(reason: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(SkipPipeline {
            reason: reason.into(),
        })
    }
}

impl fmt::Display for SkipPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline skipped: {}", self.reason)
    }
}

impl std::error::Error for SkipPipeline {}

/// Races a fallible future against the ambient cancellation token, so every
/// outbound call unwinds promptly when the scheduler stops or a firing times
/// out.
pub async fn with_cancel<T, F>(cancel: &CancellationToken, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(anyhow!("{what} cancelled")),
        res = fut => res,
    }
}

pub(crate) fn parse_config<T: DeserializeOwned>(config: &StepConfig) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(config.clone()))
        .map_err(|e| anyhow!("invalid step config: {e}"))
}

/// Drops items whose fingerprint was cached by an earlier run and records
/// the survivors in one batch before returning them. Fingerprints first
/// recorded during this run stay in (see [`StepContext`]); a cache read
/// failure lets the item through; a write failure is logged but never fails
/// the step. Once a fingerprint lands in the cache it is never reconsidered
/// by later runs, even if a later step of this one fails.
pub(crate) async fn retain_unseen<T, F>(
    cache: &CacheRepository,
    items: Vec<T>,
    tag: &str,
    task_id: &str,
    ctx: &StepContext,
    fingerprint_of: F,
) -> Vec<T>
where
    F: Fn(&T) -> String,
{
    let mut kept = Vec::new();
    let mut hashes = Vec::new();

    for item in items {
        let hash = fingerprint_of(&item);
        match cache.exists_for_task(&hash, task_id).await {
            Ok(true) => {
                if !ctx.is_fresh(&hash) {
                    continue;
                }
                // Recorded earlier in this same run; still deliverable.
                kept.push(item);
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(task_id, error = %e, "cache lookup failed, treating item as new");
            }
        }
        ctx.mark_fresh(&hash);
        kept.push(item);
        hashes.push(hash);
    }

    if !hashes.is_empty()
        && let Err(e) = cache.add_batch(&hashes, tag, task_id).await
    {
        warn!(task_id, error = %e, "failed to record content fingerprints");
    }

    kept
}

pub(crate) fn strip_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}
