use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{
    StepConfig, StepContext, StepExecutor, StepKind, parse_config, truncate_chars, with_cancel,
};
use crate::config::DiscordConfig;
use crate::core::model::{
    Embed, EmbedField, EmbedFooter, FeedItem, ScrapedItem, StepData, StepOutput, WebhookMessage,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_CONTENT_CHARS: usize = 2000;
const MAX_EMBEDS: usize = 10;
const MAX_TITLE_CHARS: usize = 256;
const MAX_DESCRIPTION_CHARS: usize = 4096;
const DEFAULT_EMBED_COLOR: u32 = 0x5865F2;

#[derive(Debug, Default, Deserialize)]
struct DiscordStepConfig {
    #[serde(default)]
    webhook_url: Option<String>,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    color: Option<u32>,
}

/// Webhook notification sink. One instance never sends twice within the
/// configured rate-limit window.
pub struct DiscordExecutor {
    default_webhook: String,
    rate_limit: Duration,
    last_send: Mutex<Option<Instant>>,
    client: reqwest::Client,
}

impl DiscordExecutor {
    pub fn new(cfg: &DiscordConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            default_webhook: cfg.default_webhook.clone(),
            rate_limit: cfg.rate_limit,
            last_send: Mutex::new(None),
            client,
        }
    }

    async fn throttle(&self) {
        // Compute the wait under the lock, sleep outside it, and stamp the
        // send time afterwards: at most one send per interval per instance.
        let wait = {
            let last = self.last_send.lock().await;
            match *last {
                Some(at) => self.rate_limit.saturating_sub(at.elapsed()),
                None => Duration::ZERO,
            }
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    async fn send(
        &self,
        webhook_url: &str,
        message: &WebhookMessage,
        cancel: &CancellationToken,
    ) -> Result<()> {
        with_cancel(cancel, "webhook send", async {
            let response = self.client.post(webhook_url).json(message).send().await?;
            let status = response.status();
            if status.as_u16() >= 400 {
                bail!(
                    "Discord API error {status}: {}",
                    response.text().await.unwrap_or_default()
                );
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl StepExecutor for DiscordExecutor {
    fn kind(&self) -> StepKind {
        StepKind::Discord
    }

    fn validate(&self, config: &StepConfig) -> Result<()> {
        // The webhook may arrive from the step config, the task's stored
        // Discord config, or the process default, so presence is a runtime
        // concern.
        parse_config::<DiscordStepConfig>(config).map(|_| ())
    }

    async fn execute(
        &self,
        input: Option<&StepOutput>,
        config: &StepConfig,
        ctx: &StepContext,
    ) -> Result<StepOutput> {
        let cfg: DiscordStepConfig = parse_config(config)?;
        let Some(input) = input else {
            bail!("discord step requires input data");
        };

        let webhook_url = cfg
            .webhook_url
            .clone()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.default_webhook.clone());
        if webhook_url.is_empty() {
            bail!(
                "no Discord webhook URL configured: set webhook_url in the step config, \
                 the task Discord config, or DISCORD_DEFAULT_WEBHOOK"
            );
        }

        let message = format_message(input, &cfg).context("failed to format message")?;

        self.throttle().await;
        self.send(&webhook_url, &message, &ctx.cancel).await?;
        *self.last_send.lock().await = Some(Instant::now());

        let mut metadata = serde_json::Map::new();
        metadata.insert("items_sent".into(), serde_json::json!(input.item_count));
        Ok(StepOutput::with_metadata(
            StepData::Value(serde_json::json!({
                "status": "sent",
                "webhook": mask_webhook(&webhook_url),
            })),
            input.item_count,
            metadata,
        ))
    }
}

fn format_message(input: &StepOutput, cfg: &DiscordStepConfig) -> Result<WebhookMessage> {
    let mut message = WebhookMessage {
        username: cfg.username.clone(),
        avatar_url: cfg.avatar_url.clone(),
        ..Default::default()
    };
    let color = cfg.color.unwrap_or(DEFAULT_EMBED_COLOR);

    // Plain text from an upstream transform wins over everything else.
    if let StepData::Text(text) = &input.data {
        message.content = Some(truncate_chars(text, MAX_CONTENT_CHARS));
        return Ok(message);
    }

    if let Some(template) = cfg.template.as_deref().filter(|t| !t.is_empty()) {
        let env = minijinja::Environment::new();
        let rendered = env
            .template_from_str(template)
            .and_then(|t| t.render(input.data.to_value()))
            .context("template rendering failed")?;
        message.content = Some(truncate_chars(&rendered, MAX_CONTENT_CHARS));
        return Ok(message);
    }

    match &input.data {
        StepData::Scraped(items) => {
            message.embeds = scraped_embeds(items, color);
        }
        StepData::Feed(items) => {
            message.embeds = feed_embeds(items, color);
        }
        other => {
            let pretty = serde_json::to_string_pretty(&other.to_value())?;
            let fenced = format!("```json\n{}\n```", truncate_chars(&pretty, MAX_CONTENT_CHARS - 12));
            message.content = Some(fenced);
        }
    }
    Ok(message)
}

fn scraped_embeds(items: &[ScrapedItem], color: u32) -> Vec<Embed> {
    items
        .iter()
        .take(MAX_EMBEDS)
        .map(|item| {
            let mut fields = Vec::new();
            if !item.company.is_empty() {
                fields.push(EmbedField {
                    name: "Company".to_string(),
                    value: item.company.clone(),
                    inline: true,
                });
            }
            if !item.salary.is_empty() {
                fields.push(EmbedField {
                    name: "Salary".to_string(),
                    value: item.salary.clone(),
                    inline: true,
                });
            }
            if !item.location.is_empty() {
                fields.push(EmbedField {
                    name: "Location".to_string(),
                    value: item.location.clone(),
                    inline: true,
                });
            }
            if !item.tags.is_empty() {
                fields.push(EmbedField {
                    name: "Tags".to_string(),
                    value: item.tags.join(", "),
                    inline: false,
                });
            }

            Embed {
                title: truncate_chars(&item.title, MAX_TITLE_CHARS),
                description: truncate_chars(&item.description, MAX_DESCRIPTION_CHARS),
                url: item.url.clone(),
                color,
                fields,
                footer: Some(EmbedFooter {
                    text: item.source.clone(),
                }),
                timestamp: None,
            }
        })
        .collect()
}

fn feed_embeds(items: &[FeedItem], color: u32) -> Vec<Embed> {
    items
        .iter()
        .take(MAX_EMBEDS)
        .map(|item| Embed {
            title: truncate_chars(&item.title, MAX_TITLE_CHARS),
            description: truncate_chars(&item.description, MAX_DESCRIPTION_CHARS),
            url: item.link.clone(),
            color,
            fields: Vec::new(),
            footer: Some(EmbedFooter {
                text: item.source.clone(),
            }),
            timestamp: parse_pub_date(&item.pub_date),
        })
        .collect()
}

// Feeds carry dates in either RFC 2822 or RFC 3339; anything else is
// omitted rather than guessed.
fn parse_pub_date(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|d| d.to_rfc3339())
        .ok()
}

fn mask_webhook(url: &str) -> String {
    if url.chars().count() < 20 {
        return "***".to_string();
    }
    let prefix: String = url.chars().take(30).collect();
    format!("{prefix}***")
}
