mod provider;

pub use provider::{ApiFormat, HttpProvider, ProviderDef};

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Deserialize;

use super::{StepConfig, StepContext, StepExecutor, StepKind, parse_config};
use crate::config::AiConfig;
use crate::core::model::{StepData, StepOutput};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that processes and summarizes \
                                     information. Be concise and informative.";

/// Providers keyed by id, with a configured fallback for steps that name
/// none.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, HttpProvider>,
    default_provider: String,
}

impl ProviderRegistry {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    pub fn from_config(cfg: &AiConfig) -> Self {
        let mut registry = Self::new(cfg.default_provider.clone());
        let defs = [
            ("openai", ApiFormat::OpenAi, &cfg.openai),
            ("anthropic", ApiFormat::Anthropic, &cfg.anthropic),
            ("google", ApiFormat::Gemini, &cfg.google),
            ("openrouter", ApiFormat::OpenAi, &cfg.openrouter),
            ("deepseek", ApiFormat::OpenAi, &cfg.deepseek),
        ];
        for (id, api_format, provider) in defs {
            if provider.api_key.is_empty() {
                continue;
            }
            registry.register(HttpProvider::new(ProviderDef {
                id: id.to_string(),
                api_format,
                base_url: provider.base_url.clone(),
                model: provider.model.clone(),
                api_key: provider.api_key.clone(),
            }));
        }
        registry
    }

    pub fn register(&mut self, provider: HttpProvider) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Result<&HttpProvider> {
        let name = if name.is_empty() {
            &self.default_provider
        } else {
            name
        };
        self.providers
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("AI provider '{name}' not found or not configured"))
    }

    pub fn available(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Debug, Deserialize)]
struct AiStepConfig {
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
}

/// Transform step: serializes the previous step's payload, prompts the
/// configured provider, and speculatively parses the completion as JSON.
pub struct AiExecutor {
    registry: Arc<ProviderRegistry>,
}

impl AiExecutor {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }
}

fn build_prompt(prompt: &str, input: Option<&StepOutput>) -> Result<String> {
    let Some(input) = input else {
        return Ok(prompt.to_string());
    };
    let data = input.data.to_value();
    if data.is_null() {
        return Ok(prompt.to_string());
    }
    let serialized = serde_json::to_string_pretty(&data)?;
    Ok(format!("{prompt}\n\nData to process:\n{serialized}"))
}

fn parse_completion(response: String) -> StepData {
    match serde_json::from_str::<serde_json::Value>(&response) {
        Ok(value) => StepData::Value(value),
        Err(_) => StepData::Text(response),
    }
}

#[async_trait]
impl StepExecutor for AiExecutor {
    fn kind(&self) -> StepKind {
        StepKind::AiProcessor
    }

    fn validate(&self, config: &StepConfig) -> Result<()> {
        let cfg: AiStepConfig = parse_config(config)?;
        match cfg.prompt.as_deref() {
            Some(prompt) if !prompt.trim().is_empty() => Ok(()),
            _ => bail!("ai_processor requires 'prompt' in config"),
        }
    }

    async fn execute(
        &self,
        input: Option<&StepOutput>,
        config: &StepConfig,
        ctx: &StepContext,
    ) -> Result<StepOutput> {
        let cfg: AiStepConfig = parse_config(config)?;
        let provider = self.registry.get(cfg.provider.as_deref().unwrap_or(""))?;

        let prompt_template = cfg.prompt.unwrap_or_default();
        let system_prompt = cfg
            .system_prompt
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let full_prompt = build_prompt(&prompt_template, input)?;
        let response = provider
            .complete(&full_prompt, &system_prompt, &ctx.cancel)
            .await?;

        let mut metadata = serde_json::Map::new();
        metadata.insert("provider".into(), serde_json::json!(provider.id()));
        metadata.insert("prompt_used".into(), serde_json::json!(prompt_template));
        if let Some(input) = input {
            metadata.insert("input_items".into(), serde_json::json!(input.item_count));
        }

        let item_count = input.map(|i| i.item_count).filter(|c| *c > 0).unwrap_or(1);
        Ok(StepOutput::with_metadata(
            parse_completion(response),
            item_count,
            metadata,
        ))
    }
}
