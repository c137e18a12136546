use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::executor::with_cancel;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_TOKENS: u32 = 4096;

/// Wire dialect a provider speaks. OpenRouter and DeepSeek are
/// OpenAI-compatible, so three formats cover the whole registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFormat {
    OpenAi,
    Anthropic,
    Gemini,
}

#[derive(Debug, Clone)]
pub struct ProviderDef {
    pub id: String,
    pub api_format: ApiFormat,
    pub base_url: String,
    pub model: String,
    pub api_key: String,
}

/// A single reqwest-backed completion provider; the request and response
/// shapes are chosen by the definition's wire format.
pub struct HttpProvider {
    def: ProviderDef,
    client: reqwest::Client,
}

// ── OpenAI-compatible request/response ──

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageOwned,
}

#[derive(Deserialize)]
struct OpenAiMessageOwned {
    content: String,
}

// ── Anthropic Messages API request/response ──

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: Option<String>,
}

// ── Gemini request/response ──

#[derive(Serialize)]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiResContent,
}

#[derive(Deserialize)]
struct GeminiResContent {
    parts: Vec<GeminiResPart>,
}

#[derive(Deserialize)]
struct GeminiResPart {
    text: String,
}

impl HttpProvider {
    pub fn new(def: ProviderDef) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { def, client }
    }

    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub async fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        with_cancel(cancel, "AI request", async {
            match self.def.api_format {
                ApiFormat::OpenAi => self.complete_openai(prompt, system_prompt).await,
                ApiFormat::Anthropic => self.complete_anthropic(prompt, system_prompt).await,
                ApiFormat::Gemini => self.complete_gemini(prompt, system_prompt).await,
            }
        })
        .await
    }

    async fn complete_openai(&self, prompt: &str, system_prompt: &str) -> Result<String> {
        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(OpenAiMessage {
                role: "system",
                content: system_prompt,
            });
        }
        messages.push(OpenAiMessage {
            role: "user",
            content: prompt,
        });

        let request = OpenAiRequest {
            model: &self.def.model,
            messages,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.def.base_url))
            .bearer_auth(&self.def.api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            bail!(
                "{} API error {status}: {}",
                self.def.id,
                response.text().await.unwrap_or_default()
            );
        }

        let parsed: OpenAiResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("no completion from {}", self.def.id))
    }

    async fn complete_anthropic(&self, prompt: &str, system_prompt: &str) -> Result<String> {
        let request = AnthropicRequest {
            model: &self.def.model,
            max_tokens: MAX_TOKENS,
            system: system_prompt,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.def.base_url))
            .header("x-api-key", &self.def.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            bail!(
                "{} API error {status}: {}",
                self.def.id,
                response.text().await.unwrap_or_default()
            );
        }

        let parsed: AnthropicResponse = response.json().await?;
        let text: String = parsed
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect();
        if text.is_empty() {
            bail!("no completion from {}", self.def.id);
        }
        Ok(text)
    }

    async fn complete_gemini(&self, prompt: &str, system_prompt: &str) -> Result<String> {
        let request = GeminiRequest {
            system_instruction: (!system_prompt.is_empty()).then(|| GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: system_prompt.to_string(),
                }],
            }),
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.def.base_url, self.def.model, self.def.api_key
        );
        let response = self.client.post(url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!(
                "{} API error {status}: {}",
                self.def.id,
                response.text().await.unwrap_or_default()
            );
        }

        let parsed: GeminiResponse = response.json().await?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| anyhow!("no completion from {}", self.def.id))
    }
}
