use anyhow::{Result, bail};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::ScraperConfig;
use crate::core::executor::with_cancel;

/// Shared outbound client for source adapters: configured user agent, bounded
/// request timeout, cancellation-aware fetches.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(cfg: &ScraperConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        with_cancel(cancel, "scrape request", async {
            let response = self.client.get(url).send().await?;
            if !response.status().is_success() {
                bail!("HTTP {} from {url}", response.status());
            }
            Ok(response.json::<T>().await?)
        })
        .await
    }

    pub async fn get_bytes(
        &self,
        url: &str,
        accept: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        with_cancel(cancel, "scrape request", async {
            let response = self
                .client
                .get(url)
                .header(reqwest::header::ACCEPT, accept)
                .send()
                .await?;
            if !response.status().is_success() {
                bail!("HTTP {} from {url}", response.status());
            }
            Ok(response.bytes().await?.to_vec())
        })
        .await
    }
}
