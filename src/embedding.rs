//! Embedding provider implementations.
//!
//! - **[`DisabledProvider`]**: fails every call; used when
//!   `embedding.provider = "disabled"`.
//! - **[`HashingEmbedder`]**: deterministic offline feature hashing from
//!   `farmhand-core`; the default.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API.
//!
//! Use [`create_provider`] to build the provider named in the config.
//!
//! ```rust,no_run
//! # use farmhand::config::EmbeddingConfig;
//! # use farmhand::embedding::create_provider;
//! let provider = create_provider(&EmbeddingConfig::default()).unwrap();
//! assert_eq!(provider.model_name(), "hashing");
//! ```
//!
//! Every call is a single attempt. A failed batch surfaces as an error
//! and is not retried.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub use farmhand_core::embedding::{embed_query, EmbeddingProvider, HashingEmbedder};

use crate::config::EmbeddingConfig;

/// Build the provider selected by `embedding.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dims))),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using `POST /v1/embeddings`.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims: config.dims,
            api_key,
            client,
        })
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dims,
        });

        let resp = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("OpenAI embeddings request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("OpenAI API error ({}): {}", status, text);
        }

        let mut parsed: EmbeddingResponse = resp
            .json()
            .await
            .context("Malformed OpenAI embeddings response")?;
        parsed.data.sort_by_key(|d| d.index);

        if parsed.data.len() != texts.len() {
            bail!(
                "OpenAI returned {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            );
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
