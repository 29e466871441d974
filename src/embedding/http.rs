//! OpenAI-compatible embedding provider.
//!
//! Implements [`EmbeddingProvider`] by POSTing to `{endpoint}/embeddings` with a blocking
//! `reqwest` client. Failures are returned as-is; there are no retries.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

pub struct HttpEmbeddingProvider {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        anyhow::ensure!(config.dimensions > 0, "embedding dimensions must be positive");
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("failed to build HTTP client")?;
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::debug!(var = %config.api_key_env, "no embedding API key set");
        }
        Ok(Self {
            client,
            url: format!("{}/embeddings", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            dimensions: config.dimensions,
        })
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .pop()
            .context("embedding response was empty")
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut request = self.client.post(&self.url).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().context("embedding request failed")?;
        let status = response.status();
        anyhow::ensure!(status.is_success(), "embedding endpoint returned {status}");

        let mut body: EmbeddingResponse =
            response.json().context("malformed embedding response")?;
        anyhow::ensure!(
            body.data.len() == texts.len(),
            "expected {} embeddings, got {}",
            texts.len(),
            body.data.len()
        );
        body.data.sort_by_key(|d| d.index);
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_built_from_endpoint() {
        let config = EmbeddingConfig {
            endpoint: "http://localhost:8080/v1/".into(),
            dimensions: 8,
            ..EmbeddingConfig::default()
        };
        let provider = HttpEmbeddingProvider::new(&config).unwrap();
        assert_eq!(provider.url, "http://localhost:8080/v1/embeddings");
        assert_eq!(provider.dimensions(), 8);
        assert_eq!(provider.model(), "text-embedding-3-small");
    }

    #[test]
    fn zero_dimensions_rejected() {
        let config = EmbeddingConfig {
            dimensions: 0,
            ..EmbeddingConfig::default()
        };
        assert!(HttpEmbeddingProvider::new(&config).is_err());
    }
}
