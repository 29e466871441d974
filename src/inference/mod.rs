//! Inference collaborator: prompt in, completion text out.
//!
//! Provides the [`InferenceProvider`] trait, the [`InferenceOptions`] accepted by
//! `infer`, prompt construction ([`prompt`]), and an OpenAI-compatible HTTP
//! implementation ([`http`]).

pub mod http;
pub mod prompt;

use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Options forwarded to the provider. Unrecognized keys are ignored when deserializing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct InferenceOptions {
    #[schemars(description = "Sampling temperature; provider default when absent")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[schemars(description = "Model override; provider default when absent")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[schemars(description = "Completion token limit")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[schemars(description = "Number of recent reinforced records to include as examples")]
    pub examples: usize,
}

/// Trait for text completion.
///
/// Synchronous, like [`crate::embedding::EmbeddingProvider`]; async callers use
/// `tokio::task::spawn_blocking`.
pub trait InferenceProvider: Send + Sync {
    fn complete(&self, prompt: &str, options: &InferenceOptions) -> Result<String>;
}

/// Create an inference provider from config.
pub fn create_provider(
    config: &crate::config::InferenceConfig,
) -> Result<Box<dyn InferenceProvider>> {
    match config.provider.as_str() {
        "openai" | "http" => Ok(Box::new(http::HttpInferenceProvider::new(config)?)),
        other => anyhow::bail!("unknown inference provider: {other}. Supported: openai"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_option_keys_are_ignored() {
        let options: InferenceOptions = serde_json::from_value(serde_json::json!({
            "temperature": 0.2,
            "top_p": 0.9,
            "seed": 7
        }))
        .unwrap();
        assert_eq!(options.temperature, Some(0.2));
        assert_eq!(options.model, None);
        assert_eq!(options.examples, 0);
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let config = crate::config::InferenceConfig {
            provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(create_provider(&config).is_err());
    }
}
