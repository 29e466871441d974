//! OpenAI-compatible chat completion provider.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{InferenceOptions, InferenceProvider};
use crate::config::InferenceConfig;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    #[serde(default)]
    content: Option<String>,
}

pub struct HttpInferenceProvider {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    temperature: f64,
}

impl HttpInferenceProvider {
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
            temperature: config.temperature,
        })
    }
}

impl InferenceProvider for HttpInferenceProvider {
    fn complete(&self, prompt: &str, options: &InferenceOptions) -> Result<String> {
        let body = ChatRequest {
            model: options.model.as_deref().unwrap_or(&self.model),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature.unwrap_or(self.temperature),
            max_tokens: options.max_tokens,
            stream: false,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().context("completion request failed")?;
        let status = response.status();
        anyhow::ensure!(status.is_success(), "completion endpoint returned {status}");

        let body: ChatResponse = response.json().context("malformed completion response")?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("completion response had no content")
    }
}
