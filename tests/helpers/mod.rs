#![allow(dead_code)]

use anyhow::{anyhow, Result};
use pairstore::db;
use pairstore::embedding::EmbeddingProvider;
use pairstore::inference::{InferenceOptions, InferenceProvider};
use pairstore::{Agent, Field, FieldKind, Payload, TypeDescriptor};
use rusqlite::Connection;
use serde_json::Value;
use std::sync::Mutex;

/// Open a fresh in-memory database with bookkeeping tables and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Deterministic embedding with a single spike at `seed`. Distinct seeds are orthogonal.
pub fn spike(seed: usize, dimension: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dimension];
    v[seed % dimension] = 1.0;
    v
}

pub fn qa_input() -> TypeDescriptor {
    TypeDescriptor::new(vec![
        Field::required("question", FieldKind::string()),
        Field::optional("topic", FieldKind::string()).indexed(),
    ])
}

pub fn qa_output() -> TypeDescriptor {
    TypeDescriptor::new(vec![
        Field::required("answer", FieldKind::string()),
        Field::optional("confidence", FieldKind::number()),
    ])
}

/// The question/answer agent most tests use, sized for [`KeywordEmbedder`].
pub fn qa_agent(conn: &mut Connection) -> Agent {
    Agent::init(conn, "qa", qa_input(), qa_output(), KeywordEmbedder::DIMENSIONS).unwrap()
}

pub fn payload(value: Value) -> Payload {
    value.as_object().unwrap().clone()
}

/// Deterministic embedder: one dimension per keyword present in the text, plus a
/// constant bias so no vector is all zeros.
pub struct KeywordEmbedder;

impl KeywordEmbedder {
    pub const KEYWORDS: [&'static str; 5] = ["math", "sum", "capital", "france", "weather"];
    pub const DIMENSIONS: usize = Self::KEYWORDS.len() + 1;
}

impl EmbeddingProvider for KeywordEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.to_lowercase();
        let mut v: Vec<f32> = Self::KEYWORDS
            .iter()
            .map(|k| if text.contains(k) { 1.0 } else { 0.0 })
            .collect();
        v.push(0.1);
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        Self::DIMENSIONS
    }

    fn model(&self) -> &str {
        "keyword-test"
    }
}

pub struct BrokenEmbedder;

impl EmbeddingProvider for BrokenEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(anyhow!("embedding service unavailable"))
    }

    fn dimensions(&self) -> usize {
        KeywordEmbedder::DIMENSIONS
    }

    fn model(&self) -> &str {
        "broken"
    }
}

/// Inference provider that returns a canned completion and records the prompts it saw.
pub struct ScriptedInference {
    completion: std::result::Result<String, String>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedInference {
    pub fn replying(completion: impl Into<String>) -> Self {
        Self {
            completion: Ok(completion.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            completion: Err(message.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

impl InferenceProvider for ScriptedInference {
    fn complete(&self, prompt: &str, _options: &InferenceOptions) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.completion.clone().map_err(|e| anyhow!(e))
    }
}
