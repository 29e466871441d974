use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::schema::TypeDescriptor;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PairstoreConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub agent: AgentConfig,
    pub embedding: EmbeddingConfig,
    pub inference: InferenceConfig,
    pub recall: RecallConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

/// The agent served by this process. Schemas are paths to descriptor files, either the
/// native `{"fields": [...]}` form or a JSON Schema.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub input_schema: Option<String>,
    pub output_schema: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub dimensions: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InferenceConfig {
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RecallConfig {
    pub default_k: usize,
    pub max_k: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            host: "127.0.0.1".into(),
            port: 7411,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_pairstore_dir()
            .join("pairs.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            input_schema: None,
            output_schema: None,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            endpoint: "https://api.openai.com/v1".into(),
            model: "text-embedding-3-small".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            dimensions: 1536,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            endpoint: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            temperature: 0.0,
        }
    }
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            max_k: 50,
        }
    }
}

/// Returns `~/.pairstore/`
pub fn default_pairstore_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pairstore")
}

/// Returns the default config file path: `~/.pairstore/config.toml`
pub fn default_config_path() -> PathBuf {
    default_pairstore_dir().join("config.toml")
}

impl PairstoreConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            PairstoreConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (PAIRSTORE_DB, PAIRSTORE_AGENT,
    /// PAIRSTORE_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PAIRSTORE_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("PAIRSTORE_AGENT") {
            self.agent.name = val;
        }
        if let Ok(val) = std::env::var("PAIRSTORE_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

impl AgentConfig {
    /// Read both descriptor files. `None` when either is not configured.
    pub fn descriptors(&self) -> Result<Option<(TypeDescriptor, TypeDescriptor)>> {
        let (Some(input), Some(output)) = (&self.input_schema, &self.output_schema) else {
            return Ok(None);
        };
        Ok(Some((read_descriptor(input)?, read_descriptor(output)?)))
    }
}

fn read_descriptor(path: &str) -> Result<TypeDescriptor> {
    let path = expand_tilde(path);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read schema file {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&contents)
        .with_context(|| format!("schema file {} is not JSON", path.display()))?;
    TypeDescriptor::from_json(&value)
        .with_context(|| format!("invalid schema in {}", path.display()))
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
