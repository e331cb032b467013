// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::core::extractor::DEFAULT_LANGUAGES;
use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub extractor: ExtractorConfig,

    #[serde(default)]
    pub player: PlayerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    /// Sampling temperature; the provider default when unset
    pub temperature: Option<f32>,
    /// Base URL for OpenAI-compatible servers (defaults to api.openai.com)
    pub base_url: Option<String>,
    /// Replace the built-in system prompt with the contents of this file
    pub system_prompt_file: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            model: "claude-sonnet-4-5-20250929".into(),
            max_tokens: 2048,
            temperature: None,
            base_url: None,
            system_prompt_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Correction rounds after a pattern fails to evaluate.
    pub max_corrections: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_corrections: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Fence language tags treated as playable code.
    pub languages: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            languages: DEFAULT_LANGUAGES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Audio runtime executable (JSON-RPC over stdio)
    pub command: String,
    pub args: Vec<String>,
    pub ready_timeout_secs: u64,
    pub ready_poll_ms: u64,
    pub env: HashMap<String, String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: "strudel-player".into(),
            args: Vec::new(),
            ready_timeout_secs: 30,
            ready_poll_ms: 250,
            env: HashMap::new(),
        }
    }
}

impl PlayerConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms.max(10))
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
