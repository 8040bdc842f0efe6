use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::prompts::PromptSet;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CallscopeConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub prompts: PromptSet,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/callscope.sock".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub records_path: String,
    pub metadata_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            records_path: "output_data/bulk_summaries.json".to_string(),
            metadata_path: "output_data/bulk_summary_metadata.json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    pub path: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: "output_data/vector_store".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// `openai` or `gemini`
    pub backend: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    #[serde(default)]
    pub base_url: Option<String>,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            batch_size: 64,
            base_url: None,
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Documents retrieved per query.
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { k: 100 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChatSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default)]
    pub base_url: Option<String>,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    /// Most recent turns replayed into the prompt. Unset replays everything.
    #[serde(default)]
    pub history_turn_limit: Option<usize>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-mini-2025-04-14".to_string(),
            temperature: 0.0,
            max_tokens: 600,
            base_url: None,
            max_retries: 2,
            retry_delay_ms: 500,
            history_turn_limit: None,
        }
    }
}

impl CallscopeConfig {
    /// Load from an optional TOML file, overridden by `CALLSCOPE_*` variables
    /// (`CALLSCOPE_RETRIEVAL__K=50`).
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("CALLSCOPE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        s.try_deserialize()
    }

    /// Reject settings that cannot work, before any I/O happens.
    pub fn validate(&self) -> Result<(), String> {
        if self.retrieval.k == 0 {
            return Err("retrieval.k must be at least 1".to_string());
        }
        if self.embedding.dimensions == 0 {
            return Err("embedding.dimensions must be at least 1".to_string());
        }
        if self.embedding.batch_size == 0 {
            return Err("embedding.batch_size must be at least 1".to_string());
        }
        if self.index.path.trim().is_empty() {
            return Err("index.path must not be empty".to_string());
        }
        if !(0.0..=2.0).contains(&self.chat.temperature) {
            return Err(format!("chat.temperature {} is outside 0.0..=2.0", self.chat.temperature));
        }
        Ok(())
    }

    /// Load from the file only, ignoring the environment.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}
