//! Configuration
//!
//! Loaded from a TOML file; every section and field is optional and falls back
//! to the defaults below. Command-line flags override individual fields after
//! loading.
//!
//! ```toml
//! log_level = "info"
//!
//! [provider]
//! kind = "ollama"
//! model = "llama3:latest"
//!
//! [pipeline]
//! variant = "advanced"
//! threshold = 7.0
//!
//! [retrieval]
//! corpus_path = "corpus.csv"
//! k = 3
//! ```

use crate::error::{Error, Result};
use crate::pipeline::{Variant, DEFAULT_THRESHOLD};
use crate::provider::{ProviderConfig, ProviderType};
use crate::retrieval::DEFAULT_K;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "llrefine.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracing filter directive, e.g. `info` or `llrefine_core=debug`
    pub log_level: Option<String>,
    pub provider: ProviderSettings,
    pub pipeline: PipelineSettings,
    pub retrieval: RetrievalSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub kind: ProviderType,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub embedding_model: Option<String>,
    /// Environment variable holding the API key (OpenAI-compatible only)
    pub api_key_env: String,
    pub timeout_secs: Option<u64>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderType::Ollama,
            base_url: None,
            model: None,
            embedding_model: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: None,
        }
    }
}

impl ProviderSettings {
    /// Resolve into a provider config, reading the API key from the environment.
    pub fn to_provider_config(&self) -> Result<ProviderConfig> {
        let mut config = match self.kind {
            ProviderType::Ollama => ProviderConfig::ollama(),
            ProviderType::OpenAI => {
                let key = std::env::var(&self.api_key_env).map_err(|_| {
                    Error::config_invalid(format!(
                        "environment variable {} is not set",
                        self.api_key_env
                    ))
                    .with_operation("config::provider")
                })?;
                ProviderConfig::openai(key)
            }
        };

        if let Some(url) = &self.base_url {
            config = config.with_base_url(url);
        }
        if let Some(model) = &self.model {
            config = config.with_model(model);
        }
        if let Some(model) = &self.embedding_model {
            config = config.with_embedding_model(model);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(secs);
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub variant: Variant,
    pub threshold: f64,
    /// Extra attempts for retryable backend errors, per stage
    pub max_retries: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            variant: Variant::Advanced,
            threshold: DEFAULT_THRESHOLD,
            max_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub corpus_path: PathBuf,
    pub text_column: String,
    pub persist_dir: PathBuf,
    pub collection: String,
    pub k: usize,
    /// Add retrieved records to the answer prompt
    pub inject_context: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            corpus_path: PathBuf::from("corpus.csv"),
            text_column: "title".to_string(),
            persist_dir: PathBuf::from("./vector_db"),
            collection: "reviews".to_string(),
            k: DEFAULT_K,
            inject_context: false,
        }
    }
}

impl Config {
    /// Parse a TOML document and validate it.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| {
            Error::config_invalid(format!("invalid config: {}", e))
                .with_operation("config::parse")
                .set_source(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::from(e)
                .with_operation("config::load")
                .with_context("path", path.display().to_string())
        })?;
        Self::from_toml(&content).map_err(|e| e.with_context("path", path.display().to_string()))
    }

    /// Load `path` if given, else `./llrefine.toml` when present, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::load(DEFAULT_CONFIG_FILE),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.pipeline.threshold;
        if !threshold.is_finite() || !(0.0..=10.0).contains(&threshold) {
            return Err(invalid(format!("pipeline.threshold {} outside [0, 10]", threshold)));
        }
        if self.retrieval.k == 0 {
            return Err(invalid("retrieval.k must be at least 1"));
        }
        if self.retrieval.text_column.trim().is_empty() {
            return Err(invalid("retrieval.text_column must not be empty"));
        }
        if self.retrieval.collection.trim().is_empty() {
            return Err(invalid("retrieval.collection must not be empty"));
        }
        for (field, value) in [
            ("provider.model", &self.provider.model),
            ("provider.embedding_model", &self.provider.embedding_model),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(invalid(format!("{} must not be empty", field)));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::config_invalid(message).with_operation("config::validate")
}
