//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the [`AppConfig`] struct, which holds paths, model names and budgets,
//! and a [`load_config`] function to load the configuration from a YAML file.
//!
//! # Examples
//!
//! ```no_run
//! use anime_recommender::config::load_config;
//!
//! let config = load_config("/path/to/config.yaml").unwrap().with_env_overrides();
//! println!("{:?}", config.model);
//! ```

use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf};

use tracing::*;

use crate::error::{Error, Result};

/// Default Groq endpoint; any OpenAI-compatible base URL works.
pub const DEFAULT_API_BASE: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// How the embedding model may be obtained. Inference always runs in-process.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingMode {
    /// Weights may be fetched anonymously from the hub; no credentials are sent.
    #[default]
    LocalOnly,
    /// Never touch the network; weights must already be on disk.
    Offline,
}

/// Settings handed to embedding providers.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub mode: EmbeddingMode,

    /// Hub repository id of the sentence-embedding model.
    pub model_id: String,

    pub revision: String,

    /// Directory holding `config.json`, `tokenizer.json` and `model.safetensors`.
    pub model_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            mode: EmbeddingMode::default(),
            model_id: DEFAULT_EMBEDDING_MODEL.to_string(),
            revision: "main".to_string(),
            model_dir: None,
        }
    }
}

/// Represents the application's configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// The API key used to authenticate requests to the chat API.
    pub api_key: String,

    /// The base URL of the chat API.
    pub api_base: String,

    /// The name of the chat model used for generating recommendations.
    pub model: String,

    // Response budget for the chat model.
    pub max_tokens: u32,

    // Token budget for retrieved context inside the prompt.
    pub context_max_tokens: usize,

    pub temperature: f32,

    // Seconds before the chat request is abandoned.
    pub request_timeout_secs: u64,

    // Number of chunks retrieved per query.
    pub top_k: usize,

    // Maximum characters per chunk.
    pub chunk_size: usize,

    pub parallel_embedding: bool,

    pub raw_catalog_path: PathBuf,
    pub processed_catalog_path: PathBuf,
    pub index_dir: PathBuf,

    /// Prompt template name under `<config_dir>/templates/`; built-in default when absent.
    pub template: Option<String>,

    pub embedding: EmbeddingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1024,
            context_max_tokens: 3000,
            temperature: 0.0,
            request_timeout_secs: 60,
            top_k: 4,
            chunk_size: 1000,
            parallel_embedding: true,
            raw_catalog_path: PathBuf::from("data/anime_with_synopsis.csv"),
            processed_catalog_path: PathBuf::from("data/processed_anime_data.csv"),
            index_dir: PathBuf::from("hnsw_db"),
            template: None,
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Apply environment overrides for secrets and model selection.
    ///
    /// Reads `GROQ_API_KEY` (falling back to `OPENAI_API_KEY`), `MODEL_NAME` and
    /// `ANIMEREC_API_BASE`. Nothing is written back to the environment.
    pub fn with_env_overrides(mut self) -> Self {
        let lookup = |key: &str| env::var(key).ok().filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup("GROQ_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            debug!("API key taken from environment");
            self.api_key = key;
        }
        if let Some(model) = lookup("MODEL_NAME") {
            self.model = model;
        }
        if let Some(base) = lookup("ANIMEREC_API_BASE") {
            self.api_base = base;
        }
        self
    }

    /// Reject settings that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be greater than zero".into()));
        }
        if self.top_k == 0 {
            return Err(Error::Config("top_k must be greater than zero".into()));
        }
        if self.model.trim().is_empty() {
            return Err(Error::Config("model name is empty".into()));
        }
        Ok(())
    }
}

/// Loads the application's configuration from a YAML file.
///
/// Missing keys fall back to [`AppConfig::default`].
///
/// # Errors
///
/// Returns [`Error::Config`] when the file cannot be read or is not valid YAML.
pub fn load_config(file: impl AsRef<Path>) -> Result<AppConfig> {
    let file = file.as_ref();
    debug!("Loading config from: {}", file.display());
    let content = fs::read_to_string(file)
        .map_err(|e| Error::Config(format!("{}: {}", file.display(), e)))?;
    let config: AppConfig = serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", file.display(), e)))?;
    config.validate()?;
    Ok(config)
}
