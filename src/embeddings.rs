//! # Embeddings
//!
//! Local sentence embeddings using Candle (pure Rust ML framework) and the
//! `all-MiniLM-L6-v2` BERT model. Text becomes a 384-d, L2-normalized vector.
//!
//! ## Obtaining the model
//! Weights are located by an ordered chain of [`EmbeddingProvider`]s; the first one
//! that yields a model wins and each failure is logged:
//!
//! 1. [`ModelDirProvider`]: an explicit `model_dir`, then `<config_dir>/models/<name>`.
//! 2. [`HubCacheProvider`]: the local Hugging Face cache, no network.
//! 3. [`HubDownloadProvider`]: anonymous download from the hub (skipped in
//!    [`EmbeddingMode::Offline`]).
//!
//! Hub access never carries a token: any credential sitting in the environment or
//! the hub token file is ignored, so embedding can't be routed to a remote
//! inference API by accident. Inference always runs in-process.
//!
//! ```no_run
//! use anime_recommender::config::EmbeddingConfig;
//! use anime_recommender::embeddings::load_embedder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let embedder = load_embedder(&EmbeddingConfig::default())?;
//! let v = embedder.embed("A lonely swordsman wanders the countryside.")?;
//! assert_eq!(v.len(), embedder.dimension());
//! # Ok(()) }
//! ```

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Cache, Repo, RepoType, api::sync::ApiBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{info, warn};

use crate::config::{EmbeddingConfig, EmbeddingMode};
use crate::error::EmbeddingError;

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";

// all-MiniLM-L6-v2 was trained with 256-token inputs.
const MAX_SEQUENCE_TOKENS: usize = 256;

/// Anything that turns text into a fixed-length vector.
pub trait Embedder: Send + Sync {
    /// Identity of the embedding space, recorded in index manifests.
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// One strategy for obtaining an [`Embedder`].
pub trait EmbeddingProvider {
    fn name(&self) -> &'static str;

    fn provide(&self, config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError>;
}

/// Paths of the three files a BERT sentence model needs.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl ModelFiles {
    /// Files inside `dir`, if all three are present.
    pub fn in_dir(dir: &Path) -> Option<Self> {
        let files = Self {
            config: dir.join(CONFIG_FILE),
            tokenizer: dir.join(TOKENIZER_FILE),
            weights: dir.join(WEIGHTS_FILE),
        };
        (files.config.is_file() && files.tokenizer.is_file() && files.weights.is_file())
            .then_some(files)
    }
}

/// Sentence embeddings model using Candle (pure Rust)
pub struct SentenceEmbeddingsModel {
    model_id: String,
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl SentenceEmbeddingsModel {
    /// Load config, tokenizer and weights from disk.
    pub fn from_files(model_id: &str, files: &ModelFiles) -> Result<Self, EmbeddingError> {
        let device = Device::Cpu;
        let load_err = |reason: String| EmbeddingError::Inference(format!("{model_id}: {reason}"));

        let raw_config = std::fs::read_to_string(&files.config).map_err(|e| load_err(e.to_string()))?;
        let config: Config = serde_json::from_str(&raw_config).map_err(|e| load_err(e.to_string()))?;
        let dimension = serde_json::from_str::<serde_json::Value>(&raw_config)
            .ok()
            .and_then(|v| v.get("hidden_size").and_then(|h| h.as_u64()))
            .ok_or_else(|| load_err("config.json has no hidden_size".into()))? as usize;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| load_err(format!("failed to load tokenizer: {e}")))?;
        tokenizer
            .with_padding(None)
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| load_err(format!("failed to configure tokenizer: {e}")))?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&files.weights], DTYPE, &device)? };
        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            model_id: model_id.to_string(),
            model,
            tokenizer,
            device,
            dimension,
        })
    }

    /// Encode text into an embedding
    pub fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Inference(format!("tokenization error: {e}")))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let output = self.model.forward(&token_ids, &token_type_ids, None)?;
        let embedding = self.mean_pooling(&output, tokens.get_attention_mask())?;
        let embedding = self.normalize(&embedding)?;

        Ok(embedding.to_vec1::<f32>()?)
    }

    /// Mean pooling over token embeddings, considering attention mask
    fn mean_pooling(&self, embeddings: &Tensor, attention_mask: &[u32]) -> Result<Tensor, EmbeddingError> {
        // embeddings: [1, seq_len, hidden]; mask reshaped to [1, seq_len, 1]
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        Ok(sum.broadcast_div(&count)?.squeeze(0)?)
    }

    /// L2 normalize the embedding vector
    fn normalize(&self, tensor: &Tensor) -> Result<Tensor, EmbeddingError> {
        let norm = tensor.sqr()?.sum_all()?.sqrt()?;
        Ok(tensor.broadcast_div(&norm)?)
    }
}

impl Embedder for SentenceEmbeddingsModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.encode(text)
    }
}

/// Last path segment of a hub id, e.g. `all-MiniLM-L6-v2`.
fn short_name(model_id: &str) -> &str {
    model_id.rsplit('/').next().unwrap_or(model_id)
}

fn hub_repo(config: &EmbeddingConfig) -> Repo {
    Repo::with_revision(config.model_id.clone(), RepoType::Model, config.revision.clone())
}

/// Loads from a directory on disk.
pub struct ModelDirProvider;

impl ModelDirProvider {
    fn candidates(config: &EmbeddingConfig) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(dir) = &config.model_dir {
            dirs.push(dir.clone());
        }
        if let Ok(base) = crate::config_dir() {
            dirs.push(base.join("models").join(short_name(&config.model_id)));
        }
        dirs
    }
}

impl EmbeddingProvider for ModelDirProvider {
    fn name(&self) -> &'static str {
        "model-dir"
    }

    fn provide(&self, config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        let candidates = Self::candidates(config);
        let files = candidates
            .iter()
            .find_map(|dir| ModelFiles::in_dir(dir))
            .ok_or_else(|| EmbeddingError::Unavailable {
                provider: self.name(),
                reason: format!(
                    "no complete model in {}",
                    candidates
                        .iter()
                        .map(|d| d.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })?;
        Ok(Arc::new(SentenceEmbeddingsModel::from_files(&config.model_id, &files)?))
    }
}

/// Loads from the local Hugging Face cache without touching the network.
pub struct HubCacheProvider;

impl EmbeddingProvider for HubCacheProvider {
    fn name(&self) -> &'static str {
        "hub-cache"
    }

    fn provide(&self, config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        let repo = Cache::default().repo(hub_repo(config));
        let get = |file: &str| {
            repo.get(file).ok_or_else(|| EmbeddingError::Unavailable {
                provider: "hub-cache",
                reason: format!("{file} of {} not cached", config.model_id),
            })
        };
        let files = ModelFiles {
            config: get(CONFIG_FILE)?,
            tokenizer: get(TOKENIZER_FILE)?,
            weights: get(WEIGHTS_FILE)?,
        };
        Ok(Arc::new(SentenceEmbeddingsModel::from_files(&config.model_id, &files)?))
    }
}

/// Downloads weights anonymously from the Hugging Face hub.
pub struct HubDownloadProvider;

impl EmbeddingProvider for HubDownloadProvider {
    fn name(&self) -> &'static str {
        "hub-download"
    }

    fn provide(&self, config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        let unavailable = |reason: String| EmbeddingError::Unavailable {
            provider: "hub-download",
            reason,
        };
        if config.mode == EmbeddingMode::Offline {
            return Err(unavailable("offline mode forbids downloads".into()));
        }

        let api = ApiBuilder::new()
            .with_token(None)
            .with_progress(false)
            .build()
            .map_err(|e| unavailable(e.to_string()))?;
        let repo = api.repo(hub_repo(config));
        let get = |file: &str| repo.get(file).map_err(|e| unavailable(format!("{file}: {e}")));

        info!("Fetching {} from the hub", config.model_id);
        let files = ModelFiles {
            config: get(CONFIG_FILE)?,
            tokenizer: get(TOKENIZER_FILE)?,
            weights: get(WEIGHTS_FILE)?,
        };
        Ok(Arc::new(SentenceEmbeddingsModel::from_files(&config.model_id, &files)?))
    }
}

/// The standard provider order.
pub fn default_providers() -> Vec<Box<dyn EmbeddingProvider>> {
    vec![
        Box::new(ModelDirProvider),
        Box::new(HubCacheProvider),
        Box::new(HubDownloadProvider),
    ]
}

/// Try each provider in order and return the first embedder obtained.
///
/// # Errors
/// [`EmbeddingError::Exhausted`] carrying every provider's failure.
pub fn resolve_embedder(
    providers: &[Box<dyn EmbeddingProvider>],
    config: &EmbeddingConfig,
) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    let mut failures = Vec::new();
    for provider in providers {
        match provider.provide(config) {
            Ok(embedder) => {
                info!(
                    provider = provider.name(),
                    "Loaded embedding model {}",
                    embedder.model_id()
                );
                return Ok(embedder);
            }
            Err(e) => {
                warn!(provider = provider.name(), "Embedding provider failed: {e}");
                failures.push(format!("{}: {e}", provider.name()));
            }
        }
    }
    Err(EmbeddingError::Exhausted(failures))
}

/// Resolve an embedder through [`default_providers`].
pub fn load_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    resolve_embedder(&default_providers(), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::HashingEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct Failing(&'static str);

    impl EmbeddingProvider for Failing {
        fn name(&self) -> &'static str {
            self.0
        }

        fn provide(&self, _: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
            Err(EmbeddingError::Unavailable {
                provider: self.0,
                reason: "nothing here".into(),
            })
        }
    }

    struct Counting(Arc<AtomicUsize>);

    impl EmbeddingProvider for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn provide(&self, _: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(HashingEmbedder::new(16)))
        }
    }

    #[test]
    fn test_first_successful_provider_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let providers: Vec<Box<dyn EmbeddingProvider>> = vec![
            Box::new(Failing("first")),
            Box::new(Counting(calls.clone())),
            Box::new(Counting(calls.clone())),
        ];
        let embedder = resolve_embedder(&providers, &EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.dimension(), 16);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exhausted_chain_reports_each_failure() {
        let providers: Vec<Box<dyn EmbeddingProvider>> =
            vec![Box::new(Failing("first")), Box::new(Failing("second"))];
        match resolve_embedder(&providers, &EmbeddingConfig::default()) {
            Err(EmbeddingError::Exhausted(reasons)) => {
                assert_eq!(reasons.len(), 2);
                assert!(reasons[0].starts_with("first:"));
                assert!(reasons[1].starts_with("second:"));
            }
            other => panic!("expected Exhausted, got {:?}", other.map(|e| e.model_id().to_string())),
        }
    }

    #[test]
    fn test_download_refused_when_offline() {
        let config = EmbeddingConfig {
            mode: EmbeddingMode::Offline,
            ..Default::default()
        };
        let result = HubDownloadProvider.provide(&config);
        assert!(matches!(
            result,
            Err(EmbeddingError::Unavailable { provider: "hub-download", .. })
        ));
    }

    #[test]
    fn test_incomplete_model_dir_is_skipped() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        assert!(ModelFiles::in_dir(dir.path()).is_none());

        let config = EmbeddingConfig {
            model_dir: Some(dir.path().to_path_buf()),
            model_id: "nobody/not-a-real-model-for-tests".into(),
            ..Default::default()
        };
        assert!(matches!(
            ModelDirProvider.provide(&config),
            Err(EmbeddingError::Unavailable { provider: "model-dir", .. })
        ));
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("sentence-transformers/all-MiniLM-L6-v2"), "all-MiniLM-L6-v2");
        assert_eq!(short_name("plain"), "plain");
    }

    #[test]
    #[ignore = "downloads all-MiniLM-L6-v2"]
    fn test_sentence_model_is_deterministic() {
        let embedder = load_embedder(&EmbeddingConfig::default()).unwrap();
        let a = embedder.embed("Pirates search for the One Piece.").unwrap();
        let b = embedder.embed("Pirates search for the One Piece.").unwrap();
        assert_eq!(a.len(), 384);
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
