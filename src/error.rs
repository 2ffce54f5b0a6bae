//! # Error taxonomy
//!
//! Every component reports failures through the single [`Error`] type so the CLI
//! (or any other caller) sees one shape. Embedding providers use the narrower
//! [`EmbeddingError`], which converts into [`Error::Embedding`].

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error.
#[derive(Debug, Error)]
pub enum Error {
    /// The raw catalog is missing, unparseable, or lacks required columns.
    #[error("failed to load catalog {path}: {reason}")]
    DataLoad { path: PathBuf, reason: String },

    /// The processed catalog a build needs is absent or empty.
    #[error("processed catalog missing at {path}: {reason}")]
    CatalogMissing { path: PathBuf, reason: String },

    /// A persisted index could not be read back.
    #[error("failed to load index from {path}: {reason}")]
    IndexLoad { path: PathBuf, reason: String },

    /// Building or publishing a fresh index failed; nothing was published.
    #[error("failed to build index: {0}")]
    IndexBuild(String),

    /// The query was rejected before any model call.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// The hosted language model failed, timed out, or returned nothing.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The pipeline refused to start because artifacts are missing or unreadable.
    #[error("failed to initialize recommendation pipeline: {0}")]
    PipelineInit(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn data_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::DataLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn index_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::IndexLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Typed failure from an embedding provider or model.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// A provider could not supply a model (missing files, offline, download error).
    #[error("embedding provider `{provider}` unavailable: {reason}")]
    Unavailable {
        provider: &'static str,
        reason: String,
    },

    /// Every configured provider failed.
    #[error("no embedding provider succeeded: {}", .0.join("; "))]
    Exhausted(Vec<String>),

    /// The model was loaded but failed to embed a text.
    #[error("embedding inference failed: {0}")]
    Inference(String),
}

impl From<candle_core::Error> for EmbeddingError {
    fn from(e: candle_core::Error) -> Self {
        EmbeddingError::Inference(e.to_string())
    }
}
