//! # anime_recommender (library root)
//!
//! Retrieval-augmented anime recommendations:
//! - Catalog cleaning (`data_loader`) and fixed-size chunking (`chunker`).
//! - Local sentence embeddings with a provider chain (`embeddings`).
//! - A persisted HNSW vector store (`vector_store`).
//! - Prompt templates and chat generation (`template`, `recommender`).
//! - The build / recommend façade (`pipeline`).
//! - CLI parsing and terminal rendering (`commands`, `pretty`).
//!
//! ## Data flow
//! ```text
//! raw CSV ─▶ data_loader ─▶ processed CSV ─▶ chunker + embeddings ─▶ vector_store (on disk)
//!                                                                        │
//!                            query ─▶ recommender (retrieve + prompt) ◀──┘ ─▶ chat model ─▶ text
//! ```
//!
//! ## Configuration
//! Settings live in `config.yaml` under [`config_dir`]; see [`config::AppConfig`].
//!
//! ## Modules
//! - [`chunker`], [`commands`], [`config`], [`data_loader`], [`embeddings`], [`error`],
//!   [`pipeline`], [`pretty`], [`recommender`], [`template`], [`vector_store`]

use directories::ProjectDirs;

pub mod chunker;
pub mod commands;
pub mod config;
pub mod data_loader;
pub mod embeddings;
pub mod error;
pub mod pipeline;
pub mod pretty;
pub mod recommender;
pub mod template;
pub mod vector_store;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{EmbeddingError, Error, Result};

/// Return the per-platform configuration directory.
///
/// Uses [`directories::ProjectDirs`] with the triple `("com", "animerec", "animerec")`,
/// e.g. `~/.config/animerec` on Linux. The directory is **not** created here.
///
/// # Errors
/// [`Error::Config`] if the platform configuration directory cannot be determined.
pub fn config_dir() -> Result<std::path::PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "animerec", "animerec")
        .ok_or_else(|| Error::Config("Unable to determine config directory".into()))?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
