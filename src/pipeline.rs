//! # Pipeline
//!
//! Top-level façade. [`build_pipeline`] turns the raw catalog into a persisted
//! index; [`Pipeline`] loads that index and answers queries through
//! [`Pipeline::recommend`].
//!
//! Constructing a [`Pipeline`] never builds anything: if the index directory or
//! the processed catalog is missing it fails with [`Error::PipelineInit`], and the
//! caller decides whether to run [`build_pipeline`] first.
//!
//! ```no_run
//! use anime_recommender::config::AppConfig;
//! use anime_recommender::embeddings::load_embedder;
//! use anime_recommender::pipeline::Pipeline;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default().with_env_overrides();
//! let embedder = load_embedder(&config.embedding)?;
//! let pipeline = Pipeline::from_config(&config, embedder)?;
//! println!("{}", pipeline.recommend("heartwarming slice of life").await?);
//! # Ok(()) }
//! ```

use std::sync::Arc;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::data_loader::CatalogLoader;
use crate::embeddings::Embedder;
use crate::error::{Error, Result};
use crate::recommender::{Generator, OpenAiGenerator, Recommender};
use crate::template::{PromptTemplate, load_template};
use crate::vector_store::{VectorStore, VectorStoreBuilder};

/// True when both the processed catalog and the index directory exist.
pub fn artifacts_present(config: &AppConfig) -> bool {
    config.index_dir.is_dir() && config.processed_catalog_path.is_file()
}

/// Process the raw catalog and build + persist the vector store.
pub fn build_pipeline(config: &AppConfig, embedder: Arc<dyn Embedder>) -> Result<VectorStore> {
    info!("Starting the build pipeline...");

    let processed = CatalogLoader::new(&config.raw_catalog_path, &config.processed_catalog_path)
        .load_and_process()
        .inspect_err(|e| error!("Build pipeline failed: {e}"))?;
    info!("Data processing completed successfully!");

    let store = VectorStoreBuilder::new(processed, &config.index_dir, embedder)
        .with_chunk_size(config.chunk_size)
        .with_parallel_embedding(config.parallel_embedding)
        .build_and_save_vectorstore()
        .inspect_err(|e| error!("Build pipeline failed: {e}"))?;
    info!("Build pipeline completed successfully!");
    Ok(store)
}

/// Loaded recommender ready to answer queries.
pub struct Pipeline<G = OpenAiGenerator> {
    recommender: Recommender<G>,
}

impl Pipeline<OpenAiGenerator> {
    /// Pipeline talking to the chat API described by `config`.
    pub fn from_config(config: &AppConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let template = match &config.template {
            Some(name) => load_template(name).map_err(|e| {
                error!("Error initializing pipeline: {e}");
                Error::PipelineInit(e.to_string())
            })?,
            None => PromptTemplate::default(),
        };
        Self::new(config, embedder, OpenAiGenerator::new(config), template)
    }
}

impl<G: Generator> Pipeline<G> {
    /// Load the persisted store and wire the recommender.
    ///
    /// # Errors
    /// [`Error::PipelineInit`] when the index directory or processed catalog is
    /// missing, or the index can't be loaded.
    pub fn new(
        config: &AppConfig,
        embedder: Arc<dyn Embedder>,
        generator: G,
        template: PromptTemplate,
    ) -> Result<Self> {
        info!("Initializing Recommendation Pipeline...");

        if !config.index_dir.is_dir() {
            let reason = format!(
                "vector store not found at {}; run the build first",
                config.index_dir.display()
            );
            error!("{reason}");
            return Err(Error::PipelineInit(reason));
        }
        if !config.processed_catalog_path.is_file() {
            let reason = format!(
                "processed catalog not found at {}; run the build first",
                config.processed_catalog_path.display()
            );
            error!("{reason}");
            return Err(Error::PipelineInit(reason));
        }

        let init = |e: Error| {
            error!("Error initializing pipeline: {e}");
            Error::PipelineInit(e.to_string())
        };
        let store = VectorStoreBuilder::new(&config.processed_catalog_path, &config.index_dir, embedder)
            .load_vector_store()
            .map_err(init)?;
        let recommender = Recommender::new(store, generator, template)
            .map_err(init)?
            .with_top_k(config.top_k)
            .with_context_max_tokens(config.context_max_tokens);

        info!("Recommendation Pipeline Initialized Successfully...");
        Ok(Self { recommender })
    }

    /// Recommend anime for a free-text query.
    pub async fn recommend(&self, query: &str) -> Result<String> {
        info!("Generating recommendations for query: {query}");
        match self.recommender.get_recommendation(query).await {
            Ok(recommendation) => {
                info!("Recommendation generated successfully...");
                Ok(recommendation)
            }
            Err(e) => {
                error!("Error during recommendation: {e}");
                Err(e)
            }
        }
    }
}
