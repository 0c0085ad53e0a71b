//! Application assembly.
//!
//! Provider clients (embedder, vector index, generator) are constructed
//! once at startup and injected into the components that need them, so the
//! same wiring serves the CLI, the HTTP server, and tests with fakes.

use std::sync::Arc;

use anyhow::Result;

use crate::ask::Orchestrator;
use crate::config::Config;
use crate::embedding::{Embedder, OpenAiEmbedder};
use crate::generate::{Generator, OpenAiGenerator};
use crate::index::{self, VectorIndex};
use crate::ingest::IngestPipeline;
use crate::search::Retriever;
use crate::store::HistoryStore;

pub struct App {
    pub config: Config,
    pub store: Arc<HistoryStore>,
    pub index: Arc<dyn VectorIndex>,
    pub pipeline: Arc<IngestPipeline>,
    pub orchestrator: Arc<Orchestrator>,
}

impl App {
    pub async fn build(config: Config) -> Result<Self> {
        let store = Arc::new(HistoryStore::open(&config.storage.root)?);

        let embedder: Arc<dyn Embedder> = match config.embedding.provider.as_str() {
            "openai" => Arc::new(OpenAiEmbedder::new(&config.embedding)?),
            other => anyhow::bail!("Unknown embedding provider: '{}'. Must be openai.", other),
        };

        let generator: Arc<dyn Generator> = match config.generation.provider.as_str() {
            "openai" => Arc::new(OpenAiGenerator::new(&config.generation)?),
            other => anyhow::bail!("Unknown generation provider: '{}'. Must be openai.", other),
        };

        tracing::info!(
            embedding_model = embedder.model_name(),
            generation_model = %config.generation.model,
            "providers ready"
        );

        let index: Arc<dyn VectorIndex> = Arc::from(index::connect(&config.index).await?);

        let retriever = Arc::new(Retriever::new(
            config.retrieval.clone(),
            embedder.clone(),
            index.clone(),
        ));

        let pipeline = Arc::new(IngestPipeline::new(
            config.clone(),
            embedder,
            index.clone(),
            store.clone(),
        ));

        let orchestrator = Arc::new(Orchestrator::new(retriever, generator, store.clone()));

        Ok(Self {
            config,
            store,
            index,
            pipeline,
            orchestrator,
        })
    }
}
