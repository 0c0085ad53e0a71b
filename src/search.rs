//! Similarity retrieval and context assembly.
//!
//! Embeds the question, pulls nearest-neighbor chunks from the index, and
//! applies a hard distance cutoff: candidates at or beyond the threshold
//! are dropped entirely rather than down-weighted, so an unrelated corpus
//! contributes nothing and the model answers from general knowledge (or
//! declines) instead of being fed irrelevant context. Survivors are joined
//! into one context string and their source filenames deduplicated for
//! client-facing provenance.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::index::VectorIndex;
use crate::models::{Retrieval, RetrievedChunk};

/// Separator between chunk texts in the assembled context string.
pub const CONTEXT_SEPARATOR: &str = "\n\n----\n\n";

pub struct Retriever {
    config: RetrievalConfig,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(
        config: RetrievalConfig,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            config,
            embedder,
            index,
        }
    }

    /// Retrieve with the configured `top_k` and distance threshold.
    pub async fn retrieve(&self, query: &str) -> Result<Retrieval> {
        self.retrieve_with(query, self.config.top_k, self.config.distance_threshold)
            .await
    }

    /// Retrieve with explicit parameters. An empty result is a normal
    /// outcome ("no grounding available"), not an error.
    pub async fn retrieve_with(
        &self,
        query: &str,
        top_k: usize,
        distance_threshold: f32,
    ) -> Result<Retrieval> {
        let query_vector = self.embedder.embed_query(query).await?;
        let candidates = self.index.query(&query_vector, top_k).await?;

        let mut chunks = Vec::new();
        let mut filenames = BTreeSet::new();

        for candidate in candidates {
            if candidate.distance >= distance_threshold {
                tracing::debug!(distance = candidate.distance, "candidate over threshold, dropped");
                continue;
            }
            if let Some(filename) = candidate.metadata.get("filename") {
                filenames.insert(filename.clone());
            }
            chunks.push(RetrievedChunk {
                content: candidate.text,
                metadata: candidate.metadata,
                distance: candidate.distance,
            });
        }

        let context = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);

        if chunks.is_empty() {
            tracing::info!(%query, "no chunk under threshold; answering without context");
        } else {
            tracing::info!(%query, survivors = chunks.len(), "context assembled");
        }

        Ok(Retrieval {
            chunks,
            context,
            filenames,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{MemoryIndex, VectorPoint};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    /// Embedder that returns a fixed vector per known text and a far-away
    /// default otherwise.
    struct StaticEmbedder;

    #[async_trait]
    impl Embedder for StaticEmbedder {
        fn model_name(&self) -> &str {
            "static-test"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vector_for(t)).collect())
        }
    }

    fn vector_for(text: &str) -> Vec<f32> {
        match text {
            t if t.contains("sky") => vec![1.0, 0.0, 0.0],
            t if t.contains("sea") => vec![0.9, 0.1, 0.0],
            t if t.contains("code") => vec![0.0, 1.0, 0.0],
            _ => vec![0.0, 0.0, 1.0],
        }
    }

    async fn seeded_retriever(config: RetrievalConfig) -> Retriever {
        let index = Arc::new(MemoryIndex::new());
        let points = [
            ("sky.txt", "The sky is blue."),
            ("sea.txt", "The sea is wide."),
            ("code.txt", "The code is Rust."),
        ]
        .iter()
        .enumerate()
        .map(|(i, (file, text))| {
            let mut metadata = BTreeMap::new();
            metadata.insert("filename".to_string(), file.to_string());
            VectorPoint {
                id: format!("{}_{}", file, i),
                vector: vector_for(text),
                text: text.to_string(),
                metadata,
            }
        })
        .collect();
        index.upsert(points).await.unwrap();
        Retriever::new(config, Arc::new(StaticEmbedder), index)
    }

    #[tokio::test]
    async fn test_distances_strictly_under_threshold() {
        let retriever = seeded_retriever(RetrievalConfig {
            top_k: 5,
            distance_threshold: 0.5,
        })
        .await;

        let result = retriever.retrieve("why is the sky blue?").await.unwrap();
        assert!(!result.is_empty());
        for c in &result.chunks {
            assert!(c.distance < 0.5);
        }
        // The orthogonal "code" chunk must not survive.
        assert!(result.chunks.iter().all(|c| !c.content.contains("Rust")));
    }

    #[tokio::test]
    async fn test_tighter_threshold_yields_subset() {
        let retriever = seeded_retriever(RetrievalConfig {
            top_k: 5,
            distance_threshold: 1.0,
        })
        .await;

        let loose = retriever
            .retrieve_with("why is the sky blue?", 5, 1.0)
            .await
            .unwrap();
        let tight = retriever
            .retrieve_with("why is the sky blue?", 5, 0.1)
            .await
            .unwrap();

        let loose_texts: BTreeSet<_> = loose.chunks.iter().map(|c| c.content.clone()).collect();
        for c in &tight.chunks {
            assert!(loose_texts.contains(&c.content));
        }
        assert!(tight.chunks.len() <= loose.chunks.len());
    }

    #[tokio::test]
    async fn test_empty_index_yields_empty_retrieval() {
        let retriever = Retriever::new(
            RetrievalConfig {
                top_k: 5,
                distance_threshold: 1.0,
            },
            Arc::new(StaticEmbedder),
            Arc::new(MemoryIndex::new()),
        );

        let result = retriever.retrieve("anything at all").await.unwrap();
        assert!(result.is_empty());
        assert!(result.context.is_empty());
        assert!(result.filenames.is_empty());
    }

    #[tokio::test]
    async fn test_context_joined_with_separator_and_filenames_deduplicated() {
        let index = Arc::new(MemoryIndex::new());
        let mut metadata = BTreeMap::new();
        metadata.insert("filename".to_string(), "sky.txt".to_string());
        index
            .upsert(vec![
                VectorPoint {
                    id: "sky.txt_0".to_string(),
                    vector: vec![1.0, 0.0, 0.0],
                    text: "The sky is blue.".to_string(),
                    metadata: metadata.clone(),
                },
                VectorPoint {
                    id: "sky.txt_1".to_string(),
                    vector: vec![0.95, 0.05, 0.0],
                    text: "Sky color comes from scattering.".to_string(),
                    metadata,
                },
            ])
            .await
            .unwrap();

        let retriever = Retriever::new(
            RetrievalConfig {
                top_k: 5,
                distance_threshold: 1.0,
            },
            Arc::new(StaticEmbedder),
            index,
        );

        let result = retriever.retrieve("sky please").await.unwrap();
        assert_eq!(result.chunks.len(), 2);
        assert!(result.context.contains(CONTEXT_SEPARATOR));
        assert_eq!(result.filenames.len(), 1);
        assert!(result.filenames.contains("sky.txt"));
    }
}
