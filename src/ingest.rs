//! Ingestion pipeline orchestration.
//!
//! Turns an uploaded document (or raw text) into chunks, pushes chunk
//! vectors into the index, and persists the original artifact plus a
//! [`SourceRecord`] summary. The three writes — vector upsert, artifact,
//! metadata — are deliberately independent: there is no transaction across
//! the vector index and the history store, so each failure is logged and
//! reflected in the returned [`IngestReceipt`] flags instead of being
//! collapsed into a single pass/fail.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::extract::extract_text;
use crate::index::{VectorIndex, VectorPoint};
use crate::models::{Chunk, ChunkPreview, IngestReceipt, SourceRecord};
use crate::store::HistoryStore;

/// Preview truncation width inside source records; full chunk content is
/// never duplicated into metadata.
const PREVIEW_CHARS: usize = 200;

pub struct IngestPipeline {
    config: Config,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: Arc<HistoryStore>,
}

impl IngestPipeline {
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        store: Arc<HistoryStore>,
    ) -> Self {
        Self {
            config,
            embedder,
            index,
            store,
        }
    }

    /// Ingest an uploaded binary document. Extraction failures abort
    /// before anything is written.
    pub async fn ingest_document(&self, bytes: &[u8], filename: &str) -> Result<IngestReceipt> {
        if filename.trim().is_empty() {
            return Err(Error::InvalidInput("no filename supplied".to_string()));
        }
        let text = extract_text(bytes, filename)?;
        self.run(bytes, &text, filename, filename).await
    }

    /// Ingest raw text. The pseudo-filename is derived from the first few
    /// characters of the text; the artifact is saved as a `.txt` file.
    pub async fn ingest_text(&self, text: &str) -> Result<IngestReceipt> {
        if text.trim().is_empty() {
            return Err(Error::EmptyContent("no text supplied".to_string()));
        }
        let preview: String = text
            .chars()
            .take(10)
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        let pseudo_name = format!("{}...", preview);
        let artifact_name = format!("{}.txt", pseudo_name);
        self.run(text.as_bytes(), text, &pseudo_name, &artifact_name).await
    }

    async fn run(
        &self,
        bytes: &[u8],
        text: &str,
        filename: &str,
        artifact_name: &str,
    ) -> Result<IngestReceipt> {
        let mut metadata = BTreeMap::new();
        metadata.insert("filename".to_string(), filename.to_string());

        let chunks = chunk_text(
            text,
            self.config.chunking.window_size,
            self.config.chunking.overlap,
            &metadata,
        )?;
        if chunks.is_empty() {
            return Err(Error::EmptyContent(format!(
                "nothing to chunk in {}",
                filename
            )));
        }

        let source_id = self.store.new_source_id();

        let vectors_indexed = match self.index_chunks(&source_id, filename, &chunks).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%filename, error = %e, "vector indexing failed");
                false
            }
        };

        let (artifact_saved, saved_path) = match self.store.save_artifact(artifact_name, bytes) {
            Ok(path) => (true, path.display().to_string()),
            Err(e) => {
                tracing::warn!(%filename, error = %e, "artifact write failed");
                (false, String::new())
            }
        };

        let record = SourceRecord {
            id: source_id.clone(),
            original_filename: filename.to_string(),
            saved_path,
            chunk_count: chunks.len(),
            ingested_at: Utc::now().to_rfc3339(),
            content_hash: content_hash(bytes),
            chunk_previews: chunks.iter().map(preview_of).collect(),
        };
        let metadata_saved = match self.store.write_source_record(&record) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%filename, error = %e, "source record write failed");
                false
            }
        };

        tracing::info!(
            %filename,
            chunks = chunks.len(),
            vectors_indexed,
            artifact_saved,
            metadata_saved,
            "ingested source"
        );

        Ok(IngestReceipt {
            source_id,
            filename: filename.to_string(),
            chunk_count: chunks.len(),
            vectors_indexed,
            artifact_saved,
            metadata_saved,
        })
    }

    /// Embed all chunk texts (batched) and upsert them under ids chosen by
    /// the configured strategy: `filename` reproduces prior ids for the
    /// same filename and chunk layout (re-ingestion overwrites), while
    /// `source-id` keys by this ingestion's record id (never overwrites).
    async fn index_chunks(&self, source_id: &str, filename: &str, chunks: &[Chunk]) -> Result<()> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.embedding.batch_size.max(1)) {
            vectors.extend(self.embedder.embed(batch).await?);
        }
        if vectors.len() != chunks.len() {
            return Err(Error::IndexUnavailable(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let id_stem = match self.config.index.vector_id_strategy.as_str() {
            "source-id" => source_id,
            _ => filename,
        };

        let points: Vec<VectorPoint> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorPoint {
                id: format!("{}_{}", id_stem, chunk.chunk_index),
                vector,
                text: chunk.content.clone(),
                metadata: chunk.source_metadata.clone(),
            })
            .collect();

        self.index.upsert(points).await
    }

    /// Remove a source's artifact and metadata. Under the
    /// `retract-vectors` strategy its vectors are also deleted from the
    /// index; under `keep-vectors` (the historical behavior) they stay
    /// searchable. Returns `false` when the metadata record is missing.
    pub async fn delete_source(&self, id: &str) -> Result<bool> {
        let Some(record) = self.store.delete_source(id)? else {
            return Ok(false);
        };

        if self.config.index.delete_strategy == "retract-vectors" {
            match self
                .index
                .delete_by_filename(&record.original_filename)
                .await
            {
                Ok(removed) => {
                    tracing::info!(
                        filename = %record.original_filename,
                        removed,
                        "retracted vectors for deleted source"
                    );
                }
                Err(e) => {
                    // The store delete already happened; surface the gap
                    // instead of failing the whole call.
                    tracing::warn!(
                        filename = %record.original_filename,
                        error = %e,
                        "vector retraction failed; index still holds this source"
                    );
                }
            }
        }

        Ok(true)
    }
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn preview_of(chunk: &Chunk) -> ChunkPreview {
    let char_count = chunk.content.chars().count();
    let preview = if char_count > PREVIEW_CHARS {
        let truncated: String = chunk.content.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", truncated)
    } else {
        chunk.content.clone()
    };
    ChunkPreview {
        chunk_index: chunk.chunk_index,
        content_length: char_count,
        preview,
    }
}
