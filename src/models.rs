//! Core data models used throughout Grimoire.
//!
//! These types represent the chunks, source records, transcripts, and
//! retrieval results that flow through the ingestion and answer pipeline.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A bounded slice of a source document's text, produced by the chunker.
///
/// `chunk_index` is a contiguous 0-based sequence within one document.
/// Content never exceeds the configured window size except implicitly for
/// the final chunk, which may be shorter.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub source_metadata: BTreeMap<String, String>,
    pub chunk_index: usize,
}

/// Persisted metadata for one ingested artifact. One record per ingestion
/// call, immutable after write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Timestamp-derived id; doubles as the metadata filename stem.
    pub id: String,
    pub original_filename: String,
    pub saved_path: String,
    pub chunk_count: usize,
    pub ingested_at: String,
    /// SHA-256 of the stored artifact bytes, for staleness detection.
    pub content_hash: String,
    pub chunk_previews: Vec<ChunkPreview>,
}

/// Summary of one chunk inside a [`SourceRecord`]. The preview is truncated;
/// full chunk content lives only in the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPreview {
    pub chunk_index: usize,
    pub content_length: usize,
    pub preview: String,
}

/// One message in a conversation. `role` is a free string on the wire:
/// anything other than `user`/`assistant` in supplied history is dropped
/// during prompt assembly, not rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Append-only per-conversation transcript. Mutated only by append, deleted
/// wholesale by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discussion {
    pub id: String,
    pub created_at: String,
    pub messages: Vec<ChatMessage>,
}

/// Consistency-log entry written after every answered (or failed) question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub id: String,
    pub timestamp: String,
    pub question: String,
    pub answer: String,
    pub context_used: String,
}

/// One surviving nearest-neighbor candidate.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    /// Distance in the index's native metric; always below the threshold.
    pub distance: f32,
}

/// Ephemeral per-query retrieval result, ordered ascending by distance.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub chunks: Vec<RetrievedChunk>,
    /// Surviving chunk texts joined with the fixed separator; empty when no
    /// candidate cleared the threshold.
    pub context: String,
    /// Deduplicated contributing source filenames.
    pub filenames: BTreeSet<String>,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Outcome of one ingestion call. The three writes are independent; each
/// flag reports whether its write succeeded so callers can surface partial
/// success instead of silently claiming all-or-nothing.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub source_id: String,
    pub filename: String,
    pub chunk_count: usize,
    pub vectors_indexed: bool,
    pub artifact_saved: bool,
    pub metadata_saved: bool,
}
