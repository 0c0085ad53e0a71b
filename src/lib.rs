//! # Grimoire
//!
//! A retrieval-augmented question-answering service: ingest documents,
//! index them for semantic search, and answer questions by streaming a
//! generated answer grounded on the closest passages while persisting the
//! conversation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌───────────────┐
//! │  Documents    │──▶│   Ingestion    │──▶│  Vector index  │
//! │  PDF/DOCX/txt │   │  Chunk+Embed  │   │  (Chroma)     │
//! └──────────────┘   └───────┬───────┘   └───────┬───────┘
//!                            │                   │
//!                            ▼                   ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │   History    │◀────│  Retriever + │──▶ streamed
//!                     │   store      │     │ Orchestrator │    answer
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! grimoire ingest file ./manual.pdf     # chunk, embed, index a document
//! grimoire ingest text "The sky is blue."
//! grimoire ask "Why is the sky blue?"   # streamed, grounded answer
//! grimoire serve                        # HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Overlapping-window text chunking |
//! | [`extract`] | Binary document text extraction |
//! | [`embedding`] | Embedding capability (OpenAI) |
//! | [`index`] | Vector index capability (Chroma, in-memory) |
//! | [`generate`] | Streaming completion capability (OpenAI) |
//! | [`ingest`] | Ingestion pipeline |
//! | [`search`] | Similarity retrieval and context assembly |
//! | [`ask`] | Conversation orchestration |
//! | [`store`] | Filesystem history store |
//! | [`server`] | HTTP transport |

pub mod app;
pub mod ask;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod search;
pub mod server;
pub mod store;
