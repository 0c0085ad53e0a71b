//! # Grimoire CLI
//!
//! Command-line interface for the question-answering service. All commands
//! accept a `--config` flag pointing to a TOML configuration file.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `grimoire serve` | Start the HTTP API |
//! | `grimoire ingest file <path>` | Chunk, embed, and index a document |
//! | `grimoire ingest text <text>` | Index a raw text snippet |
//! | `grimoire ask "<question>"` | Stream a grounded answer to stdout |
//! | `grimoire discussions list` | Show recent transcripts |
//! | `grimoire discussions delete <id>` | Delete one transcript |
//! | `grimoire sources list` | Show ingested sources |
//! | `grimoire sources delete <id>` | Delete one source |
//! | `grimoire status` | Vector count for the collection |

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use grimoire::app::App;
use grimoire::config;

/// Grimoire — a retrieval-augmented question-answering service.
#[derive(Parser)]
#[command(
    name = "grimoire",
    about = "A retrieval-augmented question-answering service",
    version,
    long_about = "Grimoire ingests documents (PDF, DOCX, plain text), indexes them for \
    semantic search, and answers questions by retrieving the closest passages and \
    streaming a generated answer while persisting the conversation."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/grimoire.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// ask/ingest/history endpoints.
    Serve,

    /// Ingest a document or raw text into the index.
    Ingest {
        #[command(subcommand)]
        what: IngestWhat,
    },

    /// Ask a question and stream the answer to stdout.
    ///
    /// Contributing source filenames are printed to stderr after the
    /// answer completes.
    Ask {
        /// The question text.
        question: String,

        /// Append to an existing discussion instead of starting a new one.
        #[arg(long)]
        discussion: Option<String>,
    },

    /// Manage conversation transcripts.
    Discussions {
        #[command(subcommand)]
        action: DiscussionAction,
    },

    /// Manage ingested sources.
    Sources {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Show how many vectors the collection holds.
    Status,
}

#[derive(Subcommand)]
enum IngestWhat {
    /// Ingest a document file (.pdf, .docx, .txt, .md).
    File {
        /// Path to the document.
        path: PathBuf,
    },
    /// Ingest a raw text snippet.
    Text {
        /// The text to index.
        text: String,
    },
}

#[derive(Subcommand)]
enum DiscussionAction {
    /// List recent transcripts, newest first.
    List {
        /// Maximum number of transcripts to show.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Delete a transcript by id.
    Delete {
        /// Discussion id.
        id: String,
    },
}

#[derive(Subcommand)]
enum SourceAction {
    /// List ingested sources, newest first.
    List,
    /// Delete a source (artifact + metadata) by id.
    Delete {
        /// Source id.
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    grimoire::logging::init(&cfg.logging.level);

    match cli.command {
        Commands::Serve => {
            grimoire::server::run_server(&cfg).await?;
        }
        Commands::Ingest { what } => {
            let app = App::build(cfg).await?;
            let receipt = match what {
                IngestWhat::File { path } => {
                    let bytes = std::fs::read(&path)?;
                    let filename = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    app.pipeline.ingest_document(&bytes, &filename).await?
                }
                IngestWhat::Text { text } => app.pipeline.ingest_text(&text).await?,
            };
            println!("ingested {}", receipt.filename);
            println!("  source id: {}", receipt.source_id);
            println!("  chunks: {}", receipt.chunk_count);
            println!("  vectors indexed: {}", receipt.vectors_indexed);
            println!("  artifact saved: {}", receipt.artifact_saved);
            println!("  metadata saved: {}", receipt.metadata_saved);
        }
        Commands::Ask {
            question,
            discussion,
        } => {
            let app = App::build(cfg).await?;
            let mut answer = app.orchestrator.ask(&question, discussion, Vec::new()).await?;

            let mut stdout = std::io::stdout();
            while let Some(fragment) = answer.tokens.recv().await {
                print!("{}", fragment);
                stdout.flush()?;
            }
            println!();
            answer.completion.await?;

            if !answer.filenames.is_empty() {
                let names: Vec<String> = answer.filenames.iter().cloned().collect();
                eprintln!("sources: {}", names.join(", "));
            }
            eprintln!("discussion: {}", answer.discussion_id);
        }
        Commands::Discussions { action } => {
            let store = grimoire::store::HistoryStore::open(&cfg.storage.root)?;
            match action {
                DiscussionAction::List { limit } => {
                    let discussions = store.list_discussions(limit)?;
                    if discussions.is_empty() {
                        println!("No discussions.");
                    }
                    for d in discussions {
                        println!("{}  ({} messages, created {})", d.id, d.messages.len(), d.created_at);
                        if let Some(first) = d.messages.first() {
                            println!("    {}: {}", first.role, truncate(&first.content, 80));
                        }
                    }
                }
                DiscussionAction::Delete { id } => {
                    if store.delete_discussion(&id)? {
                        println!("deleted {}", id);
                    } else {
                        println!("not found: {}", id);
                    }
                }
            }
        }
        Commands::Sources { action } => match action {
            SourceAction::List => {
                let store = grimoire::store::HistoryStore::open(&cfg.storage.root)?;
                let sources = store.list_sources()?;
                if sources.is_empty() {
                    println!("No sources.");
                }
                for s in sources {
                    println!("{}  {} ({} chunks, ingested {})", s.id, s.original_filename, s.chunk_count, s.ingested_at);
                }
            }
            SourceAction::Delete { id } => {
                // Deletion may also retract vectors, so it goes through
                // the pipeline rather than the bare store.
                let app = App::build(cfg).await?;
                if app.pipeline.delete_source(&id).await? {
                    println!("deleted {}", id);
                } else {
                    println!("not found: {}", id);
                }
            }
        },
        Commands::Status => {
            let app = App::build(cfg).await?;
            let count = app.index.count().await?;
            println!("collection: {}", app.config.index.collection);
            println!("vectors: {}", count);
        }
    }

    Ok(())
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let cut: String = text.chars().take(limit).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}
