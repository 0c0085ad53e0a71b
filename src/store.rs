//! Filesystem-backed history store.
//!
//! Discussions, exchange records, and source artifacts live as JSON/raw
//! files under one root directory:
//!
//! ```text
//! <root>/discussions/<discussion_id>.json      transcripts
//! <root>/exchanges/<exchange_id>.json          question/answer/context log
//! <root>/sources/<saved_filename>              original artifacts
//! <root>/sources/<source_id>.json              SourceRecord metadata
//! ```
//!
//! Record ids start with a `YYYYmmdd_HHMMSS` timestamp so reverse
//! lexicographic filename order is newest-first; a uuid suffix keeps two
//! writes in the same second from colliding. The layout is deliberately a
//! key-value store (put/get/list/delete) so a real database could replace
//! it without touching the ingestion or orchestration contracts.
//!
//! Appends to one discussion are serialized through a per-handle async
//! mutex; appends to different discussions do not contend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ChatMessage, Discussion, ExchangeRecord, SourceRecord};

pub struct HistoryStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl HistoryStore {
    /// Open the store rooted at `root`, creating the directory layout if
    /// missing.
    pub fn open(root: &Path) -> Result<Self> {
        for dir in ["discussions", "exchanges", "sources"] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn discussions_dir(&self) -> PathBuf {
        self.root.join("discussions")
    }

    fn exchanges_dir(&self) -> PathBuf {
        self.root.join("exchanges")
    }

    fn sources_dir(&self) -> PathBuf {
        self.root.join("sources")
    }

    /// Mint a fresh discussion handle.
    pub fn new_discussion_id(&self) -> String {
        timestamp_id("discussion")
    }

    async fn lock_for(&self, handle: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(handle.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Append one message to a discussion transcript, creating the
    /// transcript if the handle does not exist yet.
    pub async fn append_message(&self, handle: &str, message: ChatMessage) -> Result<()> {
        validate_record_id(handle)?;
        let lock = self.lock_for(handle).await;
        let _guard = lock.lock().await;

        let path = self.discussions_dir().join(format!("{}.json", handle));
        let mut discussion = if path.exists() {
            read_json::<Discussion>(&path)?
        } else {
            Discussion {
                id: handle.to_string(),
                created_at: Utc::now().to_rfc3339(),
                messages: Vec::new(),
            }
        };
        discussion.messages.push(message);
        write_json(&path, &discussion)
    }

    /// Newest-first transcripts, at most `limit`.
    pub fn list_discussions(&self, limit: usize) -> Result<Vec<Discussion>> {
        let names = list_json_stems(&self.discussions_dir())?;
        let mut discussions = Vec::new();
        for name in names.into_iter().take(limit) {
            let path = self.discussions_dir().join(format!("{}.json", name));
            match read_json::<Discussion>(&path) {
                Ok(d) => discussions.push(d),
                Err(e) => tracing::warn!(file = %path.display(), error = %e, "skipping unreadable discussion"),
            }
        }
        Ok(discussions)
    }

    /// Delete one transcript. `false` when the id does not exist.
    pub fn delete_discussion(&self, id: &str) -> Result<bool> {
        validate_record_id(id)?;
        let path = self.discussions_dir().join(format!("{}.json", id));
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)?;
        Ok(true)
    }

    /// Write one consistency-log entry for a completed (or failed)
    /// exchange. Returns the record id.
    pub fn record_exchange(
        &self,
        question: &str,
        answer: &str,
        context_used: &str,
    ) -> Result<String> {
        let id = timestamp_id("exchange");
        let record = ExchangeRecord {
            id: id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            question: question.to_string(),
            answer: answer.to_string(),
            context_used: context_used.to_string(),
        };
        let path = self.exchanges_dir().join(format!("{}.json", id));
        write_json(&path, &record)?;
        Ok(id)
    }

    /// Mint the id that will key one source's metadata record.
    pub fn new_source_id(&self) -> String {
        timestamp_id("metadata")
    }

    /// Newest-first exchange records, at most `limit`.
    pub fn list_exchanges(&self, limit: usize) -> Result<Vec<ExchangeRecord>> {
        let names = list_json_stems(&self.exchanges_dir())?;
        let mut exchanges = Vec::new();
        for name in names.into_iter().take(limit) {
            let path = self.exchanges_dir().join(format!("{}.json", name));
            match read_json::<ExchangeRecord>(&path) {
                Ok(r) => exchanges.push(r),
                Err(e) => tracing::warn!(file = %path.display(), error = %e, "skipping unreadable exchange"),
            }
        }
        Ok(exchanges)
    }

    /// Persist the original artifact bytes and return the saved path.
    pub fn save_artifact(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let saved_name = format!("{}_{}", stamp, sanitize_filename(filename));
        let path = self.sources_dir().join(&saved_name);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Write the metadata record for one ingested source.
    pub fn write_source_record(&self, record: &SourceRecord) -> Result<()> {
        validate_record_id(&record.id)?;
        let path = self.sources_dir().join(format!("{}.json", record.id));
        write_json(&path, record)
    }

    /// Newest-first source metadata records.
    pub fn list_sources(&self) -> Result<Vec<SourceRecord>> {
        let names = list_json_stems(&self.sources_dir())?;
        let mut sources = Vec::new();
        for name in names {
            let path = self.sources_dir().join(format!("{}.json", name));
            match read_json::<SourceRecord>(&path) {
                Ok(r) => sources.push(r),
                Err(e) => tracing::warn!(file = %path.display(), error = %e, "skipping unreadable source record"),
            }
        }
        Ok(sources)
    }

    /// Remove one source's artifact and metadata record. `false` when the
    /// metadata record is missing; a missing artifact alone is logged, not
    /// fatal.
    pub fn delete_source(&self, id: &str) -> Result<Option<SourceRecord>> {
        validate_record_id(id)?;
        let meta_path = self.sources_dir().join(format!("{}.json", id));
        if !meta_path.exists() {
            return Ok(None);
        }
        let record = read_json::<SourceRecord>(&meta_path)?;

        let artifact = PathBuf::from(&record.saved_path);
        if artifact.exists() {
            if let Err(e) = std::fs::remove_file(&artifact) {
                tracing::warn!(file = %artifact.display(), error = %e, "failed to remove artifact");
            }
        } else {
            tracing::warn!(file = %artifact.display(), "artifact already missing");
        }

        std::fs::remove_file(&meta_path)?;
        Ok(Some(record))
    }
}

fn timestamp_id(kind: &str) -> String {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", kind, stamp, &suffix[..8])
}

/// Record ids become filenames; refuse anything that could escape the
/// store root.
fn validate_record_id(id: &str) -> Result<()> {
    if id.is_empty()
        || id.contains('/')
        || id.contains('\\')
        || id.contains("..")
    {
        return Err(Error::InvalidInput(format!("invalid record id: {:?}", id)));
    }
    Ok(())
}

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// JSON file stems in reverse lexicographic order (ids embed timestamps,
/// so this is newest-first).
fn list_json_stems(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(stem) = name.strip_suffix(".json") {
            names.push(stem.to_string());
        }
    }
    names.sort();
    names.reverse();
    Ok(names)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)?;
    Ok(())
}
