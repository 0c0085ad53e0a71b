//! Vector index capability and implementations.
//!
//! The index is an external shared service as far as the pipeline is
//! concerned: upsert points, ask for nearest neighbors, delete, count.
//! Two backends:
//! - **[`ChromaIndex`]** — a Chroma server over its REST API.
//! - **[`MemoryIndex`]** — in-process store using cosine distance; used for
//!   the `memory` provider and throughout the tests.
//!
//! Both return query candidates ordered ascending by distance (closest
//! first) in the backend's native metric. Threshold filtering happens in
//! the retriever, not here.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::IndexConfig;
use crate::error::{Error, Result};

/// One vector plus its payload, keyed by a caller-chosen id. Upserting an
/// existing id overwrites the prior point.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

/// A nearest-neighbor candidate with its distance to the query.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub text: String,
    pub metadata: BTreeMap<String, String>,
    pub distance: f32,
}

/// Capability: nearest-neighbor search over embedding vectors.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()>;

    /// `top_k` candidates ordered ascending by distance.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredPoint>>;

    /// Delete every point whose metadata filename matches. Returns the
    /// number of points known to be removed (0 for backends that cannot
    /// report it).
    async fn delete_by_filename(&self, filename: &str) -> Result<usize>;

    async fn count(&self) -> Result<usize>;
}

/// Create the configured index backend.
pub async fn connect(config: &IndexConfig) -> Result<Box<dyn VectorIndex>> {
    match config.provider.as_str() {
        "memory" => Ok(Box::new(MemoryIndex::new())),
        "chroma" => Ok(Box::new(ChromaIndex::connect(config).await?)),
        other => Err(Error::IndexUnavailable(format!(
            "unknown index provider: {}",
            other
        ))),
    }
}

// ============ In-memory index ============

/// In-process vector index. Native metric: cosine distance
/// (`1 - cosine_similarity`), so identical vectors are at distance 0 and
/// unrelated ones near 1.
#[derive(Default)]
pub struct MemoryIndex {
    points: RwLock<HashMap<String, VectorPoint>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        let mut store = self.points.write().await;
        for p in points {
            store.insert(p.id.clone(), p);
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredPoint>> {
        let store = self.points.read().await;
        let mut scored: Vec<ScoredPoint> = store
            .values()
            .map(|p| ScoredPoint {
                text: p.text.clone(),
                metadata: p.metadata.clone(),
                distance: 1.0 - cosine_similarity(vector, &p.vector),
            })
            .collect();
        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_by_filename(&self, filename: &str) -> Result<usize> {
        let mut store = self.points.write().await;
        let before = store.len();
        store.retain(|_, p| p.metadata.get("filename").map(String::as_str) != Some(filename));
        Ok(before - store.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.points.read().await.len())
    }
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched
/// vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

// ============ Chroma index ============

/// Vector index backed by a Chroma server. Distances come back in the
/// collection's native metric and are passed through untouched.
pub struct ChromaIndex {
    client: reqwest::Client,
    base_url: String,
    collection_id: String,
}

impl ChromaIndex {
    /// Resolve (or create) the configured collection and return a handle
    /// bound to it.
    pub async fn connect(config: &IndexConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::IndexUnavailable(e.to_string()))?;

        let base_url = config.url.trim_end_matches('/').to_string();

        let resp = client
            .post(format!("{}/api/v1/collections", base_url))
            .json(&serde_json::json!({
                "name": config.collection,
                "get_or_create": true,
            }))
            .send()
            .await
            .map_err(|e| Error::IndexUnavailable(format!("chroma unreachable: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::IndexUnavailable(format!(
                "chroma collection error {}: {}",
                status, body
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::IndexUnavailable(e.to_string()))?;
        let collection_id = json
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::IndexUnavailable("chroma response missing collection id".to_string()))?
            .to_string();

        Ok(Self {
            client,
            base_url,
            collection_id,
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!(
            "{}/api/v1/collections/{}/{}",
            self.base_url, self.collection_id, suffix
        )
    }

    async fn post_json(&self, url: String, body: serde_json::Value) -> Result<serde_json::Value> {
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::IndexUnavailable(format!("chroma unreachable: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::IndexUnavailable(format!(
                "chroma error {}: {}",
                status, body
            )));
        }
        resp.json()
            .await
            .map_err(|e| Error::IndexUnavailable(e.to_string()))
    }
}

#[async_trait]
impl VectorIndex for ChromaIndex {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = points.iter().map(|p| p.id.as_str()).collect();
        let embeddings: Vec<&[f32]> = points.iter().map(|p| p.vector.as_slice()).collect();
        let documents: Vec<&str> = points.iter().map(|p| p.text.as_str()).collect();
        let metadatas: Vec<&BTreeMap<String, String>> =
            points.iter().map(|p| &p.metadata).collect();

        self.post_json(
            self.collection_url("upsert"),
            serde_json::json!({
                "ids": ids,
                "embeddings": embeddings,
                "documents": documents,
                "metadatas": metadatas,
            }),
        )
        .await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredPoint>> {
        let json = self
            .post_json(
                self.collection_url("query"),
                serde_json::json!({
                    "query_embeddings": [vector],
                    "n_results": top_k,
                    "include": ["documents", "metadatas", "distances"],
                }),
            )
            .await?;

        let documents = first_batch(&json, "documents");
        let metadatas = first_batch(&json, "metadatas");
        let distances = first_batch(&json, "distances");

        let mut results = Vec::new();
        for (i, doc) in documents.iter().enumerate() {
            let text = doc.as_str().unwrap_or_default().to_string();
            let metadata: BTreeMap<String, String> = metadatas
                .get(i)
                .and_then(|m| m.as_object())
                .map(|obj| {
                    obj.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            let distance = distances
                .get(i)
                .and_then(|d| d.as_f64())
                .unwrap_or(f64::MAX) as f32;
            results.push(ScoredPoint {
                text,
                metadata,
                distance,
            });
        }
        // Chroma already returns ascending distances; keep the guarantee
        // even if a backend version does not.
        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }

    async fn delete_by_filename(&self, filename: &str) -> Result<usize> {
        let json = self
            .post_json(
                self.collection_url("delete"),
                serde_json::json!({
                    "where": { "filename": filename },
                }),
            )
            .await?;
        Ok(json.as_array().map(|ids| ids.len()).unwrap_or(0))
    }

    async fn count(&self) -> Result<usize> {
        let resp = self
            .client
            .get(self.collection_url("count"))
            .send()
            .await
            .map_err(|e| Error::IndexUnavailable(format!("chroma unreachable: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::IndexUnavailable(format!(
                "chroma error {}: {}",
                status, body
            )));
        }
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::IndexUnavailable(e.to_string()))?;
        Ok(json.as_u64().unwrap_or(0) as usize)
    }
}

/// Chroma nests query results one level per query vector; we always send
/// exactly one, so take the first row.
fn first_batch<'a>(json: &'a serde_json::Value, key: &str) -> Vec<&'a serde_json::Value> {
    json.get(key)
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .and_then(|row| row.as_array())
        .map(|items| items.iter().collect())
        .unwrap_or_default()
}
