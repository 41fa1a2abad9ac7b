//! Vector store adapters.
//!
//! The controller only sees the [`VectorStore`] trait. Two adapters ship with
//! the crate:
//!
//! * [`LanceVectorStore`] keeps chunks in an embedded LanceDB table under the
//!   persist directory. Every write is a committed table version, so an
//!   interrupted run leaves the last committed state readable.
//! * [`MemoryVectorStore`] keeps records in a map for brute-force cosine
//!   search, for tests and library users that bring their own persistence.

mod lance;

pub use lance::{LanceVectorStore, TABLE_NAME};

use crate::embed::{cosine, Embedder};
use crate::error::{IndexError, StoreError};
use crate::output::{ChunkMetadata, SearchResult, StoreStats};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;

/// Storage for embedded chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert a batch by id. All four vectors must have the same length.
    async fn add(
        &self,
        ids: Vec<String>,
        texts: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<ChunkMetadata>,
    ) -> Result<(), StoreError>;

    /// Up to `n_results` records ranked by descending cosine similarity.
    async fn query(&self, embedding: &[f32], n_results: usize)
        -> Result<Vec<SearchResult>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Remove every record whose `source_path` equals `source_path`.
    /// Returns how many were removed.
    async fn delete_by_source(&self, source_path: &str) -> Result<usize, StoreError>;

    /// Remove every record.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// Check that the four columns of an `add` batch line up.
pub(crate) fn check_batch(
    ids: &[String],
    texts: &[String],
    embeddings: &[Vec<f32>],
    metadatas: &[ChunkMetadata],
) -> Result<(), StoreError> {
    if ids.len() != texts.len() || ids.len() != embeddings.len() || ids.len() != metadatas.len() {
        return Err(StoreError::MismatchedBatch {
            ids: ids.len(),
            texts: texts.len(),
            embeddings: embeddings.len(),
            metadatas: metadatas.len(),
        });
    }
    Ok(())
}

/// Every embedding must be `expected` wide, or as wide as the first one.
pub(crate) fn check_dimension(
    expected: Option<usize>,
    embeddings: &[Vec<f32>],
) -> Result<Option<usize>, StoreError> {
    let expected = expected.or_else(|| embeddings.first().map(Vec::len));
    if let Some(expected) = expected {
        if let Some(bad) = embeddings.iter().find(|e| e.len() != expected) {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }
    }
    Ok(expected)
}

/// Aggregate per-format and per-strategy counts over stored metadata.
pub(crate) fn summarize<'a>(
    metadatas: impl Iterator<Item = &'a ChunkMetadata>,
    dimension: Option<usize>,
) -> StoreStats {
    let mut stats = StoreStats {
        dimension,
        ..Default::default()
    };
    let mut documents = BTreeSet::new();
    for m in metadatas {
        stats.chunks += 1;
        documents.insert(m.source_path.as_str());
        *stats
            .by_format
            .entry(m.format.as_str().to_string())
            .or_default() += 1;
        *stats
            .by_strategy
            .entry(m.strategy.as_str().to_string())
            .or_default() += 1;
        stats.last_indexed_at = stats.last_indexed_at.max(Some(m.indexed_at));
    }
    stats.documents = documents.len();
    stats
}

/// Embed `query` and return at most `limit` results by descending score.
pub async fn search(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    query: &str,
    limit: usize,
) -> Result<Vec<SearchResult>, IndexError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(IndexError::InvalidQuery("query cannot be empty".into()));
    }
    if limit == 0 {
        return Err(IndexError::InvalidQuery("limit must be positive".into()));
    }
    let embedding = embedder.embed_query(query)?;
    let mut results = store.query(&embedding, limit).await?;
    results.truncate(limit);
    Ok(results)
}

// ── Shared index ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Record {
    id: String,
    text: String,
    embedding: Vec<f32>,
    metadata: ChunkMetadata,
}

#[derive(Debug, Default)]
struct Index {
    records: BTreeMap<String, Record>,
    dimension: Option<usize>,
}

impl Index {
    fn validate(
        &self,
        ids: &[String],
        texts: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> Result<(), StoreError> {
        check_batch(ids, texts, embeddings, metadatas)?;
        check_dimension(self.dimension, embeddings).map(|_| ())
    }

    fn insert(&mut self, record: Record) {
        self.dimension.get_or_insert(record.embedding.len());
        self.records.insert(record.id.clone(), record);
    }

    fn query(&self, embedding: &[f32], n_results: usize) -> Result<Vec<SearchResult>, StoreError> {
        if let Some(expected) = self.dimension {
            if embedding.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }
        let mut scored: Vec<(f32, &Record)> = self
            .records
            .values()
            .map(|r| (cosine(embedding, &r.embedding), r))
            .collect();
        // Ties keep id order so results are reproducible.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(n_results)
            .map(|(score, r)| SearchResult {
                content: r.text.clone(),
                score,
                metadata: r.metadata.clone(),
            })
            .collect())
    }

    fn stats(&self) -> StoreStats {
        summarize(self.records.values().map(|r| &r.metadata), self.dimension)
    }

    fn delete_by_source(&mut self, source_path: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.metadata.source_path != source_path);
        before - self.records.len()
    }
}

fn records(
    ids: Vec<String>,
    texts: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    metadatas: Vec<ChunkMetadata>,
) -> impl Iterator<Item = Record> {
    ids.into_iter()
        .zip(texts)
        .zip(embeddings)
        .zip(metadatas)
        .map(|(((id, text), embedding), metadata)| Record {
            id,
            text,
            embedding,
            metadata,
        })
}

// ── In-memory adapter ────────────────────────────────────────────────────

/// Vector store without persistence.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    index: Mutex<Index>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add(
        &self,
        ids: Vec<String>,
        texts: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<ChunkMetadata>,
    ) -> Result<(), StoreError> {
        let mut index = self.index.lock().await;
        index.validate(&ids, &texts, &embeddings, &metadatas)?;
        for record in records(ids, texts, embeddings, metadatas) {
            index.insert(record);
        }
        Ok(())
    }

    async fn query(&self, embedding: &[f32], n_results: usize) -> Result<Vec<SearchResult>, StoreError> {
        self.index.lock().await.query(embedding, n_results)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.index.lock().await.records.len())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(self.index.lock().await.stats())
    }

    async fn delete_by_source(&self, source_path: &str) -> Result<usize, StoreError> {
        Ok(self.index.lock().await.delete_by_source(source_path))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.index.lock().await = Index::default();
        Ok(())
    }
}
