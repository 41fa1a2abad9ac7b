//! Output types: chunks, per-document outcomes, run summaries, search hits.

use crate::document::{DocumentFormat, UnitKind};
use crate::error::{DocumentError, FailureKind};
use crate::strategy::Strategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A bounded piece of text ready for embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Hex digest of source path and ordinal; stable across runs.
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Provenance stored with every chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_path: String,
    pub file_name: String,
    pub format: DocumentFormat,
    /// Page or slide of the first unit in the chunk, 1-based.
    pub page: usize,
    /// Unit index within that page, 0-based.
    pub index: usize,
    pub kind: UnitKind,
    pub strategy: Strategy,
    /// Position of the chunk within its document, 0-based.
    pub ordinal: usize,
    pub indexed_at: DateTime<Utc>,
}

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Indexed {
        path: PathBuf,
        chunks: usize,
    },
    Failed {
        path: PathBuf,
        kind: FailureKind,
        message: String,
    },
}

impl DocumentOutcome {
    pub(crate) fn failed(path: PathBuf, error: &DocumentError) -> Self {
        DocumentOutcome::Failed {
            path,
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        match self {
            DocumentOutcome::Indexed { path, .. } | DocumentOutcome::Failed { path, .. } => path,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DocumentOutcome::Indexed { .. })
    }
}

/// Aggregate result of an indexing run. Never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexSummary {
    /// Candidate files found by the directory walk.
    pub discovered: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// One entry per processed document, in processing order.
    pub outcomes: Vec<DocumentOutcome>,
    pub chunks_produced: usize,
    pub chunks_flushed: usize,
    pub flushes: usize,
    /// Largest number of chunks the accumulator held at once.
    pub peak_buffered: usize,
    pub llm_calls: usize,
    pub llm_fallbacks: usize,
    /// The run stopped early on request.
    pub cancelled: bool,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl IndexSummary {
    /// Outcomes that failed, in processing order.
    pub fn failures(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// One ranked hit from [`crate::store::search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    /// Cosine similarity clamped to `[0, 1]`.
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// Store-level statistics for the `stats` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub chunks: usize,
    /// Distinct source documents.
    pub documents: usize,
    /// Chunk count per document format.
    pub by_format: std::collections::BTreeMap<String, usize>,
    /// Chunk count per strategy.
    pub by_strategy: std::collections::BTreeMap<String, usize>,
    pub dimension: Option<usize>,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
