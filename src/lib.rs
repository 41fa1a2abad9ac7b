//! # docindex
//!
//! Index PDF, Word (`.docx`) and PowerPoint (`.pptx`) documents into a local
//! vector store, with optional LLM-assisted extraction of images and tables.
//!
//! ## Why this crate?
//!
//! Plain text extraction loses what office documents carry outside their
//! paragraphs: a chart is a blank, a table is a jumble of cells. docindex
//! extracts text, tables and images as separate content units and decides per
//! unit whether to index the raw extraction, an LLM rendering of it, or both.
//! A failed model call never loses content: the unit falls back to its raw
//! rendering.
//!
//! ## Pipeline Overview
//!
//! ```text
//! directory
//!  │
//!  ├─ 1. Guard     path containment, size and extension limits
//!  ├─ 2. Extract   pdf / docx / pptx → text, table and image units
//!  ├─ 3. Select    text_only | hybrid | llm_only (Ollama, OpenAI, disabled)
//!  ├─ 4. Chunk     normalise, join, split at whitespace
//!  ├─ 5. Buffer    bounded accumulator → MiniLM embeddings → LanceDB
//!  └─ 6. Search    cosine ranking over stored chunks
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docindex::{search, Indexer, IndexerConfig, ParsingMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IndexerConfig::builder()
//!         .persist_dir("./docindex_db")
//!         .parsing_mode(ParsingMode::TextOnly)
//!         .build()?;
//!     let indexer = Indexer::open(config).await?;
//!     let summary = indexer.index_directory("./documents").await?;
//!     eprintln!("{} indexed, {} failed", summary.succeeded, summary.failed);
//!
//!     let hits = search(
//!         indexer.store().as_ref(),
//!         indexer.embedder().as_ref(),
//!         "invoice total",
//!         5,
//!     )
//!     .await?;
//!     for hit in hits {
//!         println!("{:.3} {}", hit.score, hit.metadata.file_name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `docindex` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `pdfium` | off     | Rasterise whole PDF pages for vision models instead of pulling embedded images |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docindex = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod chunk;
pub mod config;
pub mod document;
pub mod embed;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod llm;
pub mod normalize;
pub mod output;
pub mod progress;
pub mod prompts;
pub mod security;
pub mod store;
pub mod strategy;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::BatchAccumulator;
pub use chunk::chunk_document;
pub use config::{IndexerConfig, IndexerConfigBuilder, LlmProviderKind, LlmSettings, ParsingMode};
pub use document::{ContentUnit, Document, DocumentFormat, ImageBlob, Position, TableGrid, UnitKind};
pub use embed::{Embedder, FastEmbedder, HashingEmbedder};
pub use error::{DocumentError, FailureKind, IndexError, LlmError, StoreError};
pub use extract::{extract_document, ExtractOptions};
pub use indexer::{resolve_root, CancellationHandle, Indexer};
pub use llm::{build_provider, DisabledProvider, EnhancementProvider};
pub use output::{Chunk, ChunkMetadata, DocumentOutcome, IndexSummary, SearchResult, StoreStats};
pub use progress::{IndexProgressCallback, NoopProgressCallback, ProgressCallback};
pub use security::{check_file_limits, sanitize_for_prompt, validate_path, FileLimits};
pub use store::{search, LanceVectorStore, MemoryVectorStore, VectorStore};
pub use strategy::{EnhancedContent, Strategy, StrategySelector, HYBRID_DELIMITER};
