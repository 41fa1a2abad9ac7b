//! Batch indexing controller.
//!
//! ## Pipeline Overview
//!
//! ```text
//! directory
//!  │
//!  ├─ 1. Discover  walkdir, hidden entries skipped, extension filter, sorted
//!  │
//!  │   per document (sequential):
//!  ├─ 2. Guard     validate_path → check_file_limits
//!  ├─ 3. Extract   format extractor on the blocking pool
//!  ├─ 4. Select    raw / LLM / hybrid per unit (bounded concurrency)
//!  ├─ 5. Chunk     normalise, join, split
//!  ├─ 6. Replace   delete the document's previously stored chunks
//!  ├─ 7. Buffer    bounded accumulator; flush = embed + store.add
//!  │
//!  └─ 8. Summary   outcomes, counters, timings
//! ```
//!
//! ## Failure scopes
//!
//! A document that fails at steps 2–5 is recorded as a
//! [`DocumentOutcome::Failed`] and the loop moves on; its previously stored
//! chunks are left in place. A failed delete or flush is fatal:
//! the run returns [`IndexError::Store`] and batches flushed before it stay in
//! the store.
//!
//! ## Cancellation
//!
//! [`CancellationHandle::cancel`] is checked before each document. Chunks of
//! documents that were fully processed are still flushed.

use crate::batch::BatchAccumulator;
use crate::chunk::chunk_document;
use crate::config::IndexerConfig;
use crate::document::{Document, DocumentFormat};
use crate::embed::{Embedder, FastEmbedder};
use crate::error::{DocumentError, IndexError};
use crate::extract::{extract_document, ExtractOptions};
use crate::llm::{build_provider, EnhancementProvider};
use crate::output::{Chunk, DocumentOutcome, IndexSummary};
use crate::security::{check_file_limits, redact_secrets, validate_path, FileLimits};
use crate::store::{LanceVectorStore, VectorStore};
use crate::strategy::StrategySelector;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Cooperative stop signal, checked between documents.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives extraction, enhancement, chunking and storage for a corpus.
pub struct Indexer {
    config: IndexerConfig,
    provider: Arc<dyn EnhancementProvider>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    cancel: CancellationHandle,
}

impl Indexer {
    /// Assemble a controller from explicit collaborators.
    pub fn new(
        config: IndexerConfig,
        provider: Arc<dyn EnhancementProvider>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            config,
            provider,
            embedder,
            store,
            cancel: CancellationHandle::default(),
        }
    }

    /// Build the configured provider, the sentence embedder and the LanceDB
    /// store under `config.persist_dir`.
    ///
    /// Fails before touching any document when the provider is misconfigured
    /// (for example `openai` without `OPENAI_API_KEY`). The embedding model
    /// is downloaded on first use.
    pub async fn open(config: IndexerConfig) -> Result<Self, IndexError> {
        let provider = build_provider(&config)?;
        let embedder = FastEmbedder::load(config.model_cache_dir.clone()).await?;
        let store = LanceVectorStore::open(&config.persist_dir).await?;
        Ok(Self::new(config, provider, Arc::new(embedder), Arc::new(store)))
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// A handle that stops the run before the next document.
    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancel.clone()
    }

    /// Index every supported file below `root`.
    pub async fn index_directory(&self, root: impl AsRef<Path>) -> Result<IndexSummary, IndexError> {
        let root = resolve_root(root.as_ref()).await?;
        self.index_root(&root).await
    }

    /// Empty the store, then index `root`.
    ///
    /// `root` is resolved first; nothing is deleted when it is missing or not
    /// a directory.
    pub async fn rebuild_directory(&self, root: impl AsRef<Path>) -> Result<IndexSummary, IndexError> {
        let root = resolve_root(root.as_ref()).await?;
        self.store.clear().await?;
        info!("Cleared the vector store before indexing {}", root.display());
        self.index_root(&root).await
    }

    async fn index_root(&self, root: &Path) -> Result<IndexSummary, IndexError> {
        let limits = FileLimits::from_config(&self.config);
        let files = discover(root, &limits);
        info!("Found {} candidate files under {}", files.len(), root.display());
        self.run(root, files).await
    }

    /// Index one file, using its parent directory as the allowed root.
    pub async fn index_file(&self, path: impl AsRef<Path>) -> Result<IndexSummary, IndexError> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let root = resolve_root(&parent).await?;
        let file = root.join(path.file_name().unwrap_or_default());
        self.run(&root, vec![file]).await
    }

    async fn run(&self, root: &Path, files: Vec<PathBuf>) -> Result<IndexSummary, IndexError> {
        let start = Instant::now();
        let total = files.len();
        let callback = self.config.progress_callback.clone();
        let selector = StrategySelector::new(&self.config, Arc::clone(&self.provider));
        let mut summary = IndexSummary {
            discovered: total,
            ..Default::default()
        };

        if let Some(ref cb) = callback {
            cb.on_run_start(total);
        }
        if self.config.uses_llm() && !self.provider.is_available().await {
            warn!(
                "LLM provider '{}' is not reachable; units will fall back to raw content",
                self.provider.name()
            );
        }

        let mut acc = BatchAccumulator::new(self.config.batch_size, self.config.batch_max_bytes);

        for (i, path) in files.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Cancelled after {} of {} documents", i, total);
                summary.cancelled = true;
                break;
            }
            let n = i + 1;
            if let Some(ref cb) = callback {
                cb.on_document_start(n, total, path);
            }

            match self.process_document(root, path, &selector).await {
                Ok((source, chunks)) => {
                    let produced = chunks.len();
                    let stale = self.store.delete_by_source(&source).await?;
                    if stale > 0 {
                        debug!("Replacing {} stored chunks of {}", stale, source);
                    }
                    info!("Indexed {} ({} chunks)", path.display(), produced);
                    for chunk in chunks {
                        if acc.would_overflow(&chunk) {
                            self.flush(&mut acc, &mut summary).await?;
                        }
                        acc.push(chunk);
                        if acc.should_flush() {
                            self.flush(&mut acc, &mut summary).await?;
                        }
                    }
                    summary.chunks_produced += produced;
                    summary.succeeded += 1;
                    summary.outcomes.push(DocumentOutcome::Indexed {
                        path: path.clone(),
                        chunks: produced,
                    });
                    if let Some(ref cb) = callback {
                        cb.on_document_complete(n, total, path, produced);
                    }
                }
                Err(e) => {
                    let message = redact_secrets(&e.to_string());
                    warn!("Skipping {}: {}", path.display(), message);
                    summary.failed += 1;
                    summary.outcomes.push(DocumentOutcome::failed(path.clone(), &e));
                    if let Some(ref cb) = callback {
                        cb.on_document_error(n, total, path, &message);
                    }
                }
            }
        }

        self.flush(&mut acc, &mut summary).await?;

        summary.peak_buffered = acc.peak_len();
        summary.llm_calls = selector.llm_calls();
        summary.llm_fallbacks = selector.llm_fallbacks();
        summary.duration = start.elapsed();
        info!(
            "Indexing complete: {} succeeded, {} failed, {} chunks in {} flushes ({:?})",
            summary.succeeded, summary.failed, summary.chunks_flushed, summary.flushes, summary.duration
        );
        if let Some(ref cb) = callback {
            cb.on_run_complete(summary.succeeded, summary.failed);
        }
        Ok(summary)
    }

    async fn flush(&self, acc: &mut BatchAccumulator, summary: &mut IndexSummary) -> Result<(), IndexError> {
        let n = acc.flush(self.embedder.as_ref(), self.store.as_ref()).await?;
        if n == 0 {
            return Ok(());
        }
        summary.chunks_flushed += n;
        summary.flushes += 1;
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_flush(n, summary.chunks_flushed);
        }
        Ok(())
    }

    /// Guard, extract, enhance and chunk one file. Returns the source path
    /// recorded in chunk metadata along with the chunks.
    async fn process_document(
        &self,
        root: &Path,
        path: &Path,
        selector: &StrategySelector,
    ) -> Result<(String, Vec<Chunk>), DocumentError> {
        let canonical = validate_path(path, root)?;
        let size_bytes = check_file_limits(&canonical, &FileLimits::from_config(&self.config))?;
        let format = DocumentFormat::from_path(&canonical)
            .ok_or_else(|| DocumentError::security(&canonical, "unsupported document format"))?;
        let modified = std::fs::metadata(&canonical).and_then(|m| m.modified()).ok();
        let document = Document {
            path: canonical,
            format,
            size_bytes,
            modified,
        };

        let options = ExtractOptions {
            extract_images: self.config.extract_images,
        };
        let units = extract_document(&document, &options).await?;
        let enhanced = selector.enhance_document(&document, units).await;
        let chunks = chunk_document(&document, &enhanced, self.config.max_chunk_size);
        debug!(
            "{}: {} units → {} chunks",
            document.file_name(),
            enhanced.len(),
            chunks.len()
        );
        Ok((document.path.to_string_lossy().into_owned(), chunks))
    }
}

/// Canonicalise `root` and check that it is an existing directory.
pub async fn resolve_root(root: impl AsRef<Path>) -> Result<PathBuf, IndexError> {
    let root = root.as_ref();
    let canonical = tokio::fs::canonicalize(root)
        .await
        .map_err(|_| IndexError::DirectoryNotFound {
            path: root.to_path_buf(),
        })?;
    if !canonical.is_dir() {
        return Err(IndexError::NotADirectory { path: canonical });
    }
    Ok(canonical)
}

/// Sorted candidate files below `root`.
///
/// Symlinks are not followed while walking; a symlinked file is still listed
/// so [`validate_path`] can reject it when it points outside the root.
pub fn discover(root: &Path, limits: &FileLimits) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                warn!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|e| e.file_type().is_file() || e.file_type().is_symlink())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| limits.allows_extension(p))
        .collect();
    files.sort();
    files
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}
