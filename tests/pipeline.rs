//! End-to-end runs of the indexing controller over generated corpora.

mod common;

use common::{
    docx, para, pdf_with_pages, pptx, slide, word_table, write, EchoProvider, FailingProvider,
    FlakyStore, RecordingStore,
};
use docindex::{
    search, CancellationHandle, DisabledProvider, DocumentOutcome, Embedder, EnhancementProvider,
    FailureKind, HashingEmbedder, IndexError, IndexProgressCallback, Indexer, IndexerConfig,
    LlmProviderKind, MemoryVectorStore, ParsingMode, Strategy, VectorStore, HYBRID_DELIMITER,
};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, OnceLock};

fn indexer_with(
    config: IndexerConfig,
    provider: Arc<dyn EnhancementProvider>,
    store: Arc<dyn VectorStore>,
) -> Indexer {
    Indexer::new(config, provider, Arc::new(HashingEmbedder::new(64)), store)
}

fn text_only() -> IndexerConfig {
    IndexerConfig::builder()
        .parsing_mode(ParsingMode::TextOnly)
        .build()
        .unwrap()
}

// ── Mixed corpus ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn corrupt_document_does_not_stop_the_run() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "report.pdf",
        &pdf_with_pages(&["Invoice total", "Payment terms", "Appendix"]),
    );
    write(dir.path(), "broken.docx", b"this is not a zip archive");

    let store = Arc::new(MemoryVectorStore::new());
    let indexer = indexer_with(text_only(), Arc::new(DisabledProvider), store.clone());
    let summary = indexer.index_directory(dir.path()).await.unwrap();

    assert_eq!(summary.discovered, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.llm_calls, 0);
    assert!(!summary.cancelled);

    let failure = summary.failures().next().unwrap();
    match failure {
        DocumentOutcome::Failed { path, kind, .. } => {
            assert!(path.ends_with("broken.docx"));
            assert_eq!(*kind, FailureKind::ParseError);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let pdf_chunks = summary
        .outcomes
        .iter()
        .find_map(|o| match o {
            DocumentOutcome::Indexed { chunks, .. } => Some(*chunks),
            _ => None,
        })
        .unwrap();
    assert_eq!(pdf_chunks, 3);
    assert_eq!(store.count().await.unwrap(), pdf_chunks);
    assert_eq!(summary.chunks_flushed, pdf_chunks);
}

#[tokio::test]
async fn search_ranks_matching_pages_first() {
    let dir = tempfile::tempdir().unwrap();
    let pages = [
        "Invoice total due 4200 EUR",
        "Shipping address and delivery notes",
        "Terms and conditions of sale",
        "Warranty information",
        "Product catalogue overview",
        "Customer support contacts",
        "Return policy for damaged goods",
        "Appendix with technical drawings",
        "Glossary of abbreviations",
        "Revision history",
    ];
    write(dir.path(), "invoice.pdf", &pdf_with_pages(&pages));

    let store = Arc::new(MemoryVectorStore::new());
    let embedder = HashingEmbedder::default();
    let indexer = Indexer::new(
        text_only(),
        Arc::new(DisabledProvider),
        Arc::new(embedder),
        store.clone(),
    );
    let summary = indexer.index_directory(dir.path()).await.unwrap();
    assert_eq!(summary.chunks_flushed, 10);

    let hits = search(store.as_ref(), &embedder, "invoice total", 3).await.unwrap();
    assert!(!hits.is_empty() && hits.len() <= 3);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(hits[0].content.contains("Invoice"), "top hit: {:?}", hits[0].content);
    assert_eq!(hits[0].metadata.file_name, "invoice.pdf");
    assert_eq!(hits[0].metadata.page, 1);
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let store = MemoryVectorStore::new();
    let err = search(&store, &HashingEmbedder::new(8), "   ", 3)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::InvalidQuery(_)));
}

// ── Configuration failures ───────────────────────────────────────────────────

#[tokio::test]
async fn openai_without_key_fails_before_reading_files() {
    std::env::remove_var("OPENAI_API_KEY");
    let dir = tempfile::tempdir().unwrap();
    let config = IndexerConfig::builder()
        .persist_dir(dir.path().join("db"))
        .llm_provider(LlmProviderKind::OpenAi)
        .parsing_mode(ParsingMode::Hybrid)
        .build()
        .unwrap();

    let err = match Indexer::open(config).await {
        Ok(_) => panic!("indexer opened without a credential"),
        Err(e) => e,
    };
    match err {
        IndexError::MissingCredential { variable, .. } => assert_eq!(variable, "OPENAI_API_KEY"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!dir.path().join("db").exists());
}

#[tokio::test]
async fn missing_directory_is_fatal() {
    let indexer = indexer_with(
        text_only(),
        Arc::new(DisabledProvider),
        Arc::new(MemoryVectorStore::new()),
    );
    let err = indexer
        .index_directory("/no/such/docindex/corpus")
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::DirectoryNotFound { .. }));
}

// ── LLM strategies ───────────────────────────────────────────────────────────

#[tokio::test]
async fn hybrid_keeps_raw_tables_when_the_provider_fails() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!(
        "{}{}{}",
        para("Quarterly results"),
        word_table(&[&["Quarter", "Revenue"], &["Q1", "120"]]),
        para("Prepared by finance")
    );
    write(dir.path(), "results.docx", &docx(&body));

    let provider = Arc::new(FailingProvider::default());
    let store = Arc::new(MemoryVectorStore::new());
    let config = IndexerConfig::builder()
        .parsing_mode(ParsingMode::Hybrid)
        .build()
        .unwrap();
    let indexer = indexer_with(config, provider.clone(), store.clone());
    let summary = indexer.index_directory(dir.path()).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.llm_calls, 1);
    assert_eq!(summary.llm_fallbacks, 1);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    let hits = search(store.as_ref(), &HashingEmbedder::new(64), "revenue quarter", 10)
        .await
        .unwrap();
    let table = hits
        .iter()
        .find(|h| h.metadata.strategy == Strategy::Fallback)
        .expect("fallback table chunk");
    assert!(table.content.contains("Q1 | 120"), "got {:?}", table.content);
    assert!(hits.iter().any(|h| h.content.contains("Quarterly results")));
}

#[tokio::test]
async fn hybrid_prefixes_llm_output_to_raw_tables() {
    let dir = tempfile::tempdir().unwrap();
    let deck = pptx(&[slide(&[&["Roadmap"], &["Ship the indexer"]])]);
    write(dir.path(), "deck.pptx", &deck);
    write(
        dir.path(),
        "table.docx",
        &docx(&word_table(&[&["Owner", "Task"], &["Ana", "Parser"]])),
    );

    let store = Arc::new(MemoryVectorStore::new());
    let config = IndexerConfig::builder()
        .parsing_mode(ParsingMode::Hybrid)
        .build()
        .unwrap();
    let indexer = indexer_with(config, Arc::new(EchoProvider), store.clone());
    let summary = indexer.index_directory(dir.path()).await.unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.llm_fallbacks, 0);

    let hits = search(store.as_ref(), &HashingEmbedder::new(64), "owner task parser", 10)
        .await
        .unwrap();
    let merged = hits
        .iter()
        .find(|h| h.metadata.strategy == Strategy::HybridMerged)
        .expect("merged table chunk");
    assert!(merged.content.starts_with("Structured: Owner"));
    assert!(merged.content.contains(HYBRID_DELIMITER.trim()));
    assert!(merged.content.ends_with("Ana | Parser"));

    let slide_text = hits
        .iter()
        .find(|h| h.metadata.file_name == "deck.pptx")
        .expect("slide chunk");
    assert_eq!(slide_text.metadata.strategy, Strategy::Raw);
}

#[tokio::test]
async fn text_only_never_calls_the_provider() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "table.docx",
        &docx(&word_table(&[&["a", "b"], &["c", "d"]])),
    );
    let provider = Arc::new(FailingProvider::default());
    let indexer = indexer_with(text_only(), provider.clone(), Arc::new(MemoryVectorStore::new()));
    let summary = indexer.index_directory(dir.path()).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.llm_calls, 0);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

// ── Determinism and batching ─────────────────────────────────────────────────

#[tokio::test]
async fn reindexing_produces_the_same_ids() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.pdf", &pdf_with_pages(&["Alpha", "Beta"]));
    write(dir.path(), "sub/b.docx", &docx(&para("Gamma delta")));

    let mut runs = Vec::new();
    for _ in 0..2 {
        let store = Arc::new(RecordingStore::default());
        let indexer = indexer_with(text_only(), Arc::new(DisabledProvider), store.clone());
        indexer.index_directory(dir.path()).await.unwrap();
        runs.push(store.ids.lock().unwrap().clone());
    }
    assert_eq!(runs[0].len(), 3);
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn reindexing_a_shrunk_document_drops_stale_chunks() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "contract.pdf",
        &pdf_with_pages(&["Payment terms", "Delivery schedule", "Obsolete clause zebra"]),
    );

    let store = Arc::new(MemoryVectorStore::new());
    let indexer = indexer_with(text_only(), Arc::new(DisabledProvider), store.clone());
    indexer.index_directory(dir.path()).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 3);

    write(dir.path(), "contract.pdf", &pdf_with_pages(&["Payment terms"]));
    let summary = indexer.index_directory(dir.path()).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(store.count().await.unwrap(), 1);

    let hits = search(store.as_ref(), &HashingEmbedder::new(64), "obsolete clause zebra", 10)
        .await
        .unwrap();
    assert!(hits.iter().all(|h| !h.content.contains("Obsolete")), "{hits:?}");
}

#[tokio::test]
async fn other_documents_survive_a_reindex() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.pdf", &pdf_with_pages(&["Alpha", "Beta"]));
    write(dir.path(), "b.docx", &docx(&para("Gamma delta")));

    let store = Arc::new(MemoryVectorStore::new());
    let indexer = indexer_with(text_only(), Arc::new(DisabledProvider), store.clone());
    indexer.index_directory(dir.path()).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 3);

    indexer.index_directory(dir.path()).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 3);
}

#[tokio::test]
async fn rebuild_keeps_the_store_when_the_root_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.pdf", &pdf_with_pages(&["Alpha", "Beta"]));

    let store = Arc::new(MemoryVectorStore::new());
    let indexer = indexer_with(text_only(), Arc::new(DisabledProvider), store.clone());
    indexer.index_directory(dir.path()).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 2);

    let err = indexer
        .rebuild_directory(dir.path().join("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::DirectoryNotFound { .. }), "{err:?}");
    assert_eq!(store.count().await.unwrap(), 2);

    let err = indexer
        .rebuild_directory(dir.path().join("a.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::NotADirectory { .. }), "{err:?}");
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn rebuild_replaces_documents_from_an_earlier_root() {
    let old = tempfile::tempdir().unwrap();
    write(old.path(), "old.pdf", &pdf_with_pages(&["Retired handbook"]));
    let new = tempfile::tempdir().unwrap();
    write(new.path(), "new.docx", &docx(&para("Current handbook")));

    let store = Arc::new(MemoryVectorStore::new());
    let indexer = indexer_with(text_only(), Arc::new(DisabledProvider), store.clone());
    indexer.index_directory(old.path()).await.unwrap();

    let summary = indexer.rebuild_directory(new.path()).await.unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(store.count().await.unwrap(), 1);
    let stats = store.stats().await.unwrap();
    assert!(stats.by_format.contains_key("word"), "{stats:?}");
    assert!(!stats.by_format.contains_key("pdf"), "{stats:?}");
}

#[tokio::test]
async fn accumulator_never_exceeds_batch_size() {
    let dir = tempfile::tempdir().unwrap();
    let pages: Vec<String> = (1..=7).map(|i| format!("Page number {i}")).collect();
    let refs: Vec<&str> = pages.iter().map(String::as_str).collect();
    write(dir.path(), "long.pdf", &pdf_with_pages(&refs));
    write(dir.path(), "short.pdf", &pdf_with_pages(&["One", "Two"]));

    let store = Arc::new(RecordingStore::default());
    let config = IndexerConfig::builder()
        .parsing_mode(ParsingMode::TextOnly)
        .batch_size(3)
        .build()
        .unwrap();
    let indexer = indexer_with(config, Arc::new(DisabledProvider), store.clone());
    let summary = indexer.index_directory(dir.path()).await.unwrap();

    let sizes = store.batch_sizes();
    assert!(sizes.iter().all(|&n| (1..=3).contains(&n)), "batches {sizes:?}");
    assert_eq!(store.total_added(), 9);
    assert_eq!(summary.chunks_flushed, 9);
    assert_eq!(summary.flushes, sizes.len());
    assert!(summary.peak_buffered <= 3);
}

#[tokio::test]
async fn failed_flush_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.pdf", &pdf_with_pages(&["One", "Two", "Three"]));

    let store = Arc::new(FlakyStore::new(1));
    let config = IndexerConfig::builder()
        .parsing_mode(ParsingMode::TextOnly)
        .batch_size(1)
        .build()
        .unwrap();
    let indexer = indexer_with(config, Arc::new(DisabledProvider), store.clone());
    let err = indexer.index_directory(dir.path()).await.unwrap_err();

    assert!(matches!(err, IndexError::Store(_)));
    assert_eq!(store.count().await.unwrap(), 1);
}

// ── Guards ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn oversized_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "big.pdf", &pdf_with_pages(&["Too big"]));
    let config = IndexerConfig::builder()
        .parsing_mode(ParsingMode::TextOnly)
        .max_file_bytes(16)
        .build()
        .unwrap();
    let indexer = indexer_with(config, Arc::new(DisabledProvider), Arc::new(MemoryVectorStore::new()));
    let summary = indexer.index_directory(dir.path()).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert!(matches!(
        summary.outcomes[0],
        DocumentOutcome::Failed {
            kind: FailureKind::OversizeError,
            ..
        }
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn symlink_escaping_the_root_is_rejected() {
    let outside = tempfile::tempdir().unwrap();
    write(outside.path(), "secret.pdf", &pdf_with_pages(&["Salaries"]));
    let root = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink(outside.path().join("secret.pdf"), root.path().join("link.pdf"))
        .unwrap();
    write(root.path(), "ok.pdf", &pdf_with_pages(&["Public"]));

    let store = Arc::new(MemoryVectorStore::new());
    let indexer = indexer_with(text_only(), Arc::new(DisabledProvider), store.clone());
    let summary = indexer.index_directory(root.path()).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    let failure = summary.failures().next().unwrap();
    assert!(failure.path().ends_with("link.pdf"));
    assert!(matches!(
        failure,
        DocumentOutcome::Failed {
            kind: FailureKind::SecurityViolation,
            ..
        }
    ));
    assert_eq!(store.count().await.unwrap(), 1);
}

// ── Progress and cancellation ────────────────────────────────────────────────

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<String>>,
    cancel_after_first: OnceLock<CancellationHandle>,
}

impl EventLog {
    fn push(&self, e: String) {
        self.events.lock().unwrap().push(e);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl IndexProgressCallback for EventLog {
    fn on_run_start(&self, total_documents: usize) {
        self.push(format!("start {total_documents}"));
    }

    fn on_document_start(&self, index: usize, total: usize, path: &Path) {
        let name = path.file_name().unwrap().to_string_lossy();
        self.push(format!("doc {index}/{total} {name}"));
    }

    fn on_document_complete(&self, index: usize, _total: usize, _path: &Path, chunks: usize) {
        self.push(format!("done {index} {chunks}"));
        if let Some(handle) = self.cancel_after_first.get() {
            handle.cancel();
        }
    }

    fn on_document_error(&self, index: usize, _total: usize, _path: &Path, _error: &str) {
        self.push(format!("error {index}"));
    }

    fn on_flush(&self, chunks: usize, total_flushed: usize) {
        self.push(format!("flush {chunks} {total_flushed}"));
    }

    fn on_run_complete(&self, succeeded: usize, failed: usize) {
        self.push(format!("end {succeeded} {failed}"));
    }
}

#[tokio::test]
async fn progress_events_arrive_in_order() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.pdf", &pdf_with_pages(&["Alpha"]));
    write(dir.path(), "b.docx", b"garbage");

    let log = Arc::new(EventLog::default());
    let config = IndexerConfig::builder()
        .parsing_mode(ParsingMode::TextOnly)
        .progress_callback(log.clone())
        .build()
        .unwrap();
    let indexer = indexer_with(config, Arc::new(DisabledProvider), Arc::new(MemoryVectorStore::new()));
    indexer.index_directory(dir.path()).await.unwrap();

    assert_eq!(
        log.events(),
        vec![
            "start 2",
            "doc 1/2 a.pdf",
            "done 1 1",
            "doc 2/2 b.docx",
            "error 2",
            "flush 1 1",
            "end 1 1",
        ]
    );
}

#[tokio::test]
async fn cancellation_stops_before_the_next_document() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.pdf", "b.pdf", "c.pdf"] {
        write(dir.path(), name, &pdf_with_pages(&[name]));
    }

    let log = Arc::new(EventLog::default());
    let store = Arc::new(MemoryVectorStore::new());
    let config = IndexerConfig::builder()
        .parsing_mode(ParsingMode::TextOnly)
        .progress_callback(log.clone())
        .build()
        .unwrap();
    let indexer = indexer_with(config, Arc::new(DisabledProvider), store.clone());
    log.cancel_after_first
        .set(indexer.cancellation_handle())
        .unwrap();

    let summary = indexer.index_directory(dir.path()).await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.discovered, 3);
    // Chunks of the finished document are still flushed.
    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(log.events().last().map(String::as_str), Some("end 1 0"));
}

#[tokio::test]
async fn embedder_dimension_is_recorded_in_stats() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.pdf", &pdf_with_pages(&["Alpha", "Beta"]));
    let store = Arc::new(MemoryVectorStore::new());
    let embedder = HashingEmbedder::new(32);
    let indexer = Indexer::new(
        text_only(),
        Arc::new(DisabledProvider),
        Arc::new(embedder),
        store.clone(),
    );
    indexer.index_directory(dir.path()).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.chunks, 2);
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.dimension, Some(embedder.dimension()));
    assert_eq!(stats.by_strategy.get("raw"), Some(&2));
}
