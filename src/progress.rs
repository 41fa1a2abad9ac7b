//! Progress-callback trait for per-document indexing events.
//!
//! Inject an [`Arc<dyn IndexProgressCallback>`] via
//! [`crate::config::IndexerConfigBuilder::progress_callback`] to receive
//! events as the controller walks a directory.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal progress bar, a log line or a
//! channel of their own without the library knowing how the host application
//! communicates. The trait is `Send + Sync` so a single callback can be shared
//! between the controller and whatever renders it.
//!
//! # Example
//!
//! ```rust
//! use docindex::{IndexProgressCallback, IndexerConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     flushed: AtomicUsize,
//! }
//!
//! impl IndexProgressCallback for CountingCallback {
//!     fn on_flush(&self, chunks: usize, total_flushed: usize) {
//!         self.flushed.store(total_flushed, Ordering::SeqCst);
//!         eprintln!("flushed {chunks} chunks ({total_flushed} so far)");
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { flushed: AtomicUsize::new(0) });
//!
//! let config = IndexerConfig::builder()
//!     .progress_callback(cb as Arc<dyn IndexProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the indexing controller as it processes each document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Documents are processed one at a time, so events
/// for a run arrive in order.
pub trait IndexProgressCallback: Send + Sync {
    /// Called once after discovery, before the first document.
    ///
    /// # Arguments
    /// * `total_documents`: files that passed the extension filter
    fn on_run_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called before a document is validated and extracted.
    ///
    /// # Arguments
    /// * `index`: 1-indexed position in the sorted file list
    fn on_document_start(&self, index: usize, total: usize, path: &Path) {
        let _ = (index, total, path);
    }

    /// Called when a document produced its chunks.
    fn on_document_complete(&self, index: usize, total: usize, path: &Path, chunks: usize) {
        let _ = (index, total, path, chunks);
    }

    /// Called when a document failed; the run continues.
    ///
    /// # Arguments
    /// * `error`: human-readable, already redacted
    fn on_document_error(&self, index: usize, total: usize, path: &Path, error: &str) {
        let _ = (index, total, path, error);
    }

    /// Called after each successful flush to the vector store.
    fn on_flush(&self, chunks: usize, total_flushed: usize) {
        let _ = (chunks, total_flushed);
    }

    /// Called once after the last document, or after cancellation.
    fn on_run_complete(&self, succeeded: usize, failed: usize) {
        let _ = (succeeded, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IndexProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IndexerConfig`].
pub type ProgressCallback = Arc<dyn IndexProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        total: AtomicUsize,
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        flushed: AtomicUsize,
    }

    impl IndexProgressCallback for TrackingCallback {
        fn on_run_start(&self, total_documents: usize) {
            self.total.store(total_documents, Ordering::SeqCst);
        }

        fn on_document_start(&self, _index: usize, _total: usize, _path: &Path) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _i: usize, _t: usize, _p: &Path, _chunks: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_error(&self, _i: usize, _t: usize, _p: &Path, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_flush(&self, _chunks: usize, total_flushed: usize) {
            self.flushed.store(total_flushed, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(2);
        cb.on_document_start(1, 2, Path::new("a.pdf"));
        cb.on_document_complete(1, 2, Path::new("a.pdf"), 3);
        cb.on_document_error(2, 2, Path::new("b.docx"), "corrupt");
        cb.on_flush(3, 3);
        cb.on_run_complete(1, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_run_start(2);
        tracker.on_document_start(1, 2, Path::new("a.pdf"));
        tracker.on_document_complete(1, 2, Path::new("a.pdf"), 4);
        tracker.on_document_start(2, 2, Path::new("b.docx"));
        tracker.on_document_error(2, 2, Path::new("b.docx"), "bad zip");
        tracker.on_flush(4, 4);

        assert_eq!(tracker.total.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.flushed.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_run_start(10);
        cb.on_flush(64, 64);
    }
}
