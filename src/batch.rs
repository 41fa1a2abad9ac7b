//! Bounded chunk accumulator between the chunker and the vector store.
//!
//! Chunks from many documents are buffered so the embedder and the store see
//! a few large batches instead of one call per chunk. The buffer is capped by
//! chunk count and by total text bytes; the controller asks
//! [`BatchAccumulator::would_overflow`] before each push and
//! [`BatchAccumulator::should_flush`] after it, so the count cap is never
//! exceeded.

use crate::embed::Embedder;
use crate::error::StoreError;
use crate::output::Chunk;
use crate::store::VectorStore;
use tracing::info;

#[derive(Debug)]
pub struct BatchAccumulator {
    chunks: Vec<Chunk>,
    bytes: usize,
    max_chunks: usize,
    max_bytes: usize,
    peak: usize,
}

impl BatchAccumulator {
    pub fn new(max_chunks: usize, max_bytes: usize) -> Self {
        let max_chunks = max_chunks.max(1);
        Self {
            chunks: Vec::with_capacity(max_chunks),
            bytes: 0,
            max_chunks,
            max_bytes: max_bytes.max(1),
            peak: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Text bytes currently held.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Largest number of chunks held at once.
    pub fn peak_len(&self) -> usize {
        self.peak
    }

    /// Adding `chunk` would break a cap; flush first.
    ///
    /// Always false for an empty buffer, so a single chunk larger than the
    /// byte cap still gets through on its own.
    pub fn would_overflow(&self, chunk: &Chunk) -> bool {
        !self.is_empty()
            && (self.len() + 1 > self.max_chunks || self.bytes + chunk.text.len() > self.max_bytes)
    }

    /// A cap has been reached.
    pub fn should_flush(&self) -> bool {
        self.len() >= self.max_chunks || self.bytes >= self.max_bytes
    }

    pub fn push(&mut self, chunk: Chunk) {
        self.bytes += chunk.text.len();
        self.chunks.push(chunk);
        self.peak = self.peak.max(self.chunks.len());
    }

    /// Empty the buffer, returning its chunks in push order.
    pub fn take(&mut self) -> Vec<Chunk> {
        self.bytes = 0;
        std::mem::take(&mut self.chunks)
    }

    /// Embed the buffered chunks and upsert them into `store`.
    ///
    /// Returns the number of chunks written. The buffer is empty afterwards
    /// even on error; the caller aborts the run in that case.
    pub async fn flush(
        &mut self,
        embedder: &dyn Embedder,
        store: &dyn VectorStore,
    ) -> Result<usize, StoreError> {
        if self.is_empty() {
            return Ok(0);
        }
        let chunks = self.take();
        let n = chunks.len();

        let mut ids = Vec::with_capacity(n);
        let mut texts = Vec::with_capacity(n);
        let mut metadatas = Vec::with_capacity(n);
        for c in chunks {
            ids.push(c.id);
            texts.push(c.text);
            metadatas.push(c.metadata);
        }
        let embeddings = embedder.embed(&texts)?;
        if let Some(bad) = embeddings.iter().find(|e| e.len() != embedder.dimension()) {
            return Err(StoreError::DimensionMismatch {
                expected: embedder.dimension(),
                actual: bad.len(),
            });
        }
        store.add(ids, texts, embeddings, metadatas).await?;
        info!("Flushed {} chunks to the vector store", n);
        Ok(n)
    }
}
