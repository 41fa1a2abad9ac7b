//! Text embedders.
//!
//! [`FastEmbedder`] runs the `all-MiniLM-L6-v2` sentence model locally
//! through `fastembed` (ONNX runtime). The model is downloaded to the
//! fastembed cache on first use and produces 384-wide vectors. This is the
//! embedder behind [`crate::Indexer::open`] and the CLI.
//!
//! [`HashingEmbedder`] is a feature-hashing bag of words for tests and
//! offline experiments: every lower-cased token (and every pair of adjacent
//! tokens) is hashed into one of `dimension` buckets and the counts are
//! L2-normalised. It matches words, not meaning.

use crate::error::StoreError;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Default vector width.
pub const DEFAULT_DIMENSION: usize = 384;

/// Name recorded for the default sentence model.
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

const BIGRAM_WEIGHT: f32 = 0.5;

/// Maps text to fixed-width vectors.
pub trait Embedder: Send + Sync {
    /// Width of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per text, in order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError>;

    /// Embed a search query.
    fn embed_query(&self, query: &str) -> Result<Vec<f32>, StoreError> {
        self.embed(&[query.to_string()])?
            .pop()
            .ok_or_else(|| StoreError::Unavailable("embedder returned no vector".into()))
    }
}

// ── Sentence model ───────────────────────────────────────────────────────

/// Local sentence-transformer embeddings via fastembed.
#[derive(Clone)]
pub struct FastEmbedder {
    model: Arc<TextEmbedding>,
}

impl std::fmt::Debug for FastEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedder")
            .field("model", &DEFAULT_MODEL)
            .finish_non_exhaustive()
    }
}

impl FastEmbedder {
    /// Load `all-MiniLM-L6-v2`, downloading it into `cache_dir` (or the
    /// fastembed default cache) when it is not there yet.
    ///
    /// Blocks while the model loads; call it from a blocking context.
    pub fn new(cache_dir: Option<PathBuf>) -> Result<Self, StoreError> {
        let mut options =
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir);
        }
        let model = TextEmbedding::try_new(options).map_err(|e| {
            StoreError::Unavailable(format!("cannot load embedding model {DEFAULT_MODEL}: {e}"))
        })?;
        info!("Loaded embedding model {}", DEFAULT_MODEL);
        Ok(Self {
            model: Arc::new(model),
        })
    }

    /// [`FastEmbedder::new`] on the blocking pool.
    pub async fn load(cache_dir: Option<PathBuf>) -> Result<Self, StoreError> {
        tokio::task::spawn_blocking(move || Self::new(cache_dir))
            .await
            .map_err(|e| StoreError::Unavailable(format!("embedding model loader failed: {e}")))?
    }
}

impl Embedder for FastEmbedder {
    fn dimension(&self) -> usize {
        DEFAULT_DIMENSION
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batch: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = self
            .model
            .embed(batch, None)
            .map_err(|e| StoreError::Unavailable(format!("embedding failed: {e}")))?;
        if vectors.len() != texts.len() {
            return Err(StoreError::Unavailable(format!(
                "embedding model returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }
}

// ── Feature hashing ──────────────────────────────────────────────────────

/// Deterministic feature-hashing embedder.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, feature: &str) -> usize {
        let digest = Sha256::digest(feature.as_bytes());
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(word) % self.dimension as u64) as usize
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dimension];
        let tokens = tokenize(text);
        for token in &tokens {
            v[self.bucket(token)] += 1.0;
        }
        for pair in tokens.windows(2) {
            v[self.bucket(&format!("{} {}", pair[0], pair[1]))] += BIGRAM_WEIGHT;
        }
        l2_normalize(&mut v);
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Lower-cased alphanumeric runs.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Cosine similarity clamped to `[0, 1]`; zero when either vector is zero.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embed(e: &HashingEmbedder, s: &str) -> Vec<f32> {
        e.embed_query(s).unwrap()
    }

    #[test]
    fn vectors_are_unit_length_and_fixed_width() {
        let e = HashingEmbedder::new(64);
        let v = embed(&e, "Invoice total due in 30 days");
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn deterministic_and_case_insensitive() {
        let e = HashingEmbedder::default();
        assert_eq!(embed(&e, "Invoice Total"), embed(&e, "invoice total"));
    }

    #[test]
    fn related_text_scores_higher() {
        let e = HashingEmbedder::default();
        let q = embed(&e, "invoice total");
        let hit = embed(&e, "The invoice total is 42 EUR");
        let miss = embed(&e, "Weather forecast for tomorrow");
        assert!(cosine(&q, &hit) > cosine(&q, &miss));
        assert!((cosine(&q, &q) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_gives_zero_vector() {
        let e = HashingEmbedder::new(8);
        let v = embed(&e, " ,.; ");
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(cosine(&v, &embed(&e, "x")), 0.0);
    }

    #[tokio::test]
    #[ignore] // Requires model download
    async fn sentence_model_embeds_at_fixed_width() {
        let cache = tempfile::tempdir().unwrap();
        let e = FastEmbedder::load(Some(cache.path().to_path_buf()))
            .await
            .unwrap();
        assert_eq!(e.dimension(), DEFAULT_DIMENSION);
        assert!(e.embed(&[]).unwrap().is_empty());

        let texts = vec!["The invoice total is 42 EUR".to_string(), "Weather tomorrow".to_string()];
        let vectors = e.embed(&texts).unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.len() == DEFAULT_DIMENSION));

        let q = e.embed_query("invoice total").unwrap();
        assert!(cosine(&q, &vectors[0]) > cosine(&q, &vectors[1]));
    }
}
