//! Configuration types for document indexing.
//!
//! All indexing behaviour is controlled through [`IndexerConfig`], built via
//! its [`IndexerConfigBuilder`]. One struct holds every knob so a run can be
//! logged, compared with another run, and handed to the controller by
//! reference instead of living in process-wide state.
//!
//! Values that the original tooling left open (chunk size, batch size, retry
//! count) are plain fields with documented defaults.

use crate::error::IndexError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default Ollama endpoint when neither `--ollama-url` nor `OLLAMA_HOST` is set.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default persist directory for the LanceDB vector store.
pub const DEFAULT_PERSIST_DIR: &str = "./docindex_db";

/// Extensions accepted by [`crate::security::check_file_limits`].
pub const DEFAULT_EXTENSIONS: &[&str] = &["pdf", "docx", "pptx"];

/// Configuration for an indexing run.
///
/// # Example
/// ```rust
/// use docindex::{IndexerConfig, ParsingMode};
///
/// let config = IndexerConfig::builder()
///     .parsing_mode(ParsingMode::TextOnly)
///     .max_chunk_size(800)
///     .batch_size(32)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_chunk_size, 800);
/// ```
#[derive(Clone)]
pub struct IndexerConfig {
    /// Directory the vector store persists into. Default: `./docindex_db`.
    pub persist_dir: PathBuf,

    /// Where the embedding model is cached. Default: the fastembed cache.
    pub model_cache_dir: Option<PathBuf>,

    /// How much LLM assistance extraction uses. Default: [`ParsingMode::TextOnly`].
    pub parsing_mode: ParsingMode,

    /// Pull images out of documents as content units. Default: false.
    ///
    /// In `text_only` mode images only contribute a short placeholder line,
    /// so leaving this off saves memory. Turn it on together with `hybrid`
    /// or `llm_only` to get image descriptions into the index.
    pub extract_images: bool,

    /// Provider selection and call limits.
    pub llm: LlmSettings,

    /// Upper bound on chunk length, in characters. Range: ≥ 64. Default: 1000.
    pub max_chunk_size: usize,

    /// Chunks held in memory before a flush to the store. Default: 64.
    pub batch_size: usize,

    /// Byte budget of held chunk text before a flush. Default: 4 MiB.
    ///
    /// Whichever of `batch_size` and `batch_max_bytes` is reached first
    /// triggers the flush, bounding peak memory regardless of corpus size.
    pub batch_max_bytes: usize,

    /// Files above this size are rejected before parsing. Default: 100 MiB.
    pub max_file_bytes: u64,

    /// Lower-cased extensions (without dot) that are indexed.
    pub allowed_extensions: Vec<String>,

    /// Maximum characters of document text placed in one prompt. Default: 8000.
    pub max_prompt_chars: usize,

    /// Content units of one document enhanced at the same time. Default: 4.
    ///
    /// Results are always reassembled in document order.
    pub concurrency: usize,

    /// Optional per-document progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            persist_dir: PathBuf::from(DEFAULT_PERSIST_DIR),
            model_cache_dir: None,
            parsing_mode: ParsingMode::default(),
            extract_images: false,
            llm: LlmSettings::default(),
            max_chunk_size: 1000,
            batch_size: 64,
            batch_max_bytes: 4 * 1024 * 1024,
            max_file_bytes: 100 * 1024 * 1024,
            allowed_extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            max_prompt_chars: 8000,
            concurrency: 4,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IndexerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexerConfig")
            .field("persist_dir", &self.persist_dir)
            .field("model_cache_dir", &self.model_cache_dir)
            .field("parsing_mode", &self.parsing_mode)
            .field("extract_images", &self.extract_images)
            .field("llm", &self.llm)
            .field("max_chunk_size", &self.max_chunk_size)
            .field("batch_size", &self.batch_size)
            .field("batch_max_bytes", &self.batch_max_bytes)
            .field("max_file_bytes", &self.max_file_bytes)
            .field("allowed_extensions", &self.allowed_extensions)
            .field("concurrency", &self.concurrency)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn IndexProgressCallback>"),
            )
            .finish()
    }
}

impl IndexerConfig {
    /// Create a new builder for `IndexerConfig`.
    pub fn builder() -> IndexerConfigBuilder {
        IndexerConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build a configuration from the process environment.
    ///
    /// Reads `DOCINDEX_PERSIST_DIR`, `DOCINDEX_MODEL_CACHE`, `DOCINDEX_LLM_PROVIDER`,
    /// `DOCINDEX_PARSING_MODE`, `OLLAMA_HOST`, `OLLAMA_IMAGE_MODEL`,
    /// `OLLAMA_TEXT_MODEL` and `OPENAI_MODEL`. Unset variables keep defaults.
    pub fn from_env() -> Result<Self, IndexError> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Same as [`IndexerConfig::from_env`] with an injectable variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, IndexError> {
        let mut builder = Self::builder();
        if let Some(dir) = lookup("DOCINDEX_PERSIST_DIR") {
            builder = builder.persist_dir(dir);
        }
        if let Some(dir) = lookup("DOCINDEX_MODEL_CACHE") {
            builder = builder.model_cache_dir(dir);
        }
        if let Some(mode) = lookup("DOCINDEX_PARSING_MODE") {
            builder = builder.parsing_mode(mode.parse()?);
        }
        if let Some(provider) = lookup("DOCINDEX_LLM_PROVIDER") {
            builder = builder.llm_provider(provider.parse()?);
        }
        if let Some(host) = lookup("OLLAMA_HOST") {
            builder = builder.ollama_url(host);
        }
        if let Some(model) = lookup("OLLAMA_IMAGE_MODEL") {
            builder = builder.ollama_image_model(model);
        }
        if let Some(model) = lookup("OLLAMA_TEXT_MODEL") {
            builder = builder.ollama_text_model(model);
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            builder = builder.llm_model(model);
        }
        builder.build()
    }

    /// Whether any provider call can happen in this configuration.
    pub fn uses_llm(&self) -> bool {
        self.parsing_mode != ParsingMode::TextOnly && self.llm.provider != LlmProviderKind::None
    }

    /// Convert this config back into a builder for further overrides.
    pub fn into_builder(self) -> IndexerConfigBuilder {
        IndexerConfigBuilder { config: self }
    }
}

/// Builder for [`IndexerConfig`].
pub struct IndexerConfigBuilder {
    config: IndexerConfig,
}

impl fmt::Debug for IndexerConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexerConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl IndexerConfigBuilder {
    pub fn persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.persist_dir = dir.into();
        self
    }

    pub fn model_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.model_cache_dir = Some(dir.into());
        self
    }

    pub fn parsing_mode(mut self, mode: ParsingMode) -> Self {
        self.config.parsing_mode = mode;
        self
    }

    pub fn extract_images(mut self, v: bool) -> Self {
        self.config.extract_images = v;
        self
    }

    pub fn llm_provider(mut self, provider: LlmProviderKind) -> Self {
        self.config.llm.provider = provider;
        self
    }

    /// Model for the hosted provider, or the fallback for both Ollama models.
    pub fn llm_model(mut self, model: impl Into<String>) -> Self {
        self.config.llm.model = Some(model.into());
        self
    }

    pub fn ollama_url(mut self, url: impl Into<String>) -> Self {
        self.config.llm.ollama_url = Some(normalise_ollama_url(&url.into()));
        self
    }

    pub fn ollama_image_model(mut self, model: impl Into<String>) -> Self {
        self.config.llm.ollama_image_model = Some(model.into());
        self
    }

    pub fn ollama_text_model(mut self, model: impl Into<String>) -> Self {
        self.config.llm.ollama_text_model = Some(model.into());
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.llm.api_timeout_secs = secs.clamp(1, 600);
        self
    }

    /// Retries after the first attempt. Capped at 10.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.llm.max_retries = n.min(10);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.llm.retry_backoff_ms = ms;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.llm.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.llm.max_tokens = n;
        self
    }

    /// Rejected by [`build`](Self::build) when below 64.
    pub fn max_chunk_size(mut self, n: usize) -> Self {
        self.config.max_chunk_size = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    pub fn batch_max_bytes(mut self, n: usize) -> Self {
        self.config.batch_max_bytes = n.max(1);
        self
    }

    pub fn max_file_bytes(mut self, n: u64) -> Self {
        self.config.max_file_bytes = n;
        self
    }

    pub fn allowed_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_extensions = exts
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn max_prompt_chars(mut self, n: usize) -> Self {
        self.config.max_prompt_chars = n.max(256);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IndexerConfig, IndexError> {
        let c = &self.config;
        if c.max_chunk_size < 64 {
            return Err(IndexError::InvalidConfig(format!(
                "max_chunk_size must be ≥ 64, got {}",
                c.max_chunk_size
            )));
        }
        if c.batch_size == 0 {
            return Err(IndexError::InvalidConfig("batch_size must be ≥ 1".into()));
        }
        if c.allowed_extensions.is_empty() {
            return Err(IndexError::InvalidConfig(
                "at least one file extension must be allowed".into(),
            ));
        }
        if c.llm.api_timeout_secs == 0 {
            return Err(IndexError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if let Some(ref url) = c.llm.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(IndexError::InvalidConfig(format!(
                    "Ollama URL must be http(s), got '{url}'"
                )));
            }
        }
        Ok(self.config)
    }
}

/// Provider selection and per-call limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Which backend to call. Default: [`LlmProviderKind::None`].
    pub provider: LlmProviderKind,

    /// Hosted model (default `gpt-4.1-nano`), and the fallback for both
    /// Ollama models when the specific ones are unset.
    pub model: Option<String>,

    /// Ollama base URL. `None` means `OLLAMA_HOST` or [`DEFAULT_OLLAMA_URL`].
    pub ollama_url: Option<String>,

    /// Ollama model used for `describe_image`. Default: `llava`.
    pub ollama_image_model: Option<String>,

    /// Ollama model used for `enhance_text`. Default: `llama2`.
    pub ollama_text_model: Option<String>,

    /// Per-call timeout in seconds. Default: 30.
    pub api_timeout_secs: u64,

    /// Retries after the first attempt. Default: 2.
    ///
    /// Backoff doubles from `retry_backoff_ms`: 500 ms → 1 s. Authentication
    /// failures are never retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds. Default: 500.
    pub retry_backoff_ms: u64,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per call. Default: 1024.
    pub max_tokens: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::None,
            model: None,
            ollama_url: None,
            ollama_image_model: None,
            ollama_text_model: None,
            api_timeout_secs: 30,
            max_retries: 2,
            retry_backoff_ms: 500,
            temperature: 0.1,
            max_tokens: 1024,
        }
    }
}

impl LlmSettings {
    /// Hosted model identifier.
    pub fn hosted_model(&self) -> &str {
        self.model.as_deref().unwrap_or("gpt-4.1-nano")
    }

    /// Ollama vision model, falling back to `model` then `llava`.
    pub fn ollama_image_model(&self) -> &str {
        self.ollama_image_model
            .as_deref()
            .or(self.model.as_deref())
            .unwrap_or("llava")
    }

    /// Ollama text model, falling back to `model` then `llama2`.
    pub fn ollama_text_model(&self) -> &str {
        self.ollama_text_model
            .as_deref()
            .or(self.model.as_deref())
            .unwrap_or("llama2")
    }

    /// Ollama base URL: explicit setting, then `OLLAMA_HOST`, then the default.
    pub fn resolved_ollama_url(&self) -> String {
        if let Some(ref url) = self.ollama_url {
            return url.clone();
        }
        match std::env::var("OLLAMA_HOST") {
            Ok(host) if !host.trim().is_empty() => normalise_ollama_url(&host),
            _ => DEFAULT_OLLAMA_URL.to_string(),
        }
    }
}

/// Accept `host:port` (the `OLLAMA_HOST` convention) as well as full URLs.
fn normalise_ollama_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How much LLM assistance extraction uses.
///
/// | Mode | Text units | Image / table units |
/// |------|-----------|---------------------|
/// | `text_only` | raw | minimal raw rendering, no LLM call |
/// | `hybrid` | raw | LLM description + raw fallback |
/// | `llm_only` | LLM | LLM, raw on failure |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsingMode {
    #[default]
    TextOnly,
    Hybrid,
    LlmOnly,
}

impl FromStr for ParsingMode {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "text_only" => Ok(ParsingMode::TextOnly),
            "hybrid" => Ok(ParsingMode::Hybrid),
            "llm_only" => Ok(ParsingMode::LlmOnly),
            other => Err(IndexError::InvalidConfig(format!(
                "unknown parsing mode '{other}' (expected text_only, hybrid or llm_only)"
            ))),
        }
    }
}

impl fmt::Display for ParsingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParsingMode::TextOnly => "text_only",
            ParsingMode::Hybrid => "hybrid",
            ParsingMode::LlmOnly => "llm_only",
        })
    }
}

/// Which LLM backend enhancement calls go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderKind {
    #[default]
    None,
    Ollama,
    OpenAi,
}

impl FromStr for LlmProviderKind {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(LlmProviderKind::None),
            "ollama" => Ok(LlmProviderKind::Ollama),
            "openai" => Ok(LlmProviderKind::OpenAi),
            other => Err(IndexError::InvalidConfig(format!(
                "unknown LLM provider '{other}' (expected ollama, openai or none)"
            ))),
        }
    }
}

impl fmt::Display for LlmProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LlmProviderKind::None => "none",
            LlmProviderKind::Ollama => "ollama",
            LlmProviderKind::OpenAi => "openai",
        })
    }
}
