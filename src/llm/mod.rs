//! LLM enhancement providers.
//!
//! A provider turns one content unit into descriptive text:
//!
//! ```text
//! describe_image(blob)          ──▶ vision model  ──▶ Some(text)
//! enhance_text(text, context)   ──▶ text model    ──▶ Some(text)
//! ```
//!
//! Variants, chosen by configuration in [`build_provider`]:
//!
//! * [`DisabledProvider`] returns `Ok(None)` for everything; used for
//!   provider `none` and for `text_only` mode.
//! * [`ollama::OllamaProvider`] talks to a local Ollama server over HTTP.
//! * [`openai::OpenAiProvider`] goes through the edgequake provider factory.
//!
//! ## Retry Strategy
//!
//! Every call is bounded by a timeout and retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`): with 500 ms base and 2 retries the
//! wait sequence is 500 ms → 1 s. Authentication failures return at once;
//! retrying a rejected key only burns quota.

pub(crate) mod encode;
pub mod ollama;
pub mod openai;

use crate::config::{IndexerConfig, LlmProviderKind, LlmSettings};
use crate::document::ImageBlob;
use crate::error::{IndexError, LlmError};
use crate::security::redact_secrets;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

/// A backend that can describe images and restructure text.
///
/// `Ok(None)` means "no enhancement available" and is not an error: the
/// selector uses the raw content with strategy `raw`.
#[async_trait]
pub trait EnhancementProvider: Send + Sync {
    /// Short identifier used in logs and errors.
    fn name(&self) -> &str;

    /// Whether calls can produce text at all.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Cheap reachability check, run once per indexing run.
    async fn is_available(&self) -> bool {
        self.is_enabled()
    }

    /// Describe an image unit.
    async fn describe_image(&self, image: &ImageBlob) -> Result<Option<String>, LlmError>;

    /// Restructure sanitised text. `context` names the unit's origin.
    async fn enhance_text(&self, text: &str, context: &str) -> Result<Option<String>, LlmError>;
}

/// Provider used when no LLM is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledProvider;

#[async_trait]
impl EnhancementProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn describe_image(&self, _image: &ImageBlob) -> Result<Option<String>, LlmError> {
        Ok(None)
    }

    async fn enhance_text(&self, _text: &str, _context: &str) -> Result<Option<String>, LlmError> {
        Ok(None)
    }
}

/// Construct the provider selected by `config`.
///
/// The OpenAI credential is checked whenever provider `openai` is selected,
/// even in `text_only` mode, so a misconfigured run fails before any file is
/// read. In `text_only` mode the returned provider is always disabled.
pub fn build_provider(config: &IndexerConfig) -> Result<Arc<dyn EnhancementProvider>, IndexError> {
    let settings = &config.llm;
    if settings.provider == LlmProviderKind::OpenAi {
        openai::require_credential()?;
    }
    if !config.uses_llm() {
        return Ok(Arc::new(DisabledProvider));
    }

    let provider: Arc<dyn EnhancementProvider> = match settings.provider {
        LlmProviderKind::None => Arc::new(DisabledProvider),
        LlmProviderKind::Ollama => Arc::new(ollama::OllamaProvider::new(settings)?),
        LlmProviderKind::OpenAi => Arc::new(openai::OpenAiProvider::new(settings)?),
    };
    info!(
        "LLM provider: {} (mode {})",
        provider.name(),
        config.parsing_mode
    );
    Ok(provider)
}

// ── Retry ────────────────────────────────────────────────────────────────

/// Timeout and retry limits applied to every provider call.
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl CallPolicy {
    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.api_timeout_secs),
            max_retries: settings.max_retries,
            retry_backoff_ms: settings.retry_backoff_ms,
        }
    }
}

/// Run `call` until it succeeds, fails permanently, or retries run out.
pub(crate) async fn with_retry<F, Fut>(
    provider: &str,
    policy: &CallPolicy,
    mut call: F,
) -> Result<String, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, LlmError>>,
{
    let mut last: Option<LlmError> = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy
                .retry_backoff_ms
                .saturating_mul(2u64.saturating_pow(attempt - 1));
            warn!(
                "{}: retry {}/{} after {}ms",
                provider, attempt, policy.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let err = match timeout(policy.timeout, call()).await {
            Ok(Ok(text)) => return Ok(text),
            Ok(Err(e)) => e,
            Err(_) => LlmError::Timeout {
                provider: provider.to_string(),
                secs: policy.timeout.as_secs(),
            },
        };
        if !err.is_retryable() {
            return Err(err);
        }
        warn!("{}: attempt {} failed: {}", provider, attempt + 1, err);
        last = Some(err);
    }

    Err(LlmError::RetriesExhausted {
        provider: provider.to_string(),
        attempts: policy.max_retries + 1,
        last: redact_secrets(
            &last
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        ),
    })
}
