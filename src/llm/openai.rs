//! OpenAI vision provider, built through the edgequake provider factory.
//!
//! The factory reads `OPENAI_API_KEY` itself; this module only checks that
//! the variable is present so a misconfigured run fails before any file is
//! opened. The key value never passes through docindex code.

use super::{encode, with_retry, CallPolicy, EnhancementProvider};
use crate::config::LlmSettings;
use crate::document::ImageBlob;
use crate::error::{IndexError, LlmError};
use crate::normalize::clean_llm_output;
use crate::prompts::{text_request, IMAGE_PROMPT, TEXT_PROMPT};
use crate::security::redact_secrets;
use async_trait::async_trait;
use edgequake_llm::{
    ChatMessage, CompletionOptions, LLMProvider, LlmError as ProviderError, ProviderFactory,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

const NAME: &str = "openai";

/// Environment variable holding the API key.
pub const CREDENTIAL_VAR: &str = "OPENAI_API_KEY";

const SYSTEM_PROMPT: &str =
    "You extract information from office documents for a search index. Answer with plain text only.";

/// Fail with [`IndexError::MissingCredential`] unless `OPENAI_API_KEY` is set.
pub fn require_credential() -> Result<(), IndexError> {
    check_credential(std::env::var(CREDENTIAL_VAR).ok().as_deref())
}

fn check_credential(value: Option<&str>) -> Result<(), IndexError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(IndexError::MissingCredential {
            provider: NAME.into(),
            variable: CREDENTIAL_VAR.into(),
        }),
    }
}

/// Hosted vision model behind an edgequake `LLMProvider`.
pub struct OpenAiProvider {
    inner: Arc<dyn LLMProvider>,
    model: String,
    policy: CallPolicy,
    options: CompletionOptions,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("model", &self.model)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    pub fn new(settings: &LlmSettings) -> Result<Self, IndexError> {
        require_credential()?;
        let model = settings.hosted_model().to_string();
        let inner = ProviderFactory::create_llm_provider(NAME, &model).map_err(|e| {
            IndexError::ProviderNotConfigured {
                provider: NAME.into(),
                hint: redact_secrets(&format!("{e}")),
            }
        })?;
        Ok(Self {
            inner,
            model,
            policy: CallPolicy::from_settings(settings),
            options: CompletionOptions {
                temperature: Some(settings.temperature),
                max_tokens: Some(settings.max_tokens),
                ..Default::default()
            },
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat_once(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        match self.inner.chat(messages, Some(&self.options)).await {
            Ok(response) => {
                debug!(
                    "openai/{}: {} input tokens, {} output tokens",
                    self.model, response.prompt_tokens, response.completion_tokens
                );
                Ok(response.content)
            }
            Err(e) => Err(classify_error(&e, self.policy.timeout.as_secs())),
        }
    }
}

/// Status code named next to an HTTP marker, e.g. `API 503:` or `status=401`.
static RE_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:status(?:\s*code)?|http|api(?:\s+error)?)\s*[:=]?\s*([1-5]\d{2})\b")
        .expect("status regex")
});

fn status_in(message: &str) -> Option<u16> {
    RE_STATUS
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Map an edgequake error onto [`LlmError`], redacting its message first.
fn classify_error(err: &ProviderError, timeout_secs: u64) -> LlmError {
    let detail = redact_secrets(&err.to_string());
    let provider = NAME.to_string();
    match err {
        ProviderError::AuthError(_) => LlmError::Auth { provider },
        ProviderError::Timeout => LlmError::Timeout {
            provider,
            secs: timeout_secs,
        },
        ProviderError::RateLimited(_) => LlmError::Http {
            provider,
            status: 429,
            detail,
        },
        ProviderError::ModelNotFound(_) => LlmError::Http {
            provider,
            status: 404,
            detail,
        },
        ProviderError::InvalidRequest(_) | ProviderError::TokenLimitExceeded { .. } => {
            LlmError::Http {
                provider,
                status: 400,
                detail,
            }
        }
        ProviderError::SerializationError(_) => LlmError::MalformedResponse { provider, detail },
        ProviderError::ApiError(message)
        | ProviderError::ProviderError(message)
        | ProviderError::Unknown(message) => match status_in(message) {
            Some(401 | 403) => LlmError::Auth { provider },
            Some(status) if status >= 400 => LlmError::Http {
                provider,
                status,
                detail,
            },
            _ => LlmError::Unavailable { provider, detail },
        },
        _ => LlmError::Unavailable { provider, detail },
    }
}

fn non_empty(text: String) -> Option<String> {
    let cleaned = clean_llm_output(&text);
    (!cleaned.is_empty()).then_some(cleaned)
}

#[async_trait]
impl EnhancementProvider for OpenAiProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn describe_image(&self, image: &ImageBlob) -> Result<Option<String>, LlmError> {
        let data = encode::to_image_data(image).map_err(|e| LlmError::MalformedResponse {
            provider: NAME.into(),
            detail: format!("image could not be encoded: {e}"),
        })?;
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user_with_images(IMAGE_PROMPT, vec![data]),
        ];
        let (this, messages) = (self, messages.as_slice());
        let text = with_retry(NAME, &self.policy, move || this.chat_once(messages)).await?;
        Ok(non_empty(text))
    }

    async fn enhance_text(&self, text: &str, context: &str) -> Result<Option<String>, LlmError> {
        let prompt = text_request(TEXT_PROMPT, text, context);
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user_with_images(prompt.as_str(), Vec::new()),
        ];
        let (this, messages) = (self, messages.as_slice());
        let out = with_retry(NAME, &self.policy, move || this.chat_once(messages)).await?;
        Ok(non_empty(out))
    }
}
