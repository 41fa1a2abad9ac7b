//! Ollama provider: `POST {base_url}/api/chat` with `stream: false`.
//!
//! Ollama serves local models without a credential. Vision and text calls
//! use separate models (`llava` and `llama2` by default) since most local
//! vision models are weak at restructuring long text and vice versa.

use super::{encode, with_retry, CallPolicy, EnhancementProvider};
use crate::config::LlmSettings;
use crate::document::ImageBlob;
use crate::error::{IndexError, LlmError};
use crate::normalize::clean_llm_output;
use crate::prompts::{text_request, IMAGE_PROMPT, TEXT_PROMPT};
use crate::security::redact_secrets;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const NAME: &str = "ollama";

/// Client for one Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    image_model: String,
    text_model: String,
    policy: CallPolicy,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaProvider {
    /// Build a client from settings; the base URL is resolved once here.
    pub fn new(settings: &LlmSettings) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("docindex/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| IndexError::ProviderNotConfigured {
                provider: NAME.into(),
                hint: format!("HTTP client could not be built: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: settings.resolved_ollama_url(),
            image_model: settings.ollama_image_model().to_string(),
            text_model: settings.ollama_text_model().to_string(),
            policy: CallPolicy::from_settings(settings),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn chat_once(&self, model: &str, prompt: &str, images: &[String]) -> Result<String, LlmError> {
        let body = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
                images: images.to_vec(),
            }],
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Unavailable {
                provider: NAME.into(),
                detail: redact_secrets(&e.to_string()),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LlmError::Auth {
                provider: NAME.into(),
            });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                provider: NAME.into(),
                status: status.as_u16(),
                detail: redact_secrets(detail.trim()),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| LlmError::MalformedResponse {
            provider: NAME.into(),
            detail: e.to_string(),
        })?;
        let content = parsed
            .message
            .map(|m| m.content)
            .ok_or_else(|| LlmError::MalformedResponse {
                provider: NAME.into(),
                detail: "response has no 'message' field".into(),
            })?;
        debug!("ollama/{}: {} chars", model, content.len());
        Ok(content)
    }
}

fn non_empty(text: String) -> Option<String> {
    let cleaned = clean_llm_output(&text);
    (!cleaned.is_empty()).then_some(cleaned)
}

#[async_trait]
impl EnhancementProvider for OllamaProvider {
    fn name(&self) -> &str {
        NAME
    }

    /// `GET /api/tags` answers 200 when the server is up.
    async fn is_available(&self) -> bool {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        matches!(response, Ok(r) if r.status().is_success())
    }

    async fn describe_image(&self, image: &ImageBlob) -> Result<Option<String>, LlmError> {
        let (b64, _mime) = encode::to_base64(image).map_err(|e| LlmError::MalformedResponse {
            provider: NAME.into(),
            detail: format!("image could not be encoded: {e}"),
        })?;
        let images = vec![b64];
        let (this, images) = (self, &images);
        let text = with_retry(NAME, &self.policy, move || {
            this.chat_once(&this.image_model, IMAGE_PROMPT, images)
        })
        .await?;
        Ok(non_empty(text))
    }

    async fn enhance_text(&self, text: &str, context: &str) -> Result<Option<String>, LlmError> {
        let prompt = text_request(TEXT_PROMPT, text, context);
        let (this, prompt) = (self, prompt.as_str());
        let out = with_retry(NAME, &self.policy, move || {
            this.chat_once(&this.text_model, prompt, &[])
        })
        .await?;
        Ok(non_empty(out))
    }
}
