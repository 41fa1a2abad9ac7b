//! Error types for the docindex library.
//!
//! Errors are split by the scope at which they can be handled:
//!
//! * [`IndexError`]: **Fatal**: the run cannot proceed (bad configuration,
//!   missing credential, vector store unreachable or a flush failed).
//!   Returned as `Err(IndexError)` from [`crate::indexer::Indexer`] entry points.
//!
//! * [`DocumentError`]: **Per document**: one file could not be indexed
//!   (traversal attempt, corrupt container, file too large). Recorded in
//!   [`crate::output::DocumentOutcome`] and the run moves on to the next file.
//!
//! * [`LlmError`]: **Per content unit**: a provider call failed. The strategy
//!   selector substitutes the raw extracted content, so this error never
//!   leaves the unit it happened in.
//!
//! * [`StoreError`]: raised by a [`crate::store::VectorStore`] adapter and
//!   wrapped into [`IndexError::Store`] by the controller.
//!
//! Messages never contain credential values; provider errors are passed
//! through [`crate::security::redact_secrets`] before they are stored.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docindex library.
#[derive(Debug, Error)]
pub enum IndexError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A provider needs a credential that is not set.
    ///
    /// Only the variable *name* is carried, never its value.
    #[error("LLM provider '{provider}' requires {variable} to be set.\nExport it in your shell or add it to a .env file.")]
    MissingCredential { provider: String, variable: String },

    /// The provider could not be constructed.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The directory to index does not exist.
    #[error("Directory not found: '{path}'")]
    DirectoryNotFound { path: PathBuf },

    /// The path to index exists but is not a directory.
    #[error("'{path}' is not a directory")]
    NotADirectory { path: PathBuf },

    /// A search request was rejected before reaching the store.
    #[error("Invalid search: {0}")]
    InvalidQuery(String),

    // ── Store errors ──────────────────────────────────────────────────────
    /// The vector store failed; the run is aborted and prior flushes are kept.
    #[error("Vector store failure: {0}")]
    Store(#[from] StoreError),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    /// Path or content validation failed. Never bypassed.
    #[error("Security violation for '{path}': {reason}")]
    SecurityViolation { path: PathBuf, reason: String },

    /// The container is corrupt or uses an unsupported feature.
    #[error("Failed to parse '{path}': {detail}")]
    Parse { path: PathBuf, detail: String },

    /// The file exceeds the configured byte limit.
    #[error("'{path}' is {size} bytes, above the {limit} byte limit")]
    Oversize { path: PathBuf, size: u64, limit: u64 },

    /// Enhancement failed in a way that left no usable content.
    ///
    /// Reserved for providers without a raw fallback. The bundled strategy
    /// selector always falls back to the raw unit, so an indexing run never
    /// records this variant; it exists so [`FailureKind::LlmError`] has a
    /// source for library callers that drive enhancement themselves.
    #[error("LLM enhancement failed for '{path}': {detail}")]
    Llm { path: PathBuf, detail: String },
}

impl DocumentError {
    /// The failure category reported in the run summary.
    pub fn kind(&self) -> FailureKind {
        match self {
            DocumentError::SecurityViolation { .. } => FailureKind::SecurityViolation,
            DocumentError::Parse { .. } => FailureKind::ParseError,
            DocumentError::Oversize { .. } => FailureKind::OversizeError,
            DocumentError::Llm { .. } => FailureKind::LlmError,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        DocumentError::Parse {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn security(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        DocumentError::SecurityViolation {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Category of a per-document failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ParseError,
    LlmError,
    SecurityViolation,
    OversizeError,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::ParseError => "parse error",
            FailureKind::LlmError => "LLM error",
            FailureKind::SecurityViolation => "security violation",
            FailureKind::OversizeError => "oversize",
        };
        f.write_str(s)
    }
}

/// A failed provider call for one content unit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    /// The call did not complete within the configured timeout.
    #[error("{provider}: call timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    /// The endpoint could not be reached.
    #[error("{provider}: endpoint unavailable: {detail}")]
    Unavailable { provider: String, detail: String },

    /// The endpoint answered with a non-success status.
    #[error("{provider}: HTTP {status}: {detail}")]
    Http {
        provider: String,
        status: u16,
        detail: String,
    },

    /// The credential was rejected (401/403). Not retried.
    #[error("{provider}: authentication failed")]
    Auth { provider: String },

    /// The response body did not have the expected shape.
    #[error("{provider}: malformed response: {detail}")]
    MalformedResponse { provider: String, detail: String },

    /// Every attempt failed.
    #[error("{provider}: gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        provider: String,
        attempts: u32,
        last: String,
    },
}

impl LlmError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            LlmError::Auth { .. } | LlmError::RetriesExhausted { .. }
        )
    }
}

/// Errors raised by vector store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Mismatched batch: {ids} ids, {texts} texts, {embeddings} embeddings, {metadatas} metadatas")]
    MismatchedBatch {
        ids: usize,
        texts: usize,
        embeddings: usize,
        metadatas: usize,
    },

    #[error("Vector store unavailable: {0}")]
    Unavailable(String),

    /// The embedded vector database rejected an operation.
    #[error("Vector database error: {0}")]
    Database(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credential_names_variable_only() {
        let e = IndexError::MissingCredential {
            provider: "openai".into(),
            variable: "OPENAI_API_KEY".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("OPENAI_API_KEY"), "got: {msg}");
        assert!(msg.contains("openai"));
    }

    #[test]
    fn document_error_kinds() {
        let p = PathBuf::from("/tmp/a.pdf");
        assert_eq!(
            DocumentError::parse(&p, "bad xref").kind(),
            FailureKind::ParseError
        );
        assert_eq!(
            DocumentError::security(&p, "escapes root").kind(),
            FailureKind::SecurityViolation
        );
        assert_eq!(
            DocumentError::Oversize {
                path: p.clone(),
                size: 10,
                limit: 5
            }
            .kind(),
            FailureKind::OversizeError
        );
    }

    #[test]
    fn llm_document_errors_report_llm_kind() {
        let e = DocumentError::Llm {
            path: "/data/scan.pdf".into(),
            detail: "no fallback content".into(),
        };
        assert_eq!(e.kind(), FailureKind::LlmError);
        assert_eq!(e.kind().to_string(), "LLM error");
    }

    #[test]
    fn oversize_display() {
        let e = DocumentError::Oversize {
            path: "/data/big.pptx".into(),
            size: 2048,
            limit: 1024,
        };
        let msg = e.to_string();
        assert!(msg.contains("2048"));
        assert!(msg.contains("1024"));
    }

    #[test]
    fn auth_errors_are_not_retried() {
        assert!(!LlmError::Auth {
            provider: "openai".into()
        }
        .is_retryable());
        assert!(LlmError::Timeout {
            provider: "ollama".into(),
            secs: 30
        }
        .is_retryable());
    }

    #[test]
    fn store_error_wraps_into_index_error() {
        let e: IndexError = StoreError::Unavailable("disk full".into()).into();
        assert!(e.to_string().contains("disk full"));
    }
}
