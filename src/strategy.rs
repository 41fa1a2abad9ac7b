//! Parsing strategy selector: decides, per content unit, whether the indexed
//! text is the raw extraction, the LLM output, or both.
//!
//! ## Why per unit?
//!
//! A slide deck mixes bullet text (fine as extracted), tables (flattened to
//! pipes, hard to search by meaning) and charts (no text at all). Deciding per
//! unit lets `hybrid` mode spend model calls only where raw extraction is weak,
//! and lets a failed call degrade one unit instead of the whole document.
//!
//! | Mode        | Text unit        | Image / table unit                   |
//! |-------------|------------------|--------------------------------------|
//! | `text_only` | raw              | placeholder / pipe rows, no call     |
//! | `hybrid`    | raw              | LLM text + delimiter + raw           |
//! | `llm_only`  | LLM text         | LLM text                             |
//!
//! Any failed call leaves the unit with its raw rendering and strategy
//! [`Strategy::Fallback`]; a provider answering `None` leaves it with
//! [`Strategy::Raw`].

use crate::config::{IndexerConfig, ParsingMode};
use crate::document::{ContentUnit, Document, UnitPayload};
use crate::llm::EnhancementProvider;
use crate::security::{sanitize_filename, sanitize_for_prompt};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Separates LLM output from the raw rendering in `hybrid` units.
pub const HYBRID_DELIMITER: &str = "\n\n--- extracted content ---\n\n";

/// How the final text of a unit was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Raw extraction; no LLM output was requested or none was returned.
    Raw,
    /// LLM output only.
    Llm,
    /// LLM output followed by [`HYBRID_DELIMITER`] and the raw rendering.
    HybridMerged,
    /// An LLM call failed and the raw rendering was used instead.
    Fallback,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Raw => "raw",
            Strategy::Llm => "llm",
            Strategy::HybridMerged => "hybrid_merged",
            Strategy::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content unit with its final text.
#[derive(Debug, Clone)]
pub struct EnhancedContent {
    pub unit: ContentUnit,
    /// Provider output, if a call succeeded. Always `None` in `text_only`.
    pub llm_text: Option<String>,
    /// Text handed to the chunker.
    pub text: String,
    pub strategy: Strategy,
}

impl EnhancedContent {
    fn raw(unit: ContentUnit, strategy: Strategy) -> Self {
        let text = unit.raw_text();
        Self {
            unit,
            llm_text: None,
            text,
            strategy,
        }
    }
}

/// Applies the configured [`ParsingMode`] to content units.
///
/// Holds the call and fallback counters reported in the run summary.
pub struct StrategySelector {
    mode: ParsingMode,
    provider: Arc<dyn EnhancementProvider>,
    max_prompt_chars: usize,
    concurrency: usize,
    llm_calls: AtomicUsize,
    llm_fallbacks: AtomicUsize,
}

impl StrategySelector {
    pub fn new(config: &IndexerConfig, provider: Arc<dyn EnhancementProvider>) -> Self {
        Self {
            mode: config.parsing_mode,
            provider,
            max_prompt_chars: config.max_prompt_chars,
            concurrency: config.concurrency.max(1),
            llm_calls: AtomicUsize::new(0),
            llm_fallbacks: AtomicUsize::new(0),
        }
    }

    pub fn mode(&self) -> ParsingMode {
        self.mode
    }

    /// Provider calls started so far (one per unit, retries not counted).
    pub fn llm_calls(&self) -> usize {
        self.llm_calls.load(Ordering::Relaxed)
    }

    /// Units that fell back to raw content after a failed call.
    pub fn llm_fallbacks(&self) -> usize {
        self.llm_fallbacks.load(Ordering::Relaxed)
    }

    /// Enhance all units of one document, preserving their order.
    ///
    /// At most `concurrency` provider calls are in flight at once.
    pub async fn enhance_document(
        &self,
        document: &Document,
        units: Vec<ContentUnit>,
    ) -> Vec<EnhancedContent> {
        stream::iter(units)
            .map(|unit| self.enhance_unit(document, unit))
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// Enhance one unit. Never fails: errors turn into [`Strategy::Fallback`].
    pub async fn enhance_unit(&self, document: &Document, unit: ContentUnit) -> EnhancedContent {
        if !self.wants_llm(&unit) {
            return EnhancedContent::raw(unit, Strategy::Raw);
        }

        let context = sanitize_for_prompt(
            &format!(
                "{}, page {}, {}",
                sanitize_filename(&document.file_name()),
                unit.position.page,
                unit.kind()
            ),
            self.max_prompt_chars,
        );

        self.llm_calls.fetch_add(1, Ordering::Relaxed);
        let result = match &unit.payload {
            UnitPayload::Image(blob) => self.provider.describe_image(blob).await,
            UnitPayload::Text(_) | UnitPayload::Table(_) => {
                let text = sanitize_for_prompt(&unit.raw_text(), self.max_prompt_chars);
                self.provider.enhance_text(&text, &context).await
            }
        };

        match result {
            Ok(Some(llm_text)) if !llm_text.trim().is_empty() => {
                debug!("{}: enhanced by {}", context, self.provider.name());
                self.merge(unit, llm_text)
            }
            Ok(_) => EnhancedContent::raw(unit, Strategy::Raw),
            Err(e) => {
                self.llm_fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!("{}: LLM enhancement failed, using raw content: {}", context, e);
                EnhancedContent::raw(unit, Strategy::Fallback)
            }
        }
    }

    fn wants_llm(&self, unit: &ContentUnit) -> bool {
        if !self.provider.is_enabled() {
            return false;
        }
        match (self.mode, &unit.payload) {
            (ParsingMode::TextOnly, _) => false,
            (ParsingMode::Hybrid, UnitPayload::Text(_)) => false,
            (_, UnitPayload::Text(t)) => !t.trim().is_empty(),
            (_, UnitPayload::Table(g)) => !g.is_empty(),
            (_, UnitPayload::Image(_)) => true,
        }
    }

    fn merge(&self, unit: ContentUnit, llm_text: String) -> EnhancedContent {
        match self.mode {
            ParsingMode::Hybrid => {
                let text = format!("{}{}{}", llm_text, HYBRID_DELIMITER, unit.raw_text());
                EnhancedContent {
                    unit,
                    llm_text: Some(llm_text),
                    text,
                    strategy: Strategy::HybridMerged,
                }
            }
            _ => EnhancedContent {
                unit,
                text: llm_text.clone(),
                llm_text: Some(llm_text),
                strategy: Strategy::Llm,
            },
        }
    }
}

impl fmt::Debug for StrategySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategySelector")
            .field("mode", &self.mode)
            .field("provider", &self.provider.name())
            .field("concurrency", &self.concurrency)
            .field("llm_calls", &self.llm_calls())
            .field("llm_fallbacks", &self.llm_fallbacks())
            .finish()
    }
}
