//! Prompts sent to enhancement providers.
//!
//! Centralising every prompt here means changing what the model is asked for
//! touches exactly one file, and tests can inspect the prompts without a
//! running model.
//!
//! Document text is never interpolated into the instruction part of a prompt
//! unsanitised: [`text_request`] expects text that already went through
//! [`crate::security::sanitize_for_prompt`].

/// Instruction for describing an image unit (photo, chart, scanned page).
pub const IMAGE_PROMPT: &str = r#"Analyze this document image and extract ALL information it carries:

1. Text: transcribe all visible text, keeping its reading order and structure
2. Tables: reproduce table data with headers and rows
3. Charts and graphs: state the chart type, axes, data points and trends
4. Diagrams and illustrations: describe what they show
5. Lists: keep bulleted or numbered hierarchy
6. Special elements: formulas, code snippets, citations

Output plain text only. Do not add commentary about the image itself."#;

/// Instruction for restructuring a text unit.
pub const TEXT_PROMPT: &str =
    "Extract and structure all information including tables, lists, and key points:";

/// Build the user message for a text enhancement call. Table units use the
/// same instruction with their pipe-joined rows as `text`.
///
/// `context` names where the content came from (file, page, kind) so the
/// model can resolve references; both arguments must already be sanitised.
pub fn text_request(instruction: &str, text: &str, context: &str) -> String {
    if context.is_empty() {
        format!("{instruction}\n\nText to analyze:\n{text}")
    } else {
        format!("{instruction}\n\nSource: {context}\n\nText to analyze:\n{text}")
    }
}
