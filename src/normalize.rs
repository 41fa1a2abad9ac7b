//! Text normalisation: deterministic cleanup of extracted and generated text.
//!
//! Two entry points, both pure `&str → String` functions:
//!
//! * [`clean_llm_output`] fixes provider quirks: outer code fences despite
//!   the prompt, `\r\n` line endings, invisible Unicode, invented image
//!   links.
//! * [`normalize_text`] prepares any unit text for chunking: control
//!   characters removed, whitespace runs within a line collapsed, blank
//!   lines collapsed. The chunker drops units that normalise to nothing.
//!
//! ## Rule Order
//!
//! Line endings are normalised before anything works line by line, and fences
//! are stripped before blank-line collapsing so the fence lines do not leave
//! gaps behind.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean the raw text returned by a provider.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip outer ``` fences (with or without a language tag)
/// 3. Replace invented image links with their alt text
/// 4. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 5. Trim trailing whitespace per line and collapse 3+ blank lines
pub fn clean_llm_output(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_outer_fences(&s);
    let s = replace_image_links(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    collapse_blank_lines(&s).trim().to_string()
}

/// Normalise unit text before chunking.
///
/// Idempotent. Returns an empty string for whitespace-only input.
pub fn normalize_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s: String = s
        .chars()
        .map(|c| if c == '\t' { ' ' } else { c })
        .filter(|c| !c.is_control() || *c == '\n')
        .collect();
    let s = s
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n");
    RE_BLANK_RUN.replace_all(&s, "\n\n").trim().to_string()
}

// ── Rules ────────────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\n(.*)\n```\s*$").unwrap());

fn strip_outer_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

fn replace_image_links(input: &str) -> String {
    RE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| caps[1].trim().to_string())
        .to_string()
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n(?:[ \t]*\n)+").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(clean_llm_output("```markdown\n# Hello\nWorld\n```"), "# Hello\nWorld");
        assert_eq!(clean_llm_output("```\nplain\n```\n"), "plain");
    }

    #[test]
    fn keeps_inner_code_blocks() {
        let s = "Intro\n```rust\nfn main() {}\n```\nOutro";
        assert_eq!(clean_llm_output(s), s);
    }

    #[test]
    fn crlf_and_invisible() {
        assert_eq!(clean_llm_output("a\r\nb\u{200B}c\u{FEFF}"), "a\nbc");
    }

    #[test]
    fn image_links_become_alt_text() {
        assert_eq!(
            clean_llm_output("See ![bar chart of revenue](chart.png) below"),
            "See bar chart of revenue below"
        );
    }

    #[test]
    fn collapses_blank_lines_in_output() {
        assert_eq!(clean_llm_output("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(
            normalize_text("  Invoice   total:\t 42 \n\n\n\n  Due   now "),
            "Invoice total: 42\n\nDue now"
        );
    }

    #[test]
    fn normalize_removes_controls() {
        assert_eq!(normalize_text("a\u{0}b\u{7}\u{1b}c"), "abc");
    }

    #[test]
    fn normalize_empty() {
        assert_eq!(normalize_text(" \n\t\u{200B}\n "), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_text("x \r\n\r\n\r\n y\u{00AD}z\t\tw");
        assert_eq!(normalize_text(&once), once);
    }
}
