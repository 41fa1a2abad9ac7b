//! Input validation and sanitisation.
//!
//! Every file the controller touches passes [`validate_path`] and
//! [`check_file_limits`] before an extractor opens it, and every string sent
//! to a provider passes [`sanitize_for_prompt`]. Strings that end up in logs
//! or error messages go through [`redact_secrets`].
//!
//! ## Why canonicalise before checking containment?
//!
//! A lexical check on `root/../../etc/passwd` or on a symlink that points
//! outside the root passes trivially. Resolving both sides first means the
//! check runs on the path the OS will actually open.

use crate::config::IndexerConfig;
use crate::error::DocumentError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Replacement for neutralised injection phrases.
pub const FILTERED: &str = "[FILTERED]";

/// File names that are never indexed even inside the allowed root.
const DENYLISTED_NAMES: &[&str] = &[
    "passwd",
    "shadow",
    "sudoers",
    ".env",
    ".netrc",
    ".npmrc",
    ".pgpass",
    "id_rsa",
    "id_dsa",
    "id_ecdsa",
    "id_ed25519",
    "credentials",
];

// ── Path validation ──────────────────────────────────────────────────────

/// Resolve `candidate` and check it lies inside `allowed_root`.
///
/// Both paths are canonicalised first, so `..` components and symlinks are
/// resolved before the containment test. Non-regular files (devices, FIFOs,
/// sockets, directories) and denylisted names are rejected.
///
/// Returns the canonical path on success.
pub fn validate_path(candidate: &Path, allowed_root: &Path) -> Result<PathBuf, DocumentError> {
    let root = allowed_root.canonicalize().map_err(|e| {
        DocumentError::security(candidate, format!("allowed root cannot be resolved: {e}"))
    })?;
    let resolved = candidate
        .canonicalize()
        .map_err(|e| DocumentError::security(candidate, format!("path cannot be resolved: {e}")))?;

    if !resolved.starts_with(&root) {
        return Err(DocumentError::security(
            candidate,
            format!("resolves outside allowed root '{}'", root.display()),
        ));
    }

    let name = resolved
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if DENYLISTED_NAMES.contains(&name.as_str()) {
        return Err(DocumentError::security(
            candidate,
            format!("'{name}' is a protected file name"),
        ));
    }

    let meta = std::fs::metadata(&resolved)
        .map_err(|e| DocumentError::security(candidate, format!("cannot stat: {e}")))?;
    if !meta.file_type().is_file() {
        return Err(DocumentError::security(
            candidate,
            describe_special(&meta.file_type()),
        ));
    }

    Ok(resolved)
}

#[cfg(unix)]
fn describe_special(ft: &std::fs::FileType) -> String {
    use std::os::unix::fs::FileTypeExt;
    if ft.is_dir() {
        "is a directory".into()
    } else if ft.is_block_device() || ft.is_char_device() {
        "is a device file".into()
    } else if ft.is_fifo() {
        "is a FIFO".into()
    } else if ft.is_socket() {
        "is a socket".into()
    } else {
        "is not a regular file".into()
    }
}

#[cfg(not(unix))]
fn describe_special(ft: &std::fs::FileType) -> String {
    if ft.is_dir() {
        "is a directory".into()
    } else {
        "is not a regular file".into()
    }
}

// ── File limits ──────────────────────────────────────────────────────────

/// Size and type limits applied before any parser runs.
#[derive(Debug, Clone)]
pub struct FileLimits {
    pub max_file_bytes: u64,
    /// Lower-case extensions without the dot.
    pub allowed_extensions: Vec<String>,
}

impl FileLimits {
    pub fn from_config(config: &IndexerConfig) -> Self {
        Self {
            max_file_bytes: config.max_file_bytes,
            allowed_extensions: config.allowed_extensions.clone(),
        }
    }

    pub fn allows_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|e| self.allowed_extensions.iter().any(|a| *a == e))
    }
}

impl Default for FileLimits {
    fn default() -> Self {
        Self::from_config(&IndexerConfig::default())
    }
}

/// Reject disallowed extensions and oversize files. Returns the file size.
pub fn check_file_limits(path: &Path, limits: &FileLimits) -> Result<u64, DocumentError> {
    if !limits.allows_extension(path) {
        return Err(DocumentError::security(
            path,
            format!(
                "extension not allowed (accepted: {})",
                limits.allowed_extensions.join(", ")
            ),
        ));
    }

    let size = std::fs::metadata(path)
        .map_err(|e| DocumentError::parse(path, format!("cannot stat: {e}")))?
        .len();
    if size > limits.max_file_bytes {
        return Err(DocumentError::Oversize {
            path: path.to_path_buf(),
            size,
            limit: limits.max_file_bytes,
        });
    }
    Ok(size)
}

// ── Prompt sanitisation ──────────────────────────────────────────────────

static RE_INJECTION: Lazy<Regex> = Lazy::new(|| {
    let phrases = [
        r"system\s*:",
        r"assistant\s*:",
        r"user\s*:",
        r"human\s*:",
        r"<\|im_start\|>",
        r"<\|im_end\|>",
        r"<\|endoftext\|>",
        r"\[/?INST\]",
        r"<</?SYS>>",
        r"ignore\s+(?:all\s+)?previous(?:\s+instructions)?",
        r"disregard\s+(?:the\s+)?above",
        r"forget\s+everything",
        r"new\s+instructions",
        r"override\s+system",
        r"you\s+are\s+now",
        r"act\s+as\s+if",
        r"pretend\s+to\s+be",
        r"repeat\s+everything",
        r"show\s+(?:the\s+)?system\s+prompt",
        r"reveal\s+(?:your\s+)?instructions",
    ];
    Regex::new(&format!("(?i)(?:{})", phrases.join("|"))).expect("injection regex")
});

static RE_SPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("space regex"));

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank regex"));

/// Make untrusted document text safe to embed in a prompt.
///
/// Control characters other than `\n` and `\t` are removed, role delimiters
/// and known injection phrases become [`FILTERED`], runs of spaces collapse
/// to one, and the result is cut to `max_chars` characters.
///
/// Deterministic and idempotent: `sanitize_for_prompt(sanitize_for_prompt(x))
/// == sanitize_for_prompt(x)`.
pub fn sanitize_for_prompt(text: &str, max_chars: usize) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    let filtered = RE_INJECTION.replace_all(&cleaned, FILTERED);
    let spaced = RE_SPACE_RUN.replace_all(&filtered, " ");
    let blanked = RE_BLANK_RUN.replace_all(&spaced, "\n\n");
    let trimmed = blanked.trim();

    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => trimmed[..cut].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

// ── Filenames & secrets ──────────────────────────────────────────────────

/// Replace separators, NULs and `<>:"|?*` with `_`; cap at 255 bytes
/// keeping the extension.
pub fn sanitize_filename(name: &str) -> String {
    const MAX: usize = 255;
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect();
    if replaced.len() <= MAX {
        return replaced;
    }

    let (stem, ext) = match replaced.rfind('.') {
        Some(dot) if dot > 0 && replaced.len() - dot <= 16 => replaced.split_at(dot),
        _ => (replaced.as_str(), ""),
    };
    let budget = MAX - ext.len();
    let mut cut = budget.min(stem.len());
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &stem[..cut], ext)
}

static RE_OPENAI_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"sk-[A-Za-z0-9_\-]{8,}").expect("key regex"));

static RE_BEARER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/\-]+=*").expect("bearer regex"));

static RE_KV_SECRET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(api[_-]?key|token|password|secret)=([^\s&"']+)"#).expect("kv regex")
});

/// Mask credentials in a string destined for a log line or error message.
pub fn redact_secrets(text: &str) -> String {
    let s = RE_OPENAI_KEY.replace_all(text, "sk-[REDACTED]");
    let s = RE_BEARER.replace_all(&s, "Bearer [REDACTED]");
    RE_KV_SECRET.replace_all(&s, "$1=[REDACTED]").into_owned()
}
