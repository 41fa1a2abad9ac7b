//! Documents and the content units extracted from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Container format, chosen from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Word,
    Presentation,
}

impl DocumentFormat {
    /// Map an extension (case-insensitive) to a format.
    ///
    /// Only OOXML containers are recognised for word and presentation files.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Word),
            "pptx" => Some(Self::Presentation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Word => "word",
            Self::Presentation => "presentation",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file accepted for indexing. Read once, never mutated.
#[derive(Debug, Clone)]
pub struct Document {
    /// Canonical absolute path; the document's identity.
    pub path: PathBuf,
    pub format: DocumentFormat,
    pub size_bytes: u64,
    pub modified: Option<SystemTime>,
}

impl Document {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Where a unit sits in its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Page or slide number, 1-based.
    pub page: usize,
    /// Index within the page, 0-based.
    pub index: usize,
}

/// Kind of a content unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Text,
    Image,
    Table,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnitKind::Text => "text",
            UnitKind::Image => "image",
            UnitKind::Table => "table",
        })
    }
}

/// Encoded image bytes with their MIME type.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
    /// e.g. `image/png`, `image/jpeg`.
    pub mime_type: String,
}

impl fmt::Debug for ImageBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBlob")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A rectangular table: every row has the same number of cells.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableGrid {
    rows: Vec<Vec<String>>,
}

impl TableGrid {
    /// Build a grid, padding short rows with empty strings.
    ///
    /// Rows that are entirely empty are dropped.
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        let mut rows: Vec<Vec<String>> = rows
            .into_iter()
            .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
            .collect();
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, String::new());
        }
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn width(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// One line per row, cells joined with ` | `.
    pub fn to_pipe_text(&self) -> String {
        self.rows
            .iter()
            .map(|r| {
                r.iter()
                    .map(|c| c.split_whitespace().collect::<Vec<_>>().join(" "))
                    .collect::<Vec<_>>()
                    .join(" | ")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Raw payload of a content unit.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitPayload {
    Text(String),
    Image(ImageBlob),
    Table(TableGrid),
}

/// One piece of extracted content, consumed once by the strategy selector.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentUnit {
    pub position: Position,
    pub payload: UnitPayload,
}

impl ContentUnit {
    pub fn text(page: usize, index: usize, text: impl Into<String>) -> Self {
        Self {
            position: Position { page, index },
            payload: UnitPayload::Text(text.into()),
        }
    }

    pub fn image(page: usize, index: usize, blob: ImageBlob) -> Self {
        Self {
            position: Position { page, index },
            payload: UnitPayload::Image(blob),
        }
    }

    pub fn table(page: usize, index: usize, grid: TableGrid) -> Self {
        Self {
            position: Position { page, index },
            payload: UnitPayload::Table(grid),
        }
    }

    pub fn kind(&self) -> UnitKind {
        match self.payload {
            UnitPayload::Text(_) => UnitKind::Text,
            UnitPayload::Image(_) => UnitKind::Image,
            UnitPayload::Table(_) => UnitKind::Table,
        }
    }

    /// Rendering used when no LLM output is available.
    ///
    /// Text is returned as is; tables as pipe-joined rows; images as a
    /// one-line placeholder naming the page, MIME type and size.
    pub fn raw_text(&self) -> String {
        match &self.payload {
            UnitPayload::Text(t) => t.clone(),
            UnitPayload::Table(g) => g.to_pipe_text(),
            UnitPayload::Image(b) => format!(
                "[Image on page {}: {}, {} bytes]",
                self.position.page,
                b.mime_type,
                b.bytes.len()
            ),
        }
    }
}

/// Assign 0-based indices within each page, in order of appearance.
pub(crate) fn renumber(units: &mut [ContentUnit]) {
    let mut page = 0;
    let mut next = 0;
    for unit in units.iter_mut() {
        if unit.position.page != page {
            page = unit.position.page;
            next = 0;
        }
        unit.position.index = next;
        next += 1;
    }
}
