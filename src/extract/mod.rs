//! Format extractors: turn a file into ordered [`ContentUnit`]s.
//!
//! Each submodule handles one container format:
//!
//! ```text
//! .pdf  ──▶ pdf          (lopdf text per page, embedded image XObjects)
//! .docx ──▶ word         (zip + WordprocessingML)
//! .pptx ──▶ presentation (zip + PresentationML, slide rels, speaker notes)
//! ```
//!
//! ## Why spawn_blocking?
//!
//! Parsing a PDF cross-reference table or inflating a zip entry is CPU-bound
//! and synchronous. [`extract_document`] reads the file asynchronously and
//! then moves the parse onto Tokio's blocking pool so the controller's
//! runtime keeps servicing provider calls and timers.
//!
//! ## Why strings for extractor errors?
//!
//! Extractors report a human-readable detail; [`extract_document`] wraps it
//! into [`DocumentError::Parse`] together with the path. One corrupt file
//! never aborts the batch.

pub mod pdf;
pub mod presentation;
#[cfg(feature = "pdfium")]
mod render;
pub mod word;
mod xml;

use crate::document::{renumber, ContentUnit, Document, DocumentFormat, ImageBlob};
use crate::error::DocumentError;
use std::io::Cursor;
use tracing::debug;

/// Stop collecting images after this many per document.
pub const MAX_IMAGES: usize = 100;
/// Stop collecting images once this many bytes are held per document.
pub const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024;
/// Images smaller than this on either side are skipped (icons, bullets).
pub const MIN_IMAGE_DIMENSION: u32 = 50;

/// Options shared by all extractors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    /// Emit image units. Without it only text and tables are produced.
    pub extract_images: bool,
}

/// A format-specific parser.
///
/// Implementations are synchronous; [`extract_document`] runs them on the
/// blocking pool.
pub trait Extractor: Send + Sync {
    fn format(&self) -> DocumentFormat;

    /// Parse a whole file held in memory.
    ///
    /// Units are returned in reading order. Their `position.index` is
    /// reassigned by the caller.
    fn extract(&self, bytes: &[u8], options: &ExtractOptions) -> Result<Vec<ContentUnit>, String>;
}

static PDF: pdf::PdfExtractor = pdf::PdfExtractor;
static WORD: word::WordExtractor = word::WordExtractor;
static PRESENTATION: presentation::PresentationExtractor = presentation::PresentationExtractor;

/// The extractor registered for a format.
pub fn extractor_for(format: DocumentFormat) -> &'static dyn Extractor {
    match format {
        DocumentFormat::Pdf => &PDF,
        DocumentFormat::Word => &WORD,
        DocumentFormat::Presentation => &PRESENTATION,
    }
}

/// Read and parse a validated document.
pub async fn extract_document(
    document: &Document,
    options: &ExtractOptions,
) -> Result<Vec<ContentUnit>, DocumentError> {
    let bytes = tokio::fs::read(&document.path)
        .await
        .map_err(|e| DocumentError::parse(&document.path, format!("read failed: {e}")))?;

    let format = document.format;
    let opts = *options;
    let result = tokio::task::spawn_blocking(move || extractor_for(format).extract(&bytes, &opts))
        .await
        .map_err(|e| DocumentError::parse(&document.path, format!("extraction task panicked: {e}")))?;

    let mut units = result.map_err(|detail| DocumentError::parse(&document.path, detail))?;
    renumber(&mut units);
    debug!(
        "Extracted {} units from {} ({})",
        units.len(),
        document.path.display(),
        format
    );
    Ok(units)
}

// ── Image budget ─────────────────────────────────────────────────────────

/// Per-document caps on extracted images.
#[derive(Debug, Default)]
pub(crate) struct ImageBudget {
    count: usize,
    bytes: usize,
}

impl ImageBudget {
    pub(crate) fn exhausted(&self) -> bool {
        self.count >= MAX_IMAGES || self.bytes >= MAX_IMAGE_BYTES
    }

    /// Admit an image unless the budget is spent or it is known to be tiny.
    ///
    /// Images whose dimensions cannot be read from the header are admitted.
    pub(crate) fn admit(&mut self, blob: &ImageBlob) -> bool {
        if self.exhausted() {
            return false;
        }
        if let Some((w, h)) = dimensions(&blob.bytes) {
            if w < MIN_IMAGE_DIMENSION || h < MIN_IMAGE_DIMENSION {
                debug!("Skipping small image: {}x{}", w, h);
                return false;
            }
        }
        self.count += 1;
        self.bytes += blob.bytes.len();
        true
    }
}

fn dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};

    pub(crate) fn png(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([10, 20, 30])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn budget_skips_tiny_images() {
        let mut budget = ImageBudget::default();
        let icon = ImageBlob {
            bytes: png(16, 16),
            mime_type: "image/png".into(),
        };
        let photo = ImageBlob {
            bytes: png(64, 80),
            mime_type: "image/png".into(),
        };
        assert!(!budget.admit(&icon));
        assert!(budget.admit(&photo));
    }

    #[test]
    fn budget_caps_count() {
        let mut budget = ImageBudget::default();
        let opaque = ImageBlob {
            bytes: vec![1, 2, 3],
            mime_type: "image/x-unknown".into(),
        };
        for _ in 0..MAX_IMAGES {
            assert!(budget.admit(&opaque));
        }
        assert!(!budget.admit(&opaque));
        assert!(budget.exhausted());
    }

    #[test]
    fn registry_covers_every_format() {
        for f in [
            DocumentFormat::Pdf,
            DocumentFormat::Word,
            DocumentFormat::Presentation,
        ] {
            assert_eq!(extractor_for(f).format(), f);
        }
    }

    #[tokio::test]
    async fn corrupt_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        std::fs::write(&path, b"this is not a zip archive").unwrap();
        let doc = Document {
            path: path.clone(),
            format: DocumentFormat::Word,
            size_bytes: 25,
            modified: None,
        };
        let err = extract_document(&doc, &ExtractOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Parse { .. }));
    }
}
