//! Shared fixtures: generated documents, fake providers and stores.

#![allow(dead_code)]

use async_trait::async_trait;
use docindex::{
    ChunkMetadata, EnhancementProvider, ImageBlob, LlmError, MemoryVectorStore, SearchResult,
    StoreError, StoreStats, VectorStore,
};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use zip::write::SimpleFileOptions;

// ── Documents ────────────────────────────────────────────────────────────────

/// A PDF with one Courier text line per page.
pub fn pdf_with_pages(texts: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in texts {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// A zip archive holding `parts`.
pub fn zip_parts(parts: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        for (name, data) in parts {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }
    buf.into_inner()
}

/// A `.docx` whose body is the given WordprocessingML fragment.
pub fn docx(body: &str) -> Vec<u8> {
    docx_with_parts(body, Vec::new())
}

/// A `.docx` with extra archive parts such as relationships and media.
pub fn docx_with_parts(body: &str, extra: Vec<(&str, Vec<u8>)>) -> Vec<u8> {
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><w:body>{body}</w:body></w:document>"#
    );
    let mut parts = vec![("word/document.xml", xml.into_bytes())];
    parts.extend(extra);
    zip_parts(&parts)
}

/// Relationship part pointing `rId5` at `word/media/image1.png`.
pub const WORD_IMAGE_RELS: &str = r#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId5" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="media/image1.png"/></Relationships>"#;

/// A paragraph holding a drawing that embeds `rId5`.
pub fn drawing() -> String {
    r#"<w:p><w:r><w:drawing><a:blip r:embed="rId5"/></w:drawing></w:r></w:p>"#.to_string()
}

/// A solid-colour PNG.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([10, 20, 30]),
    ));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

pub fn para(text: &str) -> String {
    format!(r#"<w:p><w:r><w:t xml:space="preserve">{text}</w:t></w:r></w:p>"#)
}

pub fn word_table(rows: &[&[&str]]) -> String {
    let rows: String = rows
        .iter()
        .map(|r| {
            let cells: String = r
                .iter()
                .map(|c| format!("<w:tc>{}</w:tc>", para(c)))
                .collect();
            format!("<w:tr>{cells}</w:tr>")
        })
        .collect();
    format!("<w:tbl>{rows}</w:tbl>")
}

const PPT_NS: &str = r#"xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships""#;

/// A slide part with one text shape per entry of `shapes`.
pub fn slide(shapes: &[&[&str]]) -> Vec<u8> {
    let inner: String = shapes
        .iter()
        .map(|paras| {
            let ps: String = paras
                .iter()
                .map(|t| format!("<a:p><a:r><a:t>{t}</a:t></a:r></a:p>"))
                .collect();
            format!("<p:sp><p:txBody>{ps}</p:txBody></p:sp>")
        })
        .collect();
    format!(r#"<?xml version="1.0"?><p:sld {PPT_NS}><p:cSld><p:spTree>{inner}</p:spTree></p:cSld></p:sld>"#)
        .into_bytes()
}

/// A `.pptx` with the given slides, numbered from 1.
pub fn pptx(slides: &[Vec<u8>]) -> Vec<u8> {
    let names: Vec<String> = (1..=slides.len())
        .map(|i| format!("ppt/slides/slide{i}.xml"))
        .collect();
    let parts: Vec<(&str, Vec<u8>)> = names
        .iter()
        .map(String::as_str)
        .zip(slides.iter().cloned())
        .collect();
    zip_parts(&parts)
}

pub fn write(dir: &Path, name: &str, bytes: &[u8]) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

// ── Providers ────────────────────────────────────────────────────────────────

/// Fails every call.
#[derive(Default)]
pub struct FailingProvider {
    pub calls: AtomicUsize,
}

#[async_trait]
impl EnhancementProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn describe_image(&self, _image: &ImageBlob) -> Result<Option<String>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(LlmError::Unavailable {
            provider: "failing".into(),
            detail: "connection refused".into(),
        })
    }

    async fn enhance_text(&self, _text: &str, _context: &str) -> Result<Option<String>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(LlmError::Http {
            provider: "failing".into(),
            status: 503,
            detail: "overloaded".into(),
        })
    }
}

/// Answers every call with a fixed prefix plus the text it was given.
pub struct EchoProvider;

#[async_trait]
impl EnhancementProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn describe_image(&self, _image: &ImageBlob) -> Result<Option<String>, LlmError> {
        Ok(Some("A bar chart of quarterly revenue".into()))
    }

    async fn enhance_text(&self, text: &str, _context: &str) -> Result<Option<String>, LlmError> {
        Ok(Some(format!("Structured: {text}")))
    }
}

// ── Stores ───────────────────────────────────────────────────────────────────

/// In-memory store that records the size of every `add` batch.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryVectorStore,
    pub batches: Mutex<Vec<usize>>,
    pub ids: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    pub fn total_added(&self) -> usize {
        self.batch_sizes().iter().sum()
    }
}

#[async_trait]
impl VectorStore for RecordingStore {
    async fn add(
        &self,
        ids: Vec<String>,
        texts: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<ChunkMetadata>,
    ) -> Result<(), StoreError> {
        self.batches.lock().unwrap().push(ids.len());
        self.ids.lock().unwrap().extend(ids.iter().cloned());
        self.inner.add(ids, texts, embeddings, metadatas).await
    }

    async fn query(&self, embedding: &[f32], n_results: usize) -> Result<Vec<SearchResult>, StoreError> {
        self.inner.query(embedding, n_results).await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.inner.count().await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.inner.stats().await
    }

    async fn delete_by_source(&self, source_path: &str) -> Result<usize, StoreError> {
        self.inner.delete_by_source(source_path).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear().await
    }
}

/// Accepts `ok_batches` adds, then fails.
pub struct FlakyStore {
    pub inner: MemoryVectorStore,
    pub ok_batches: usize,
    pub seen: AtomicUsize,
}

impl FlakyStore {
    pub fn new(ok_batches: usize) -> Self {
        Self {
            inner: MemoryVectorStore::new(),
            ok_batches,
            seen: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    async fn add(
        &self,
        ids: Vec<String>,
        texts: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<ChunkMetadata>,
    ) -> Result<(), StoreError> {
        if self.seen.fetch_add(1, Ordering::SeqCst) >= self.ok_batches {
            return Err(StoreError::Unavailable("disk full".into()));
        }
        self.inner.add(ids, texts, embeddings, metadatas).await
    }

    async fn query(&self, embedding: &[f32], n_results: usize) -> Result<Vec<SearchResult>, StoreError> {
        self.inner.query(embedding, n_results).await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.inner.count().await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.inner.stats().await
    }

    async fn delete_by_source(&self, source_path: &str) -> Result<usize, StoreError> {
        self.inner.delete_by_source(source_path).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear().await
    }
}
