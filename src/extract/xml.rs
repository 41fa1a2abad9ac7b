//! Helpers shared by the OOXML readers: zip entries, relationships,
//! attribute lookup and merged-cell table resolution.

use crate::document::{ImageBlob, TableGrid};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use zip::ZipArchive;

pub(crate) type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

/// Largest inflated size accepted for a single archive entry.
pub(crate) const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

/// Widest table grid accepted after spans are expanded.
pub(crate) const MAX_TABLE_COLUMNS: usize = 512;

/// Largest table grid (rows × columns) accepted after expansion.
pub(crate) const MAX_TABLE_CELLS: usize = 100_000;

pub(crate) fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, String> {
    ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not a valid OOXML container: {e}"))
}

/// Read a zip entry fully. `Ok(None)` when the entry does not exist.
///
/// The declared size in the entry header is not trusted: reading stops one
/// byte past [`MAX_ENTRY_BYTES`] and an entry that gets there is rejected.
pub(crate) fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Option<Vec<u8>>, String> {
    read_entry_limited(archive, name, MAX_ENTRY_BYTES)
}

fn read_entry_limited(
    archive: &mut Archive<'_>,
    name: &str,
    limit: u64,
) -> Result<Option<Vec<u8>>, String> {
    let file = match archive.by_name(name) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(format!("cannot open '{name}': {e}")),
    };
    let mut buf = Vec::new();
    file.take(limit.saturating_add(1))
        .read_to_end(&mut buf)
        .map_err(|e| format!("cannot read '{name}': {e}"))?;
    if buf.len() as u64 > limit {
        return Err(format!("'{name}' inflates to more than {limit} bytes"));
    }
    Ok(Some(buf))
}

/// Read a zip entry as UTF-8 XML.
pub(crate) fn read_xml(archive: &mut Archive<'_>, name: &str) -> Result<Option<String>, String> {
    match read_entry(archive, name)? {
        Some(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| format!("'{name}' is not UTF-8: {e}")),
        None => Ok(None),
    }
}

/// Value of the attribute with the given local name (namespace prefix ignored).
pub(crate) fn attr(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

// ── Relationships ────────────────────────────────────────────────────────

/// One `<Relationship>` from a `.rels` part, with its target resolved to a
/// zip entry name.
#[derive(Debug, Clone)]
pub(crate) struct Relationship {
    pub target: String,
    pub kind: String,
}

/// Parse `<dir>/_rels/<file>.rels` for the part at `part_path`.
///
/// Missing relationship parts yield an empty map.
pub(crate) fn relationships(
    archive: &mut Archive<'_>,
    part_path: &str,
) -> Result<HashMap<String, Relationship>, String> {
    let (dir, file) = part_path.rsplit_once('/').unwrap_or(("", part_path));
    let rels_path = if dir.is_empty() {
        format!("_rels/{file}.rels")
    } else {
        format!("{dir}/_rels/{file}.rels")
    };
    let Some(xml) = read_xml(archive, &rels_path)? else {
        return Ok(HashMap::new());
    };

    let mut map = HashMap::new();
    let mut reader = Reader::from_str(&xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"Relationship" => {
                let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) else {
                    continue;
                };
                if attr(&e, b"TargetMode").as_deref() == Some("External") {
                    continue;
                }
                map.insert(
                    id,
                    Relationship {
                        target: resolve_part(dir, &target),
                        kind: attr(&e, b"Type").unwrap_or_default(),
                    },
                );
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("malformed '{rels_path}': {e}")),
            _ => {}
        }
    }
    Ok(map)
}

/// Resolve a relationship target against the directory of its source part.
pub(crate) fn resolve_part(base_dir: &str, target: &str) -> String {
    if let Some(abs) = target.strip_prefix('/') {
        return abs.to_string();
    }
    let mut parts: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for seg in target.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Wrap a media part as an image blob if its extension is a raster format
/// a vision model accepts.
pub(crate) fn media_blob(name: &str, bytes: Vec<u8>) -> Option<ImageBlob> {
    let mime = mime_guess::from_path(name).first()?;
    match mime.essence_str() {
        "image/png" | "image/jpeg" | "image/gif" | "image/bmp" | "image/webp" | "image/tiff" => {
            Some(ImageBlob {
                bytes,
                mime_type: mime.essence_str().to_string(),
            })
        }
        _ => None,
    }
}

// ── Tables ───────────────────────────────────────────────────────────────

/// How a cell relates to its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Merge {
    #[default]
    None,
    /// Continuation of the cell to the left.
    FromLeft,
    /// Continuation of the cell above.
    FromAbove,
}

#[derive(Debug, Clone)]
pub(crate) struct RawCell {
    pub text: String,
    /// Grid columns covered by this XML cell.
    pub span: usize,
    pub merge: Merge,
}

impl Default for RawCell {
    fn default() -> Self {
        Self {
            text: String::new(),
            span: 1,
            merge: Merge::None,
        }
    }
}

impl RawCell {
    pub(crate) fn push_paragraph(&mut self, para: &str) {
        let para = para.trim();
        if para.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(para);
    }
}

/// Column span from a `gridSpan` value, clamped to `1..=MAX_TABLE_COLUMNS`.
pub(crate) fn parse_span(value: Option<String>) -> usize {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .clamp(1, MAX_TABLE_COLUMNS)
}

/// Expand spans and merges so every merged region repeats its value.
///
/// Fails when a row expands past [`MAX_TABLE_COLUMNS`] or the padded grid
/// would hold more than [`MAX_TABLE_CELLS`] cells.
pub(crate) fn resolve_table(rows: Vec<Vec<RawCell>>) -> Result<TableGrid, String> {
    let mut out: Vec<Vec<String>> = Vec::with_capacity(rows.len());
    let mut widest = 0usize;
    for row in rows {
        let expanded: usize = row.iter().map(|c| c.span.max(1)).sum();
        if expanded > MAX_TABLE_COLUMNS {
            return Err(format!(
                "table row spans {expanded} columns, above the {MAX_TABLE_COLUMNS} column limit"
            ));
        }
        widest = widest.max(expanded);
        if widest.saturating_mul(out.len() + 1) > MAX_TABLE_CELLS {
            return Err(format!("table grid exceeds {MAX_TABLE_CELLS} cells"));
        }
        let mut resolved: Vec<String> = Vec::with_capacity(row.len());
        for cell in row {
            let value = match cell.merge {
                Merge::None => cell.text,
                Merge::FromLeft => resolved.last().cloned().unwrap_or(cell.text),
                Merge::FromAbove => out
                    .last()
                    .and_then(|above| above.get(resolved.len()).cloned())
                    .unwrap_or(cell.text),
            };
            for _ in 0..cell.span.max(1) {
                resolved.push(value.clone());
            }
        }
        out.push(resolved);
    }
    Ok(TableGrid::new(out))
}
