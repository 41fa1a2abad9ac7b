//! Word extractor for `.docx` (WordprocessingML inside a zip container).
//!
//! `word/document.xml` is streamed once:
//!
//! * each body paragraph (`w:p`) becomes a text unit;
//! * `w:br w:type="page"` starts a new page;
//! * each top-level table (`w:tbl`) becomes one table unit, with `w:gridSpan`
//!   and `w:vMerge` expanded so the grid is rectangular; nested tables are
//!   flattened into the text of the enclosing cell;
//! * with images enabled, `a:blip r:embed` references are resolved through
//!   `word/_rels/document.xml.rels` and emitted on the page they appear.

use super::xml::{self, Merge, RawCell, Relationship};
use super::{ExtractOptions, Extractor, ImageBudget};
use crate::document::{ContentUnit, DocumentFormat};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

const DOCUMENT_PART: &str = "word/document.xml";

pub struct WordExtractor;

impl Extractor for WordExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Word
    }

    fn extract(&self, bytes: &[u8], options: &ExtractOptions) -> Result<Vec<ContentUnit>, String> {
        let mut archive = xml::open_archive(bytes)?;
        let body = xml::read_xml(&mut archive, DOCUMENT_PART)?
            .ok_or_else(|| format!("missing {DOCUMENT_PART}; not a word-processing document"))?;
        let rels = if options.extract_images {
            xml::relationships(&mut archive, DOCUMENT_PART)?
        } else {
            HashMap::new()
        };

        let mut state = BodyState::default();
        let mut reader = Reader::from_str(&body);
        reader.config_mut().trim_text(false);

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    state.open(&e, false);
                    if options.extract_images && e.local_name().as_ref() == b"blip" {
                        state.image(&e, &rels, &mut archive)?;
                    }
                }
                Ok(Event::Empty(e)) => {
                    state.open(&e, true);
                    if options.extract_images && e.local_name().as_ref() == b"blip" {
                        state.image(&e, &rels, &mut archive)?;
                    }
                }
                Ok(Event::Text(t)) if state.in_text => {
                    let text = t
                        .unescape()
                        .map_err(|e| format!("bad text in {DOCUMENT_PART}: {e}"))?;
                    state.paragraph.push_str(&text);
                }
                Ok(Event::End(e)) => state.close(e.local_name().as_ref())?,
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(format!(
                        "malformed {DOCUMENT_PART} at byte {}: {e}",
                        reader.buffer_position()
                    ))
                }
                _ => {}
            }
        }

        Ok(state.units)
    }
}

#[derive(Default)]
struct BodyState {
    units: Vec<ContentUnit>,
    page: usize,
    paragraph: String,
    in_text: bool,
    table_depth: usize,
    rows: Vec<Vec<RawCell>>,
    row: Vec<RawCell>,
    cell: Option<RawCell>,
    budget: ImageBudget,
}

impl BodyState {
    fn page(&self) -> usize {
        self.page + 1
    }

    fn open(&mut self, e: &BytesStart<'_>, empty: bool) {
        match e.local_name().as_ref() {
            b"t" if !empty => self.in_text = true,
            b"tab" => self.paragraph.push('\t'),
            b"cr" => self.paragraph.push('\n'),
            b"br" => {
                if xml::attr(e, b"type").as_deref() == Some("page") {
                    self.flush_paragraph();
                    self.page += 1;
                } else {
                    self.paragraph.push('\n');
                }
            }
            b"tbl" if !empty => {
                self.flush_paragraph();
                self.table_depth += 1;
                if self.table_depth == 1 {
                    self.rows.clear();
                }
            }
            b"tr" if !empty && self.table_depth == 1 => self.row.clear(),
            b"tc" if !empty && self.table_depth == 1 => self.cell = Some(RawCell::default()),
            b"gridSpan" if self.table_depth == 1 => {
                if let Some(cell) = self.cell.as_mut() {
                    cell.span = xml::parse_span(xml::attr(e, b"val"));
                }
            }
            b"vMerge" if self.table_depth == 1 => {
                if let Some(cell) = self.cell.as_mut() {
                    if xml::attr(e, b"val").as_deref() != Some("restart") {
                        cell.merge = Merge::FromAbove;
                    }
                }
            }
            _ => {}
        }
    }

    fn close(&mut self, name: &[u8]) -> Result<(), String> {
        match name {
            b"t" => self.in_text = false,
            b"p" => {
                if self.table_depth > 0 {
                    let para = std::mem::take(&mut self.paragraph);
                    if let Some(cell) = self.cell.as_mut() {
                        cell.push_paragraph(&para);
                    }
                } else {
                    self.flush_paragraph();
                }
            }
            b"tc" if self.table_depth == 1 => {
                if let Some(cell) = self.cell.take() {
                    self.row.push(cell);
                }
            }
            b"tr" if self.table_depth == 1 => {
                let row = std::mem::take(&mut self.row);
                self.rows.push(row);
            }
            b"tbl" if self.table_depth > 0 => {
                self.table_depth -= 1;
                if self.table_depth == 0 {
                    let grid = xml::resolve_table(std::mem::take(&mut self.rows))
                        .map_err(|e| format!("{DOCUMENT_PART}: {e}"))?;
                    if !grid.is_empty() {
                        self.units.push(ContentUnit::table(self.page(), 0, grid));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn flush_paragraph(&mut self) {
        let para = std::mem::take(&mut self.paragraph);
        if !para.trim().is_empty() {
            self.units.push(ContentUnit::text(self.page(), 0, para));
        }
    }

    fn image(
        &mut self,
        e: &BytesStart<'_>,
        rels: &HashMap<String, Relationship>,
        archive: &mut xml::Archive<'_>,
    ) -> Result<(), String> {
        if self.budget.exhausted() {
            return Ok(());
        }
        let Some(rel) = xml::attr(e, b"embed").and_then(|id| rels.get(&id)) else {
            return Ok(());
        };
        let Some(bytes) = xml::read_entry(archive, &rel.target)? else {
            return Ok(());
        };
        if let Some(blob) = xml::media_blob(&rel.target, bytes) {
            if self.budget.admit(&blob) {
                self.units.push(ContentUnit::image(self.page(), 0, blob));
            }
        }
        Ok(())
    }
}
