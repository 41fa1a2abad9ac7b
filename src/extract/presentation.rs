//! Presentation extractor for `.pptx` (PresentationML inside a zip container).
//!
//! Slides are read in numeric order (`ppt/slides/slide1.xml`, `slide2.xml`,
//! …) and the slide number becomes the unit's page:
//!
//! * every shape text body (`p:txBody`) becomes one text unit, its
//!   paragraphs joined by newlines;
//! * every `a:tbl` becomes a table unit; `gridSpan` origins are followed by
//!   `hMerge` placeholder cells and `rowSpan` origins by `vMerge` ones, and
//!   each placeholder repeats the value it continues;
//! * pictures (`a:blip r:embed`) are resolved through the slide's `.rels`
//!   part when images are enabled;
//! * the speaker notes part linked from the slide is appended as a final
//!   text unit, prefixed with `Speaker notes:`.

use super::xml::{self, Merge, RawCell, Relationship};
use super::{ExtractOptions, Extractor, ImageBudget};
use crate::document::{ContentUnit, DocumentFormat};
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

static RE_SLIDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").expect("slide regex"));

const NOTES_REL_SUFFIX: &str = "/notesSlide";

pub struct PresentationExtractor;

impl Extractor for PresentationExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Presentation
    }

    fn extract(&self, bytes: &[u8], options: &ExtractOptions) -> Result<Vec<ContentUnit>, String> {
        let mut archive = xml::open_archive(bytes)?;

        let mut slides: Vec<(usize, String)> = archive
            .file_names()
            .filter_map(|name| {
                let n = RE_SLIDE.captures(name)?.get(1)?.as_str().parse().ok()?;
                Some((n, name.to_string()))
            })
            .collect();
        if slides.is_empty() {
            return Err("no slides found; not a presentation document".into());
        }
        slides.sort_by_key(|(n, _)| *n);

        let mut units = Vec::new();
        let mut budget = ImageBudget::default();

        for (number, part) in slides {
            let xml_text = xml::read_xml(&mut archive, &part)?
                .ok_or_else(|| format!("slide part '{part}' disappeared"))?;
            let rels = xml::relationships(&mut archive, &part)?;

            let mut slide = SlideState::new(number);
            slide.parse(&xml_text, &part, |slide, e| {
                if options.extract_images {
                    slide.image(e, &rels, &mut archive, &mut budget)
                } else {
                    Ok(())
                }
            })?;
            units.append(&mut slide.units);

            if let Some(notes) = rels.values().find(|r| r.kind.ends_with(NOTES_REL_SUFFIX)) {
                match speaker_notes(&mut archive, &notes.target) {
                    Ok(Some(text)) => units.push(ContentUnit::text(
                        number,
                        0,
                        format!("Speaker notes: {text}"),
                    )),
                    Ok(None) => {}
                    Err(e) => debug!("Ignoring notes for slide {}: {}", number, e),
                }
            }
        }

        Ok(units)
    }
}

struct SlideState {
    number: usize,
    units: Vec<ContentUnit>,
    paragraph: String,
    body: Vec<String>,
    in_text: bool,
    in_field: bool,
    table_depth: usize,
    rows: Vec<Vec<RawCell>>,
    row: Vec<RawCell>,
    cell: Option<RawCell>,
}

impl SlideState {
    fn new(number: usize) -> Self {
        Self {
            number,
            units: Vec::new(),
            paragraph: String::new(),
            body: Vec::new(),
            in_text: false,
            in_field: false,
            table_depth: 0,
            rows: Vec::new(),
            row: Vec::new(),
            cell: None,
        }
    }

    /// Stream one slide (or notes) part. `on_blip` is invoked for pictures.
    fn parse<F>(&mut self, text: &str, part: &str, mut on_blip: F) -> Result<(), String>
    where
        F: FnMut(&mut Self, &BytesStart<'_>) -> Result<(), String>,
    {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    self.open(&e, false);
                    if e.local_name().as_ref() == b"blip" {
                        on_blip(self, &e)?;
                    }
                }
                Ok(Event::Empty(e)) => {
                    self.open(&e, true);
                    if e.local_name().as_ref() == b"blip" {
                        on_blip(self, &e)?;
                    }
                }
                Ok(Event::Text(t)) if self.in_text && !self.in_field => {
                    let s = t.unescape().map_err(|e| format!("bad text in '{part}': {e}"))?;
                    self.paragraph.push_str(&s);
                }
                Ok(Event::End(e)) => self.close(e.local_name().as_ref(), part)?,
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(format!(
                        "malformed '{part}' at byte {}: {e}",
                        reader.buffer_position()
                    ))
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn open(&mut self, e: &BytesStart<'_>, empty: bool) {
        match e.local_name().as_ref() {
            b"t" if !empty => self.in_text = true,
            b"fld" if !empty => self.in_field = true,
            b"br" => self.paragraph.push('\n'),
            b"tbl" if !empty => {
                self.table_depth += 1;
                if self.table_depth == 1 {
                    self.rows.clear();
                }
            }
            b"tr" if !empty && self.table_depth == 1 => self.row.clear(),
            b"tc" if self.table_depth == 1 => {
                let merge = if is_true(xml::attr(e, b"hMerge")) {
                    Merge::FromLeft
                } else if is_true(xml::attr(e, b"vMerge")) {
                    Merge::FromAbove
                } else {
                    Merge::None
                };
                let cell = RawCell {
                    merge,
                    ..RawCell::default()
                };
                if empty {
                    self.row.push(cell);
                } else {
                    self.cell = Some(cell);
                }
            }
            _ => {}
        }
    }

    fn close(&mut self, name: &[u8], part: &str) -> Result<(), String> {
        match name {
            b"t" => self.in_text = false,
            b"fld" => self.in_field = false,
            b"p" => {
                let para = std::mem::take(&mut self.paragraph);
                if self.table_depth > 0 {
                    if let Some(cell) = self.cell.as_mut() {
                        cell.push_paragraph(&para);
                    }
                } else if !para.trim().is_empty() {
                    self.body.push(para.trim_end().to_string());
                }
            }
            b"txBody" if self.table_depth == 0 => {
                let body = std::mem::take(&mut self.body);
                if !body.is_empty() {
                    self.units.push(ContentUnit::text(self.number, 0, body.join("\n")));
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
                        .map_err(|e| format!("'{part}': {e}"))?;
                    if !grid.is_empty() {
                        self.units.push(ContentUnit::table(self.number, 0, grid));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn image(
        &mut self,
        e: &BytesStart<'_>,
        rels: &HashMap<String, Relationship>,
        archive: &mut xml::Archive<'_>,
        budget: &mut ImageBudget,
    ) -> Result<(), String> {
        if budget.exhausted() {
            return Ok(());
        }
        let Some(rel) = xml::attr(e, b"embed").and_then(|id| rels.get(&id)) else {
            return Ok(());
        };
        let Some(bytes) = xml::read_entry(archive, &rel.target)? else {
            return Ok(());
        };
        if let Some(blob) = xml::media_blob(&rel.target, bytes) {
            if budget.admit(&blob) {
                self.units.push(ContentUnit::image(self.number, 0, blob));
            }
        }
        Ok(())
    }
}

fn is_true(v: Option<String>) -> bool {
    matches!(v.as_deref(), Some("1") | Some("true"))
}

/// Text of a notes slide, without the slide-number field.
fn speaker_notes(archive: &mut xml::Archive<'_>, part: &str) -> Result<Option<String>, String> {
    let Some(text) = xml::read_xml(archive, part)? else {
        return Ok(None);
    };
    let mut state = SlideState::new(0);
    state.parse(&text, part, |_, _| Ok(()))?;
    let joined = state
        .units
        .iter()
        .map(ContentUnit::raw_text)
        .collect::<Vec<_>>()
        .join("\n");
    Ok((!joined.trim().is_empty()).then_some(joined))
}
