//! PDF extractor: one text unit per page plus embedded image XObjects.
//!
//! Text comes from lopdf's content-stream decoder. Images are taken from
//! each page's XObject resources:
//!
//! | Filter        | Handling                                   |
//! |---------------|--------------------------------------------|
//! | `DCTDecode`   | passed through as JPEG                     |
//! | `FlateDecode` | inflated, wrapped as RGB/Gray/CMYK, → PNG  |
//! | anything else | skipped                                    |
//!
//! With the `pdfium` feature, whole pages are rasterised instead when a
//! pdfium library can be bound at runtime.

use super::{ExtractOptions, Extractor, ImageBudget};
use crate::document::{ContentUnit, DocumentFormat, ImageBlob};
use flate2::read::ZlibDecoder;
use lopdf::Document;
use std::io::{Cursor, Read};
use tracing::{debug, warn};

pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pdf
    }

    fn extract(&self, bytes: &[u8], options: &ExtractOptions) -> Result<Vec<ContentUnit>, String> {
        let doc = Document::load_mem(bytes).map_err(|e| format!("invalid PDF: {e}"))?;
        let pages = doc.get_pages();
        if pages.is_empty() {
            return Err("PDF has no pages".into());
        }

        let rendered = rendered_pages(bytes, options);

        let mut units = Vec::new();
        let mut budget = ImageBudget::default();

        for (&page_num, &page_id) in &pages {
            let page = page_num as usize;
            match doc.extract_text(&[page_num]) {
                Ok(text) if !text.trim().is_empty() => units.push(ContentUnit::text(page, 0, text)),
                Ok(_) => debug!("Page {} has no extractable text", page),
                Err(e) => debug!("Text extraction failed on page {}: {}", page, e),
            }

            if !options.extract_images {
                continue;
            }

            if let Some(ref rendered) = rendered {
                if let Some((_, png)) = rendered.iter().find(|(p, _)| *p == page) {
                    let blob = ImageBlob {
                        bytes: png.clone(),
                        mime_type: "image/png".into(),
                    };
                    if budget.admit(&blob) {
                        units.push(ContentUnit::image(page, 0, blob));
                    }
                }
                continue;
            }

            if budget.exhausted() {
                continue;
            }
            match doc.get_page_images(page_id) {
                Ok(images) => {
                    for image in images {
                        if budget.exhausted() {
                            break;
                        }
                        if let Some(blob) = decode_image(&image) {
                            if budget.admit(&blob) {
                                units.push(ContentUnit::image(page, 0, blob));
                            }
                        }
                    }
                }
                Err(e) => debug!("No images on page {}: {}", page, e),
            }
        }

        if units.is_empty() {
            warn!("PDF yielded no text; it may be scanned or image-only");
        }
        Ok(units)
    }
}

#[cfg(feature = "pdfium")]
fn rendered_pages(bytes: &[u8], options: &ExtractOptions) -> Option<Vec<(usize, Vec<u8>)>> {
    if !options.extract_images {
        return None;
    }
    match super::render::render_pages_png(bytes) {
        Ok(pages) => Some(pages),
        Err(e) => {
            warn!("pdfium rendering unavailable, using embedded images: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "pdfium"))]
fn rendered_pages(_bytes: &[u8], _options: &ExtractOptions) -> Option<Vec<(usize, Vec<u8>)>> {
    None
}

fn decode_image(image: &lopdf::xobject::PdfImage<'_>) -> Option<ImageBlob> {
    if image.width < 1 || image.height < 1 {
        return None;
    }
    let filters = image.filters.as_ref()?;
    if filters.iter().any(|f| f == "DCTDecode") {
        return Some(ImageBlob {
            bytes: image.content.to_vec(),
            mime_type: "image/jpeg".into(),
        });
    }
    if filters.iter().any(|f| f == "FlateDecode") {
        return match flate_to_png(image) {
            Ok(bytes) => Some(ImageBlob {
                bytes,
                mime_type: "image/png".into(),
            }),
            Err(e) => {
                debug!("Skipping FlateDecode image: {}", e);
                None
            }
        };
    }
    debug!("Unsupported image filter: {:?}", filters);
    None
}

/// Largest embedded image decoded, in pixels.
const MAX_IMAGE_PIXELS: u64 = 40_000_000;

/// Inflate a pixel stream, refusing output beyond `width × height × channels`.
fn inflate_pixels(data: &[u8], width: u32, height: u32, channels: u64) -> Result<Vec<u8>, String> {
    let pixels = u64::from(width) * u64::from(height);
    if pixels > MAX_IMAGE_PIXELS {
        return Err(format!("{width}x{height} image exceeds {MAX_IMAGE_PIXELS} pixels"));
    }
    let expected = pixels * channels;
    let mut raw = Vec::new();
    ZlibDecoder::new(data)
        .take(expected + 1)
        .read_to_end(&mut raw)
        .map_err(|e| format!("inflate failed: {e}"))?;
    if raw.len() as u64 > expected {
        return Err(format!("inflated stream exceeds the {expected} bytes its dimensions allow"));
    }
    Ok(raw)
}

fn flate_to_png(image: &lopdf::xobject::PdfImage<'_>) -> Result<Vec<u8>, String> {
    let (w, h) = (
        u32::try_from(image.width).map_err(|_| "image width out of range")?,
        u32::try_from(image.height).map_err(|_| "image height out of range")?,
    );
    let space = image.color_space.as_deref().unwrap_or("DeviceRGB");
    let channels = match space {
        "DeviceGray" | "Gray" => 1,
        "DeviceCMYK" | "CMYK" => 4,
        _ => 3,
    };
    let raw = inflate_pixels(image.content, w, h, channels)?;

    let img = match space {
        "DeviceGray" | "Gray" => {
            image::GrayImage::from_raw(w, h, raw).map(image::DynamicImage::ImageLuma8)
        }
        "DeviceCMYK" | "CMYK" => image::RgbImage::from_raw(w, h, cmyk_to_rgb(&raw))
            .map(image::DynamicImage::ImageRgb8),
        _ => image::RgbImage::from_raw(w, h, raw).map(image::DynamicImage::ImageRgb8),
    }
    .ok_or("pixel buffer does not match declared dimensions")?;

    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| format!("PNG encoding failed: {e}"))?;
    Ok(png)
}

fn cmyk_to_rgb(cmyk: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(cmyk.len() / 4 * 3);
    for px in cmyk.chunks_exact(4) {
        let k = 1.0 - f32::from(px[3]) / 255.0;
        for &c in &px[..3] {
            rgb.push((255.0 * (1.0 - f32::from(c) / 255.0) * k) as u8);
        }
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::UnitPayload;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};

    fn pdf_with_pages(texts: &[&str]) -> Vec<u8> {
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
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![72.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
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

    #[test]
    fn one_text_unit_per_page() {
        let bytes = pdf_with_pages(&["Invoice total", "Payment terms", "Appendix"]);
        let units = PdfExtractor
            .extract(&bytes, &ExtractOptions::default())
            .unwrap();
        assert_eq!(units.len(), 3);
        let pages: Vec<_> = units.iter().map(|u| u.position.page).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        match &units[0].payload {
            UnitPayload::Text(t) => assert!(t.contains("Invoice"), "got {t:?}"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(PdfExtractor
            .extract(b"%PDF-1.4 nothing else", &ExtractOptions::default())
            .is_err());
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        use flate2::write::ZlibEncoder;
        use std::io::Write;
        let mut enc = ZlibEncoder::new(Vec::new(), flate2::Compression::best());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn inflation_is_bounded_by_dimensions() {
        let stream = deflate(&vec![0u8; 1 << 20]);
        let err = inflate_pixels(&stream, 4, 4, 3).unwrap_err();
        assert!(err.contains("48 bytes"), "{err}");

        let exact = deflate(&[7u8; 48]);
        assert_eq!(inflate_pixels(&exact, 4, 4, 3).unwrap().len(), 48);
    }

    #[test]
    fn absurd_dimensions_are_refused() {
        let err = inflate_pixels(&deflate(b"x"), 100_000, 100_000, 3).unwrap_err();
        assert!(err.contains("pixels"), "{err}");
    }

    #[test]
    fn cmyk_white_and_black() {
        assert_eq!(cmyk_to_rgb(&[0, 0, 0, 0]), vec![255, 255, 255]);
        assert_eq!(cmyk_to_rgb(&[0, 0, 0, 255]), vec![0, 0, 0]);
    }
}
