//! Whole-page rasterisation via pdfium (`pdfium` feature).
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. Capping the longest edge keeps memory bounded
//! regardless of physical size and matches what vision models accept.
//!
//! Called from inside the extraction `spawn_blocking` task; pdfium keeps
//! thread-local state and must not run on an async worker.

use pdfium_render::prelude::*;
use std::io::Cursor;
use tracing::debug;

/// Longest edge of a rendered page, in pixels.
const MAX_RENDERED_PIXELS: i32 = 2000;

/// Render every page of an in-memory PDF to PNG.
///
/// Returns `(page_number_1based, png_bytes)` pairs. Fails when no pdfium
/// library can be bound, so callers can fall back to embedded images.
pub(crate) fn render_pages_png(bytes: &[u8]) -> Result<Vec<(usize, Vec<u8>)>, String> {
    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| format!("pdfium library not found: {e:?}"))?;
    let pdfium = Pdfium::new(bindings);

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| format!("pdfium could not open document: {e:?}"))?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(MAX_RENDERED_PIXELS)
        .set_maximum_height(MAX_RENDERED_PIXELS);

    let mut out = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| format!("page {}: {e:?}", idx + 1))?;
        let image = bitmap.as_image();
        debug!("Rendered page {} → {}x{} px", idx + 1, image.width(), image.height());

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| format!("page {}: PNG encoding failed: {e}", idx + 1))?;
        out.push((idx + 1, png));
    }
    Ok(out)
}
