//! Image encoding for provider requests.
//!
//! Both providers take images as base64 strings embedded in the JSON request
//! body. Extracted blobs are already PNG or JPEG, so they are sent as is;
//! anything else a vision endpoint may reject is re-encoded to PNG first.

use crate::document::ImageBlob;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::io::Cursor;
use tracing::debug;

/// Base64 payload plus the MIME type it was encoded as.
pub(crate) fn to_base64(blob: &ImageBlob) -> Result<(String, &'static str), image::ImageError> {
    let (bytes, mime) = match blob.mime_type.as_str() {
        "image/png" => (std::borrow::Cow::Borrowed(&blob.bytes[..]), "image/png"),
        "image/jpeg" => (std::borrow::Cow::Borrowed(&blob.bytes[..]), "image/jpeg"),
        _ => {
            let img = image::load_from_memory(&blob.bytes)?;
            let mut buf = Vec::new();
            img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
            (std::borrow::Cow::Owned(buf), "image/png")
        }
    };
    let b64 = STANDARD.encode(&bytes);
    debug!("Encoded {} image → {} bytes base64", mime, b64.len());
    Ok((b64, mime))
}

/// Wrap a blob as an `ImageData` attachment for the hosted provider.
///
/// `detail: "high"` lets GPT-4-class models tile the image so fine print and
/// small tables stay readable.
pub(crate) fn to_image_data(blob: &ImageBlob) -> Result<ImageData, image::ImageError> {
    let (b64, mime) = to_base64(blob)?;
    Ok(ImageData::new(b64, mime).with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    fn encoded(format: image::ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    #[test]
    fn png_passes_through() {
        let bytes = encoded(image::ImageFormat::Png);
        let blob = ImageBlob {
            bytes: bytes.clone(),
            mime_type: "image/png".into(),
        };
        let data = to_image_data(&blob).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(STANDARD.decode(&data.data).unwrap(), bytes);
    }

    #[test]
    fn other_formats_become_png() {
        let blob = ImageBlob {
            bytes: encoded(image::ImageFormat::Bmp),
            mime_type: "image/bmp".into(),
        };
        let (b64, mime) = to_base64(&blob).unwrap();
        assert_eq!(mime, "image/png");
        let decoded = STANDARD.decode(b64).unwrap();
        assert_eq!(&decoded[..4], b"\x89PNG");
    }

    #[test]
    fn garbage_fails() {
        let blob = ImageBlob {
            bytes: vec![0, 1, 2],
            mime_type: "image/gif".into(),
        };
        assert!(to_base64(&blob).is_err());
    }
}
